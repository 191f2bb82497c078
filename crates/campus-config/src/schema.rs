// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use anyhow::bail;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub classify: ClassifyConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl Config {
    /// Reject values that would make a run impossible to drive.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent.chunk_size == 0 {
            bail!("agent.chunk_size must be greater than zero");
        }
        if self.agent.stream_buffer == 0 {
            bail!("agent.stream_buffer must be greater than zero");
        }
        if self.agent.max_tool_rounds == 0 {
            bail!("agent.max_tool_rounds must be greater than zero");
        }
        for group in &self.classify.roles {
            if group.category.trim().is_empty() {
                bail!("classify.roles entries need a non-empty category");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider identifier: "openai" | "azure" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  For "azure" this is the resource endpoint,
    /// e.g. `https://my-resource.openai.azure.com`.
    pub base_url: Option<String>,
    /// Azure deployment name.  Defaults to `name` when not set.
    pub azure_deployment: Option<String>,
    /// Azure REST API version string, e.g. `"2024-06-01"`.
    pub azure_api_version: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
    /// Path to YAML mock-responses file (used when provider = "mock").
    /// Can also be set via the CAMPUS_MOCK_RESPONSES environment variable.
    pub mock_responses_file: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "azure".into(),
            name: "gpt-4o".into(),
            api_key_env: Some("AZURE_OPENAI_API_KEY".into()),
            api_key: None,
            base_url: None,
            azure_deployment: None,
            azure_api_version: Some("2024-06-01".into()),
            max_tokens: None,
            temperature: Some(0.0),
            mock_responses_file: None,
        }
    }
}

fn default_chunk_size() -> usize {
    5
}
fn default_run_timeout_secs() -> u64 {
    120
}
fn default_max_tool_rounds() -> u32 {
    10
}
fn default_stream_buffer() -> usize {
    64
}
fn default_agent_kind() -> AgentKind {
    AgentKind::Classify
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent used when none is named on the command line
    #[serde(default = "default_agent_kind")]
    pub default_agent: AgentKind,
    /// Number of characters buffered before a streamed chunk is emitted
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Wall-clock limit for one run, tool calls included (0 = no limit).
    #[serde(default = "default_run_timeout_secs", alias = "tool_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Maximum number of model ↔ tool rounds before the model is asked to
    /// answer without tools
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Capacity of the per-run event channel
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl AgentConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_agent: default_agent_kind(),
            chunk_size: default_chunk_size(),
            run_timeout_secs: default_run_timeout_secs(),
            max_tool_rounds: default_max_tool_rounds(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

/// The fixed set of agents the runtime knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Picks a specialised agent for each user message and hands off to it
    Classify,
    /// General-purpose assistant
    Main,
    /// Helps the user submit an official-absence form
    Dummy,
    /// Casual conversation
    SmallTalk,
    /// Explains what the assistant can help with
    SelfIntroduce,
    /// Answers questions from the school's documents
    SearchSchoolData,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        AgentKind::Classify,
        AgentKind::Main,
        AgentKind::Dummy,
        AgentKind::SmallTalk,
        AgentKind::SelfIntroduce,
        AgentKind::SearchSchoolData,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Classify => "classify",
            AgentKind::Main => "main",
            AgentKind::Dummy => "dummy",
            AgentKind::SmallTalk => "small_talk",
            AgentKind::SelfIntroduce => "self_introduce",
            AgentKind::SearchSchoolData => "search_school_data",
        }
    }

    /// Name under which the agent is exposed as a tool to a dispatcher.
    pub fn tool_name(self) -> String {
        format!("calling_{}_agent", self.as_str())
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A top-level task category and the concrete sub-types it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGroup {
    pub category: String,
    #[serde(default)]
    pub types: Vec<String>,
}

/// How `classify_role_tool` resolves a sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifyStrategy {
    /// Sub-type names are matched against the input text
    #[default]
    Keyword,
    /// The model extracts key phrases and judges similarity
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyConfig {
    #[serde(default)]
    pub strategy: ClassifyStrategy,
    /// Ordered; the first category found in the input wins.
    #[serde(default = "ClassifyConfig::default_roles")]
    pub roles: Vec<RoleGroup>,
}

impl ClassifyConfig {
    fn default_roles() -> Vec<RoleGroup> {
        vec![RoleGroup {
            category: "申請".into(),
            types: ["欠課届", "遅刻届", "遅延届", "早退届", "公欠届"]
                .into_iter()
                .map(String::from)
                .collect(),
        }]
    }
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            strategy: ClassifyStrategy::default(),
            roles: Self::default_roles(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// YAML file holding `{id, title, content}` documents.  When unset the
    /// school-data agent is unavailable.
    pub documents_file: Option<String>,
    /// Number of documents returned per search
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { documents_file: None, top_k: default_top_k() }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
