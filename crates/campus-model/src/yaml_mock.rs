// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! YAML-scripted mock provider for offline CLI sessions and end-to-end tests.
//!
//! Rules are tried in file order against the last user message; the first
//! rule that matches wins, and a `default` rule is used when none does.
//! Because every agent shares one provider, a rule may also be restricted
//! to requests whose system prompt contains `system_contains`.
//!
//! ```yaml
//! rules:
//!   - match_type: contains
//!     pattern: "公欠"
//!     system_contains: "分類"
//!     tool_calls:
//!       - id: tc-1
//!         tool: calling_dummy_agent
//!         args: { user_input: "公欠届を出したい" }
//!   - match_type: contains
//!     pattern: "公欠"
//!     reply: "公欠届の申請を手伝います。"
//!   - match_type: default
//!     reply: "ご用件をもう少し詳しく教えてください。"
//! ```
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use futures::stream;
use serde::Deserialize;
use tracing::debug;

use crate::{provider::ResponseStream, CompletionRequest, MessageContent, ResponseEvent, Role};

#[derive(Debug, Deserialize)]
struct MockScript {
    rules: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
struct Rule {
    match_type: MatchType,
    #[serde(default)]
    pattern: String,
    system_contains: Option<String>,
    reply: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDef>,
    /// Reply sent once the request ends with a tool result.
    after_tool_reply: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum MatchType {
    Contains,
    Equals,
    Regex,
    Default,
}

#[derive(Debug, Deserialize)]
struct ToolCallDef {
    id: String,
    tool: String,
    #[serde(default)]
    args: serde_json::Value,
}

impl Rule {
    fn matches(&self, user: &str, system: &str) -> bool {
        if let Some(needle) = &self.system_contains {
            if !system.contains(needle.as_str()) {
                return false;
            }
        }
        match self.match_type {
            MatchType::Contains => user.contains(self.pattern.as_str()),
            MatchType::Equals => user.trim() == self.pattern,
            MatchType::Regex => regex::Regex::new(&self.pattern)
                .map(|re| re.is_match(user))
                .unwrap_or(false),
            MatchType::Default => false,
        }
    }
}

pub struct YamlMockProvider {
    script: MockScript,
    calls: AtomicU32,
}

impl YamlMockProvider {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading mock script {}", path.display()))?;
        Self::load(&text)
    }

    pub fn load(yaml: &str) -> anyhow::Result<Self> {
        let script: MockScript = serde_yaml::from_str(yaml).context("parsing mock script YAML")?;
        Ok(Self { script, calls: AtomicU32::new(0) })
    }

    fn find_rule(&self, user: &str, system: &str) -> Option<&Rule> {
        self.script
            .rules
            .iter()
            .find(|r| r.match_type != MatchType::Default && r.matches(user, system))
            .or_else(|| {
                self.script.rules.iter().find(|r| {
                    r.match_type == MatchType::Default
                        && r.system_contains.as_deref().map_or(true, |s| system.contains(s))
                })
            })
    }
}

#[async_trait]
impl crate::ModelProvider for YamlMockProvider {
    fn name(&self) -> &str {
        "yaml-mock"
    }
    fn model_name(&self) -> &str {
        "yaml-mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let user = req.last_user_text().unwrap_or_default();
        let system = req
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .and_then(|m| m.as_text())
            .unwrap_or_default();
        let after_tool = matches!(
            req.messages.last().map(|m| &m.content),
            Some(MessageContent::ToolResult { .. })
        );
        debug!(call, after_tool, user = %user, "yaml mock complete");

        let rule = self.find_rule(user, system);
        let events = match rule {
            None => reply_events("[no mock rule matched]"),
            Some(r) if after_tool => reply_events(
                r.after_tool_reply.as_deref().or(r.reply.as_deref()).unwrap_or_default(),
            ),
            Some(r) if !r.tool_calls.is_empty() => tool_call_events(&r.tool_calls),
            Some(r) => reply_events(r.reply.as_deref().unwrap_or_default()),
        };
        Ok(Box::pin(stream::iter(events)))
    }
}

/// Replies are streamed one character at a time so chunking is visible.
fn reply_events(text: &str) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events: Vec<anyhow::Result<ResponseEvent>> =
        text.chars().map(|c| Ok(ResponseEvent::TextDelta(c.to_string()))).collect();
    events.push(Ok(ResponseEvent::Done));
    events
}

fn tool_call_events(calls: &[ToolCallDef]) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events: Vec<anyhow::Result<ResponseEvent>> = calls
        .iter()
        .enumerate()
        .map(|(i, tc)| {
            Ok(ResponseEvent::ToolCall {
                index: i as u32,
                id: tc.id.clone(),
                name: tc.tool.clone(),
                arguments: tc.args.to_string(),
            })
        })
        .collect();
    events.push(Ok(ResponseEvent::Done));
    events
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
