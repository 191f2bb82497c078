// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Enum-keyed agent catalog: what each [`AgentKind`] is made of.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, warn};

use campus_config::{AgentKind, ClassifyStrategy, Config};
use campus_model::ModelProvider;
use campus_tools::{
    render_sections, Classifier, ClassifyRoleTool, ConfigError, KeywordClassifier,
    MagicFunctionTool, ModelClassifier, Retriever, SearchSchoolDataTool, StaticRetriever,
    StreamSink, SubmitOfficialAbsenceTool, ToolRegistry,
};

use crate::{
    adapter::AgentAdapter,
    dispatcher::Dispatcher,
    engine::ExecutionEngine,
    error::{RunError, RunResult},
    prompts::{role_of, system_prompt},
    session::UserContext,
};

/// Agents a dispatcher may hand a turn to, in the order offered to the model.
pub const DISPATCH_TARGETS: [AgentKind; 4] = [
    AgentKind::Dummy,
    AgentKind::SearchSchoolData,
    AgentKind::SmallTalk,
    AgentKind::SelfIntroduce,
];

/// Shared collaborators every agent is built from.
pub struct AgentDeps {
    pub model: Arc<dyn ModelProvider>,
    pub config: Arc<Config>,
    pub classifier: Arc<dyn Classifier>,
    /// `None` leaves the school-data agent unavailable.
    pub retriever: Option<Arc<dyn Retriever>>,
    /// Wall-clock limit applied to every agent run.
    pub run_timeout: Option<Duration>,
}

impl AgentDeps {
    pub fn new(model: Arc<dyn ModelProvider>, config: Config) -> Self {
        let classifier: Arc<dyn Classifier> = match config.classify.strategy {
            ClassifyStrategy::Keyword => Arc::new(KeywordClassifier),
            ClassifyStrategy::Model => Arc::new(ModelClassifier::new(model.clone())),
        };
        Self {
            run_timeout: config.agent.run_timeout(),
            model,
            config: Arc::new(config),
            classifier,
            retriever: None,
        }
    }

    /// Model and retriever as configured.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let model: Arc<dyn ModelProvider> = Arc::from(campus_model::from_config(&config.model)?);
        let retriever = match &config.retrieval.documents_file {
            Some(path) => {
                let r = StaticRetriever::from_file(path)
                    .with_context(|| format!("loading retrieval documents from {path}"))?;
                Some(Arc::new(r) as Arc<dyn Retriever>)
            }
            None => None,
        };
        Ok(Self::new(model, config).with_retriever_opt(retriever))
    }

    pub fn with_retriever(self, retriever: Arc<dyn Retriever>) -> Self {
        self.with_retriever_opt(Some(retriever))
    }

    fn with_retriever_opt(mut self, retriever: Option<Arc<dyn Retriever>>) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }
}

/// Everything needed to stand up one agent for one run.
pub struct AgentParts {
    pub kind: AgentKind,
    /// Role block for the system prompt
    pub assistant_info: String,
    pub registry: ToolRegistry,
    /// Adapters inside `registry`, kept typed for their side data.
    pub adapters: Vec<Arc<AgentAdapter>>,
    /// Documents consulted while building the agent.
    pub source_ids: Vec<String>,
}

/// Tool description a dispatcher sees for `kind`.
pub fn describe(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Classify => "ユーザーの依頼を適切なエージェントに振り分けるエージェントを呼び出す。",
        AgentKind::Main => "メインのエージェントを呼び出す。",
        AgentKind::Dummy => "ダミーエージェントを呼び出す。公欠届の提出を手伝う。",
        AgentKind::SmallTalk => "雑談エージェントを呼び出すツール",
        AgentKind::SelfIntroduce => {
            "自己紹介を行うエージェントを呼び出す。どのような手伝いができるかをユーザーに伝える。"
        }
        AgentKind::SearchSchoolData => "学校情報を検索するエージェントを呼び出すツール",
    }
}

fn unavailable(kind: AgentKind, err: ConfigError) -> RunError {
    warn!(agent = %kind, error = %err, "agent tool set is invalid");
    RunError::AgentUnavailable(kind.to_string())
}

/// Resolve `kind` to its role and a fresh tool set.  `input` is the message
/// the agent is about to answer; the school-data agent retrieves with it.
pub async fn build(
    kind: AgentKind,
    deps: &Arc<AgentDeps>,
    user: &Arc<UserContext>,
    input: &str,
) -> Result<AgentParts, RunError> {
    let mut registry = ToolRegistry::new();
    let mut adapters = Vec::new();
    let mut assistant_info = role_of(kind).to_string();
    let mut source_ids = Vec::new();

    match kind {
        AgentKind::Classify => {
            let classify = ClassifyRoleTool::new(deps.config.classify.roles.clone(), deps.classifier.clone());
            registry.add(classify).map_err(|e| unavailable(kind, e))?;
            for target in DISPATCH_TARGETS {
                let adapter = Arc::new(AgentAdapter::new(target, deps.clone(), user.clone()));
                registry.register(adapter.clone()).map_err(|e| unavailable(kind, e))?;
                adapters.push(adapter);
            }
        }
        AgentKind::Main => {
            registry.add(MagicFunctionTool).map_err(|e| unavailable(kind, e))?;
            if let Some(retriever) = &deps.retriever {
                let search = SearchSchoolDataTool::new(retriever.clone(), deps.config.retrieval.top_k);
                registry.add(search).map_err(|e| unavailable(kind, e))?;
            }
        }
        AgentKind::SmallTalk | AgentKind::SelfIntroduce => {
            registry.add(MagicFunctionTool).map_err(|e| unavailable(kind, e))?;
        }
        AgentKind::Dummy => {
            registry.add(SubmitOfficialAbsenceTool).map_err(|e| unavailable(kind, e))?;
        }
        AgentKind::SearchSchoolData => {
            let Some(retriever) = &deps.retriever else {
                warn!(agent = %kind, "no retriever configured");
                return Err(RunError::AgentUnavailable(kind.to_string()));
            };
            let docs = retriever
                .retrieve(input, deps.config.retrieval.top_k)
                .await
                .map_err(|e| {
                    warn!(agent = %kind, error = %format!("{e:#}"), "retrieval failed");
                    RunError::AgentUnavailable(kind.to_string())
                })?;
            debug!(agent = %kind, hits = docs.len(), "pre-fetched school documents");
            assistant_info.push_str(&render_sections(&docs));
            source_ids = docs.into_iter().map(|d| d.id).collect();
        }
    }

    Ok(AgentParts { kind, assistant_info, registry, adapters, source_ids })
}

impl AgentParts {
    /// Bind the parts to a model and user into a runnable engine.
    pub fn into_engine(self, deps: &AgentDeps, user: &UserContext) -> ExecutionEngine {
        ExecutionEngine::new(deps.model.clone(), system_prompt(&self.assistant_info, user), self.registry)
            .with_label(self.kind.as_str())
            .with_max_tool_rounds(deps.config.agent.max_tool_rounds)
            .with_timeout(deps.run_timeout)
            .with_source_ids(self.source_ids)
    }
}

/// Build `kind` fresh and run it once against the user's current history.
/// Nothing is recorded; that is left to the caller.
pub async fn run_agent(
    kind: AgentKind,
    deps: &Arc<AgentDeps>,
    user: &Arc<UserContext>,
    input: &str,
    sink: Option<&StreamSink>,
) -> RunResult {
    if kind == AgentKind::Classify {
        let mut dispatcher = Dispatcher::new(deps.clone(), user.clone(), input).await?;
        return dispatcher.run(input, sink).await;
    }
    let parts = build(kind, deps, user, input).await?;
    let mut engine = parts.into_engine(deps, user);
    if let Some(sink) = sink {
        engine.registry_mut().attach_streaming_sink(sink.clone());
    }
    let history = user.snapshot().await;
    engine.run_once(&history, input, sink).await
}
