// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use campus_config::AgentKind;
use campus_tools::{StreamSink, Tool, ToolCall, ToolContext, ToolOutput};

use crate::{
    catalog::{self, AgentDeps},
    error::{RunError, RunResult},
    session::UserContext,
};

/// A whole sub-agent exposed as one tool.
///
/// Each call builds the sub-agent from scratch, bound to the same
/// [`UserContext`] as the caller, and its answer ends the caller's run
/// unchanged.
pub struct AgentAdapter {
    kind: AgentKind,
    name: String,
    description: &'static str,
    deps: Arc<AgentDeps>,
    user: Arc<UserContext>,
    source_ids: Mutex<Vec<String>>,
    successes: AtomicUsize,
}

impl AgentAdapter {
    pub fn new(kind: AgentKind, deps: Arc<AgentDeps>, user: Arc<UserContext>) -> Self {
        Self {
            kind,
            name: kind.tool_name(),
            description: catalog::describe(kind),
            deps,
            user,
            source_ids: Mutex::new(Vec::new()),
            successes: AtomicUsize::new(0),
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    /// Run the sub-agent.  Every failure, at construction or during the
    /// run, comes back as `AgentUnavailable`.
    ///
    /// With a sink the sub-agent streams into a staged child, and its events
    /// reach `sink` only once it has answered.
    pub async fn invoke(&self, input: &str, sink: Option<&StreamSink>) -> RunResult {
        info!(agent = %self.kind, input, "handing off to sub-agent");
        let staged = sink.map(StreamSink::staged);
        match catalog::run_agent(self.kind, &self.deps, &self.user, input, staged.as_ref()).await {
            Ok(resp) => {
                if let Some(staged) = &staged {
                    staged.commit().await;
                }
                let mut ids = self.source_ids.lock().unwrap_or_else(PoisonError::into_inner);
                for id in &resp.source_ids {
                    if !ids.contains(id) {
                        ids.push(id.clone());
                    }
                }
                drop(ids);
                self.successes.fetch_add(1, Ordering::Relaxed);
                Ok(resp)
            }
            Err(e) => {
                warn!(agent = %self.kind, error = %e, "sub-agent failed");
                Err(RunError::AgentUnavailable(self.kind.to_string()))
            }
        }
    }

    /// Source ids gathered by successful calls since the last [`reset`](Self::reset).
    pub fn source_ids(&self) -> Vec<String> {
        self.source_ids.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Forget the source ids and successes of earlier runs.
    pub fn reset(&self) {
        self.source_ids.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.successes.store(0, Ordering::Relaxed);
    }

    /// Whether any call so far produced an answer.
    pub fn was_used(&self) -> bool {
        self.successes.load(Ordering::Relaxed) > 0
    }
}

#[async_trait]
impl Tool for AgentAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_input": { "type": "string", "description": "ユーザーの入力" }
            },
            "required": ["user_input"],
            "additionalProperties": false
        })
    }

    fn returns_direct(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let Some(input) = call.str_arg("user_input") else {
            return ToolOutput::err(&call.id, "missing or empty 'user_input'");
        };
        match self.invoke(input, ctx.sink.as_ref()).await {
            Ok(resp) => {
                let out = ToolOutput::ok(&call.id, resp.output).direct().with_source_ids(resp.source_ids);
                // With a sink the committed stage already carried the answer.
                if ctx.sink.is_some() { out.streamed() } else { out }
            }
            // Not direct: the caller's model sees the failure and carries on.
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}
