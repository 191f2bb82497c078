// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use crate::events::StreamSink;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

impl ToolCall {
    /// A required, non-blank string argument.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
    }
}

/// The result of executing a tool.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    /// If true, the tool execution failed non-fatally (returned error message).
    pub is_error: bool,
    /// The run ends with this output as its answer instead of handing it
    /// back to the model.
    pub direct: bool,
    /// `content` already reached the stream sink as tokens.
    pub streamed: bool,
    /// Ids of documents the output was built from.
    pub source_ids: Vec<String>,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: content.into(), ..Self::default() }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: msg.into(), is_error: true, ..Self::default() }
    }

    pub fn direct(mut self) -> Self {
        self.direct = true;
        self
    }

    pub fn streamed(mut self) -> Self {
        self.streamed = true;
        self
    }

    pub fn with_source_ids(mut self, ids: Vec<String>) -> Self {
        self.source_ids = ids;
        self
    }
}

/// Per-invocation environment handed to a tool by the registry.
#[derive(Clone, Default)]
pub struct ToolContext {
    /// Present when the registry has a streaming sink attached.
    pub sink: Option<StreamSink>,
}

/// Trait that every tool, including wrapped sub-agents, implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Whether a call can end the caller's run with its output, see
    /// [`ToolOutput::direct`].
    fn returns_direct(&self) -> bool {
        false
    }
    /// Execute the tool.  Errors should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput;
}
