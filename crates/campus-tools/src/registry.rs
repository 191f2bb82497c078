// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use campus_model::ToolSchema;
use thiserror::Error;

use crate::{StreamSink, Tool, ToolContext};

/// Setup-time failure while assembling an agent's tools.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("duplicate tool name: {0}")]
    DuplicateToolName(String),
    #[error("invalid tool: {0}")]
    InvalidTool(String),
}

struct Entry {
    tool: Arc<dyn Tool>,
    sink: Option<StreamSink>,
}

/// The tools one agent may call during one run, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool.  The registry is left untouched when this fails.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ConfigError> {
        validate(tool.as_ref())?;
        if self.get(tool.name()).is_some() {
            return Err(ConfigError::DuplicateToolName(tool.name().to_string()));
        }
        self.entries.push(Entry { tool, sink: None });
        Ok(())
    }

    pub fn add(&mut self, tool: impl Tool + 'static) -> Result<(), ConfigError> {
        self.register(Arc::new(tool))
    }

    /// Give every currently registered tool the sink, replacing any earlier one.
    pub fn attach_streaming_sink(&mut self, sink: StreamSink) {
        for entry in &mut self.entries {
            entry.sink = Some(sink.clone());
        }
    }

    pub fn detach_streaming_sink(&mut self) {
        for entry in &mut self.entries {
            entry.sink = None;
        }
    }

    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        self.entries.iter().map(|e| e.tool.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.tool.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.entries.iter().find(|e| e.tool.name() == name).map(|e| e.tool.clone())
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.entries
            .iter()
            .map(|e| ToolSchema {
                name: e.tool.name().to_string(),
                description: e.tool.description().to_string(),
                parameters: e.tool.parameters_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Context a call to `name` would run with.
    pub fn context_for(&self, name: &str) -> ToolContext {
        let sink = self.entries.iter().find(|e| e.tool.name() == name).and_then(|e| e.sink.clone());
        ToolContext { sink }
    }
}

/// Function names must satisfy the chat-completions API pattern
/// `^[a-zA-Z0-9_-]{1,64}$` and parameters must be a JSON-Schema object.
fn validate(tool: &dyn Tool) -> Result<(), ConfigError> {
    let name = tool.name();
    let name_ok = !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !name_ok {
        return Err(ConfigError::InvalidTool(format!("bad name {name:?}")));
    }
    let schema = tool.parameters_schema();
    if schema.get("type").and_then(|t| t.as_str()) != Some("object") {
        return Err(ConfigError::InvalidTool(format!("{name}: parameters must be an object schema")));
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
