// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a run produced no answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("model error: {0}")]
    Model(String),
    #[error("tool error: {0}")]
    Tool(String),
    #[error("malformed agent result")]
    Malformed,
    #[error("run timed out after {0:?}")]
    Timeout(Duration),
    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),
    #[error("run cancelled")]
    Cancelled,
}

/// A successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub output: String,
    /// Documents the answer was built from, in retrieval order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ids: Vec<String>,
}

impl AgentResponse {
    pub fn new(output: impl Into<String>) -> Self {
        Self { output: output.into(), source_ids: Vec::new() }
    }
}

pub type RunResult = Result<AgentResponse, RunError>;
