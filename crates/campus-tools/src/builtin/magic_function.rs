// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Diagnostic tool: returns its input plus two.
pub struct MagicFunctionTool;

#[async_trait]
impl Tool for MagicFunctionTool {
    fn name(&self) -> &str {
        "magic_function_tool"
    }

    fn description(&self) -> &str {
        "Applies a magic function to an input."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "input": { "type": "integer", "description": "Input value for magic function" }
            },
            "required": ["input"]
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let Some(input) = call.args.get("input").and_then(Value::as_i64) else {
            return ToolOutput::err(&call.id, "'input' must be an integer");
        };
        info!(input, "applying magic function");
        match input.checked_add(2) {
            Some(v) => ToolOutput::ok(&call.id, v.to_string()),
            None => ToolOutput::err(&call.id, "input out of range"),
        }
    }
}
