// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Periods in a school day; `classes` has one slot per period.
pub const PERIODS: usize = 6;

pub const SUBMITTED: &str = "公欠の申請が完了しました。";

#[derive(Debug, Deserialize)]
struct AbsenceForm {
    name: String,
    date: String,
    classes: Vec<String>,
    reason: String,
}

impl AbsenceForm {
    fn check(&self) -> Result<(), String> {
        for (field, value) in [("name", &self.name), ("date", &self.date), ("reason", &self.reason)] {
            if value.trim().is_empty() {
                return Err(format!("'{field}' must not be empty"));
            }
        }
        if self.classes.len() != PERIODS {
            return Err(format!(
                "'classes' needs exactly {PERIODS} entries (one per period), got {}",
                self.classes.len()
            ));
        }
        Ok(())
    }
}

/// Files an official-absence (公欠届) form.
pub struct SubmitOfficialAbsenceTool;

#[async_trait]
impl Tool for SubmitOfficialAbsenceTool {
    fn name(&self) -> &str {
        "submit_official_absence"
    }

    fn description(&self) -> &str {
        "公欠届を提出するツール"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "ユーザーの名前" },
                "date": { "type": "string", "description": "欠席日" },
                "classes": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": PERIODS,
                    "maxItems": PERIODS,
                    "description": "欠席する授業のリスト。1限目から6限目まで順に `授業名/講師名` を入れ、授業がない時限は空文字にする"
                },
                "reason": { "type": "string", "description": "欠席理由" }
            },
            "required": ["name", "date", "classes", "reason"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let form: AbsenceForm = match serde_json::from_value(call.args.clone()) {
            Ok(f) => f,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid form: {e}")),
        };
        if let Err(msg) = form.check() {
            return ToolOutput::err(&call.id, msg);
        }
        info!(
            name = %form.name,
            date = %form.date,
            reason = %form.reason,
            classes = ?form.classes,
            "official absence submitted"
        );
        ToolOutput::ok(&call.id, SUBMITTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "s1".into(), name: "submit_official_absence".into(), args }
    }

    fn valid() -> Value {
        json!({
            "name": "山田太郎",
            "date": "2024-06-10",
            "classes": ["数学/佐藤", "英語/鈴木", "", "", "物理/田中", ""],
            "reason": "大会出場"
        })
    }

    #[tokio::test]
    async fn valid_form_is_submitted() {
        let out = SubmitOfficialAbsenceTool.execute(&call(valid()), &ToolContext::default()).await;
        assert!(!out.is_error);
        assert_eq!(out.content, SUBMITTED);
    }

    #[tokio::test]
    async fn wrong_number_of_periods_is_rejected() {
        let mut args = valid();
        args["classes"] = json!(["数学/佐藤"]);
        let out = SubmitOfficialAbsenceTool.execute(&call(args), &ToolContext::default()).await;
        assert!(out.is_error);
        assert!(out.content.contains("exactly 6"));
    }

    #[tokio::test]
    async fn blank_reason_and_missing_field_are_rejected() {
        let mut args = valid();
        args["reason"] = json!("  ");
        let out = SubmitOfficialAbsenceTool.execute(&call(args), &ToolContext::default()).await;
        assert!(out.content.contains("reason"));

        let mut args = valid();
        args.as_object_mut().unwrap().remove("date");
        let out = SubmitOfficialAbsenceTool.execute(&call(args), &ToolContext::default()).await;
        assert!(out.is_error);
    }
}
