// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `classify_role_tool` maps a user message onto a task category and a
//! concrete sub-type (e.g. `申請` / `公欠届`).

use std::sync::Arc;

use async_trait::async_trait;
use campus_config::RoleGroup;
use campus_model::{complete_text, Message, ModelProvider};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// Picks the sub-type of a category that a message is about.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// `Ok(None)` means none of `candidates` applies.
    async fn classify(&self, input: &str, candidates: &[String]) -> anyhow::Result<Option<String>>;
}

/// A sub-type matches when its name appears verbatim in the input.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, input: &str, candidates: &[String]) -> anyhow::Result<Option<String>> {
        Ok(candidates.iter().find(|c| !c.is_empty() && input.contains(c.as_str())).cloned())
    }
}

/// Two-step model classification: key-phrase extraction first, then a
/// direct "which of these is most related" question as the fallback.
pub struct ModelClassifier {
    model: Arc<dyn ModelProvider>,
}

impl ModelClassifier {
    pub fn new(model: Arc<dyn ModelProvider>) -> Self {
        Self { model }
    }

    async fn by_key_phrases(&self, input: &str, candidates: &[String]) -> anyhow::Result<Option<String>> {
        let prompt = format!(
            "次の文章からキーフレーズを抽出してください。\n\
             キーフレーズは単語で構成し、カンマ区切りで出力してください。\n\n\
             文章:\n{input}"
        );
        let answer = complete_text(self.model.as_ref(), vec![Message::user(prompt)]).await?;
        debug!(answer = %answer, "key phrases");
        let hit = answer
            .split([',', '、'])
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .find_map(|k| candidates.iter().find(|c| c.contains(k)));
        Ok(hit.cloned())
    }

    async fn by_similarity(&self, input: &str, candidates: &[String]) -> anyhow::Result<Option<String>> {
        let prompt = format!(
            "文章と単語のリストを与えます。リストの中から文章に最も関連する単語を一つだけ出力してください。\n\
             関連する単語がない場合はリストの単語を出力しないでください。説明は不要です。\n\n\
             文章:\n{input}\n\nリスト:\n[{}]",
            candidates.join(",")
        );
        let answer = complete_text(self.model.as_ref(), vec![Message::user(prompt)]).await?;
        debug!(answer = %answer, "similarity");
        Ok(candidates.iter().find(|c| !c.is_empty() && answer.contains(c.as_str())).cloned())
    }
}

#[async_trait]
impl Classifier for ModelClassifier {
    async fn classify(&self, input: &str, candidates: &[String]) -> anyhow::Result<Option<String>> {
        if candidates.is_empty() {
            return Ok(None);
        }
        match self.by_key_phrases(input, candidates).await? {
            Some(hit) => Ok(Some(hit)),
            None => self.by_similarity(input, candidates).await,
        }
    }
}

/// Outcome of classifying one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    NoMatch,
    /// The category is known but not which of its sub-types is meant.
    Ambiguous { category: String, candidates: Vec<String> },
    Resolved { category: String, subtype: String },
}

impl Classification {
    pub fn render(&self) -> String {
        match self {
            Classification::NoMatch => "該当なし".to_string(),
            Classification::Ambiguous { candidates, .. } => {
                format!("実行可能なタスク:\n{}", candidates.join(","))
            }
            Classification::Resolved { category, subtype } => {
                format!("分類結果:\n{category}.{subtype}")
            }
        }
    }
}

/// Category: the first whose name occurs in the input.  With a category the
/// sub-type is looked up among its own types; without one every group is
/// tried in order and the first hit decides the category too.
pub async fn classify_roles(
    input: &str,
    roles: &[RoleGroup],
    classifier: &dyn Classifier,
) -> anyhow::Result<Classification> {
    if let Some(group) = roles.iter().find(|g| input.contains(g.category.as_str())) {
        return Ok(match classifier.classify(input, &group.types).await? {
            Some(subtype) => Classification::Resolved { category: group.category.clone(), subtype },
            None => Classification::Ambiguous {
                category: group.category.clone(),
                candidates: group.types.clone(),
            },
        });
    }
    for group in roles {
        if let Some(subtype) = classifier.classify(input, &group.types).await? {
            return Ok(Classification::Resolved { category: group.category.clone(), subtype });
        }
    }
    Ok(Classification::NoMatch)
}

pub struct ClassifyRoleTool {
    roles: Vec<RoleGroup>,
    classifier: Arc<dyn Classifier>,
}

impl ClassifyRoleTool {
    pub fn new(roles: Vec<RoleGroup>, classifier: Arc<dyn Classifier>) -> Self {
        Self { roles, classifier }
    }
}

#[async_trait]
impl Tool for ClassifyRoleTool {
    fn name(&self) -> &str {
        "classify_role_tool"
    }

    fn description(&self) -> &str {
        "ユーザーの入力から実行するタスクを分類する。\n\
         Returns `分類結果:\\n<大分類>.<タスク>` when a task was identified, \
         `実行可能なタスク:\\n<候補>` when only the category is known, or `該当なし`."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "input": { "type": "string", "description": "ユーザー入力" }
            },
            "required": ["input"],
            "additionalProperties": false
        })
    }

    fn returns_direct(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let Some(input) = call.str_arg("input") else {
            return ToolOutput::err(&call.id, "missing or empty 'input'");
        };
        info!(input, "classify_role_tool called");
        match classify_roles(input, &self.roles, self.classifier.as_ref()).await {
            // An unresolved category is answered with its candidates
            // instead of letting the model guess a sub-agent.
            Ok(c @ Classification::Ambiguous { .. }) => ToolOutput::ok(&call.id, c.render()).direct(),
            Ok(c) => ToolOutput::ok(&call.id, c.render()),
            Err(e) => ToolOutput::err(&call.id, format!("classification failed: {e:#}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
