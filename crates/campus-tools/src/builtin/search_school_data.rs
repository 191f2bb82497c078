// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! School-document retrieval: the [`Retriever`] seam, a YAML-backed
//! implementation and the `search_school_data_tool` wrapper.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// At most `top_k` documents relevant to `query`, best first.
    async fn retrieve(&self, query: &str, top_k: usize) -> anyhow::Result<Vec<Document>>;
}

/// In-memory documents ranked by how many query terms they contain.
pub struct StaticRetriever {
    docs: Vec<Document>,
}

impl StaticRetriever {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs }
    }

    /// Load a YAML sequence of `{id, title, content}` documents.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading documents {}", path.display()))?;
        let docs: Vec<Document> = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing documents {}", path.display()))?;
        debug!(count = docs.len(), path = %path.display(), "loaded school documents");
        Ok(Self::new(docs))
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Whitespace/punctuation separated words plus the character bigrams of
/// each word, so unsegmented Japanese still overlaps on shared fragments.
fn terms(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let words = text
        .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation() || "、。？！「」（）・".contains(c))
        .filter(|w| !w.is_empty());
    for word in words {
        let lower = word.to_lowercase();
        let chars: Vec<char> = lower.chars().collect();
        if chars.len() > 2 && !lower.is_ascii() {
            for pair in chars.windows(2) {
                out.insert(pair.iter().collect());
            }
        }
        out.insert(lower);
    }
    out
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> anyhow::Result<Vec<Document>> {
        let wanted = terms(query);
        let mut scored: Vec<(usize, &Document)> = self
            .docs
            .iter()
            .map(|doc| {
                let title = doc.title.to_lowercase();
                let body = doc.content.to_lowercase();
                let score = wanted
                    .iter()
                    .map(|t| {
                        2 * usize::from(title.contains(t.as_str()))
                            + usize::from(body.contains(t.as_str()))
                    })
                    .sum::<usize>();
                (score, doc)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        // stable: equal scores keep file order
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(top_k).map(|(_, d)| d.clone()).collect())
    }
}

/// Documents as `### <title>` sections for a system prompt.
pub fn render_sections(docs: &[Document]) -> String {
    docs.iter()
        .map(|d| format!("### {}\n{}", d.title, d.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub const NOTHING_FOUND: &str = "該当する情報が見つかりませんでした。";

pub struct SearchSchoolDataTool {
    retriever: Arc<dyn Retriever>,
    top_k: usize,
}

impl SearchSchoolDataTool {
    pub fn new(retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        Self { retriever, top_k }
    }
}

#[async_trait]
impl Tool for SearchSchoolDataTool {
    fn name(&self) -> &str {
        "search_school_data_tool"
    }

    fn description(&self) -> &str {
        "学校に関する情報を検索するためのツール"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "search_word": {
                    "type": "string",
                    "description": "学校に関する情報を検索するためのキーワード"
                }
            },
            "required": ["search_word"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let Some(query) = call.str_arg("search_word") else {
            return ToolOutput::err(&call.id, "missing or empty 'search_word'");
        };
        info!(query, "search_school_data_tool called");
        let docs = match self.retriever.retrieve(query, self.top_k).await {
            Ok(d) => d,
            Err(e) => return ToolOutput::err(&call.id, format!("search failed: {e:#}")),
        };
        if docs.is_empty() {
            return ToolOutput::ok(&call.id, NOTHING_FOUND);
        }
        let text = docs
            .iter()
            .enumerate()
            .map(|(i, d)| format!("・検索結果{}は以下の通りです。\n{}\n", i + 1, d.content))
            .collect::<Vec<_>>()
            .join("\n");
        let ids = docs.into_iter().map(|d| d.id).collect();
        ToolOutput::ok(&call.id, text).with_source_ids(ids)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
