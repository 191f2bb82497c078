// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use campus_model::Message;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Who said a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "human")]
    Human,
    #[serde(rename = "ai")]
    Assistant,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Speaker::Human => "human",
            Speaker::Assistant => "ai",
        }
    }
}

/// One utterance of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Speaker,
    pub text: String,
}

impl Turn {
    pub fn human(text: impl Into<String>) -> Self {
        Self { role: Speaker::Human, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Speaker::Assistant, text: text.into() }
    }

    /// Parse a `human: ...` / `ai: ...` transcript line.
    pub fn parse_line(line: &str) -> Option<Self> {
        let (label, text) = line.split_once(':')?;
        let text = text.trim();
        match label.trim() {
            "human" | "user" => Some(Self::human(text)),
            "ai" | "assistant" => Some(Self::assistant(text)),
            _ => None,
        }
    }
}

/// Append-only turn log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, role: Speaker, text: impl Into<String>) {
        self.turns.push(Turn { role, text: text.into() });
    }

    pub fn append_many(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.turns.extend(turns);
    }

    pub fn as_ordered_list(&self) -> &[Turn] {
        &self.turns
    }

    pub fn as_model_format(&self) -> Vec<Message> {
        to_model_messages(&self.turns)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Role-tagged model messages for a slice of turns.
pub fn to_model_messages(turns: &[Turn]) -> Vec<Message> {
    turns
        .iter()
        .map(|t| match t.role {
            Speaker::Human => Message::user(&t.text),
            Speaker::Assistant => Message::assistant(&t.text),
        })
        .collect()
}

/// One end-user session.  Shared by `Arc` with every agent that runs on the
/// user's behalf, so sub-agents read the same history as the dispatcher.
#[derive(Debug)]
pub struct UserContext {
    pub id: String,
    pub name: String,
    pub major: String,
    history: Mutex<ConversationHistory>,
}

impl UserContext {
    pub fn new(name: impl Into<String>, major: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            major: major.into(),
            history: Mutex::new(ConversationHistory::new()),
        }
    }

    pub fn with_history(mut self, turns: impl IntoIterator<Item = Turn>) -> Self {
        self.history.get_mut().append_many(turns);
        self
    }

    /// Copy of the turns so far; a run works against this snapshot.
    pub async fn snapshot(&self) -> Vec<Turn> {
        self.history.lock().await.as_ordered_list().to_vec()
    }

    /// Append one finished exchange.  Both turns land under a single lock so
    /// concurrent sessions on the same user never interleave them.
    pub async fn record(&self, human: &str, assistant: &str) {
        let mut history = self.history.lock().await;
        history.append(Speaker::Human, human);
        history.append(Speaker::Assistant, assistant);
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::new("None", "None")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use campus_model::Role;

    use super::*;

    #[test]
    fn model_format_keeps_order_and_roles() {
        let mut h = ConversationHistory::new();
        h.append(Speaker::Human, "こんにちは!");
        h.append_many([Turn::assistant("本日はどのようなご用件でしょうか？"), Turn::human("公欠届")]);
        let msgs = h.as_model_format();
        let roles: Vec<Role> = msgs.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(msgs[2].as_text(), Some("公欠届"));
    }

    #[test]
    fn transcript_lines_parse() {
        assert_eq!(Turn::parse_line("human: 公欠届を出したい"), Some(Turn::human("公欠届を出したい")));
        assert_eq!(Turn::parse_line("ai:はい"), Some(Turn::assistant("はい")));
        assert_eq!(Turn::parse_line("system: x"), None);
        assert_eq!(Turn::parse_line("no label"), None);
    }

    #[tokio::test]
    async fn concurrent_records_keep_pairs_together() {
        let user = Arc::new(UserContext::new("hogehoge", "fugafuga専攻"));
        let mut tasks = Vec::new();
        for i in 0..8 {
            let user = user.clone();
            tasks.push(tokio::spawn(async move {
                user.record(&format!("q{i}"), &format!("a{i}")).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        let turns = user.snapshot().await;
        assert_eq!(turns.len(), 16);
        for pair in turns.chunks(2) {
            assert_eq!(pair[0].role, Speaker::Human);
            assert_eq!(pair[1].text, pair[0].text.replace('q', "a"));
        }
    }

    #[tokio::test]
    async fn seeded_history_is_visible() {
        let user = UserContext::new("a", "b").with_history([Turn::human("hi"), Turn::assistant("yo")]);
        assert_eq!(user.history_len().await, 2);
    }
}
