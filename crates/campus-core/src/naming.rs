// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::bail;
use campus_model::{complete_text, Message, ModelProvider};
use tracing::debug;

use crate::session::Turn;

pub const MIN_TITLE_CHARS: usize = 5;
pub const MAX_TITLE_CHARS: usize = 50;

const NAMING_PROMPT: &str = "\
# タスク
以下の会話にセッション名をつけてください。セッション名だけを出力してください。

## 基準
1. 会話の主なトピック: ユーザーが何を求めているかを簡潔に要約する
2. 具体性と簡潔さ: 短く、それでいて内容が伝わるようにする
3. ユーザーの意図: 会話から読み取れる目的を反映する

## 会話内容
";

fn prompt_for(turns: &[Turn]) -> String {
    let mut prompt = NAMING_PROMPT.to_string();
    for t in turns {
        prompt.push_str(t.role.as_str());
        prompt.push_str(": ");
        prompt.push_str(&t.text);
        prompt.push('\n');
    }
    prompt
}

/// Ask the model for a short session title.
pub async fn session_title(model: &dyn ModelProvider, turns: &[Turn]) -> anyhow::Result<String> {
    if turns.is_empty() {
        bail!("cannot name an empty conversation");
    }
    let answer = complete_text(model, vec![Message::user(prompt_for(turns))]).await?;
    let title = answer.trim().trim_matches(|c: char| c == '"' || c == '「' || c == '」').trim();
    let len = title.chars().count();
    debug!(title, len, "session title");
    if !(MIN_TITLE_CHARS..=MAX_TITLE_CHARS).contains(&len) {
        bail!("session title must be {MIN_TITLE_CHARS}-{MAX_TITLE_CHARS} characters, got {len}");
    }
    Ok(title.to_string())
}

#[cfg(test)]
mod tests {
    use campus_model::ScriptedMockProvider;

    use super::*;

    fn convo() -> Vec<Turn> {
        vec![
            Turn::human("公欠届を提出したいです。"),
            Turn::assistant("承知しました。まずは名前を教えてください。"),
        ]
    }

    #[tokio::test]
    async fn trimmed_title_is_returned() {
        let model = ScriptedMockProvider::always_text("  「公欠届の提出手続き」\n");
        let title = session_title(&model, &convo()).await.unwrap();
        assert_eq!(title, "公欠届の提出手続き");
        let req = model.last_request().unwrap();
        assert!(req.last_user_text().unwrap().ends_with("ai: 承知しました。まずは名前を教えてください。\n"));
    }

    #[tokio::test]
    async fn too_short_or_long_is_rejected() {
        let model = ScriptedMockProvider::always_text("公欠");
        assert!(session_title(&model, &convo()).await.is_err());
        let model = ScriptedMockProvider::always_text("あ".repeat(51));
        assert!(session_title(&model, &convo()).await.is_err());
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected() {
        let model = ScriptedMockProvider::always_text("unused title");
        assert!(session_title(&model, &[]).await.is_err());
        assert_eq!(model.call_count(), 0);
    }
}
