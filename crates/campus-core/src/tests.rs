// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// End-to-end scenarios for the chat surface: dispatch, handoff, streaming
/// and history bookkeeping.
///
/// Every scenario runs against ScriptedMockProvider, so the model's choices
/// are fixed in advance and no network is involved.
#[cfg(test)]
mod chat_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use campus_config::{AgentKind, Config};
    use campus_model::{
        text_deltas, text_reply, tool_call, Message, MessageContent, ResponseEvent, Script,
        ScriptedMockProvider,
    };
    use campus_tools::{Document, Retriever, StreamEvent};
    use tokio_stream::StreamExt;

    use crate::{prompts, AgentDeps, Chat, RunError, Speaker, UserContext};

    // ── Helpers ───────────────────────────────────────────────────────────────

    const DUMMY_ANSWER: &str = "公欠届の提出ですね。欠席する日付を教えてください。";
    const CANDIDATES: &str = "実行可能なタスク:\n欠課届,遅刻届,遅延届,早退届,公欠届";

    fn chat_with(model: Arc<ScriptedMockProvider>, deps: impl FnOnce(AgentDeps) -> AgentDeps) -> Chat {
        let user = Arc::new(UserContext::new("hogehoge", "fugafuga専攻"));
        Chat::new(user, Arc::new(deps(AgentDeps::new(model, Config::default()))))
    }

    fn chat(model: Arc<ScriptedMockProvider>) -> Chat {
        chat_with(model, |d| d)
    }

    /// Dispatcher classifies, then hands off to the dummy agent, which answers.
    fn handoff_script() -> ScriptedMockProvider {
        ScriptedMockProvider::new(vec![
            tool_call("c1", "classify_role_tool", r#"{"input":"公欠届を出したい"}"#),
            tool_call("c2", "calling_dummy_agent", r#"{"user_input":"公欠届を出したい"}"#),
            text_deltas(["公欠届の提出ですね。", "欠席する日付を", "教えてください。"]),
        ])
    }

    fn ambiguity_script() -> ScriptedMockProvider {
        ScriptedMockProvider::new(vec![tool_call(
            "c1",
            "classify_role_tool",
            r#"{"input":"申請したい"}"#,
        )])
    }

    struct Library;

    #[async_trait]
    impl Retriever for Library {
        async fn retrieve(&self, _query: &str, _top_k: usize) -> anyhow::Result<Vec<Document>> {
            Ok(vec![Document {
                id: "doc-lib".into(),
                title: "図書館の利用".into(),
                content: "図書館は平日9時から20時まで開館しています。".into(),
            }])
        }
    }

    async fn drain(chat: &Chat, text: &str, kind: AgentKind) -> Vec<StreamEvent> {
        chat.stream(text, kind).collect::<Vec<_>>().await
    }

    fn tokens(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    fn tool_result_text(msg: &Message) -> Option<&str> {
        match &msg.content {
            MessageContent::ToolResult { content, .. } => Some(content.as_str()),
            _ => None,
        }
    }

    // ── Coalescing ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn single_char_tokens_coalesce_into_two_chunks() {
        let model = Arc::new(ScriptedMockProvider::new(vec![text_deltas(["A", "B", "C", "D", "E", "F"])]));
        let chat = chat(model);
        let events = chat.stream_with("hi", AgentKind::SmallTalk, 5).collect::<Vec<_>>().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Token("ABCDE".into()),
                StreamEvent::Token("F".into()),
                StreamEvent::Done { source_ids: vec![] },
            ]
        );
    }

    #[tokio::test]
    async fn exactly_one_terminal_event_and_nothing_after_it() {
        let model = Arc::new(handoff_script());
        let events = drain(&chat(model), "公欠届を出したい", AgentKind::Classify).await;
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
        assert!(events.last().unwrap().is_terminal());
    }

    // ── Handoff ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn handoff_returns_the_sub_agent_answer() {
        let model = Arc::new(handoff_script());
        let chat = chat(model.clone());
        let resp = chat.invoke("公欠届を出したい", AgentKind::Classify).await.unwrap();
        assert_eq!(resp.output, DUMMY_ANSWER);

        let requests = model.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        // the dispatcher saw the classification before choosing
        assert_eq!(
            tool_result_text(requests[1].messages.last().unwrap()),
            Some("分類結果:\n申請.公欠届")
        );
        // the third request came from the dummy agent
        let system = requests[2].messages[0].as_text().unwrap();
        assert!(system.contains(prompts::DUMMY_ROLE.lines().next().unwrap()));
        assert_eq!(requests[2].tools[0].name, "submit_official_absence");
    }

    #[tokio::test]
    async fn handoff_appends_one_exchange_to_history() {
        let model = Arc::new(handoff_script());
        let chat = chat(model);
        chat.invoke("公欠届を出したい", AgentKind::Classify).await.unwrap();
        let turns = chat.user().snapshot().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Speaker::Human);
        assert_eq!(turns[1].text, DUMMY_ANSWER);
    }

    #[tokio::test]
    async fn ambiguous_category_lists_candidates() {
        let model = Arc::new(ambiguity_script());
        let chat = chat(model.clone());
        let resp = chat.invoke("申請したい", AgentKind::Classify).await.unwrap();
        assert_eq!(resp.output, CANDIDATES);
        // no sub-agent was consulted
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_agent_lets_the_dispatcher_keep_talking() {
        let model = Arc::new(ScriptedMockProvider::new(vec![
            tool_call("c1", "calling_search_school_data_agent", r#"{"user_input":"図書館"}"#),
            text_reply("ごめんなさい、今は調べられません。"),
        ]));
        let chat = chat(model.clone());
        let resp = chat.invoke("図書館は何時まで？", AgentKind::Classify).await.unwrap();
        assert_eq!(resp.output, "ごめんなさい、今は調べられません。");
        let last = model.last_request().unwrap();
        assert_eq!(
            tool_result_text(last.messages.last().unwrap()),
            Some("agent unavailable: search_school_data")
        );
    }

    // ── Streaming matches one-shot ────────────────────────────────────────────

    #[tokio::test]
    async fn streamed_text_equals_invoke_output_for_handoff() {
        let once = chat(Arc::new(handoff_script()))
            .invoke("公欠届を出したい", AgentKind::Classify)
            .await
            .unwrap();
        let events = drain(&chat(Arc::new(handoff_script())), "公欠届を出したい", AgentKind::Classify).await;
        assert_eq!(tokens(&events), once.output);
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::ToolStarted { name, .. } if name == "calling_dummy_agent"
        )));
    }

    #[tokio::test]
    async fn streamed_text_equals_invoke_output_for_ambiguity() {
        let once = chat(Arc::new(ambiguity_script()))
            .invoke("申請したい", AgentKind::Classify)
            .await
            .unwrap();
        let events = drain(&chat(Arc::new(ambiguity_script())), "申請したい", AgentKind::Classify).await;
        assert_eq!(tokens(&events), once.output);
        assert_eq!(events.last(), Some(&StreamEvent::Done { source_ids: vec![] }));
    }

    /// The small-talk sub-agent breaks off mid-answer; the dispatcher recovers.
    fn broken_handoff_script() -> ScriptedMockProvider {
        ScriptedMockProvider::new(vec![
            tool_call("c1", "calling_small_talk_agent", r#"{"user_input":"こんにちは"}"#),
            vec![ResponseEvent::TextDelta("PARTIAL".into()), ResponseEvent::Error("boom".into())],
            text_reply("fallback"),
        ])
    }

    /// The dispatcher says something before handing off.
    fn preamble_handoff_script() -> ScriptedMockProvider {
        let mut first = vec![ResponseEvent::TextDelta("確認します。".into())];
        first.extend(tool_call("c1", "calling_small_talk_agent", r#"{"user_input":"こんにちは"}"#));
        ScriptedMockProvider::new(vec![first, text_reply("sub answer")])
    }

    #[tokio::test]
    async fn failed_sub_agent_text_never_reaches_the_stream() {
        let once = chat(Arc::new(broken_handoff_script()))
            .invoke("こんにちは", AgentKind::Classify)
            .await
            .unwrap();
        assert_eq!(once.output, "fallback");
        let events = drain(&chat(Arc::new(broken_handoff_script())), "こんにちは", AgentKind::Classify).await;
        assert_eq!(tokens(&events), once.output);
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::ToolFinished { name, is_error: true, .. } if name == "calling_small_talk_agent"
        )));
        assert_eq!(events.last(), Some(&StreamEvent::Done { source_ids: vec![] }));
    }

    #[tokio::test]
    async fn streamed_text_equals_invoke_output_with_a_preamble() {
        let once = chat(Arc::new(preamble_handoff_script()))
            .invoke("こんにちは", AgentKind::Classify)
            .await
            .unwrap();
        assert_eq!(once.output, "sub answer");
        let events = drain(&chat(Arc::new(preamble_handoff_script())), "こんにちは", AgentKind::Classify).await;
        assert_eq!(tokens(&events), once.output);
    }

    // ── Source ids ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn retrieved_document_ids_surface_in_result_and_done() {
        let script = || {
            ScriptedMockProvider::new(vec![
                tool_call("c1", "calling_search_school_data_agent", r#"{"user_input":"図書館"}"#),
                text_reply("平日9時から20時までです。"),
            ])
        };
        let once = chat_with(Arc::new(script()), |d| d.with_retriever(Arc::new(Library)))
            .invoke("図書館は何時まで？", AgentKind::Classify)
            .await
            .unwrap();
        assert_eq!(once.output, "平日9時から20時までです。");
        assert_eq!(once.source_ids, vec!["doc-lib"]);

        let streamed = chat_with(Arc::new(script()), |d| d.with_retriever(Arc::new(Library)));
        let events = drain(&streamed, "図書館は何時まで？", AgentKind::Classify).await;
        assert_eq!(events.last(), Some(&StreamEvent::Done { source_ids: vec!["doc-lib".into()] }));
    }

    #[tokio::test]
    async fn source_ids_do_not_leak_into_the_next_run() {
        let model = Arc::new(ScriptedMockProvider::new(vec![
            tool_call("c1", "calling_search_school_data_agent", r#"{"user_input":"図書館"}"#),
            text_reply("平日9時から20時までです。"),
            text_reply("どういたしまして。"),
        ]));
        let chat = chat_with(model, |d| d.with_retriever(Arc::new(Library)));
        let first = chat.invoke("図書館は何時まで？", AgentKind::Classify).await.unwrap();
        assert_eq!(first.source_ids, vec!["doc-lib"]);
        let second = chat.invoke("ありがとう", AgentKind::Classify).await.unwrap();
        assert!(second.source_ids.is_empty());
    }

    // ── Failures and cancellation ─────────────────────────────────────────────

    #[tokio::test]
    async fn failed_run_is_one_error_and_no_history() {
        let model = Arc::new(ScriptedMockProvider::from_scripts(vec![Script::Fail("quota".into())]));
        let chat = chat(model);
        let events = drain(&chat, "hi", AgentKind::Main).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error(m) if m.contains("quota")));
        assert_eq!(chat.user().history_len().await, 0);
    }

    #[tokio::test]
    async fn invoke_error_leaves_history_untouched() {
        let model = Arc::new(ScriptedMockProvider::new(vec![text_deltas(Vec::<String>::new())]));
        let chat = chat(model);
        let err = chat.invoke("hi", AgentKind::SmallTalk).await.unwrap_err();
        assert_eq!(err, RunError::Malformed);
        assert_eq!(chat.user().history_len().await, 0);
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_run() {
        let deltas: Vec<String> = (0..50).map(|i| format!("{}", i % 10)).collect();
        let model = Arc::new(ScriptedMockProvider::from_scripts(vec![Script::Paced {
            delay: Duration::from_millis(5),
            events: text_deltas(deltas),
        }]));
        let chat = chat(model);
        let mut handle = chat.stream_with("hi", AgentKind::SmallTalk, 1);

        let n = 3;
        let mut seen = 0;
        while seen < n {
            match handle.next().await {
                Some(_) => seen += 1,
                None => break,
            }
        }
        drop(handle);
        assert!(seen <= n + 1);

        // the aborted run never reaches the point where history is recorded
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(chat.user().history_len().await, 0);
    }

    #[tokio::test]
    async fn cancel_returns_promptly_on_a_stalled_model() {
        let model = Arc::new(ScriptedMockProvider::from_scripts(vec![Script::Stall(vec![])]));
        let chat = chat(model);
        let handle = chat.stream("hi", AgentKind::Main);
        tokio::time::timeout(Duration::from_secs(1), handle.cancel())
            .await
            .expect("cancel must not hang");
    }

    #[tokio::test]
    async fn run_timeout_surfaces_as_error_event() {
        let model = Arc::new(ScriptedMockProvider::from_scripts(vec![Script::Stall(vec![])]));
        let chat = chat_with(model, |d| d.with_run_timeout(Some(Duration::from_millis(50))));
        let events = drain(&chat, "hi", AgentKind::Main).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error(m) if m.contains("timed out")));
    }
}
