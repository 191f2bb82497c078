// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use campus_model::{CompletionRequest, Message, ModelProvider, ResponseEvent, ToolSchema};
use campus_tools::{StreamSink, ToolCall, ToolOutput, ToolRegistry};

use crate::{
    error::{AgentResponse, RunError, RunResult},
    prompts::WRAP_UP,
    session::{to_model_messages, Turn},
};

/// Drives one model ↔ tool loop for a fixed system prompt and tool set.
///
/// An engine is built for a single invocation and thrown away afterwards;
/// nothing it learns during a run survives into the next one.
pub struct ExecutionEngine {
    model: Arc<dyn ModelProvider>,
    system_prompt: String,
    registry: ToolRegistry,
    max_tool_rounds: u32,
    timeout: Option<Duration>,
    label: String,
    /// Ids the agent gathered before the loop started (pre-fetched documents).
    seed_source_ids: Vec<String>,
}

/// What one model round produced.
struct Round {
    text: String,
    calls: Vec<Result<ToolCall, (ToolCall, String)>>,
}

impl ExecutionEngine {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        system_prompt: impl Into<String>,
        registry: ToolRegistry,
    ) -> Self {
        Self {
            model,
            system_prompt: system_prompt.into(),
            registry,
            max_tool_rounds: 10,
            timeout: None,
            label: "agent".into(),
            seed_source_ids: Vec::new(),
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name used in logs.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_source_ids(mut self, ids: Vec<String>) -> Self {
        self.seed_source_ids = ids;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    /// Run to completion.  Tokens go to `sink` when one is given; the sink is
    /// never closed here, that is up to whoever owns the run.
    ///
    /// History is only read.  Recording the exchange is the caller's job, and
    /// only after `Ok`.
    pub async fn run_once(
        &self,
        history: &[Turn],
        user_msg: &str,
        sink: Option<&StreamSink>,
    ) -> RunResult {
        let fut = self.run_loop(history, user_msg, sink);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(r) => r,
                Err(_) => Err(RunError::Timeout(limit)),
            },
            None => fut.await,
        };
        match &result {
            Ok(r) => debug!(agent = %self.label, chars = r.output.chars().count(), "run finished"),
            Err(e) => warn!(agent = %self.label, error = %e, "run failed"),
        }
        result
    }

    async fn run_loop(
        &self,
        history: &[Turn],
        user_msg: &str,
        sink: Option<&StreamSink>,
    ) -> RunResult {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(to_model_messages(history));
        messages.push(Message::user(user_msg));

        let schemas = self.registry.schemas();
        // A run that may end in a direct result keeps its own text back until
        // that text is known to be the answer.
        let holds_text = self.registry.list().iter().any(|t| t.returns_direct());
        let live = if holds_text { None } else { sink };
        let mut output = String::new();
        let mut source_ids = self.seed_source_ids.clone();
        let mut rounds = 0u32;

        loop {
            if let Some(sink) = sink {
                if sink.is_closed().await {
                    return Err(RunError::Cancelled);
                }
            }
            rounds += 1;
            let with_tools = !schemas.is_empty() && rounds <= self.max_tool_rounds;
            if rounds > self.max_tool_rounds {
                // One last tool-free turn so the model can still answer.
                warn!(agent = %self.label, rounds, "tool-round budget exhausted");
                messages.push(Message::user(WRAP_UP));
            }
            let tools = if with_tools { schemas.clone() } else { Vec::new() };
            let round = self.stream_one_round(&messages, tools, live).await?;

            if !round.text.is_empty() {
                output.push_str(&round.text);
                messages.push(Message::assistant(&round.text));
            }
            if round.calls.is_empty() || !with_tools {
                break;
            }

            // All tool-call messages precede their results on the wire.
            for call in &round.calls {
                let call = match call {
                    Ok(c) | Err((c, _)) => c,
                };
                messages.push(Message::tool_call(&call.id, &call.name, call.args.to_string()));
            }

            for call in round.calls {
                let (call, out) = match call {
                    Ok(call) => {
                        let out = self.dispatch(&call, sink).await?;
                        (call, out)
                    }
                    Err((call, reason)) => {
                        let out = ToolOutput::err(&call.id, reason);
                        (call, out)
                    }
                };
                source_ids.extend(out.source_ids.iter().cloned());
                if out.direct && !out.is_error {
                    info!(agent = %self.label, tool = %call.name, "direct tool result ends the run");
                    if !out.streamed {
                        if let Some(sink) = sink {
                            sink.token(&out.content).await;
                        }
                    }
                    if out.content.trim().is_empty() {
                        return Err(RunError::Malformed);
                    }
                    // Held text is dropped with the rest of `output`.
                    return Ok(AgentResponse { output: out.content, source_ids });
                }
                messages.push(Message::tool_result(&call.id, &out.content));
            }
        }

        if output.trim().is_empty() {
            return Err(RunError::Malformed);
        }
        if let (true, Some(sink)) = (holds_text, sink) {
            sink.token(&output).await;
        }
        Ok(AgentResponse { output, source_ids })
    }

    /// Execute one call in its own task.  Dropping the run aborts the task,
    /// and with it any sub-agent the tool started.
    async fn dispatch(&self, call: &ToolCall, sink: Option<&StreamSink>) -> Result<ToolOutput, RunError> {
        if let Some(sink) = sink {
            sink.tool_started(&call.name, &call.id).await;
        }
        let output = match self.registry.get(&call.name) {
            Some(tool) => {
                let ctx = self.registry.context_for(&call.name);
                let owned = call.clone();
                debug!(agent = %self.label, tool = %call.name, "executing tool");
                let task = AbortOnDropHandle::new(tokio::spawn(async move {
                    tool.execute(&owned, &ctx).await
                }));
                match task.await {
                    Ok(out) => out,
                    Err(e) => {
                        if let Some(sink) = sink {
                            sink.tool_finished(&call.name, &call.id, true).await;
                        }
                        return Err(RunError::Tool(format!("{} panicked: {e}", call.name)));
                    }
                }
            }
            None => {
                warn!(agent = %self.label, tool = %call.name, "model called an unknown tool");
                ToolOutput::err(&call.id, format!("unknown tool: {}", call.name))
            }
        };
        if let Some(sink) = sink {
            sink.tool_finished(&call.name, &call.id, output.is_error).await;
        }
        Ok(output)
    }

    /// Call the model once, forwarding text deltas and collecting tool calls.
    async fn stream_one_round(
        &self,
        messages: &[Message],
        tools: Vec<ToolSchema>,
        sink: Option<&StreamSink>,
    ) -> Result<Round, RunError> {
        let req = CompletionRequest { messages: messages.to_vec(), tools, stream: true };
        let mut stream = self
            .model
            .complete(req)
            .await
            .map_err(|e| RunError::Model(format!("{e:#}")))?;

        let mut text = String::new();
        // Keyed by the provider's parallel-tool-call index.
        let mut pending: BTreeMap<u32, PendingToolCall> = BTreeMap::new();

        while let Some(event) = stream.next().await {
            match event.map_err(|e| RunError::Model(format!("{e:#}")))? {
                ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                    if let Some(sink) = sink {
                        sink.token(&delta).await;
                    }
                    text.push_str(&delta);
                }
                ResponseEvent::ToolCall { index, id, name, arguments } => {
                    let ptc = pending.entry(index).or_default();
                    if !id.is_empty() {
                        ptc.id = id;
                    }
                    if !name.is_empty() {
                        ptc.name = name;
                    }
                    ptc.args_buf.push_str(&arguments);
                }
                ResponseEvent::Usage { input_tokens, output_tokens } => {
                    debug!(agent = %self.label, input_tokens, output_tokens, "usage");
                }
                ResponseEvent::MaxTokens => {
                    warn!(agent = %self.label, "model stopped at its output-token limit");
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(e) => return Err(RunError::Model(e)),
                _ => {}
            }
        }

        let mut calls = Vec::with_capacity(pending.len());
        for (i, (_, ptc)) in pending.into_iter().enumerate() {
            if ptc.name.is_empty() {
                warn!(agent = %self.label, tool_call_id = %ptc.id, "dropping tool call without a name");
                continue;
            }
            calls.push(ptc.finish(i));
        }
        Ok(Round { text, calls })
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    /// Arguments that cannot be parsed are reported back to the model
    /// instead of being run with made-up values.
    fn finish(self, position: usize) -> Result<ToolCall, (ToolCall, String)> {
        let id = if self.id.is_empty() { format!("call_{position}") } else { self.id };
        let parsed = if self.args_buf.trim().is_empty() {
            Ok(Value::Object(Default::default()))
        } else {
            serde_json::from_str::<Value>(&self.args_buf)
                .or_else(|e| repair_truncated_json(&self.args_buf).ok_or(e))
        };
        match parsed {
            Ok(args @ Value::Object(_)) => Ok(ToolCall { id, name: self.name, args }),
            Ok(_) => Err((
                ToolCall { id, name: self.name, args: Value::Object(Default::default()) },
                "tool arguments must be a JSON object".into(),
            )),
            Err(e) => {
                warn!(tool = %self.name, args = %self.args_buf, error = %e, "invalid tool arguments");
                Err((
                    ToolCall { id, name: self.name, args: Value::Object(Default::default()) },
                    format!("invalid JSON arguments: {e}"),
                ))
            }
        }
    }
}

/// Close an object the model stopped emitting half way through.
fn repair_truncated_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim_end();
    if trimmed.ends_with('}') {
        return None;
    }
    let mut completed = trimmed.to_string();
    if trimmed.chars().filter(|&c| c == '"').count() % 2 == 1 {
        completed.push('"');
    }
    completed.push('}');
    serde_json::from_str(&completed).ok()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use campus_model::{text_deltas, text_reply, tool_call, Script, ScriptedMockProvider};
    use campus_tools::{MagicFunctionTool, StreamEvent, Tool, ToolContext};
    use serde_json::json;

    use super::*;

    /// Answers every call directly, ending the run.
    struct Verdict;

    #[async_trait]
    impl Tool for Verdict {
        fn name(&self) -> &str {
            "verdict"
        }
        fn description(&self) -> &str {
            "final answer"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn returns_direct(&self) -> bool {
            true
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(&call.id, "verdict").direct()
        }
    }

    fn with_verdict() -> ToolRegistry {
        let mut reg = magic();
        reg.add(Verdict).unwrap();
        reg
    }

    fn preamble_then(name: &str, args: &str) -> Vec<ResponseEvent> {
        let mut round = vec![ResponseEvent::TextDelta("確認します。".into())];
        round.extend(tool_call("c1", name, args));
        round
    }

    fn streamed_text(rx: &mut tokio::sync::mpsc::Receiver<StreamEvent>) -> String {
        let mut text = String::new();
        while let Ok(ev) = rx.try_recv() {
            if let StreamEvent::Token(t) = ev {
                text.push_str(&t);
            }
        }
        text
    }

    fn engine(model: ScriptedMockProvider, registry: ToolRegistry) -> (Arc<ScriptedMockProvider>, ExecutionEngine) {
        let model = Arc::new(model);
        let e = ExecutionEngine::new(model.clone(), "system", registry);
        (model, e)
    }

    fn magic() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.add(MagicFunctionTool).unwrap();
        reg
    }

    #[tokio::test]
    async fn plain_text_round() {
        let (_, e) = engine(ScriptedMockProvider::always_text("hello"), ToolRegistry::new());
        let r = e.run_once(&[], "hi", None).await.unwrap();
        assert_eq!(r.output, "hello");
    }

    #[tokio::test]
    async fn history_goes_between_system_and_user() {
        let (model, e) = engine(ScriptedMockProvider::always_text("ok"), ToolRegistry::new());
        let history = vec![Turn::human("前の質問"), Turn::assistant("前の回答")];
        e.run_once(&history, "今の質問", None).await.unwrap();
        let req = model.last_request().unwrap();
        let texts: Vec<&str> = req.messages.iter().filter_map(Message::as_text).collect();
        assert_eq!(texts, vec!["system", "前の質問", "前の回答", "今の質問"]);
        assert!(req.tools.is_empty());
    }

    #[tokio::test]
    async fn tool_result_is_fed_back() {
        let model = ScriptedMockProvider::tool_then_text("c1", "magic_function_tool", r#"{"input":3}"#, "答えは5です");
        let (model, e) = engine(model, magic());
        let r = e.run_once(&[], "magic function に3", None).await.unwrap();
        assert_eq!(r.output, "答えは5です");
        let req = model.last_request().unwrap();
        let last = req.messages.last().unwrap();
        assert_eq!(last, &Message::tool_result("c1", "5"));
    }

    #[tokio::test]
    async fn split_tool_arguments_are_joined() {
        let model = ScriptedMockProvider::new(vec![
            vec![
                ResponseEvent::ToolCall { index: 0, id: "c1".into(), name: "magic_function_tool".into(), arguments: r#"{"inp"#.into() },
                ResponseEvent::ToolCall { index: 0, id: String::new(), name: String::new(), arguments: r#"ut": 40}"#.into() },
                ResponseEvent::Done,
            ],
            text_reply("42"),
        ]);
        let (model, e) = engine(model, magic());
        e.run_once(&[], "x", None).await.unwrap();
        let req = model.last_request().unwrap();
        assert_eq!(req.messages.last().unwrap(), &Message::tool_result("c1", "42"));
    }

    #[tokio::test]
    async fn broken_arguments_become_a_tool_error() {
        let model = ScriptedMockProvider::new(vec![
            tool_call("c1", "magic_function_tool", "not json"),
            text_reply("sorry"),
        ]);
        let (model, e) = engine(model, magic());
        let r = e.run_once(&[], "x", None).await.unwrap();
        assert_eq!(r.output, "sorry");
        let req = model.last_request().unwrap();
        let last = req.messages.last().unwrap().clone();
        match last.content {
            campus_model::MessageContent::ToolResult { content, .. } => {
                assert!(content.starts_with("invalid JSON arguments"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_object_is_repaired() {
        assert_eq!(repair_truncated_json(r#"{"input": "abc"#), Some(json!({ "input": "abc" })));
        assert_eq!(repair_truncated_json(r#"{"a": 1}"#), None);
    }

    #[tokio::test]
    async fn empty_answer_is_malformed() {
        let (_, e) = engine(ScriptedMockProvider::new(vec![text_deltas(Vec::<String>::new())]), ToolRegistry::new());
        assert_eq!(e.run_once(&[], "hi", None).await, Err(RunError::Malformed));
    }

    #[tokio::test]
    async fn provider_failure_is_a_model_error() {
        let model = ScriptedMockProvider::from_scripts(vec![Script::Fail("503".into())]);
        let (_, e) = engine(model, ToolRegistry::new());
        match e.run_once(&[], "hi", None).await {
            Err(RunError::Model(msg)) => assert!(msg.contains("503")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn in_stream_error_is_a_model_error() {
        let model = ScriptedMockProvider::new(vec![vec![
            ResponseEvent::TextDelta("par".into()),
            ResponseEvent::Error("overloaded".into()),
        ]]);
        let (_, e) = engine(model, ToolRegistry::new());
        assert_eq!(e.run_once(&[], "hi", None).await, Err(RunError::Model("overloaded".into())));
    }

    #[tokio::test]
    async fn stalled_model_times_out() {
        let model = ScriptedMockProvider::from_scripts(vec![Script::Stall(vec![])]);
        let (_, e) = engine(model, ToolRegistry::new());
        let e = e.with_timeout(Some(Duration::from_millis(50)));
        assert_eq!(
            e.run_once(&[], "hi", None).await,
            Err(RunError::Timeout(Duration::from_millis(50)))
        );
    }

    #[tokio::test]
    async fn round_budget_forces_a_tool_free_answer() {
        let model = ScriptedMockProvider::new(vec![
            tool_call("c1", "magic_function_tool", r#"{"input":1}"#),
            text_reply("done"),
        ]);
        let (model, e) = engine(model, magic());
        let e = e.with_max_tool_rounds(1);
        assert_eq!(e.run_once(&[], "x", None).await.unwrap().output, "done");
        let req = model.last_request().unwrap();
        assert!(req.tools.is_empty());
        assert_eq!(req.last_user_text(), Some(WRAP_UP));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_model() {
        let model = ScriptedMockProvider::tool_then_text("c1", "nope", "{}", "fine");
        let (model, e) = engine(model, magic());
        e.run_once(&[], "x", None).await.unwrap();
        let req = model.last_request().unwrap();
        assert_eq!(req.messages.last().unwrap(), &Message::tool_result("c1", "unknown tool: nope"));
    }

    #[tokio::test]
    async fn tool_events_reach_the_sink_around_the_call() {
        let model = ScriptedMockProvider::tool_then_text("c1", "magic_function_tool", r#"{"input":3}"#, "5");
        let (_, e) = engine(model, magic());
        let (sink, mut rx) = StreamSink::channel(5, 16);
        e.run_once(&[], "x", Some(&sink)).await.unwrap();
        sink.done(vec![]).await;
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert_eq!(
            events,
            vec![
                StreamEvent::ToolStarted { name: "magic_function_tool".into(), call_id: "c1".into() },
                StreamEvent::ToolFinished { name: "magic_function_tool".into(), call_id: "c1".into(), is_error: false },
                StreamEvent::Token("5".into()),
                StreamEvent::Done { source_ids: vec![] },
            ]
        );
    }

    #[tokio::test]
    async fn preamble_before_a_direct_result_is_not_streamed() {
        let model = ScriptedMockProvider::new(vec![preamble_then("verdict", "{}")]);
        let (_, e) = engine(model, with_verdict());
        let (sink, mut rx) = StreamSink::channel(1, 16);
        let r = e.run_once(&[], "x", Some(&sink)).await.unwrap();
        sink.done(vec![]).await;
        assert_eq!(r.output, "verdict");
        assert_eq!(streamed_text(&mut rx), r.output);
    }

    #[tokio::test]
    async fn held_text_is_streamed_once_the_run_goes_on() {
        let model = ScriptedMockProvider::new(vec![
            preamble_then("magic_function_tool", r#"{"input":3}"#),
            text_reply("答えは5です"),
        ]);
        let (_, e) = engine(model, with_verdict());
        let (sink, mut rx) = StreamSink::channel(1, 32);
        let r = e.run_once(&[], "x", Some(&sink)).await.unwrap();
        sink.done(vec![]).await;
        assert_eq!(r.output, "確認します。答えは5です");
        assert_eq!(streamed_text(&mut rx), r.output);
    }

    #[tokio::test]
    async fn text_from_earlier_rounds_is_dropped_by_a_later_direct_result() {
        let model = ScriptedMockProvider::new(vec![
            preamble_then("magic_function_tool", r#"{"input":3}"#),
            tool_call("c2", "verdict", "{}"),
        ]);
        let (_, e) = engine(model, with_verdict());
        let (sink, mut rx) = StreamSink::channel(1, 32);
        let r = e.run_once(&[], "x", Some(&sink)).await.unwrap();
        sink.done(vec![]).await;
        assert_eq!(r.output, "verdict");
        assert_eq!(streamed_text(&mut rx), r.output);
    }
}
