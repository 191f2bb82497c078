// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use futures::{stream, StreamExt};

use crate::{provider::ResponseStream, CompletionRequest, ResponseEvent};

/// Deterministic mock provider.  Echoes the last user message back as the
/// assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let reply = req.last_user_text().unwrap_or("[no input]").to_string();
        let events: Vec<anyhow::Result<ResponseEvent>> = vec![
            Ok(ResponseEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(ResponseEvent::Usage { input_tokens: 10, output_tokens: 10 }),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// What one `complete` call of a [`ScriptedMockProvider`] does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Emit the events and end the stream.
    Events(Vec<ResponseEvent>),
    /// Emit the events, sleeping `delay` before each one.
    Paced { delay: Duration, events: Vec<ResponseEvent> },
    /// Emit the events and then never finish.
    Stall(Vec<ResponseEvent>),
    /// Fail the request itself.
    Fail(String),
}

/// A pre-scripted mock provider.  Each call to `complete` pops the next
/// script from the front of the queue.  This lets tests specify exact event
/// sequences, including tool calls, stalls and failures, without network
/// access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Script>>>,
    /// Every request seen by this provider, in call order.
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedMockProvider {
    /// Build a provider from a list of event scripts.
    /// The outer `Vec` is the ordered list of calls; the inner `Vec` is the
    /// sequence of [`ResponseEvent`]s emitted for that call.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self::from_scripts(scripts.into_iter().map(Script::Events).collect())
    }

    pub fn from_scripts(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![text_reply(reply)])
    }

    /// Convenience: provider that returns a tool call followed by a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![tool_call(tool_id, tool_name, args_json), text_reply(final_text)])
    }

    /// The most recent request, if any call was made.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().ok().and_then(|r| r.last().cloned())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

/// One-round script: a text reply split into the given deltas.
pub fn text_deltas<I, S>(deltas: I) -> Vec<ResponseEvent>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut events: Vec<ResponseEvent> =
        deltas.into_iter().map(|d| ResponseEvent::TextDelta(d.into())).collect();
    events.push(ResponseEvent::Done);
    events
}

/// One-round script: a single text reply.
pub fn text_reply(text: impl Into<String>) -> Vec<ResponseEvent> {
    vec![
        ResponseEvent::TextDelta(text.into()),
        ResponseEvent::Usage { input_tokens: 5, output_tokens: 5 },
        ResponseEvent::Done,
    ]
}

/// One-round script: a single complete tool call.
pub fn tool_call(
    id: impl Into<String>,
    name: impl Into<String>,
    args_json: impl Into<String>,
) -> Vec<ResponseEvent> {
    vec![
        ResponseEvent::ToolCall {
            index: 0,
            id: id.into(),
            name: name.into(),
            arguments: args_json.into(),
        },
        ResponseEvent::Done,
    ]
}

#[async_trait]
impl crate::ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(req);
        }
        let script = {
            let mut scripts = match self.scripts.lock() {
                Ok(s) => s,
                Err(_) => bail!("scripted mock state poisoned"),
            };
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                Script::Events(text_deltas(["[no more scripts]"]))
            } else {
                scripts.remove(0)
            }
        };
        match script {
            Script::Events(events) => {
                Ok(Box::pin(stream::iter(events.into_iter().map(Ok::<_, anyhow::Error>))))
            }
            Script::Paced { delay, events } => Ok(Box::pin(stream::iter(events).then(
                move |ev| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, anyhow::Error>(ev)
                },
            ))),
            Script::Stall(events) => Ok(Box::pin(
                stream::iter(events.into_iter().map(Ok::<_, anyhow::Error>))
                    .chain(stream::pending()),
            )),
            Script::Fail(msg) => bail!("{msg}"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
