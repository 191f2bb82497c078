// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Chat-completions driver for OpenAI and Azure OpenAI.
//!
//! Both services speak the same `/chat/completions` SSE wire format and
//! differ only in how the endpoint URL is built and how the key is sent:
//! - OpenAI: `{base}/chat/completions`, `Authorization: Bearer <key>`
//! - Azure: `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=…`,
//!   `api-key: <key>`

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::{provider::ResponseStream, CompletionRequest, Message, MessageContent, ResponseEvent};

/// How to send the API key in HTTP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `api-key: <key>` (Azure OpenAI)
    ApiKeyHeader,
}

pub struct OpenAiProvider {
    driver_name: &'static str,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    max_tokens: u32,
    temperature: f32,
    auth_style: AuthStyle,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn openai(
        model: String,
        api_key: Option<String>,
        base_url: Option<&str>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        let base = base_url.unwrap_or("https://api.openai.com/v1").trim_end_matches('/');
        Self {
            driver_name: "openai",
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.0),
            auth_style: AuthStyle::Bearer,
            client: reqwest::Client::new(),
        }
    }

    /// `endpoint` is the resource URL, e.g. `https://my-resource.openai.azure.com`.
    pub fn azure(
        model: String,
        api_key: Option<String>,
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        let endpoint = endpoint.trim_end_matches('/');
        Self {
            driver_name: "azure",
            model,
            api_key,
            chat_url: format!(
                "{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
            ),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.0),
            auth_style: AuthStyle::ApiKeyHeader,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, req: &CompletionRequest) -> Value {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": build_openai_messages(&req.messages),
            "stream": req.stream,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        if req.stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }
}

#[async_trait]
impl crate::ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let body = self.request_body(&req);
        debug!(
            driver = %self.driver_name,
            model = %self.model,
            tool_count = req.tools.len(),
            message_count = req.messages.len(),
            "sending completion request"
        );
        trace!(request_body = ?body, "full completion request");

        let key = self
            .api_key
            .as_deref()
            .context("API key not set; provide api_key or api_key_env in config")?;
        let http_req = self.client.post(&self.chat_url).json(&body);
        let http_req = match self.auth_style {
            AuthStyle::Bearer => http_req.bearer_auth(key),
            AuthStyle::ApiKeyHeader => http_req.header("api-key", key),
        };

        let resp = http_req
            .send()
            .await
            .with_context(|| format!("{} request failed", self.driver_name))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("{} error {status}: {text}", self.driver_name);
        }

        // An SSE line may be split across TCP chunks, so complete lines are
        // drained from a buffer that persists between chunks.
        let event_stream = resp
            .bytes_stream()
            .scan(String::new(), |buf, chunk| {
                let events: Vec<anyhow::Result<ResponseEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Drain all complete `\n`-terminated SSE lines from `buf`, leaving any
/// trailing partial line in place.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        buf.drain(..=nl_pos);
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<ResponseEvent>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ResponseEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    parse_sse_chunk(&v)
}

/// Translate one streamed JSON chunk.  Azure emits an initial chunk with an
/// empty `choices` array (content-filter results); such chunks yield nothing.
fn parse_sse_chunk(v: &Value) -> Option<anyhow::Result<ResponseEvent>> {
    if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
        let msg = err["message"].as_str().unwrap_or("unknown provider error");
        return Some(Ok(ResponseEvent::Error(msg.to_string())));
    }

    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        if v["choices"].as_array().map_or(true, |c| c.is_empty()) {
            return Some(Ok(ResponseEvent::Usage {
                input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            }));
        }
    }

    let choice = v["choices"].get(0)?;
    if choice["finish_reason"].as_str() == Some("length") {
        return Some(Ok(ResponseEvent::MaxTokens));
    }

    let delta = &choice["delta"];
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return Some(Ok(ResponseEvent::ToolCall {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
        }));
    }

    match delta.get("content").and_then(|c| c.as_str()) {
        Some(text) if !text.is_empty() => Some(Ok(ResponseEvent::TextDelta(text.to_string()))),
        _ => None,
    }
}

/// Convert messages into the OpenAI wire-format JSON array.
///
/// Consecutive `ToolCall` messages are merged into a single assistant
/// message with a `tool_calls` array, as the API requires.
pub(crate) fn build_openai_messages(messages: &[Message]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::with_capacity(messages.len());
    for m in messages {
        match &m.content {
            MessageContent::Text(t) => {
                result.push(json!({ "role": m.role.as_str(), "content": t }));
            }
            MessageContent::ToolCall { tool_call_id, function } => {
                let call = json!({
                    "id": tool_call_id,
                    "type": "function",
                    "function": { "name": function.name, "arguments": function.arguments },
                });
                let merged = result.last_mut().and_then(|prev| {
                    prev.get_mut("tool_calls").and_then(Value::as_array_mut)
                });
                match merged {
                    Some(calls) => calls.push(call),
                    None => result.push(json!({ "role": "assistant", "tool_calls": [call] })),
                }
            }
            MessageContent::ToolResult { tool_call_id, content } => {
                result.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                }));
            }
        }
    }
    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
