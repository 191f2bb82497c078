// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::pin::Pin;

use anyhow::bail;
use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::{CompletionRequest, Message, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider identifier used in logs.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;
}

/// Run a tool-less request and concatenate the streamed text.
pub async fn complete_text(
    provider: &dyn ModelProvider,
    messages: Vec<Message>,
) -> anyhow::Result<String> {
    let req = CompletionRequest { messages, tools: Vec::new(), stream: true };
    let mut stream = provider.complete(req).await?;
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            ResponseEvent::TextDelta(delta) => text.push_str(&delta),
            ResponseEvent::Error(msg) => bail!("model error: {msg}"),
            ResponseEvent::Done => break,
            _ => {}
        }
    }
    Ok(text)
}
