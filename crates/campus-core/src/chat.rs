// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tracing::info;

use campus_config::AgentKind;

use crate::{
    catalog::{self, AgentDeps},
    error::RunResult,
    session::UserContext,
    stream::{spawn_run, RunHandle},
};

/// Top-level entry point for one user's session.
///
/// Each call builds its agent fresh; the only state carried between calls
/// is the user's conversation history, which grows by one exchange per
/// successful call.
#[derive(Clone)]
pub struct Chat {
    user: Arc<UserContext>,
    deps: Arc<AgentDeps>,
}

impl Chat {
    pub fn new(user: Arc<UserContext>, deps: Arc<AgentDeps>) -> Self {
        Self { user, deps }
    }

    pub fn user(&self) -> &Arc<UserContext> {
        &self.user
    }

    pub fn deps(&self) -> &Arc<AgentDeps> {
        &self.deps
    }

    pub async fn invoke(&self, text: &str, kind: AgentKind) -> RunResult {
        info!(agent = %kind, user = %self.user.id, "invoke");
        let resp = catalog::run_agent(kind, &self.deps, &self.user, text, None).await?;
        self.user.record(text, &resp.output).await;
        Ok(resp)
    }

    /// Stream one turn with the configured chunk size.
    pub fn stream(&self, text: &str, kind: AgentKind) -> RunHandle {
        self.stream_with(text, kind, self.deps.config.agent.chunk_size)
    }

    /// The exchange is recorded before `Done` is delivered, so a consumer
    /// that saw `Done` also sees the new turns.
    pub fn stream_with(&self, text: &str, kind: AgentKind, chunk_size: usize) -> RunHandle {
        info!(agent = %kind, user = %self.user.id, chunk_size, "stream");
        let deps = self.deps.clone();
        let user = self.user.clone();
        let text = text.to_string();
        let capacity = deps.config.agent.stream_buffer;
        spawn_run(chunk_size, capacity, move |sink| async move {
            let resp = catalog::run_agent(kind, &deps, &user, &text, Some(&sink)).await?;
            user.record(&text, &resp.output).await;
            Ok(resp)
        })
    }
}
