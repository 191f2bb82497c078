// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tracing::{debug, info};

use campus_config::AgentKind;
use campus_tools::StreamSink;

use crate::{
    adapter::AgentAdapter,
    catalog::{self, AgentDeps},
    engine::ExecutionEngine,
    error::RunResult,
    session::UserContext,
};

/// Where the dispatcher is within one user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Classifying,
    HandedOff(AgentKind),
    Conversing,
}

/// Classifies a message and hands it to exactly one sub-agent.
///
/// The dispatcher's own model sees `classify_role_tool` and one adapter per
/// target agent.  Whatever adapter it calls ends the run with that
/// sub-agent's answer; without a handoff the dispatcher's own text is the
/// answer.
pub struct Dispatcher {
    engine: ExecutionEngine,
    adapters: Vec<Arc<AgentAdapter>>,
    user: Arc<UserContext>,
    state: DispatchState,
}

impl Dispatcher {
    /// `input` is only used by agents that pre-fetch for the message.
    pub async fn new(deps: Arc<AgentDeps>, user: Arc<UserContext>, input: &str) -> Result<Self, crate::RunError> {
        let parts = catalog::build(AgentKind::Classify, &deps, &user, input).await?;
        let adapters = parts.adapters.clone();
        let engine = parts.into_engine(&deps, &user);
        Ok(Self { engine, adapters, user, state: DispatchState::Idle })
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Agents this dispatcher can hand off to, in registration order.
    pub fn candidates(&self) -> Vec<AgentKind> {
        self.adapters.iter().map(|a| a.kind()).collect()
    }

    /// Source ids collected by the adapters during the current or last run.
    pub fn source_ids(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for id in self.adapters.iter().flat_map(|a| a.source_ids()) {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    /// One user turn.  The state is back to `Idle` when this returns,
    /// whatever the outcome.
    pub async fn run(&mut self, input: &str, sink: Option<&StreamSink>) -> RunResult {
        self.transition(DispatchState::Classifying);
        for adapter in &self.adapters {
            adapter.reset();
        }
        if let Some(sink) = sink {
            self.engine.registry_mut().attach_streaming_sink(sink.clone());
        } else {
            self.engine.registry_mut().detach_streaming_sink();
        }
        let history = self.user.snapshot().await;
        let result = self.engine.run_once(&history, input, sink).await;

        match self.adapters.iter().find(|a| a.was_used()) {
            Some(a) => self.transition(DispatchState::HandedOff(a.kind())),
            None => self.transition(DispatchState::Conversing),
        }
        let result = result.map(|mut resp| {
            for id in self.source_ids() {
                if !resp.source_ids.contains(&id) {
                    resp.source_ids.push(id);
                }
            }
            resp
        });
        self.transition(DispatchState::Idle);
        result
    }

    fn transition(&mut self, next: DispatchState) {
        debug!(from = ?self.state, to = ?next, "dispatcher state");
        if let DispatchState::HandedOff(kind) = next {
            info!(agent = %kind, "turn handed off");
        }
        self.state = next;
    }
}
