// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

/// One event of a streamed run, as seen by the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A coalesced chunk of model text
    Token(String),
    ToolStarted { name: String, call_id: String },
    ToolFinished { name: String, call_id: String, is_error: bool },
    /// Terminal: the run failed
    Error(String),
    /// Terminal: the run succeeded
    Done { source_ids: Vec<String> },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error(_) | StreamEvent::Done { .. })
    }
}

/// Producer side of a run's event channel.
///
/// Cloned into every tool of a streaming run so that nested sub-agents
/// write to the same channel as their parent.  Tokens are buffered until
/// `chunk_size` characters have accumulated; any other event flushes the
/// buffer first so ordering is preserved.  After a terminal event the sink
/// is closed and drops everything it is given.
///
/// A [`staged`](StreamSink::staged) child holds its events back until
/// [`commit`](StreamSink::commit) replays them into the parent.
#[derive(Clone)]
pub struct StreamSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    target: Target,
    chunk_size: usize,
    state: Mutex<SinkState>,
}

enum Target {
    Channel(mpsc::Sender<StreamEvent>),
    /// Events pile up in `SinkState::staged` until committed to the parent.
    Staged(StreamSink),
}

#[derive(Default)]
struct SinkState {
    pending: String,
    staged: Vec<StreamEvent>,
    closed: bool,
}

impl StreamSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>, chunk_size: usize) -> Self {
        Self::with_target(Target::Channel(tx), chunk_size)
    }

    fn with_target(target: Target, chunk_size: usize) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                target,
                chunk_size: chunk_size.max(1),
                state: Mutex::new(SinkState::default()),
            }),
        }
    }

    /// A child sink whose events reach this one only on [`commit`](Self::commit).
    /// Dropping the child uncommitted discards everything it was given.
    pub fn staged(&self) -> StreamSink {
        Self::with_target(Target::Staged(self.clone()), self.inner.chunk_size)
    }

    /// Replay the staged events into the parent, in order.  Does nothing on
    /// a sink that is not staged.
    pub async fn commit(&self) {
        let Target::Staged(parent) = &self.inner.target else {
            return;
        };
        let events = {
            let mut state = self.inner.state.lock().await;
            let mut events = std::mem::take(&mut state.staged);
            if !state.pending.is_empty() {
                events.push(StreamEvent::Token(std::mem::take(&mut state.pending)));
            }
            events
        };
        for event in events {
            match event {
                StreamEvent::Token(text) => parent.token(&text).await,
                other => parent.emit(other).await,
            }
        }
    }

    /// Create a sink together with the receiving end of a bounded channel.
    pub fn channel(chunk_size: usize, capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, chunk_size), rx)
    }

    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    pub async fn token(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return;
        }
        state.pending.push_str(text);
        if state.pending.chars().count() >= self.inner.chunk_size {
            let chunk = std::mem::take(&mut state.pending);
            self.send(&mut state, StreamEvent::Token(chunk)).await;
        }
    }

    pub async fn tool_started(&self, name: &str, call_id: &str) {
        self.emit(StreamEvent::ToolStarted { name: name.into(), call_id: call_id.into() })
            .await;
    }

    pub async fn tool_finished(&self, name: &str, call_id: &str, is_error: bool) {
        self.emit(StreamEvent::ToolFinished {
            name: name.into(),
            call_id: call_id.into(),
            is_error,
        })
        .await;
    }

    pub async fn done(&self, source_ids: Vec<String>) {
        self.emit(StreamEvent::Done { source_ids }).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.emit(StreamEvent::Error(message.into())).await;
    }

    /// A staged sink is also closed once any ancestor is.
    pub async fn is_closed(&self) -> bool {
        let mut sink = self.clone();
        loop {
            if sink.inner.state.lock().await.closed {
                return true;
            }
            let parent = match &sink.inner.target {
                Target::Staged(parent) => parent.clone(),
                Target::Channel(_) => return false,
            };
            sink = parent;
        }
    }

    /// Flush buffered text, then deliver `event`.
    async fn emit(&self, event: StreamEvent) {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return;
        }
        if !state.pending.is_empty() {
            let chunk = std::mem::take(&mut state.pending);
            self.send(&mut state, StreamEvent::Token(chunk)).await;
        }
        let terminal = event.is_terminal();
        self.send(&mut state, event).await;
        if terminal {
            state.closed = true;
        }
    }

    async fn send(&self, state: &mut SinkState, event: StreamEvent) {
        if state.closed {
            return;
        }
        match &self.inner.target {
            Target::Channel(tx) => {
                if tx.send(event).await.is_err() {
                    // consumer went away
                    state.closed = true;
                }
            }
            Target::Staged(_) => state.staged.push(event),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
