// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{FutureExt, Stream};
use tokio::sync::mpsc;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use campus_tools::{StreamEvent, StreamSink};

use crate::{
    engine::ExecutionEngine,
    error::RunResult,
    session::Turn,
};

/// One in-flight streamed run.
///
/// Yields the run's events in production order and ends right after the
/// single terminal event.  Dropping the handle aborts the worker task and,
/// through it, every tool and sub-agent task the run spawned.
pub struct RunHandle {
    run_id: String,
    rx: mpsc::Receiver<StreamEvent>,
    worker: AbortOnDropHandle<()>,
    finished: bool,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stop the run and wait until the worker is gone.
    pub async fn cancel(self) {
        let RunHandle { run_id, rx, worker, .. } = self;
        drop(rx);
        worker.abort();
        // An aborted task resolves to a cancellation JoinError.
        let _ = worker.await;
        debug!(run_id = %run_id, "run cancelled");
    }

    /// Drain the run: concatenated token text plus the terminal outcome.
    pub async fn finish(mut self) -> (String, Result<Vec<String>, String>) {
        use futures::StreamExt;

        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Token(t) => text.push_str(&t),
                StreamEvent::Done { source_ids } => return (text, Ok(source_ids)),
                StreamEvent::Error(e) => return (text, Err(e)),
                _ => {}
            }
        }
        (text, Err("run ended without a result".into()))
    }
}

impl Stream for RunHandle {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    this.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                // Channel closed without a terminal event.
                this.finished = true;
                warn!(run_id = %this.run_id, "worker ended without a terminal event");
                Poll::Ready(Some(StreamEvent::Error("run ended without a result".into())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Run `work` on its own task, streaming through a fresh sink.
///
/// `work` receives the sink to hand to the engine; its result becomes the
/// terminal event.  A panic inside `work` is reported as `Error` too.
pub fn spawn_run<F, Fut>(chunk_size: usize, capacity: usize, work: F) -> RunHandle
where
    F: FnOnce(StreamSink) -> Fut,
    Fut: Future<Output = RunResult> + Send + 'static,
{
    let run_id = Uuid::new_v4().to_string();
    let (sink, rx) = StreamSink::channel(chunk_size, capacity);
    let fut = work(sink.clone());
    let id = run_id.clone();
    let worker = tokio::spawn(async move {
        debug!(run_id = %id, "worker started");
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(resp)) => sink.done(resp.source_ids).await,
            Ok(Err(e)) => sink.error(e.to_string()).await,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                warn!(run_id = %id, panic = %msg, "worker panicked");
                sink.error(format!("internal error: {msg}")).await;
            }
        }
    });
    RunHandle { run_id, rx, worker: AbortOnDropHandle::new(worker), finished: false }
}

impl ExecutionEngine {
    /// Streaming counterpart of [`ExecutionEngine::run_once`].  The engine
    /// moves into the worker; every registered tool gets the run's sink.
    pub fn run_streaming(
        mut self,
        history: Vec<Turn>,
        user_msg: String,
        chunk_size: usize,
        capacity: usize,
    ) -> RunHandle {
        spawn_run(chunk_size, capacity, move |sink| {
            self.registry_mut().attach_streaming_sink(sink.clone());
            async move { self.run_once(&history, &user_msg, Some(&sink)).await }
        })
    }
}
