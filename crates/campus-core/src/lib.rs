// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod adapter;
pub mod catalog;
mod chat;
mod dispatcher;
mod engine;
mod error;
pub mod naming;
pub mod prompts;
mod session;
mod stream;
#[cfg(test)]
mod tests;

pub use adapter::AgentAdapter;
pub use catalog::{AgentDeps, AgentParts};
pub use chat::Chat;
pub use dispatcher::{DispatchState, Dispatcher};
pub use engine::ExecutionEngine;
pub use error::{AgentResponse, RunError, RunResult};
pub use naming::session_title;
pub use session::{to_model_messages, ConversationHistory, Speaker, Turn, UserContext};
pub use stream::{spawn_run, RunHandle};
