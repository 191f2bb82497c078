// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod mock;
mod openai;
mod provider;
mod types;
mod yaml_mock;

pub use mock::{text_deltas, text_reply, tool_call, MockProvider, Script, ScriptedMockProvider};
pub use openai::{AuthStyle, OpenAiProvider};
pub use provider::{complete_text, ModelProvider, ResponseStream};
pub use types::*;
pub use yaml_mock::YamlMockProvider;

use anyhow::{bail, Context};
use campus_config::ModelConfig;

/// Construct a boxed [`ModelProvider`] from configuration.
///
/// Provider selection:
/// - `"openai"` → [`OpenAiProvider::openai`]
/// - `"azure"` → [`OpenAiProvider::azure`]; `base_url` is the resource endpoint
/// - `"mock"` → [`YamlMockProvider`] if a script is configured, otherwise
///   [`MockProvider`] (echo-back)
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    let key = resolve_api_key(cfg);
    match cfg.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiProvider::openai(
            cfg.name.clone(),
            key,
            cfg.base_url.as_deref(),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "azure" => {
            let endpoint = cfg
                .base_url
                .as_deref()
                .context("azure provider needs model.base_url (the resource endpoint)")?;
            let deployment = cfg.azure_deployment.as_deref().unwrap_or(&cfg.name);
            let version = cfg.azure_api_version.as_deref().unwrap_or("2024-06-01");
            Ok(Box::new(OpenAiProvider::azure(
                cfg.name.clone(),
                key,
                endpoint,
                deployment,
                version,
                cfg.max_tokens,
                cfg.temperature,
            )))
        }
        "mock" => {
            let script = std::env::var("CAMPUS_MOCK_RESPONSES")
                .ok()
                .or_else(|| cfg.mock_responses_file.clone());
            match script {
                Some(path) => Ok(Box::new(YamlMockProvider::from_file(&path)?)),
                None => Ok(Box::new(MockProvider)),
            }
        }
        other => bail!("unknown model provider: {other}"),
    }
}

fn resolve_api_key(cfg: &ModelConfig) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    cfg.api_key_env.as_ref().and_then(|env| std::env::var(env).ok())
}
