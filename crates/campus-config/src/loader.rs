// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/campus/config.toml")];

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/campus/config.toml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        let xdg = cfg.join("campus/config.toml");
        if !paths.contains(&xdg) {
            paths.push(xdg);
        }
    }

    paths.push(PathBuf::from(".campus/config.toml"));
    paths.push(PathBuf::from("campus.toml"));
    paths
}

fn read_layer(path: &Path) -> anyhow::Result<toml::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Load configuration by merging all discovered TOML files.
/// The `extra` argument may provide an explicit path (e.g. `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = toml::Value::Table(toml::map::Map::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            merge_toml(&mut merged, read_layer(&path)?);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        merge_toml(&mut merged, read_layer(p)?);
    }

    let config: Config = merged.try_into().context("invalid configuration")?;
    config.validate()?;
    Ok(config)
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_toml(dst: &mut toml::Value, src: toml::Value) {
    match (dst, src) {
        (toml::Value::Table(d), toml::Value::Table(s)) => {
            for (k, v) in s {
                let entry = d.entry(k).or_insert(toml::Value::Table(toml::map::Map::new()));
                merge_toml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::{AgentKind, ClassifyStrategy};

    fn val(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val(r#"x = 1"#);
        merge_toml(&mut dst, val(r#"x = 2"#));
        assert_eq!(dst["x"].as_integer(), Some(2));
    }

    #[test]
    fn merge_nested_tables() {
        let mut dst = val("[agent]\nchunk_size = 5\nmax_tool_rounds = 3");
        merge_toml(&mut dst, val("[agent]\nchunk_size = 8"));
        assert_eq!(dst["agent"]["chunk_size"].as_integer(), Some(8));
        assert_eq!(dst["agent"]["max_tool_rounds"].as_integer(), Some(3));
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let result = load(Some(Path::new("/tmp/campus_nonexistent_config_xyz.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"[model]
provider = "mock"
name = "test-model"

[agent]
default_agent = "small_talk"
chunk_size = 3

[classify]
strategy = "model""#
        )
        .unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.model.provider, "mock");
        assert_eq!(cfg.agent.default_agent, AgentKind::SmallTalk);
        assert_eq!(cfg.agent.chunk_size, 3);
        assert_eq!(cfg.classify.strategy, ClassifyStrategy::Model);
        // untouched sections keep their defaults
        assert_eq!(cfg.retrieval.top_k, 3);
    }

    #[test]
    fn invalid_chunk_size_fails_to_load() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[agent]\nchunk_size = 0").unwrap();
        assert!(load(Some(f.path())).is_err());
    }
}
