// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, BufRead, Read, Write};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use futures::StreamExt;
use tracing::debug;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use campus_config::{AgentKind, Config};
use campus_core::{catalog, session_title, AgentDeps, Chat, Turn, UserContext};
use campus_tools::StreamEvent;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                return Ok(());
            }
            Commands::ListAgents => {
                list_agents();
                return Ok(());
            }
            Commands::ShowConfig => {
                let config = campus_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config)?);
                return Ok(());
            }
            Commands::Title => {
                let config = campus_config::load(cli.config.as_deref())?;
                return title_cmd(&config).await;
            }
        }
    }

    let config = campus_config::load(cli.config.as_deref())?;
    let kind = cli.agent_or(config.agent.default_agent);
    let deps = Arc::new(AgentDeps::from_config(config)?);
    let user = Arc::new(UserContext::new(cli.name.clone(), cli.major.clone()));
    debug!(agent = %kind, user = %user.id, stream = cli.stream, "session started");
    let chat = Chat::new(user, deps);

    match &cli.prompt {
        Some(prompt) => turn(&chat, prompt, kind, cli.stream).await,
        None => interactive(&chat, kind, cli.stream).await,
    }
}

fn list_agents() {
    let width = AgentKind::ALL.iter().map(|k| k.as_str().len()).max().unwrap_or(8);
    for kind in AgentKind::ALL {
        println!("{:<width$}  {}", kind.as_str(), catalog::describe(kind), width = width);
    }
}

async fn title_cmd(config: &Config) -> anyhow::Result<()> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input).context("reading stdin")?;
    let turns: Vec<Turn> = input.lines().filter_map(Turn::parse_line).collect();
    if turns.is_empty() {
        bail!("no `human:` or `ai:` lines on stdin");
    }
    let model = campus_model::from_config(&config.model)?;
    println!("{}", session_title(model.as_ref(), &turns).await?);
    Ok(())
}

async fn interactive(chat: &Chat, kind: AgentKind, stream: bool) -> anyhow::Result<()> {
    eprintln!("campus ({kind}): type `exit` to quit");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        eprint!("> ");
        io::stderr().flush()?;
        let Some(line) = lines.next() else { break };
        let line = line.context("reading stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            break;
        }
        // A failed turn is reported and the session carries on.
        if let Err(e) = turn(chat, line, kind, stream).await {
            eprintln!("error: {e:#}");
        }
    }
    Ok(())
}

async fn turn(chat: &Chat, text: &str, kind: AgentKind, stream: bool) -> anyhow::Result<()> {
    if !stream {
        let resp = chat.invoke(text, kind).await?;
        println!("{}", resp.output);
        print_sources(&resp.source_ids);
        return Ok(());
    }

    let mut handle = chat.stream(text, kind);
    let mut stdout = io::stdout();
    while let Some(event) = handle.next().await {
        match event {
            StreamEvent::Token(t) => {
                write!(stdout, "{t}")?;
                stdout.flush()?;
            }
            StreamEvent::ToolStarted { name, .. } => eprintln!("[{name}]"),
            StreamEvent::ToolFinished { name, is_error: true, .. } => eprintln!("[{name} failed]"),
            StreamEvent::ToolFinished { .. } => {}
            StreamEvent::Done { source_ids } => {
                println!();
                print_sources(&source_ids);
            }
            StreamEvent::Error(e) => {
                println!();
                bail!(e);
            }
        }
    }
    Ok(())
}

fn print_sources(ids: &[String]) {
    if !ids.is_empty() {
        eprintln!("sources: {}", ids.join(", "));
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
