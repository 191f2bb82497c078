// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use campus_config::AgentKind;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser, Debug)]
#[command(
    name = "campus",
    about = "A school assistant that routes questions to specialised agents",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Message to send.  Without it an interactive session starts.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Agent that answers (defaults to `agent.default_agent` from config)
    #[arg(long, short = 'a', value_enum)]
    pub agent: Option<AgentKind>,

    /// Print the answer as it is produced, with tool activity on stderr
    #[arg(long, short = 's')]
    pub stream: bool,

    /// Student name used in the system prompt
    #[arg(long, env = "CAMPUS_USER_NAME", default_value = "None")]
    pub name: String,

    /// Student major used in the system prompt
    #[arg(long, env = "CAMPUS_USER_MAJOR", default_value = "None")]
    pub major: String,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print the effective configuration and exit
    ShowConfig,
    /// List the agents that can be selected with --agent
    ListAgents,
    /// Suggest a session title for a conversation read from stdin.
    ///
    /// Each line is `human: <text>` or `ai: <text>`; other lines are ignored.
    Title,
}

impl Cli {
    pub fn agent_or(&self, default: AgentKind) -> AgentKind {
        self.agent.unwrap_or(default)
    }
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "campus", &mut std::io::stdout());
}
