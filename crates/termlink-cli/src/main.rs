//! termlink: remote PTY sessions over a single WebSocket.
//!
//! Opens line-mode interactive sessions against a remote execution host,
//! screening every command through the local sanitizer, and lets you test
//! sanitizer policy offline.

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use termlink_client::{SecurityLevel, SessionOptions};
use tracing::error;

/// Multiplexed remote PTY client
#[derive(Parser)]
#[command(name = "termlink", version, about = "Multiplexed remote PTY sessions over one WebSocket")]
struct Cli {
    /// Config file path (default: ~/.termlink/config.toml)
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Security level override (strict, standard, permissive)
    #[arg(short = 'l', long = "level", global = true)]
    level: Option<SecurityLevel>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open an interactive session on a remote host
    Connect {
        /// Host URL (ws:// or wss://); defaults to the configured url
        url: Option<String>,

        /// Shell to start on the host
        #[arg(long)]
        shell: Option<String>,

        /// Working directory on the host
        #[arg(long)]
        cwd: Option<String>,
    },

    /// Run a command line through the sanitizer without sending it
    Check {
        /// Print the audit entry as JSON
        #[arg(long)]
        json: bool,

        /// The command line to check
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Write a starter config file
    Init {
        /// Host URL to store as the default
        url: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                "termlink=debug,termlink_cli=debug,termlink_client=debug,termlink_guard=debug",
            )
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("termlink=warn,termlink_cli=warn,termlink_client=warn")
            .with_target(false)
            .init();
    }

    let result = run(cli).await;

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("termlink: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(config::default_path);

    // init must work even when the existing file is unreadable.
    if let Command::Init { url, force } = cli.command {
        return commands::init::run(&config_path, url, force);
    }

    let mut cfg = config::load(&config_path)?;
    if let Some(level) = cli.level {
        cfg.security.level = level;
    }

    match cli.command {
        Command::Connect { url, shell, cwd } => {
            if let Some(url) = url {
                cfg.url = url;
            }
            if cfg.url.is_empty() {
                anyhow::bail!("no host url given (pass one or run `termlink init <url>`)");
            }
            let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
            let options = SessionOptions {
                cols,
                rows,
                shell,
                cwd,
                ..SessionOptions::default()
            };
            commands::connect::run(cfg, options).await
        }
        Command::Check { json, command } => {
            commands::check::run(&cfg.security, &command.join(" "), json)
        }
        Command::Init { .. } => Ok(()),
    }
}
