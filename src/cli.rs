use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::commands::daemon::DaemonOptions;

#[derive(Debug, Parser)]
#[command(
    name = "chat-digest",
    version,
    about = "Buffers group chat messages and dispatches scheduled map/reduce summaries"
)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Append inbound message events (JSON lines) to the buffer.
    Ingest {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Summarize and dispatch every buffered conversation now.
    Run,
    /// Run summaries on the configured cron schedule.
    Daemon {
        #[arg(long)]
        run_now: bool,
        /// Keep ingesting JSON-lines events from stdin while waiting.
        #[arg(long)]
        ingest_stdin: bool,
    },
    /// Show effective configuration and buffered conversations.
    Status,
    /// Compute window stats for one conversation without calling the model.
    Stats {
        #[arg(long)]
        chat: String,
        #[arg(long)]
        minutes: Option<u64>,
    },
    /// Delete everything buffered for one conversation.
    Purge {
        #[arg(long)]
        chat: String,
    },
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("command={} ok={}", report.command, report.ok);
    for detail in &report.details {
        println!("{detail}");
    }
    for issue in &report.issues {
        println!("issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match &cli.command {
        Command::Ingest { file } => commands::ingest::run(file.as_deref())?,
        Command::Run => commands::run::run()?,
        Command::Daemon {
            run_now,
            ingest_stdin,
        } => commands::daemon::run(&DaemonOptions {
            run_now: *run_now,
            ingest_stdin: *ingest_stdin,
        })?,
        Command::Status => commands::status::run()?,
        Command::Stats { chat, minutes } => commands::stats::run(chat, *minutes)?,
        Command::Purge { chat } => commands::purge::run(chat)?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}
