//! Planwright CLI - inspect the audit log and its derived state.
//!
//! Provides commands for recording and listing events, integrity checks,
//! task state, velocity, drift debt, the audit timeline and execution snapshots.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{events, insights, state, tasks, verify, Context};
use output::OutputFormat;

/// Planwright - event-sourced project audit engine CLI
#[derive(Parser)]
#[command(
    name = "planwright",
    author = "Aezi <aezi.zhu@icloud.com>",
    version = "0.1.0",
    about = "Planwright - event-sourced project audit engine",
    long_about = "CLI tool for recording planning events, verifying the hash chain, and querying derived state.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "PLANWRIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory holding the event log and state snapshots
    #[arg(long, global = true, env = "PLANWRIGHT_ROOT")]
    root: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Event log operations
    #[command(subcommand)]
    Events(events::EventCommands),

    /// Verify the hash chain of the event log
    Verify,

    /// Engine summary
    Status,

    /// List task states
    Tasks(tasks::TasksArgs),

    /// Show one task
    Task(tasks::TaskArgs),

    /// Completion velocity and trend
    Velocity(insights::VelocityArgs),

    /// Burndown projection
    Burndown(insights::BurndownArgs),

    /// Drift debt items and trend
    Debt(insights::DebtArgs),

    /// Audit timeline
    Timeline(insights::TimelineArgs),

    /// Execution state snapshots
    #[command(subcommand)]
    State(state::StateCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;
    let result = match Context::resolve(cli.config.as_deref(), cli.root.as_deref()) {
        Ok(ctx) => {
            if let Err(e) = planwright_core::telemetry::init_logging(&ctx.config.logging) {
                output::print_warning(&format!("logging disabled: {:#}", e));
            }
            run(cli.command, &ctx, format).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Commands, ctx: &Context, format: OutputFormat) -> Result<()> {
    match command {
        Commands::Events(cmd) => events::execute(cmd, ctx, format).await,
        Commands::Verify => verify::execute(ctx, format),
        Commands::Status => verify::status(ctx, format),
        Commands::Tasks(args) => tasks::list(args, ctx, format),
        Commands::Task(args) => tasks::show(args, ctx, format),
        Commands::Velocity(args) => insights::velocity(args, ctx, format),
        Commands::Burndown(args) => insights::burndown(args, ctx, format),
        Commands::Debt(args) => insights::debt(args, ctx, format),
        Commands::Timeline(args) => insights::timeline(args, ctx, format),
        Commands::State(cmd) => state::execute(cmd, ctx, format),
    }
}
