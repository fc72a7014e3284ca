//! Execution state snapshot commands.

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::Subcommand;
use planwright_core::projections::TaskStatus;
use planwright_core::state::{ExecutionState, StateStore, DEFAULT_UPDATE_RETRIES};
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum StateCommands {
    /// Show the snapshot for a project
    Show {
        /// Project ID
        project_id: String,
    },

    /// Set one task's status, retrying on version conflicts
    SetTask {
        /// Project ID
        project_id: String,
        /// Task ID
        task_id: String,
        /// New status (pending, in_progress, done, verified, blocked, ...)
        status: String,

        /// Attempts before giving up on a conflicting writer
        #[arg(long, default_value_t = DEFAULT_UPDATE_RETRIES)]
        retries: usize,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct TaskResultRow {
    #[tabled(rename = "Task")]
    task_id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Finished")]
    finished_at: String,
    #[tabled(rename = "Error")]
    error: String,
}

fn print_state(state: &ExecutionState, format: OutputFormat) -> Result<()> {
    if format != OutputFormat::Table {
        return output::print_item(state, format);
    }

    output::print_header(&format!("Project: {}", state.project_id));
    output::print_detail("Version", &state.version.to_string());
    output::print_detail("Updated", &output::when(state.updated_at));
    let rows: Vec<TaskResultRow> = state
        .task_states
        .iter()
        .map(|(id, r)| TaskResultRow {
            task_id: id.clone(),
            status: r.status.to_string(),
            attempts: r.attempts,
            finished_at: output::when(r.finished_at),
            error: r.error.clone().unwrap_or_default(),
        })
        .collect();
    println!();
    output::print_rows(&rows, state, format)
}

pub fn execute(cmd: StateCommands, ctx: &Context, format: OutputFormat) -> Result<()> {
    // Snapshots do not need the event log replayed.
    let store = StateStore::open(&ctx.config.store.state_dir)?;

    match cmd {
        StateCommands::Show { project_id } => {
            let state = store
                .load(&project_id)?
                .with_context(|| format!("No execution state for project '{}'", project_id))?;
            print_state(&state, format)
        }

        StateCommands::SetTask {
            project_id,
            task_id,
            status,
            retries,
        } => {
            let status = TaskStatus::from(status);
            let state = store.update(&project_id, retries, |s| {
                s.record_status(&task_id, status.clone(), Utc::now())
            })?;
            if format == OutputFormat::Table {
                output::print_info(&format!(
                    "{} -> {} (version {})",
                    task_id, status, state.version
                ));
            }
            print_state(&state, format)
        }
    }
}
