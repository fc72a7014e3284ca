//! Task state commands.

use anyhow::{Context as _, Result};
use clap::Args;
use planwright_core::projections::{TaskState, TaskStatus};
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct TasksArgs {
    /// Filter by status (pending, in_progress, done, verified, blocked, ...)
    #[arg(short, long)]
    status: Option<String>,
}

#[derive(Args)]
pub struct TaskArgs {
    /// Task ID
    task_id: String,
}

#[derive(Debug, Serialize, Tabled)]
struct TaskRow {
    #[tabled(rename = "Task")]
    task_id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Started")]
    started_at: String,
    #[tabled(rename = "Completed")]
    completed_at: String,
    #[tabled(rename = "Refs")]
    refs: usize,
}

impl From<&TaskState> for TaskRow {
    fn from(t: &TaskState) -> Self {
        Self {
            task_id: t.task_id.clone(),
            status: t.status.to_string(),
            owner: if t.owner.is_empty() { "-".to_string() } else { t.owner.clone() },
            started_at: output::when(t.started_at),
            completed_at: output::when(t.completed_at),
            refs: t.external_refs.len(),
        }
    }
}

pub fn list(args: TasksArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let engine = ctx.engine()?;
    let projection = engine.task_state();
    let states = match args.status {
        Some(status) => projection.tasks_by_status(&TaskStatus::from(status)),
        None => projection.all_states(),
    };

    let rows: Vec<TaskRow> = states.iter().map(TaskRow::from).collect();
    output::print_rows(&rows, &states, format)
}

pub fn show(args: TaskArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let engine = ctx.engine()?;
    let state = engine
        .task_state()
        .get_state(&args.task_id)
        .with_context(|| format!("No events recorded for task '{}'", args.task_id))?;

    match format {
        OutputFormat::Table => {
            output::print_header(&format!("Task: {}", state.task_id));
            output::print_detail("Status", state.status.as_str());
            output::print_detail("Owner", &state.owner);
            output::print_detail("Started", &output::when(state.started_at));
            output::print_detail("Completed", &output::when(state.completed_at));
            output::print_detail("Verified", &output::when(state.verified_at));
            if let Some(reason) = &state.blocked_reason {
                output::print_detail("Blocked", &format!("{} ({})", output::when(state.blocked_at), reason));
            }
            for (provider, r) in &state.external_refs {
                output::print_detail(provider, &format!("{} {}", r.external_id, r.url));
            }
        }
        _ => output::print_item(&state, format)?,
    }
    Ok(())
}
