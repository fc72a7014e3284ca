//! Integrity verification and engine status.

use anyhow::{bail, Result};
use planwright_core::events::{IntegrityViolation, ViolationKind};
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize, Tabled)]
struct ViolationRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Event")]
    event_id: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Expected")]
    expected: String,
    #[tabled(rename = "Found")]
    found: String,
}

impl From<&IntegrityViolation> for ViolationRow {
    fn from(v: &IntegrityViolation) -> Self {
        let (kind, expected, found) = match &v.kind {
            ViolationKind::ChainMismatch { expected, found } => ("chain", expected, found),
            ViolationKind::HashMismatch { stored, computed } => ("hash", computed, stored),
        };
        Self {
            index: v.index,
            event_id: v.event_id.clone(),
            kind,
            expected: output::short(expected),
            found: output::short(found),
        }
    }
}

/// Walk the log; fail when any violation is found.
pub fn execute(ctx: &Context, format: OutputFormat) -> Result<()> {
    let engine = ctx.engine()?;
    let violations = engine.verify()?;

    if violations.is_empty() {
        match format {
            OutputFormat::Table => output::print_success(&format!(
                "Hash chain intact ({} events)",
                engine.store().count()
            )),
            _ => output::print_item(&violations, format)?,
        }
        return Ok(());
    }

    let rows: Vec<ViolationRow> = violations.iter().map(ViolationRow::from).collect();
    output::print_rows(&rows, &violations, format)?;
    bail!("{} integrity violation(s) found", violations.len())
}

pub fn status(ctx: &Context, format: OutputFormat) -> Result<()> {
    let engine = ctx.engine()?;
    let status = engine.status();

    match format {
        OutputFormat::Table => {
            output::print_header(&format!("{} {}", status.service, status.version));
            output::print_detail("Event log", &ctx.config.store.events_path.display().to_string());
            output::print_detail("State dir", &ctx.config.store.state_dir.display().to_string());
            output::print_detail("Events", &status.events.to_string());
            output::print_detail("Head", &status.last_hash);
            output::print_detail("Projections", &status.projections.join(", "));
        }
        _ => output::print_item(&status, format)?,
    }
    Ok(())
}
