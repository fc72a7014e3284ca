//! Derived-state reports: velocity, burndown, drift debt and the audit timeline.

use anyhow::Result;
use clap::Args;
use colored::*;
use planwright_core::projections::{
    AuditEntry, BurndownPoint, DebtItem, DebtSummary, DriftTrend, DriftTrendDirection,
    TrendDirection, VelocityStats, VelocityTrend, VelocityWindow,
};
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{self, OutputFormat};

// ── Velocity ────────────────────────────────────────────────────────────────

#[derive(Args)]
pub struct VelocityArgs {
    /// Comma-separated trailing windows in days, overriding the configured ones
    #[arg(short, long, value_delimiter = ',')]
    windows: Vec<i64>,
}

#[derive(Debug, Serialize, Tabled)]
struct WindowRow {
    #[tabled(rename = "Window (days)")]
    days: i64,
    #[tabled(rename = "Completed")]
    count: usize,
    #[tabled(rename = "Per day")]
    velocity: String,
}

impl From<&VelocityWindow> for WindowRow {
    fn from(w: &VelocityWindow) -> Self {
        Self {
            days: w.days,
            count: w.count,
            velocity: format!("{:.2}", w.velocity),
        }
    }
}

#[derive(Debug, Serialize)]
struct VelocityReport {
    current: f64,
    verification: f64,
    trend: VelocityTrend,
    stats: VelocityStats,
}

pub fn velocity(args: VelocityArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let windows = args.windows;
    let engine = ctx.engine_with(|config| {
        if !windows.is_empty() {
            config.velocity.windows = windows;
        }
    })?;

    let report = VelocityReport {
        current: engine.velocity().velocity(),
        verification: engine.velocity().verification_velocity(),
        trend: engine.extended_velocity().get_velocity_trend(),
        stats: engine.extended_velocity().get_velocity_stats(),
    };

    if format != OutputFormat::Table {
        return output::print_item(&report, format);
    }

    let rows: Vec<WindowRow> = report.trend.windows.iter().map(WindowRow::from).collect();
    output::print_rows(&rows, &report, format)?;

    let direction = match report.trend.direction {
        TrendDirection::Accelerating => report.trend.direction.to_string().green(),
        TrendDirection::Decelerating => report.trend.direction.to_string().red(),
        TrendDirection::Stable => report.trend.direction.to_string().normal(),
    };
    output::print_detail(
        &format!("Velocity ({}d)", engine.velocity().window_days()),
        &format!("{:.2}/day, {:.2} verified/day", report.current, report.verification),
    );
    output::print_detail(
        "Trend",
        &format!(
            "{} (slope {:+.2}, confidence {:.0}%)",
            direction,
            report.trend.slope,
            report.trend.confidence * 100.0
        ),
    );
    output::print_detail(
        "Per active day",
        &format!(
            "mean {:.2}, median {:.2}, stddev {:.2} over {} days",
            report.stats.mean, report.stats.median, report.stats.stddev, report.stats.samples
        ),
    );
    Ok(())
}

// ── Burndown ────────────────────────────────────────────────────────────────

#[derive(Args)]
pub struct BurndownArgs {
    /// Total scope in tasks
    #[arg(long)]
    total: u64,

    /// Tasks remaining today
    #[arg(long)]
    remaining: u64,

    /// Days to project forward
    #[arg(long, default_value = "30")]
    horizon: u32,
}

#[derive(Debug, Serialize, Tabled)]
struct BurndownRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Remaining")]
    remaining: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
}

impl From<&BurndownPoint> for BurndownRow {
    fn from(p: &BurndownPoint) -> Self {
        Self {
            date: p.date.to_string(),
            remaining: format!("{:.1}", p.remaining),
            kind: if p.projected { "projected" } else { "actual" },
        }
    }
}

pub fn burndown(args: BurndownArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let engine = ctx.engine()?;
    let points = engine
        .extended_velocity()
        .generate_burndown(args.total, args.remaining, args.horizon);

    let rows: Vec<BurndownRow> = points.iter().map(BurndownRow::from).collect();
    output::print_rows(&rows, &points, format)
}

// ── Debt ────────────────────────────────────────────────────────────────────

#[derive(Args)]
pub struct DebtArgs {
    /// Show resolved items instead of active ones
    #[arg(long)]
    resolved: bool,

    /// Trailing window for the drift trend
    #[arg(long, default_value = "14")]
    trend_days: i64,
}

#[derive(Debug, Serialize, Tabled)]
struct DebtRow {
    #[tabled(rename = "Component")]
    component_id: String,
    #[tabled(rename = "Drift")]
    drift_type: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Detections")]
    detection_count: u64,
    #[tabled(rename = "Issues")]
    issue_count: i64,
    #[tabled(rename = "Days pending")]
    days_pending: i64,
}

impl From<&DebtItem> for DebtRow {
    fn from(item: &DebtItem) -> Self {
        Self {
            component_id: item.component_id.clone(),
            drift_type: item.drift_type.clone(),
            category: item.category.to_string(),
            detection_count: item.detection_count,
            issue_count: item.issue_count,
            days_pending: item.days_pending,
        }
    }
}

#[derive(Debug, Serialize)]
struct DebtReport {
    items: Vec<DebtItem>,
    summary: DebtSummary,
    trend: DriftTrend,
}

pub fn debt(args: DebtArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let engine = ctx.engine()?;
    let drift = engine.drift();
    let report = DebtReport {
        items: if args.resolved {
            drift.get_resolved_items()
        } else {
            drift.get_active_debt_items()
        },
        summary: drift.debt_summary(),
        trend: drift.get_drift_trend(args.trend_days),
    };

    if format != OutputFormat::Table {
        return output::print_item(&report, format);
    }

    let rows: Vec<DebtRow> = report.items.iter().map(DebtRow::from).collect();
    output::print_rows(&rows, &report, format)?;

    let direction = match report.trend.direction {
        DriftTrendDirection::Increasing => report.trend.direction.to_string().red(),
        DriftTrendDirection::Decreasing => report.trend.direction.to_string().green(),
        DriftTrendDirection::Stable => report.trend.direction.to_string().normal(),
    };
    output::print_detail(
        "Summary",
        &format!(
            "{} active, {} resolved, mean {:.1} days pending",
            report.summary.active, report.summary.resolved, report.summary.mean_days_pending
        ),
    );
    output::print_detail(
        &format!("Trend ({}d)", report.trend.window_days),
        &format!(
            "{} ({} -> {} issues, {:+.0}%)",
            direction,
            report.trend.first_half_issues,
            report.trend.second_half_issues,
            report.trend.percent_change * 100.0
        ),
    );
    Ok(())
}

// ── Timeline ────────────────────────────────────────────────────────────────

#[derive(Args)]
pub struct TimelineArgs {
    /// Only entries for this aggregate
    #[arg(short, long)]
    aggregate: Option<String>,

    /// Only entries by this actor
    #[arg(long)]
    actor: Option<String>,

    /// Keep the newest N entries
    #[arg(short, long, default_value = "50")]
    limit: usize,

    /// Print per-actor activity counts instead of entries
    #[arg(long)]
    activity: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct TimelineRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Type")]
    event_type: String,
    #[tabled(rename = "Aggregate")]
    aggregate: String,
    #[tabled(rename = "Actor")]
    actor: String,
}

impl From<&AuditEntry> for TimelineRow {
    fn from(e: &AuditEntry) -> Self {
        Self {
            timestamp: output::when(Some(e.timestamp)),
            event_type: e.event_type.to_string(),
            aggregate: format!("{}/{}", e.aggregate_type, e.aggregate_id),
            actor: e.actor.clone(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct ActivityRow {
    #[tabled(rename = "Actor")]
    actor: String,
    #[tabled(rename = "Events")]
    events: usize,
}

pub fn timeline(args: TimelineArgs, ctx: &Context, format: OutputFormat) -> Result<()> {
    let engine = ctx.engine()?;
    let timeline = engine.timeline();

    if args.activity {
        let activity = timeline.actor_activity();
        let rows: Vec<ActivityRow> = activity
            .iter()
            .map(|(actor, events)| ActivityRow {
                actor: actor.clone(),
                events: *events,
            })
            .collect();
        return output::print_rows(&rows, &activity, format);
    }

    let mut entries = match (&args.aggregate, &args.actor) {
        (Some(id), _) => timeline.for_aggregate(id),
        (None, Some(actor)) => timeline.by_actor(actor),
        (None, None) => timeline.timeline(),
    };
    if let (Some(_), Some(actor)) = (&args.aggregate, &args.actor) {
        entries.retain(|e| &e.actor == actor);
    }
    let skip = entries.len().saturating_sub(args.limit);
    let entries: Vec<AuditEntry> = entries.into_iter().skip(skip).collect();

    let rows: Vec<TimelineRow> = entries.iter().map(TimelineRow::from).collect();
    output::print_rows(&rows, &entries, format)
}
