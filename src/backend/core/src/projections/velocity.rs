//! Throughput projections.
//!
//! [`VelocityProjection`] tracks one rolling window over completions and
//! verifications. [`ExtendedVelocityProjection`] tracks a set of windows and
//! derives trend, confidence, per-day statistics and burndown series.
//!
//! A timestamp `ts` lies in a `D`-day window ending at `now` when
//! `now - D < ts <= now`.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::events::{Event, Payload};

use super::{system_clock, Clock, Projection};

const DEFAULT_WINDOW_DAYS: i64 = 7;
const DEFAULT_WINDOWS: [i64; 3] = [7, 14, 30];
const TREND_THRESHOLD: f64 = 0.1;

fn count_in_window(timestamps: &[DateTime<Utc>], now: DateTime<Utc>, days: i64) -> usize {
    let start = now - Duration::days(days);
    timestamps.iter().filter(|ts| **ts > start && **ts <= now).count()
}

fn velocity_over(timestamps: &[DateTime<Utc>], now: DateTime<Utc>, days: i64) -> f64 {
    if days <= 0 {
        return 0.0;
    }
    count_in_window(timestamps, now, days) as f64 / days as f64
}

/// Completions per UTC calendar day, oldest first; idle days are absent.
fn per_day(timestamps: &[DateTime<Utc>]) -> BTreeMap<NaiveDate, usize> {
    let mut days = BTreeMap::new();
    for ts in timestamps {
        *days.entry(ts.date_naive()).or_insert(0) += 1;
    }
    days
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

// =============================================================================
// Basic Velocity
// =============================================================================

#[derive(Debug, Default)]
struct BasicState {
    completions: Vec<DateTime<Utc>>,
    verifications: Vec<DateTime<Utc>>,
}

/// Single rolling-window velocity.
pub struct VelocityProjection {
    window_days: i64,
    clock: Clock,
    state: RwLock<BasicState>,
}

impl VelocityProjection {
    /// A window of `window_days` (7 when not positive).
    pub fn new(window_days: i64) -> Self {
        Self {
            window_days: if window_days > 0 { window_days } else { DEFAULT_WINDOW_DAYS },
            clock: system_clock(),
            state: RwLock::new(BasicState::default()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn window_days(&self) -> i64 {
        self.window_days
    }

    /// Completions per day over the window.
    pub fn velocity(&self) -> f64 {
        velocity_over(&self.state.read().completions, (self.clock)(), self.window_days)
    }

    pub fn verification_velocity(&self) -> f64 {
        velocity_over(&self.state.read().verifications, (self.clock)(), self.window_days)
    }

    pub fn completions_in_window(&self) -> usize {
        count_in_window(&self.state.read().completions, (self.clock)(), self.window_days)
    }

    pub fn total_completions(&self) -> usize {
        self.state.read().completions.len()
    }

    pub fn completions(&self) -> Vec<DateTime<Utc>> {
        self.state.read().completions.clone()
    }

    pub fn verifications(&self) -> Vec<DateTime<Utc>> {
        self.state.read().verifications.clone()
    }

    fn fold(state: &mut BasicState, event: &Event) {
        match event.payload() {
            Payload::TaskCompleted { .. } => state.completions.push(event.timestamp),
            Payload::TaskVerified { .. } => state.verifications.push(event.timestamp),
            _ => {}
        }
    }
}

impl Projection for VelocityProjection {
    fn name(&self) -> &'static str {
        "velocity"
    }

    fn apply(&self, event: &Event) {
        Self::fold(&mut self.state.write(), event);
    }

    fn reset(&self) {
        *self.state.write() = BasicState::default();
    }

    fn rebuild(&self, events: &[Event]) {
        let mut state = self.state.write();
        *state = BasicState::default();
        for event in events {
            Self::fold(&mut state, event);
        }
    }
}

// =============================================================================
// Extended Velocity
// =============================================================================

/// Throughput over one trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityWindow {
    pub days: i64,
    pub count: usize,
    pub velocity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Accelerating,
    Decelerating,
    Stable,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TrendDirection::Accelerating => "accelerating",
            TrendDirection::Decelerating => "decelerating",
            TrendDirection::Stable => "stable",
        })
    }
}

/// Shortest-versus-longest window comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityTrend {
    pub direction: TrendDirection,
    /// `(short - long) / long`
    pub slope: f64,
    /// 0..=1, from sample size and agreement between windows
    pub confidence: f64,
    pub windows: Vec<VelocityWindow>,
}

/// Distribution of completions per active day.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocityStats {
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    /// Number of days with at least one completion
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurndownPoint {
    pub date: NaiveDate,
    pub remaining: f64,
    /// `false` for recorded history, `true` for the forward projection
    pub projected: bool,
}

/// Multi-window velocity with trend analysis.
pub struct ExtendedVelocityProjection {
    windows: Vec<i64>,
    clock: Clock,
    completions: RwLock<Vec<DateTime<Utc>>>,
}

impl Default for ExtendedVelocityProjection {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOWS.to_vec())
    }
}

impl ExtendedVelocityProjection {
    /// Windows are sorted and deduplicated; non-positive entries are dropped.
    /// An empty result falls back to `[7, 14, 30]`.
    pub fn new(windows: impl IntoIterator<Item = i64>) -> Self {
        let mut windows: Vec<i64> = windows.into_iter().filter(|d| *d > 0).collect();
        windows.sort_unstable();
        windows.dedup();
        if windows.is_empty() {
            windows = DEFAULT_WINDOWS.to_vec();
        }
        Self {
            windows,
            clock: system_clock(),
            completions: RwLock::new(Vec::new()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn windows(&self) -> &[i64] {
        &self.windows
    }

    pub fn total_completions(&self) -> usize {
        self.completions.read().len()
    }

    /// Velocity over an arbitrary `days`-day window.
    pub fn velocity(&self, days: i64) -> f64 {
        velocity_over(&self.completions.read(), (self.clock)(), days)
    }

    pub fn get_velocity_windows(&self) -> Vec<VelocityWindow> {
        let completions = self.completions.read();
        let now = (self.clock)();
        self.windows
            .iter()
            .map(|&days| VelocityWindow {
                days,
                count: count_in_window(&completions, now, days),
                velocity: velocity_over(&completions, now, days),
            })
            .collect()
    }

    pub fn get_velocity_trend(&self) -> VelocityTrend {
        let windows = self.get_velocity_windows();
        let short = windows.first().map(|w| w.velocity).unwrap_or(0.0);
        let long = windows.last().map(|w| w.velocity).unwrap_or(0.0);

        let slope = if long > 0.0 {
            (short - long) / long
        } else if short > 0.0 {
            1.0
        } else {
            0.0
        };

        let direction = if slope > TREND_THRESHOLD {
            TrendDirection::Accelerating
        } else if slope < -TREND_THRESHOLD {
            TrendDirection::Decelerating
        } else {
            TrendDirection::Stable
        };

        let confidence = self.confidence(&windows);
        VelocityTrend {
            direction,
            slope,
            confidence,
            windows,
        }
    }

    fn confidence(&self, windows: &[VelocityWindow]) -> f64 {
        let total = self.total_completions() as f64;
        let sample_score = ((total + 1.0).log10() / 2.0).min(1.0);

        let velocities: Vec<f64> = windows.iter().map(|w| w.velocity).collect();
        let m = mean(&velocities);
        let consistency = if m == 0.0 {
            0.5
        } else {
            (1.0 - std_dev(&velocities) / m).max(0.0)
        };

        (sample_score + consistency) / 2.0
    }

    /// Per-day statistics over every recorded completion.
    pub fn get_velocity_stats(&self) -> VelocityStats {
        let days = per_day(&self.completions.read());
        if days.is_empty() {
            return VelocityStats::default();
        }

        let mut counts: Vec<f64> = days.values().map(|c| *c as f64).collect();
        counts.sort_by(|a, b| a.total_cmp(b));

        let n = counts.len();
        let median = if n % 2 == 0 {
            (counts[n / 2 - 1] + counts[n / 2]) / 2.0
        } else {
            counts[n / 2]
        };

        VelocityStats {
            mean: mean(&counts),
            median,
            stddev: std_dev(&counts),
            min: counts[0],
            max: counts[n - 1],
            samples: n,
        }
    }

    /// Recorded burndown from `total`, then a forward projection from `remaining`.
    ///
    /// The projection subtracts the shortest-window velocity per day starting
    /// tomorrow, for at most `horizon_days`, stopping once nothing remains.
    pub fn generate_burndown(&self, total: u64, remaining: u64, horizon_days: u32) -> Vec<BurndownPoint> {
        let mut points = Vec::new();

        let mut left = total as f64;
        for (date, count) in per_day(&self.completions.read()) {
            left = (left - count as f64).max(0.0);
            points.push(BurndownPoint {
                date,
                remaining: left,
                projected: false,
            });
        }

        let shortest = self.windows.first().copied().unwrap_or(DEFAULT_WINDOW_DAYS);
        let rate = self.velocity(shortest);
        let today = (self.clock)().date_naive();

        let mut left = remaining as f64;
        for day in 1..=i64::from(horizon_days) {
            if left <= 0.0 {
                break;
            }
            left = (left - rate).max(0.0);
            points.push(BurndownPoint {
                date: today + Duration::days(day),
                remaining: left,
                projected: true,
            });
        }

        points
    }
}

impl Projection for ExtendedVelocityProjection {
    fn name(&self) -> &'static str {
        "velocity_extended"
    }

    fn apply(&self, event: &Event) {
        if let Payload::TaskCompleted { .. } = event.payload() {
            self.completions.write().push(event.timestamp);
        }
    }

    fn reset(&self) {
        self.completions.write().clear();
    }

    fn rebuild(&self, events: &[Event]) {
        let mut completions = self.completions.write();
        completions.clear();
        completions.extend(
            events
                .iter()
                .filter(|e| matches!(e.payload(), Payload::TaskCompleted { .. }))
                .map(|e| e.timestamp),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, NewEvent};
    use crate::projections::fixed_clock;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-20T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn completed(days_ago: i64, hours_ago: i64) -> Event {
        NewEvent::task(EventType::TaskCompleted, format!("t-{}-{}", days_ago, hours_ago))
            .at(now() - Duration::days(days_ago) - Duration::hours(hours_ago))
            .seal("")
    }

    #[test]
    fn test_basic_zero_and_default_window() {
        let p = VelocityProjection::new(0).with_clock(fixed_clock(now()));
        assert_eq!(p.window_days(), 7);
        assert_eq!(p.velocity(), 0.0);
    }

    #[test]
    fn test_basic_window_membership() {
        let p = VelocityProjection::new(7).with_clock(fixed_clock(now()));
        p.apply(&completed(0, 0));
        p.apply(&completed(6, 23));
        // Exactly seven days ago falls outside the half-open window.
        p.apply(&completed(7, 0));
        p.apply(&NewEvent::task(EventType::TaskVerified, "v").at(now()).seal(""));

        assert_eq!(p.completions_in_window(), 2);
        assert_eq!(p.velocity(), 2.0 / 7.0);
        assert_eq!(p.verification_velocity(), 1.0 / 7.0);
        assert_eq!(p.total_completions(), 3);
    }

    #[test]
    fn test_windows_sanitized() {
        let p = ExtendedVelocityProjection::new(vec![30, -1, 7, 0, 7]);
        assert_eq!(p.windows(), &[7, 30]);
        assert_eq!(ExtendedVelocityProjection::new(vec![0]).windows(), &[7, 14, 30]);
    }

    #[test]
    fn test_trend_from_zero_long_window() {
        let p = ExtendedVelocityProjection::new(vec![7, 30]).with_clock(fixed_clock(now()));
        let trend = p.get_velocity_trend();
        assert_eq!(trend.slope, 0.0);
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert_eq!(trend.confidence, 0.25);
    }

    #[test]
    fn test_trend_decelerating() {
        let p = ExtendedVelocityProjection::new(vec![7, 30]).with_clock(fixed_clock(now()));
        for days_ago in 10..20 {
            p.apply(&completed(days_ago, 0));
        }
        let trend = p.get_velocity_trend();
        assert_eq!(trend.windows[0].velocity, 0.0);
        assert_eq!(trend.slope, -1.0);
        assert_eq!(trend.direction, TrendDirection::Decelerating);
    }

    #[test]
    fn test_stats_over_active_days() {
        let p = ExtendedVelocityProjection::new(vec![7]).with_clock(fixed_clock(now()));
        // 1, 2 and 3 completions on three separate days, nothing in between.
        p.apply(&completed(1, 0));
        p.apply(&completed(3, 0));
        p.apply(&completed(3, 1));
        p.apply(&completed(9, 0));
        p.apply(&completed(9, 1));
        p.apply(&completed(9, 2));

        let stats = p.get_velocity_stats();
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.median, 2.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 3.0);
        assert!((stats.stddev - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_stats_empty() {
        let p = ExtendedVelocityProjection::default();
        assert_eq!(p.get_velocity_stats(), VelocityStats::default());
    }

    #[test]
    fn test_burndown_history_then_projection() {
        let p = ExtendedVelocityProjection::new(vec![7, 30]).with_clock(fixed_clock(now()));
        p.apply(&completed(2, 0));
        p.apply(&completed(1, 0));
        p.apply(&completed(1, 1));
        // Shortest-window rate: 3 / 7 per day.

        let points = p.generate_burndown(10, 1, 5);
        let history: Vec<f64> = points.iter().filter(|b| !b.projected).map(|b| b.remaining).collect();
        assert_eq!(history, vec![9.0, 7.0]);

        let forward: Vec<&BurndownPoint> = points.iter().filter(|b| b.projected).collect();
        assert_eq!(forward.len(), 3);
        assert_eq!(forward[0].date, now().date_naive() + Duration::days(1));
        assert_eq!(forward[2].remaining, 0.0);
    }

    #[test]
    fn test_burndown_flat_without_velocity() {
        let p = ExtendedVelocityProjection::new(vec![7]).with_clock(fixed_clock(now()));
        let points = p.generate_burndown(5, 5, 4);
        assert_eq!(points.len(), 4);
        assert!(points.iter().all(|b| b.projected && b.remaining == 5.0));
        assert!(p.generate_burndown(5, 0, 4).is_empty());
    }
}
