//! Reduces per-location outcomes to a verdict and latency, and stored history
//! to a trailing availability figure.

use shared::types::{HistoryRecord, ServiceStatus};
use super::probe::ProbeOutcome;

/// Verdict and latency for one full check cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckSummary {
    pub status: ServiceStatus,
    /// Mean latency of the successful probes in milliseconds, 0 when none succeeded
    pub average_response_ms: u64,
    pub succeeded: usize,
    pub attempted: usize,
}

impl CheckSummary {
    pub fn is_up(&self) -> bool {
        self.status == ServiceStatus::Up
    }
}

/// Up iff at least one location succeeded. An empty list is Down.
pub fn summarize(outcomes: &[ProbeOutcome]) -> CheckSummary {
    let (succeeded, total_ms) = outcomes
        .iter()
        .filter(|o| o.success)
        .fold((0usize, 0u128), |(n, sum), o| (n + 1, sum + o.elapsed.as_millis()));

    let average_response_ms = if succeeded == 0 {
        0
    } else {
        (total_ms as f64 / succeeded as f64).round() as u64
    };

    CheckSummary {
        status: if succeeded > 0 { ServiceStatus::Up } else { ServiceStatus::Down },
        average_response_ms,
        succeeded,
        attempted: outcomes.len(),
    }
}

/// Percentage of up rows, rounded to two decimals. An empty window counts as
/// fully available.
pub fn uptime_percentage(window: &[HistoryRecord]) -> f64 {
    if window.is_empty() {
        return 100.0;
    }

    let up = window.iter().filter(|r| r.up).count();
    let pct = 100.0 * up as f64 / window.len() as f64;
    (pct * 100.0).round() / 100.0
}
