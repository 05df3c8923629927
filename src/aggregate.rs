use crate::progress::{percent, throughput};
use crate::types::{duration_secs, ProbeOutcome, RunReport, RunStatistics, Target};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Latency spread over the reachable targets of a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub fastest: Target,
    pub slowest: Target,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SummaryStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Percentage of `total` that was reachable.
    pub success_rate: f64,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Targets per second over the whole run.
    pub throughput: f64,
    pub cancelled: bool,
    pub started_at: String,
    pub latency: Option<LatencyStats>,
}

/// Reachable targets in final order plus the numbers that describe the run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Aggregate {
    pub summary: SummaryStats,
    pub sorted: Vec<ProbeOutcome>,
}

/// Keep the successes, order them by latency (input order on ties), and summarise.
///
/// Pure: identical inputs always give identical output.
pub fn aggregate(outcomes: &[ProbeOutcome], stats: &RunStatistics) -> Aggregate {
    let mut sorted: Vec<ProbeOutcome> = outcomes.iter().filter(|o| o.success).cloned().collect();
    sorted.sort_by(|a, b| {
        a.latency_ms
            .total_cmp(&b.latency_ms)
            .then(a.index.cmp(&b.index))
    });

    let latency = match (sorted.first(), sorted.last()) {
        (Some(fastest), Some(slowest)) => {
            let sum: f64 = sorted.iter().map(|o| o.latency_ms).sum();
            Some(LatencyStats {
                min_ms: fastest.latency_ms,
                max_ms: slowest.latency_ms,
                mean_ms: sum / sorted.len() as f64,
                fastest: fastest.target.clone(),
                slowest: slowest.target.clone(),
            })
        }
        _ => None,
    };

    let summary = SummaryStats {
        total: stats.total,
        succeeded: stats.succeeded,
        failed: stats.failed,
        skipped: stats.skipped,
        success_rate: percent(stats.succeeded, stats.total),
        elapsed: stats.elapsed,
        throughput: if stats.elapsed.is_zero() {
            0.0
        } else {
            throughput(stats.total, stats.elapsed)
        },
        cancelled: stats.cancelled,
        started_at: stats.started_at.clone(),
        latency,
    };

    Aggregate { summary, sorted }
}

pub fn aggregate_report(report: &RunReport) -> Aggregate {
    aggregate(&report.outcomes, &report.stats)
}
