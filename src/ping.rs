//! Repeated TCP connects to a single endpoint, reported like ICMP ping.
use crate::probe::{probe_target, ProbeError};
use crate::progress::percent;
use crate::types::Target;
use anyhow::{bail, Result};
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_PING_COUNT: u32 = 4;
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PingConfig {
    /// Connects to attempt.
    pub count: u32,
    /// Limit for each connect.
    pub timeout: Duration,
    /// Pause between attempts.
    pub interval: Duration,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_PING_COUNT,
            timeout: crate::scheduler::DEFAULT_TIMEOUT,
            interval: DEFAULT_PING_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub struct PingAttempt {
    /// 1-based attempt number.
    pub seq: u32,
    pub result: Result<Duration, ProbeError>,
}

impl PingAttempt {
    pub fn latency_ms(&self) -> Option<f64> {
        self.result.as_ref().ok().map(|d| d.as_secs_f64() * 1000.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingSummary {
    pub sent: u32,
    pub received: u32,
    pub lost: u32,
    pub loss_percent: f64,
    /// `None` when no attempt connected.
    pub rtt: Option<RttStats>,
}

#[derive(Debug)]
pub struct PingReport {
    pub target: Target,
    pub attempts: Vec<PingAttempt>,
    pub summary: PingSummary,
}

/// Connect to `target` up to `config.count` times, calling `on_attempt` after each one.
///
/// Cancellation stops before the next attempt; `sent` counts only attempts made.
pub async fn tcp_ping<F>(
    target: &Target,
    config: &PingConfig,
    cancel: CancellationToken,
    mut on_attempt: F,
) -> Result<PingReport>
where
    F: FnMut(&PingAttempt),
{
    if config.count == 0 {
        bail!("ping count must be at least 1");
    }
    if config.timeout.is_zero() {
        bail!("ping timeout must be greater than zero");
    }

    let mut attempts = Vec::with_capacity(config.count as usize);
    for seq in 1..=config.count {
        if cancel.is_cancelled() {
            break;
        }
        let result = probe_target(target, config.timeout).await;
        if let Err(e) = &result {
            debug!(%target, seq, error = %e, "ping attempt failed");
        }
        let attempt = PingAttempt { seq, result };
        on_attempt(&attempt);
        attempts.push(attempt);

        if seq < config.count {
            tokio::select! {
                _ = time::sleep(config.interval) => {}
                _ = cancel.cancelled() => break,
            }
        }
    }

    let summary = summarize(&attempts);
    Ok(PingReport {
        target: target.clone(),
        attempts,
        summary,
    })
}

pub fn summarize(attempts: &[PingAttempt]) -> PingSummary {
    let times: Vec<f64> = attempts.iter().filter_map(PingAttempt::latency_ms).collect();
    let sent = attempts.len() as u32;
    let received = times.len() as u32;
    let lost = sent - received;

    let rtt = (!times.is_empty()).then(|| RttStats {
        min_ms: times.iter().copied().fold(f64::INFINITY, f64::min),
        max_ms: times.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        avg_ms: times.iter().sum::<f64>() / times.len() as f64,
    });

    PingSummary {
        sent,
        received,
        lost,
        loss_percent: percent(lost as u64, sent as u64),
        rtt,
    }
}

pub fn format_summary(s: &PingSummary) -> String {
    let mut out = format!(
        "Packets: Sent={}, Received={}, Lost={} ({:.1}% loss)",
        s.sent, s.received, s.lost, s.loss_percent
    );
    if let Some(rtt) = &s.rtt {
        out.push_str(&format!(
            "\nRound-trip times: Min={:.2}ms, Max={:.2}ms, Average={:.2}ms",
            rtt.min_ms, rtt.max_ms, rtt.avg_ms
        ));
    }
    out
}
