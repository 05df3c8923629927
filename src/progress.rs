//! Progress lines emitted while a run is in flight.
//!
//! Reporters are only ever called from the scheduler's collector, which owns the
//! counters, so a snapshot is always a consistent view of `completed`/`succeeded`.
use std::io::Write;
use std::time::Duration;

/// Lower bound on elapsed seconds used for rate computations.
pub const EPSILON_SECS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: u64,
    pub total: u64,
    pub succeeded: u64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        percent(self.completed, self.total)
    }

    pub fn throughput(&self) -> f64 {
        throughput(self.completed, self.elapsed)
    }

    pub fn is_final(&self) -> bool {
        self.completed >= self.total
    }
}

/// `count / elapsed`, clamped so the very first update never divides by zero.
pub fn throughput(count: u64, elapsed: Duration) -> f64 {
    count as f64 / elapsed.as_secs_f64().max(EPSILON_SECS)
}

/// `part / whole * 100`, or 0 for an empty whole.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// True on every `interval`-th completion and on the last one.
pub fn should_report(completed: u64, total: u64, interval: u64) -> bool {
    completed == total || (interval > 0 && completed % interval == 0)
}

pub fn format_progress(s: &ProgressSnapshot) -> String {
    format!(
        "Checked: {}/{} ({:.1}%) | Working: {} | Speed: {:.0} targets/sec",
        s.completed,
        s.total,
        s.percent(),
        s.succeeded,
        s.throughput()
    )
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, snapshot: &ProgressSnapshot);
}

impl<F> ProgressReporter for F
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    fn report(&self, snapshot: &ProgressSnapshot) {
        self(snapshot)
    }
}

/// Rewrites a single status line on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn report(&self, snapshot: &ProgressSnapshot) {
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r[PROGRESS] {}", format_progress(snapshot));
        if snapshot.is_final() {
            let _ = writeln!(err);
        }
        let _ = err.flush();
    }
}

/// Emits each update as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&self, s: &ProgressSnapshot) {
        tracing::info!(
            completed = s.completed,
            total = s.total,
            succeeded = s.succeeded,
            percent = %format!("{:.1}", s.percent()),
            rate = %format!("{:.0}", s.throughput()),
            "progress"
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _snapshot: &ProgressSnapshot) {}
}
