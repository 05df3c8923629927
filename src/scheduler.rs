use crate::probe::{ProbeError, Prober, TcpProber};
use crate::progress::{should_report, ProgressReporter, ProgressSnapshot};
use crate::types::{ProbeOutcome, ProtocolKind, RunReport, RunStatistics, Target};
use ::time::{format_description::well_known, OffsetDateTime};
use anyhow::{bail, Result};
use futures::FutureExt;
use std::any::Any;
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_CONCURRENCY: usize = 500;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

/// How targets are handed to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distribution {
    /// Workers pull the next unclaimed target from a shared cursor.
    #[default]
    WorkStealing,
    /// Each worker owns one contiguous slice of `ceil(len / workers)` targets.
    Chunked,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Upper bound on probes in flight at once.
    pub concurrency: usize,
    /// Hard per-probe limit.
    pub timeout: Duration,
    /// Emit a progress update every this many completions.
    pub progress_interval: u64,
    /// Stop starting new probes once this much time has passed.
    pub deadline: Option<Duration>,
    pub distribution: Distribution,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            deadline: None,
            distribution: Distribution::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            bail!("probe timeout must be greater than zero");
        }
        if self.progress_interval == 0 {
            bail!("progress interval must be at least 1");
        }
        Ok(())
    }

    /// Number of workers actually spawned for `target_count` targets.
    pub fn effective_concurrency(&self, target_count: usize) -> usize {
        self.concurrency.min(target_count).max(1)
    }
}

/// Split `0..len` into contiguous ranges of `ceil(len / concurrency)` (at least 1).
pub fn chunk_ranges(len: usize, concurrency: usize) -> Vec<Range<usize>> {
    let chunk = len.div_ceil(concurrency.max(1)).max(1);
    (0..len)
        .step_by(chunk)
        .map(|start| start..(start + chunk).min(len))
        .collect()
}

/// Probe every target over plain TCP connects.
pub async fn run_tcp<R>(
    targets: &[Target],
    config: &RunConfig,
    cancel: CancellationToken,
    reporter: &R,
) -> Result<RunReport>
where
    R: ProgressReporter + ?Sized,
{
    let prober = Arc::new(TcpProber::new(config.timeout));
    run(targets, config, prober, cancel, reporter).await
}

/// Fan `targets` out over a bounded pool of worker tasks.
///
/// - Spawns `min(concurrency, targets.len())` workers (at least one); never a task per target.
/// - Each worker checks `cancel` before starting a probe, so an in-flight probe always
///   finishes and nothing new starts after cancellation.
/// - Every probe is bounded by `config.timeout`; errors and panics become failure outcomes.
/// - Outcomes flow over a channel to this task, which alone owns the counters and calls
///   `reporter`.
pub async fn run<P, R>(
    targets: &[Target],
    config: &RunConfig,
    prober: Arc<P>,
    cancel: CancellationToken,
    reporter: &R,
) -> Result<RunReport>
where
    P: Prober,
    R: ProgressReporter + ?Sized,
{
    config.validate()?;

    let start = Instant::now();
    let mut stats = RunStatistics {
        total: targets.len() as u64,
        started_at: now_rfc3339(),
        ..Default::default()
    };

    if targets.is_empty() {
        info!("no targets to probe");
        return Ok(RunReport {
            outcomes: Vec::new(),
            stats,
        });
    }

    let workers = config.effective_concurrency(targets.len());
    info!(
        targets = targets.len(),
        workers,
        timeout_ms = config.timeout.as_millis() as u64,
        distribution = ?config.distribution,
        "starting run"
    );

    // Deadline expiry cancels only this run, never the caller's token.
    let run_cancel = cancel.child_token();
    let deadline_task = config.deadline.map(|limit| {
        let run_cancel = run_cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(limit) => {
                    info!(deadline_secs = limit.as_secs_f64(), "deadline reached, stopping");
                    run_cancel.cancel();
                }
                _ = run_cancel.cancelled() => {}
            }
        })
    });

    let shared: Arc<[Target]> = Arc::from(targets.to_vec());
    let (tx, mut rx) = mpsc::unbounded_channel::<ProbeOutcome>();
    let mut set = JoinSet::new();

    let queues: Vec<WorkQueue> = match config.distribution {
        Distribution::WorkStealing => {
            let cursor = Arc::new(AtomicUsize::new(0));
            (0..workers)
                .map(|_| WorkQueue::Shared {
                    cursor: cursor.clone(),
                    len: shared.len(),
                })
                .collect()
        }
        Distribution::Chunked => chunk_ranges(shared.len(), workers)
            .into_iter()
            .map(WorkQueue::Chunk)
            .collect(),
    };

    for queue in queues {
        set.spawn(worker(
            shared.clone(),
            queue,
            prober.clone(),
            config.timeout,
            run_cancel.clone(),
            tx.clone(),
        ));
    }
    // The channel closes once the last worker drops its sender.
    drop(tx);

    let mut outcomes = Vec::with_capacity(shared.len());
    while let Some(outcome) = rx.recv().await {
        if outcome.success {
            stats.succeeded += 1;
        } else {
            stats.failed += 1;
        }
        outcomes.push(outcome);

        let completed = stats.completed();
        if should_report(completed, stats.total, config.progress_interval) {
            reporter.report(&ProgressSnapshot {
                completed,
                total: stats.total,
                succeeded: stats.succeeded,
                elapsed: start.elapsed(),
            });
        }
    }

    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            error!(error = %e, "worker task failed");
        }
    }
    if let Some(handle) = deadline_task {
        handle.abort();
    }

    stats.cancelled = run_cancel.is_cancelled();
    stats.skipped = stats.total - stats.completed();
    stats.elapsed = start.elapsed();

    if stats.cancelled {
        warn!(
            completed = stats.completed(),
            skipped = stats.skipped,
            "run cancelled before all targets were probed"
        );
    }
    info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        skipped = stats.skipped,
        elapsed_secs = stats.elapsed.as_secs_f64(),
        "run finished"
    );

    Ok(RunReport { outcomes, stats })
}

enum WorkQueue {
    Shared { cursor: Arc<AtomicUsize>, len: usize },
    Chunk(Range<usize>),
}

impl WorkQueue {
    fn next(&mut self) -> Option<usize> {
        match self {
            WorkQueue::Shared { cursor, len } => {
                let i = cursor.fetch_add(1, Ordering::Relaxed);
                (i < *len).then_some(i)
            }
            WorkQueue::Chunk(range) => range.next(),
        }
    }
}

async fn worker<P: Prober>(
    targets: Arc<[Target]>,
    mut queue: WorkQueue,
    prober: Arc<P>,
    timeout: Duration,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<ProbeOutcome>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(index) = queue.next() else {
            break;
        };
        let target = &targets[index];

        let outcome = match probe_guarded(prober.as_ref(), target, timeout).await {
            Ok((latency, kind)) => ProbeOutcome::succeeded(target.clone(), index, latency, kind),
            Err(ProbeError::Panicked(msg)) => {
                error!(%target, panic = %msg, "probe panicked");
                ProbeOutcome::failed(target.clone(), index)
            }
            Err(e) => {
                trace!(%target, error = %e, "probe failed");
                ProbeOutcome::failed(target.clone(), index)
            }
        };

        if tx.send(outcome).is_err() {
            debug!("collector gone, worker exiting");
            break;
        }
    }
}

/// Probe and classify one target with a hard timeout; a panic in either call
/// becomes an error.
async fn probe_guarded<P: Prober + ?Sized>(
    prober: &P,
    target: &Target,
    timeout: Duration,
) -> Result<(Duration, ProtocolKind), ProbeError> {
    let guarded = async {
        let latency = time::timeout(timeout, prober.probe(target))
            .await
            .map_err(|_| ProbeError::Timeout(timeout))??;
        Ok::<_, ProbeError>((latency, prober.classify(target)))
    };
    // AssertUnwindSafe: the prober is only borrowed and its state is not observed after a panic.
    match AssertUnwindSafe(guarded).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(ProbeError::Panicked(panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
