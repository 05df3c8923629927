use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reachscan::aggregate::aggregate_report;
use reachscan::probe::{ProbeError, Prober};
use reachscan::progress::{NoopReporter, ProgressSnapshot};
use reachscan::scheduler::{run, run_tcp, Distribution, RunConfig};
use reachscan::types::{ProtocolKind, Target};
use tokio::net::TcpListener;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

fn synthetic_targets(n: usize) -> Vec<Target> {
    (0..n)
        .map(|i| Target::new(format!("10.{}.{}.{}", i / 65536, (i / 256) % 256, i % 256), 80))
        .collect()
}

fn config(concurrency: usize, timeout: Duration) -> RunConfig {
    RunConfig {
        concurrency,
        timeout,
        ..Default::default()
    }
}

/// Tracks how many probes run at once.
#[derive(Default)]
struct GaugeProber {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Prober for GaugeProber {
    async fn probe(&self, _target: &Target) -> Result<Duration, ProbeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        sleep(Duration::from_millis(1)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Duration::from_millis(1))
    }
}

struct SleepProber(Duration);

#[async_trait]
impl Prober for SleepProber {
    async fn probe(&self, _target: &Target) -> Result<Duration, ProbeError> {
        sleep(self.0).await;
        Ok(self.0)
    }
}

/// Deterministic latency by host number; every fifth target fails.
struct SyntheticProber;

#[async_trait]
impl Prober for SyntheticProber {
    async fn probe(&self, target: &Target) -> Result<Duration, ProbeError> {
        let n: u64 = target.host.rsplit('.').next().unwrap().parse().unwrap();
        tokio::task::yield_now().await;
        if n % 5 == 0 {
            Err(ProbeError::Timeout(Duration::from_secs(1)))
        } else {
            Ok(Duration::from_millis(n % 3))
        }
    }
}

struct PanickyProber;

#[async_trait]
impl Prober for PanickyProber {
    async fn probe(&self, target: &Target) -> Result<Duration, ProbeError> {
        if target.host.ends_with(".3") {
            panic!("boom on {target}");
        }
        Ok(Duration::from_millis(2))
    }
}

/// Probes fine but panics while classifying one host.
struct PanickyClassifier;

#[async_trait]
impl Prober for PanickyClassifier {
    async fn probe(&self, _target: &Target) -> Result<Duration, ProbeError> {
        Ok(Duration::from_millis(1))
    }

    fn classify(&self, target: &Target) -> ProtocolKind {
        if target.host.ends_with(".3") {
            panic!("cannot classify {target}");
        }
        ProtocolKind::Http
    }
}

#[tokio::test]
async fn closed_port_counts_as_failure() {
    let targets = vec![Target::new("127.0.0.1", 1)];
    let report = run_tcp(
        &targets,
        &config(500, Duration::from_secs(1)),
        CancellationToken::new(),
        &NoopReporter,
    )
    .await
    .unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert!(!report.outcomes[0].success);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.succeeded, 0);
    assert_eq!(report.stats.total, 1);
}

#[tokio::test]
async fn listening_port_is_reachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        while let Ok((sock, _)) = listener.accept().await {
            drop(sock);
        }
    });

    let timeout = Duration::from_secs(2);
    let targets = vec![Target::new("127.0.0.1", port)];
    let report = run_tcp(&targets, &config(500, timeout), CancellationToken::new(), &NoopReporter)
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert!(outcome.success);
    assert!(outcome.latency_ms > 0.0);
    assert!(outcome.latency_ms < timeout.as_secs_f64() * 1000.0);
    assert_eq!(report.stats.succeeded, 1);
    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_never_exceeds_concurrency() {
    for distribution in [Distribution::WorkStealing, Distribution::Chunked] {
        let targets = synthetic_targets(10_000);
        let prober = Arc::new(GaugeProber::default());
        let cfg = RunConfig {
            distribution,
            ..config(500, Duration::from_secs(3))
        };

        let report = run(&targets, &cfg, prober.clone(), CancellationToken::new(), &NoopReporter)
            .await
            .unwrap();

        let peak = prober.peak.load(Ordering::SeqCst);
        assert!(peak <= 500, "{distribution:?}: peak {peak} exceeded 500");
        assert!(peak > 1, "{distribution:?}: probes never overlapped");
        assert_eq!(report.outcomes.len(), 10_000);
        assert_eq!(report.stats.succeeded, 10_000);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_target_probed_exactly_once() {
    let targets = synthetic_targets(1_234);
    let report = run(
        &targets,
        &config(97, Duration::from_secs(1)),
        Arc::new(SyntheticProber),
        CancellationToken::new(),
        &NoopReporter,
    )
    .await
    .unwrap();

    assert_eq!(report.outcomes.len(), targets.len());
    let input: HashSet<_> = targets.iter().collect();
    let mut seen = HashSet::new();
    for o in &report.outcomes {
        assert!(input.contains(&o.target), "phantom result {}", o.target);
        assert!(seen.insert(&o.target), "duplicate result {}", o.target);
        assert_eq!(targets[o.index], o.target);
    }
    let s = &report.stats;
    assert_eq!(s.succeeded + s.failed, s.total);
    assert_eq!(s.skipped, 0);
    assert!(!s.cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn aggregated_order_is_stable_across_runs() {
    let targets = synthetic_targets(300);
    let cfg = config(50, Duration::from_secs(1));

    let mut orders = Vec::new();
    for _ in 0..3 {
        let report = run(&targets, &cfg, Arc::new(SyntheticProber), CancellationToken::new(), &NoopReporter)
            .await
            .unwrap();
        let agg = aggregate_report(&report);
        assert!(agg
            .sorted
            .windows(2)
            .all(|w| w[0].latency_ms <= w[1].latency_ms));
        // Equal latencies keep input order.
        assert!(agg
            .sorted
            .windows(2)
            .filter(|w| w[0].latency_ms == w[1].latency_ms)
            .all(|w| w[0].index < w[1].index));
        orders.push(agg.sorted.iter().map(|o| o.index).collect::<Vec<_>>());
    }
    assert_eq!(orders[0], orders[1]);
    assert_eq!(orders[1], orders[2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_at_half_stops_new_probes() {
    for distribution in [Distribution::WorkStealing, Distribution::Chunked] {
        let targets = synthetic_targets(200);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let reporter = move |s: &ProgressSnapshot| {
            if s.completed >= 100 {
                trigger.cancel();
            }
        };
        let cfg = RunConfig {
            progress_interval: 10,
            distribution,
            ..config(10, Duration::from_secs(1))
        };

        let started = Instant::now();
        let report = run(
            &targets,
            &cfg,
            Arc::new(SleepProber(Duration::from_millis(20))),
            cancel,
            &reporter,
        )
        .await
        .unwrap();

        let done = report.outcomes.len();
        assert!(done >= 100, "{distribution:?}: only {done} outcomes");
        assert!(done < 200, "{distribution:?}: run drained the full list");
        assert!(done <= 120, "{distribution:?}: {done} probes started after cancellation");
        assert!(started.elapsed() < Duration::from_secs(5));

        let s = &report.stats;
        assert!(s.cancelled);
        assert_eq!(s.completed() as usize, done);
        assert_eq!(s.succeeded + s.failed + s.skipped, s.total);
        assert_eq!(s.skipped as usize, 200 - done);
    }
}

#[tokio::test]
async fn empty_target_list_returns_zeroed_stats() {
    let report = run_tcp(&[], &RunConfig::default(), CancellationToken::new(), &NoopReporter)
        .await
        .unwrap();
    assert!(report.outcomes.is_empty());
    assert_eq!(report.stats.total, 0);
    assert_eq!(report.stats.completed(), 0);

    let agg = aggregate_report(&report);
    assert!(agg.sorted.is_empty());
    assert_eq!(agg.summary.success_rate, 0.0);
    assert!(agg.summary.throughput.is_finite());
}

#[tokio::test]
async fn panicking_probe_becomes_a_failure() {
    let targets = synthetic_targets(10);
    let report = run(
        &targets,
        &config(4, Duration::from_secs(1)),
        Arc::new(PanickyProber),
        CancellationToken::new(),
        &NoopReporter,
    )
    .await
    .unwrap();

    assert_eq!(report.outcomes.len(), 10);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.succeeded, 9);
    let failed = report.outcomes.iter().find(|o| !o.success).unwrap();
    assert_eq!(failed.target.host, "10.0.0.3");
}

#[tokio::test]
async fn panicking_classifier_becomes_a_failure() {
    for distribution in [Distribution::WorkStealing, Distribution::Chunked] {
        let targets = synthetic_targets(10);
        let cfg = RunConfig {
            distribution,
            ..config(2, Duration::from_secs(1))
        };
        let report = run(
            &targets,
            &cfg,
            Arc::new(PanickyClassifier),
            CancellationToken::new(),
            &NoopReporter,
        )
        .await
        .unwrap();

        let s = &report.stats;
        assert_eq!(report.outcomes.len(), 10, "{distribution:?}");
        assert_eq!(s.succeeded, 9, "{distribution:?}");
        assert_eq!(s.failed, 1, "{distribution:?}");
        assert_eq!(s.skipped, 0, "{distribution:?}");
        assert!(!s.cancelled);
        let failed = report.outcomes.iter().find(|o| !o.success).unwrap();
        assert_eq!(failed.target.host, "10.0.0.3");
        assert_eq!(failed.kind, ProtocolKind::Unknown);
    }
}

#[tokio::test]
async fn slow_probe_is_cut_off_by_timeout() {
    let targets = synthetic_targets(3);
    let started = Instant::now();
    let report = run(
        &targets,
        &config(3, Duration::from_millis(100)),
        Arc::new(SleepProber(Duration::from_secs(10))),
        CancellationToken::new(),
        &NoopReporter,
    )
    .await
    .unwrap();

    assert_eq!(report.stats.failed, 3);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deadline_stops_the_run_without_cancelling_caller() {
    let targets = synthetic_targets(100);
    let cancel = CancellationToken::new();
    let cfg = RunConfig {
        deadline: Some(Duration::from_millis(200)),
        ..config(2, Duration::from_secs(1))
    };

    let report = run(
        &targets,
        &cfg,
        Arc::new(SleepProber(Duration::from_millis(50))),
        cancel.clone(),
        &NoopReporter,
    )
    .await
    .unwrap();

    assert!(report.stats.cancelled);
    assert!(report.outcomes.len() < 100);
    assert!(report.stats.skipped > 0);
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn progress_reported_on_interval_and_at_end() {
    let targets = synthetic_targets(250);
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let reporter = move |s: &ProgressSnapshot| sink.lock().unwrap().push(*s);

    run(
        &targets,
        &config(16, Duration::from_secs(1)),
        Arc::new(SleepProber(Duration::from_millis(1))),
        CancellationToken::new(),
        &reporter,
    )
    .await
    .unwrap();

    let snaps = seen.lock().unwrap();
    let counts: Vec<u64> = snaps.iter().map(|s| s.completed).collect();
    assert_eq!(counts, vec![100, 200, 250]);
    assert!(snaps.iter().all(|s| s.total == 250 && s.succeeded == s.completed));
    assert!(snaps.last().unwrap().is_final());
}
