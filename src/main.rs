use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use reachscan::aggregate::{aggregate_report, Aggregate};
use reachscan::progress::{ConsoleReporter, LogReporter, NoopReporter, ProgressReporter};
use reachscan::scheduler::{self, Distribution, RunConfig};
use reachscan::ping::{self, PingConfig};
use reachscan::{output, ports, targets};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// reachscan-rs — fast async reachability and latency checker for host:port lists.
#[derive(Debug, Parser)]
#[command(
    name = "reachscan-rs",
    version,
    about = "Fast async reachability and latency checker for large host:port lists.",
    long_about = None
)]
struct Cli {
    /// Only log warnings and errors, and hide the progress line.
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe every target in a file and save the reachable ones, fastest first.
    Check(CheckArgs),
    /// Pull clean ip:port lines out of a detailed report.
    Extract(ExtractArgs),
    /// Connect to one host:port repeatedly and report loss and round-trip times.
    Ping(PingArgs),
}

#[derive(Debug, Clone, Args)]
struct CheckArgs {
    /// File with one target per line (host:port, scheme://host:port, or report lines).
    input: PathBuf,

    /// Max concurrent probes.
    #[arg(long, short = 'c', default_value_t = scheduler::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Per-probe connect timeout in seconds.
    #[arg(long = "timeout-secs", short = 't', default_value_t = 3)]
    timeout_secs: u64,

    /// Per-probe connect timeout in milliseconds (overrides --timeout-secs).
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Print progress every N completed probes.
    #[arg(long = "progress-interval", default_value_t = scheduler::DEFAULT_PROGRESS_INTERVAL)]
    progress_interval: u64,

    /// Stop starting new probes after this many seconds.
    #[arg(long = "deadline-secs")]
    deadline_secs: Option<u64>,

    /// Ports for lines without one: `proxy`, a ports file, or a list like `80,443,8000-8010`.
    #[arg(long)]
    ports: Option<String>,

    /// Output file for reachable targets; a `_detailed` report is written next to it.
    #[arg(long, short = 'o', default_value = "working_targets.txt")]
    output: PathBuf,

    /// Also write results as pretty JSON to this path.
    #[arg(long)]
    json: Option<PathBuf>,

    /// Write output files even when nothing was reachable.
    #[arg(long = "always-write", default_value_t = false)]
    always_write: bool,

    /// Give each worker a fixed contiguous chunk instead of pulling from a shared queue.
    #[arg(long, default_value_t = false)]
    chunked: bool,
}

#[derive(Debug, Clone, Args)]
struct ExtractArgs {
    /// Report to read.
    #[arg(default_value = "proxies_raw.txt")]
    input: PathBuf,

    /// File to write clean ip:port lines to.
    #[arg(default_value = "proxy.txt")]
    output: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct PingArgs {
    /// Endpoint to connect to (host:port or [v6addr]:port).
    target: String,

    /// Number of connects.
    #[arg(short = 'n', long, default_value_t = ping::DEFAULT_PING_COUNT)]
    count: u32,

    /// Per-connect timeout in seconds.
    #[arg(long = "timeout-secs", short = 't', default_value_t = 3)]
    timeout_secs: u64,

    /// Pause between connects in milliseconds.
    #[arg(long = "interval-ms", default_value_t = 500)]
    interval_ms: u64,
}

impl CheckArgs {
    fn run_config(&self) -> RunConfig {
        let timeout = match self.timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs(self.timeout_secs),
        };
        RunConfig {
            concurrency: self.concurrency,
            timeout,
            progress_interval: self.progress_interval,
            deadline: self.deadline_secs.map(Duration::from_secs),
            distribution: if self.chunked {
                Distribution::Chunked
            } else {
                Distribution::WorkStealing
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.quiet { "warn" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Check(args) => check(args, cli.quiet).await,
        Command::Extract(args) => extract(args),
        Command::Ping(args) => tcp_ping(args).await,
    }
}

async fn check(args: CheckArgs, quiet: bool) -> Result<()> {
    let config = args.run_config();
    config.validate()?;

    let port_list = args
        .ports
        .as_deref()
        .map(ports::resolve_ports_arg)
        .transpose()
        .context("invalid --ports value")?;
    let loaded = targets::load_targets_from_path(&args.input, port_list.as_deref())?;

    println!("reachscan-rs configuration:");
    println!("  input        : {}", args.input.display());
    println!("  targets      : {}", loaded.targets.len());
    println!("  rejected     : {}", loaded.rejected);
    println!("  duplicates   : {}", loaded.duplicates);
    println!("  concurrency  : {}", config.concurrency);
    println!("  timeout_ms   : {}", config.timeout.as_millis());
    println!(
        "  deadline     : {}",
        config
            .deadline
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("  output       : {}", args.output.display());
    println!("Press Ctrl+C to stop early.\n");

    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight probes");
            cancel_ctrlc.cancel();
        }
    });

    let reporter: &dyn ProgressReporter = if quiet {
        &NoopReporter
    } else if std::io::stderr().is_terminal() {
        &ConsoleReporter
    } else {
        &LogReporter
    };
    let report = scheduler::run_tcp(&loaded.targets, &config, cancel, reporter).await?;
    let agg = aggregate_report(&report);

    print_summary(&agg);

    if agg.sorted.is_empty() && !args.always_write {
        info!("no reachable targets, skipping output files");
        return Ok(());
    }

    let detailed = output::write_results(&args.output, &agg)?;
    println!("\nResults saved to:");
    println!("  {} ({} targets)", args.output.display(), agg.sorted.len());
    println!("  {} (detailed results)", detailed.display());
    if let Some(path) = args.json.as_deref() {
        output::write_results_json(path, &agg)?;
        println!("  {} (json)", path.display());
    }
    Ok(())
}

fn extract(args: ExtractArgs) -> Result<()> {
    let extracted = targets::extract_report_file(&args.input, &args.output)?;
    println!(
        "Extracted {} targets to '{}' ({} lines skipped).",
        extracted.targets.len(),
        args.output.display(),
        extracted.skipped
    );
    Ok(())
}

async fn tcp_ping(args: PingArgs) -> Result<()> {
    let target = targets::parse_target(&args.target)
        .with_context(|| format!("invalid ping target: {}", args.target))?;
    let config = PingConfig {
        count: args.count,
        timeout: Duration::from_secs(args.timeout_secs),
        interval: Duration::from_millis(args.interval_ms),
    };

    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_ctrlc.cancel();
        }
    });

    println!("TCP ping to {target} ({} connects):", config.count);
    let report = ping::tcp_ping(&target, &config, cancel, |attempt| match &attempt.result {
        Ok(rtt) => println!("  Ping {}: {:.2}ms", attempt.seq, rtt.as_secs_f64() * 1000.0),
        Err(e) => println!("  Ping {}: failed ({e})", attempt.seq),
    })
    .await?;

    println!("\nTCP ping statistics for {}:", report.target);
    for line in ping::format_summary(&report.summary).lines() {
        println!("  {line}");
    }
    Ok(())
}

fn print_summary(agg: &Aggregate) {
    let s = &agg.summary;
    let heading = if s.cancelled {
        "=== CHECK STOPPED EARLY ==="
    } else {
        "=== CHECK COMPLETE ==="
    };
    println!("\n{heading}");
    println!("Total targets:     {}", s.total);
    println!("Working targets:   {}", s.succeeded);
    println!("Failed targets:    {}", s.failed);
    if s.skipped > 0 {
        println!("Skipped targets:   {}", s.skipped);
    }
    println!("Success rate:      {:.2}%", s.success_rate);
    println!("Time taken:        {:.2} seconds", s.elapsed.as_secs_f64());
    println!("Average speed:     {:.0} targets/sec", s.throughput);

    if let Some(lat) = &s.latency {
        println!("\nPerformance:");
        println!("  Fastest: {:.2}ms ({})", lat.min_ms, lat.fastest);
        println!("  Slowest: {:.2}ms ({})", lat.max_ms, lat.slowest);
        println!("  Average: {:.2}ms", lat.mean_ms);
    }

    print_results_table(agg, 20);
}

fn print_results_table(agg: &Aggregate, limit: usize) {
    if agg.sorted.is_empty() {
        return;
    }
    let shown = &agg.sorted[..agg.sorted.len().min(limit)];
    let target_w = shown
        .iter()
        .map(|o| o.target.to_string().len())
        .max()
        .unwrap_or(0)
        .max("target".len());
    let lat_w = "latency_ms".len();
    let kind_w = "UNKNOWN".len();

    println!("\nFastest {} of {}:", shown.len(), agg.sorted.len());
    println!(
        "{:<target_w$}  {:>lat_w$}  {:<kind_w$}",
        "target", "latency_ms", "kind"
    );
    println!("{:-<target_w$}  {:-<lat_w$}  {:-<kind_w$}", "", "", "");
    for o in shown {
        println!(
            "{:<target_w$}  {:>lat_w$.2}  {:<kind_w$}",
            o.target.to_string(),
            o.latency_ms,
            o.kind.as_str()
        );
    }
}
