use crate::aggregate::Aggregate;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use time::{macros::format_description, OffsetDateTime};
use tracing::debug;

/// Write `bytes` to `<path>.tmp`, flush, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    {
        let f = File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        let mut w = BufWriter::new(f);
        w.write_all(bytes)?;
        w.flush()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to move {} into place", tmp.display()))?;
    debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// `working.txt` becomes `working_detailed.txt`; anything else gets `_detailed.txt` appended.
pub fn detailed_path_for(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_suffix(".txt") {
        Some(stem) => PathBuf::from(format!("{stem}_detailed.txt")),
        None => PathBuf::from(format!("{s}_detailed.txt")),
    }
}

/// Reachable targets, fastest first, one `host:port` per line.
pub fn render_target_list(agg: &Aggregate) -> String {
    agg.sorted
        .iter()
        .map(|o| format!("{}\n", o.target))
        .collect()
}

/// Human-readable report: run header, latency summary, then every reachable target.
pub fn render_detailed_report(agg: &Aggregate, generated_at: &str) -> String {
    let s = &agg.summary;
    let mut out = String::new();
    let _ = writeln!(out, "Probe Results - {generated_at}");
    let _ = writeln!(out, "{}", "=".repeat(50));
    let _ = writeln!(out, "Total targets checked: {}", s.total);
    let _ = writeln!(out, "Working targets: {}", s.succeeded);
    let _ = writeln!(out, "Failed targets: {}", s.failed);
    if s.skipped > 0 || s.cancelled {
        let _ = writeln!(out, "Skipped (cancelled): {}", s.skipped);
    }
    let _ = writeln!(out, "Success rate: {:.2}%", s.success_rate);
    let _ = writeln!(out, "Time taken: {:.2} seconds", s.elapsed.as_secs_f64());
    let _ = writeln!(out, "Average speed: {:.0} targets/sec", s.throughput);
    if let Some(lat) = &s.latency {
        let _ = writeln!(out, "Fastest: {:.2}ms ({})", lat.min_ms, lat.fastest);
        let _ = writeln!(out, "Slowest: {:.2}ms ({})", lat.max_ms, lat.slowest);
        let _ = writeln!(out, "Average: {:.2}ms", lat.mean_ms);
    }
    out.push('\n');
    let _ = writeln!(out, "Working targets (sorted by response time):");
    let _ = writeln!(out, "{}", "-".repeat(30));
    for o in &agg.sorted {
        let _ = writeln!(out, "{} | {:.2}ms | {}", o.target, o.latency_ms, o.kind);
    }
    out
}

pub fn write_target_list(path: &Path, agg: &Aggregate) -> Result<()> {
    write_atomic(path, render_target_list(agg).as_bytes())
}

pub fn write_detailed_report(path: &Path, agg: &Aggregate) -> Result<()> {
    write_atomic(path, render_detailed_report(agg, &local_timestamp()).as_bytes())
}

/// Pretty JSON with the summary and the sorted reachable targets.
pub fn write_results_json(path: &Path, agg: &Aggregate) -> Result<()> {
    let body = serde_json::to_vec_pretty(agg).context("failed to serialize results")?;
    write_atomic(path, &body)
}

/// Write the plain list and the detailed report next to it. Returns the report path.
pub fn write_results(path: &Path, agg: &Aggregate) -> Result<PathBuf> {
    write_target_list(path, agg)?;
    let detailed = detailed_path_for(path);
    write_detailed_report(&detailed, agg)?;
    Ok(detailed)
}

fn local_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| String::from("1970-01-01 00:00:00"))
}
