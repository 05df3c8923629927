//! Turning text input into the deduplicated target list a run works on.
//!
//! Accepted line forms:
//! - `host:port`, `[v6addr]:port`
//! - `scheme://host:port/anything` (scheme and path are stripped)
//! - `host:port | 12.34ms | HTTP` (lines from a detailed report)
//! - with a port list: a bare `host` or IPv4 CIDR, expanded to one target per port
//!
//! Blank lines and `#` comments are skipped. Anything else is rejected and counted,
//! never probed and never part of a run's total.
use crate::ports::parse_port;
use crate::types::Target;
use anyhow::{anyhow, bail, Context, Result};
use ipnet::{IpNet, Ipv4Net};
use std::collections::HashSet;
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use tracing::{debug, info, warn};

/// Smallest IPv4 prefix accepted for CIDR expansion (a /16 is 65k hosts per port).
pub const MIN_CIDR_PREFIX: u8 = 16;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedTargets {
    pub targets: Vec<Target>,
    /// Lines that could not be turned into a target.
    pub rejected: usize,
    /// Targets dropped because they were already present.
    pub duplicates: usize,
}

/// Parse one `host:port` token. Scheme prefixes and trailing paths are stripped.
pub fn parse_target(raw: &str) -> Result<Target> {
    let s = raw.trim();
    let s = s.split_once("://").map_or(s, |(_, rest)| rest);
    let s = s.split('/').next().unwrap_or("");
    let s = s.rsplit_once('@').map_or(s, |(_, host)| host);

    let (host, port, bracketed) =
        split_host_port(s).ok_or_else(|| anyhow!("missing port: {raw}"))?;
    if host.is_empty() {
        bail!("empty host: {raw}");
    }
    if bracketed && host.parse::<Ipv6Addr>().is_err() {
        bail!("invalid IPv6 host: {raw}");
    }
    if !bracketed && host.contains(':') {
        bail!("IPv6 hosts must be bracketed: {raw}");
    }
    let port = parse_port(port).with_context(|| format!("invalid port in {raw}"))?;
    Ok(Target::new(host, port))
}

fn split_host_port(s: &str) -> Option<(&str, &str, bool)> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port, true));
    }
    s.rsplit_once(':').map(|(host, port)| (host, port, false))
}

/// Parse target lines. `ports`, when given, expands lines that carry no port.
pub fn parse_targets_str(s: &str, ports: Option<&[u16]>) -> LoadedTargets {
    let mut loaded = LoadedTargets::default();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Keep the first token; the rest is a comment or report annotation.
        let token = line
            .split(" | ")
            .next()
            .and_then(|t| t.split_whitespace().next())
            .unwrap_or("");

        let expanded = match (parse_target(token), ports) {
            (Ok(t), _) => Ok(vec![t]),
            (Err(_), Some(ports)) if !has_port(token) => expand_with_ports(token, ports),
            (Err(e), _) => Err(e),
        };

        match expanded {
            Ok(list) => {
                for t in list {
                    if seen.insert(t.clone()) {
                        loaded.targets.push(t);
                    } else {
                        loaded.duplicates += 1;
                    }
                }
            }
            Err(e) => {
                debug!(line = idx + 1, error = %e, "rejected target line");
                loaded.rejected += 1;
            }
        }
    }

    loaded
}

/// Load targets from a file. Fails only if the file cannot be read.
pub fn load_targets_from_path(
    path: impl AsRef<Path>,
    ports: Option<&[u16]>,
) -> Result<LoadedTargets> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read targets file: {}", path.display()))?;
    let loaded = parse_targets_str(&String::from_utf8_lossy(&bytes), ports);
    info!(
        path = %path.display(),
        targets = loaded.targets.len(),
        rejected = loaded.rejected,
        duplicates = loaded.duplicates,
        "loaded targets"
    );
    Ok(loaded)
}

/// Drop a `scheme://` prefix and any `user:pass@` credentials.
fn strip_scheme_and_userinfo(token: &str) -> &str {
    let s = token.split_once("://").map_or(token, |(_, rest)| rest);
    s.rsplit_once('@').map_or(s, |(_, host)| host)
}

fn has_port(token: &str) -> bool {
    let s = strip_scheme_and_userinfo(token);
    let s = s.split('/').next().unwrap_or("");
    match s.strip_prefix('[') {
        Some(rest) => rest.contains("]:"),
        None => s.matches(':').count() == 1,
    }
}

/// Expand a bare host or IPv4 CIDR into one target per port.
fn expand_with_ports(token: &str, ports: &[u16]) -> Result<Vec<Target>> {
    let s = strip_scheme_and_userinfo(token).trim_end_matches('/');
    let hosts: Vec<String> = if s.contains('/') {
        let net: IpNet = s.parse().with_context(|| format!("invalid CIDR: {s}"))?;
        match net {
            IpNet::V4(n4) => {
                if n4.prefix_len() < MIN_CIDR_PREFIX {
                    bail!("CIDR {n4} is wider than /{MIN_CIDR_PREFIX}");
                }
                cidr_hosts(n4).into_iter().map(|ip| ip.to_string()).collect()
            }
            IpNet::V6(_) => bail!("IPv6 CIDR expansion is not supported: {s}"),
        }
    } else {
        let host = s.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            bail!("empty host");
        }
        if host.contains(':') && host.parse::<Ipv6Addr>().is_err() {
            bail!("invalid host: {host}");
        }
        vec![host.to_string()]
    };

    Ok(hosts
        .iter()
        .flat_map(|h| ports.iter().map(move |&p| Target::new(h.clone(), p)))
        .collect())
}

/// Host addresses of an IPv4 network. Network and broadcast addresses are skipped,
/// except for /31 and /32 where every address is a host.
pub fn cidr_hosts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if net.prefix_len() >= 31 {
        return (start..=end).map(Ipv4Addr::from).collect();
    }
    (start + 1..end).map(Ipv4Addr::from).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub targets: Vec<String>,
    pub skipped: usize,
}

/// Pull clean `ip:port` entries out of report lines such as `1.2.3.4:80 | 6.01ms | HTTP`.
///
/// Only numeric IPv4 hosts with a valid port are kept.
pub fn extract_report_targets(s: &str) -> Extracted {
    let mut out = Extracted::default();
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let head = line.split(" | ").next().unwrap_or("").trim();
        let numeric = head.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ':');
        match parse_target(head) {
            Ok(t) if numeric && t.host.parse::<Ipv4Addr>().is_ok() => {
                out.targets.push(t.to_string())
            }
            _ => {
                warn!(line, "skipping invalid line");
                out.skipped += 1;
            }
        }
    }
    out
}

/// Read a report, extract its targets, and write them one per line to `output`.
pub fn extract_report_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<Extracted> {
    let input = input.as_ref();
    let content = fs::read_to_string(input)
        .with_context(|| format!("failed to read input file: {}", input.display()))?;
    let extracted = extract_report_targets(&content);
    let mut body = extracted.targets.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    crate::output::write_atomic(output.as_ref(), body.as_bytes())?;
    Ok(extracted)
}
