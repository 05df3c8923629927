use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Ports commonly used by open proxies. Each one maps to a known protocol kind.
pub const PROXY_PORTS: &[u16] = &[80, 8080, 3128, 8888, 443, 8443, 1080, 1081];

/// Parse a port list into deduplicated ports (1..=65535), first occurrence wins.
///
/// Entries are separated by commas, whitespace or newlines. Each entry is a port
/// (`80`) or an inclusive range (`8000-8010`). Text after `#` on a line is ignored.
pub fn parse_port_list(s: &str) -> Result<Vec<u16>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().unwrap_or("");
        for entry in line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|e| !e.is_empty())
        {
            let (start, end) = match entry.split_once('-') {
                Some((a, b)) => {
                    let start = parse_port(a)
                        .with_context(|| format!("line {line_no}: bad range start in {entry}"))?;
                    let end = parse_port(b)
                        .with_context(|| format!("line {line_no}: bad range end in {entry}"))?;
                    (start, end)
                }
                None => {
                    let p = parse_port(entry)
                        .with_context(|| format!("line {line_no}: bad port {entry}"))?;
                    (p, p)
                }
            };
            if start > end {
                bail!("line {line_no}: invalid range {start}-{end} (start > end)");
            }
            out.extend((start..=end).filter(|p| seen.insert(*p)));
        }
    }

    Ok(out)
}

/// Resolve a `--ports` argument: the keyword `proxy`, a path to a ports file, or an inline list.
pub fn resolve_ports_arg(arg: &str) -> Result<Vec<u16>> {
    let ports = if arg.eq_ignore_ascii_case("proxy") {
        PROXY_PORTS.to_vec()
    } else if Path::new(arg).is_file() {
        let content = fs::read_to_string(arg)
            .with_context(|| format!("failed to read ports file: {arg}"))?;
        parse_port_list(&content)?
    } else {
        parse_port_list(arg)?
    };
    if ports.is_empty() {
        bail!("port list is empty: {arg}");
    }
    Ok(ports)
}

pub(crate) fn parse_port(s: &str) -> Result<u16> {
    let val: u32 = s.trim().parse().with_context(|| format!("not a number: {s}"))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
