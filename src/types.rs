use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One endpoint to probe. Unique within a run once the loader has deduplicated the input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Likely protocol of a reachable endpoint, guessed from its port.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolKind {
    #[default]
    Unknown,
    Http,
    Https,
    Socks,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Unknown => "UNKNOWN",
            ProtocolKind::Http => "HTTP",
            ProtocolKind::Https => "HTTPS",
            ProtocolKind::Socks => "SOCKS",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single probe attempt.
///
/// `index` is the position of `target` in the deduplicated input list. It is the
/// tie-breaker when two successes report the same latency.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub target: Target,
    pub index: usize,
    pub success: bool,
    pub latency_ms: f64,
    pub kind: ProtocolKind,
}

impl ProbeOutcome {
    pub fn succeeded(target: Target, index: usize, latency: Duration, kind: ProtocolKind) -> Self {
        Self {
            target,
            index,
            success: true,
            latency_ms: latency.as_secs_f64() * 1000.0,
            kind,
        }
    }

    pub fn failed(target: Target, index: usize) -> Self {
        Self {
            target,
            index,
            success: false,
            latency_ms: 0.0,
            kind: ProtocolKind::Unknown,
        }
    }
}

/// Counters for one run.
///
/// Targets never started because the run was cancelled land in `skipped`, so
/// `succeeded + failed + skipped == total` holds for every finished run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RunStatistics {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// RFC3339 UTC timestamp of the run start.
    pub started_at: String,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl RunStatistics {
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Everything the scheduler hands back once a run ends.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<ProbeOutcome>,
    pub stats: RunStatistics,
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
