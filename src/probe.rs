use crate::types::{ProbeOutcome, ProtocolKind, Target};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{self, Instant};

/// Why a single probe did not produce a reachable endpoint.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no addresses found for {0}")]
    NoAddress(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed target: {0}")]
    Malformed(String),

    #[error("probe panicked: {0}")]
    Panicked(String),
}

/// Guess the protocol spoken on a reachable port.
pub fn classify_port(port: u16) -> ProtocolKind {
    match port {
        80 | 8080 | 3128 | 8888 => ProtocolKind::Http,
        443 | 8443 => ProtocolKind::Https,
        1080 | 1081 => ProtocolKind::Socks,
        _ => ProtocolKind::Unknown,
    }
}

/// A single-target reachability check.
///
/// Implementations must be cheap to share across workers; the scheduler holds one
/// instance behind an `Arc` and calls it from every worker task.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    /// Returns the connect latency on success.
    async fn probe(&self, target: &Target) -> Result<Duration, ProbeError>;

    fn classify(&self, target: &Target) -> ProtocolKind {
        classify_port(target.port)
    }
}

/// Plain TCP connect prober.
#[derive(Debug, Clone, Copy)]
pub struct TcpProber {
    pub timeout: Duration,
}

impl TcpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, target: &Target) -> Result<Duration, ProbeError> {
        probe_target(target, self.timeout).await
    }
}

/// Open one TCP connection to `target`, bounded by `timeout` (resolution included).
///
/// The stream is dropped before returning, so the socket is closed on every path.
/// When the timeout fires the pending connect future is dropped, which also closes
/// the half-open socket.
pub async fn probe_target(target: &Target, timeout: Duration) -> Result<Duration, ProbeError> {
    if target.host.is_empty() || target.port == 0 {
        return Err(ProbeError::Malformed(target.to_string()));
    }

    let start = Instant::now();
    match time::timeout(timeout, connect(target)).await {
        Ok(Ok(stream)) => {
            let latency = start.elapsed();
            drop(stream);
            Ok(latency)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Probe and fold the result into an outcome. Never fails.
pub async fn probe(target: &Target, index: usize, timeout: Duration) -> ProbeOutcome {
    match probe_target(target, timeout).await {
        Ok(latency) => {
            ProbeOutcome::succeeded(target.clone(), index, latency, classify_port(target.port))
        }
        Err(_) => ProbeOutcome::failed(target.clone(), index),
    }
}

async fn connect(target: &Target) -> Result<TcpStream, ProbeError> {
    let addrs = lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(|source| ProbeError::Resolve {
            host: target.host.clone(),
            source,
        })?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(source) => last_err = Some(ProbeError::Connect { addr, source }),
        }
    }
    Err(last_err.unwrap_or_else(|| ProbeError::NoAddress(target.host.clone())))
}
