//! Library crate for reachscan-rs: concurrent reachability and latency probing.
pub mod aggregate;
pub mod output;
pub mod ping;
pub mod ports;
pub mod probe;
pub mod progress;
pub mod scheduler;
pub mod targets;
pub mod types;
