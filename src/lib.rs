//! Ping Probe Library
//!
//! Live latency probing for hosting locations: persistent per-address
//! connections, smoothed round-trip estimates, and a registry that
//! multiplexes subscribers over one connection per address.

pub mod probe;

pub use probe::{CancelHandle, ProbeConfig, ProbeDriver, ProbeRegistry};
