//! Live Latency Probing
//!
//! Keeps one persistent connection per remote address, sends periodic
//! probes over it and reports a smoothed round-trip estimate to whoever
//! subscribed to that address.
//!
//! Features:
//! - Connection state machine with a connect deadline and lazy reconnect
//! - Bounded measurement window, rounded mean once enough samples arrive
//! - Address registry shared by many subscribers, with cancel handles
//! - Periodic probe driver
//! - Display grading and a per-location board for UIs
//! - Prometheus metrics export
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ping_probe::probe::{ProbeConfig, ProbeDriver, ProbeRegistry};
//!
//! let registry = ProbeRegistry::new(ProbeConfig::default());
//!
//! let handle = registry.subscribe(Some("198.51.100.7"), |latency| match latency {
//!     Some(ms) => println!("{} ms", ms),
//!     None => println!("latency unavailable"),
//! });
//!
//! let driver = ProbeDriver::with_config_interval(registry.clone(), vec!["198.51.100.7".into()])
//!     .spawn();
//!
//! // later
//! driver.abort();
//! handle.cancel();
//! ```

pub mod board;
pub mod config;
pub mod connection;
pub mod display;
pub mod driver;
pub mod metrics;
pub mod registry;
pub mod transport;
pub mod window;

pub use board::*;
pub use config::*;
pub use connection::*;
pub use display::*;
pub use driver::*;
pub use metrics::*;
pub use registry::*;
pub use transport::*;
pub use window::*;
