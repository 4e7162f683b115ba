//! cdexporter-core — polling and metric projection core for the
//! Connect:Direct queue exporter.
//!
//! Provides:
//! - `config` — immutable poll configuration and its validation
//! - `collector` — session lifecycle, queue fetching and the REST transport
//! - `classify` — reduction of raw queue state into fixed category counts
//! - `projector` — gauge / delta publication with a per-category baseline
//! - `metrics` — the Prometheus-backed metric sink
//! - `poll` — the poll loop controller and its re-authentication policy

pub mod classify;
pub mod collector;
pub mod config;
pub mod metrics;
pub mod poll;
pub mod projector;

/// Version of the cdexporter-core crate (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
