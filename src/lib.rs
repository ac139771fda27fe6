//! Proxy Harvester - public proxy list crawler and liveness checker
//!
//! Crawls configured listing sources, deduplicates the addresses found,
//! probes each one through a real request and keeps the live ones, split
//! into normal and anonymous lists.

pub mod config;
pub mod error;
pub mod harvest;
pub mod logging;
pub mod proxy;
pub mod sink;

pub use config::{Category, HarvestConfig};
pub use harvest::{CycleReport, CycleStats, Harvester};
pub use proxy::*;
pub use sink::{JsonFileSink, ResultSink};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
