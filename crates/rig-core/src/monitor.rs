//! The monitor capability set.
//!
//! A monitor watches one class of host condition. The supervisor calls
//! `start` once at deployment, `poll` at every tick until the monitor
//! trips, and `stop` during teardown. Polling reads host state only; a
//! monitor never writes into the rig's working directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// Evidence attached to a trip: which source fired and what was seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripEvidence {
    /// Plugin name of the monitor that tripped.
    pub monitor: String,
    /// The watched file, unit, process, or path.
    pub source: String,
    /// A quoted excerpt or measurement.
    pub detail: String,
}

impl TripEvidence {
    pub fn new(
        monitor: impl Into<String>,
        source: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            monitor: monitor.into(),
            source: source.into(),
            detail: detail.into(),
        }
    }
}

/// A configured, stateful watcher.
///
/// `poll` returns `Ok(Some(evidence))` exactly once; after tripping the
/// supervisor stops polling the monitor. Transient errors are retried on
/// the next tick. `stop` is idempotent.
#[async_trait]
pub trait Monitor: Send {
    /// Open sources and position them (end-of-file, journal tail, first
    /// process sample). Called once before polling begins.
    async fn start(&mut self) -> Result<(), MonitorError>;

    /// Check the watched condition once.
    async fn poll(&mut self) -> Result<Option<TripEvidence>, MonitorError>;

    /// Human-readable summary of what is being watched.
    fn describe(&self) -> String;

    /// Release any held resources. Idempotent.
    async fn stop(&mut self) {}
}
