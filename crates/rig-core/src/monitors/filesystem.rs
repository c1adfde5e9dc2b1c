//! Filesystem threshold monitor.
//!
//! Watches a path for size growth and/or its backing filesystem for
//! usage thresholds. Trips when any configured threshold is met.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::adapters::fs::{backing_fs_usage, path_size};
use crate::error::{MonitorError, RigError};
use crate::monitor::{Monitor, TripEvidence};
use crate::units::{to_human, ByteSize};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilesystemOptions {
    path: PathBuf,
    /// Recursively summed size of `path` to trip on.
    size: Option<ByteSize>,
    /// Used percentage of the backing filesystem to trip on.
    used_perc: Option<u8>,
    /// Used bytes of the backing filesystem to trip on.
    used_size: Option<ByteSize>,
}

pub struct FilesystemMonitor {
    path: PathBuf,
    size: Option<ByteSize>,
    used_perc: Option<u8>,
    used_size: Option<ByteSize>,
}

impl FilesystemMonitor {
    pub fn from_options(options: &serde_yaml::Value) -> Result<Self, RigError> {
        let opts: FilesystemOptions = serde_yaml::from_value(options.clone())
            .map_err(|e| RigError::config(format!("filesystem monitor: {e}")))?;

        if opts.size.is_none() && opts.used_perc.is_none() && opts.used_size.is_none() {
            return Err(RigError::config(
                "filesystem monitor: set at least one of size, used_perc, used_size",
            ));
        }
        if let Some(perc) = opts.used_perc {
            if perc > 100 {
                return Err(RigError::config(
                    "filesystem monitor: 'used_perc' must be 0-100",
                ));
            }
        }
        if !opts.path.exists() {
            return Err(RigError::config(format!(
                "filesystem monitor: path '{}' does not exist",
                opts.path.display()
            )));
        }

        Ok(Self {
            path: opts.path,
            size: opts.size,
            used_perc: opts.used_perc,
            used_size: opts.used_size,
        })
    }
}

#[async_trait]
impl Monitor for FilesystemMonitor {
    async fn start(&mut self) -> Result<(), MonitorError> {
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<TripEvidence>, MonitorError> {
        let source = self.path.display().to_string();

        if let Some(limit) = self.size {
            match path_size(&self.path) {
                Ok(current) if current >= limit.bytes() => {
                    info!(path = %source, size = current, "path size threshold reached");
                    return Ok(Some(TripEvidence::new(
                        "filesystem",
                        &source,
                        format!("size {} meets threshold {limit}", to_human(current)),
                    )));
                }
                Ok(_) => {}
                Err(e) => warn!(path = %source, error = %e, "path size check failed, will retry"),
            }
        }

        if self.used_perc.is_some() || self.used_size.is_some() {
            match backing_fs_usage(&self.path) {
                Ok(usage) => {
                    if let Some(perc) = self.used_perc {
                        if usage.used_percent() >= f64::from(perc) {
                            return Ok(Some(TripEvidence::new(
                                "filesystem",
                                &source,
                                format!(
                                    "backing filesystem {:.0}% used meets threshold {perc}%",
                                    usage.used_percent()
                                ),
                            )));
                        }
                    }
                    if let Some(limit) = self.used_size {
                        if usage.used_bytes >= limit.bytes() {
                            return Ok(Some(TripEvidence::new(
                                "filesystem",
                                &source,
                                format!(
                                    "backing filesystem {} used meets threshold {limit}",
                                    to_human(usage.used_bytes)
                                ),
                            )));
                        }
                    }
                }
                Err(e) => warn!(path = %source, error = %e, "statvfs failed, will retry"),
            }
        }

        Ok(None)
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(s) = self.size {
            parts.push(format!("size>={s}"));
        }
        if let Some(p) = self.used_perc {
            parts.push(format!("used>={p}%"));
        }
        if let Some(s) = self.used_size {
            parts.push(format!("used>={s}"));
        }
        format!("{} for {}", self.path.display(), parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(yaml: &str) -> Result<FilesystemMonitor, RigError> {
        let opts = serde_yaml::from_str(yaml).unwrap();
        FilesystemMonitor::from_options(&opts)
    }

    #[test]
    fn requires_existing_path() {
        assert!(monitor("path: /definitely/not/here\nsize: 1M\n").is_err());
    }

    #[test]
    fn requires_a_threshold() {
        let dir = tempfile::tempdir().unwrap();
        assert!(monitor(&format!("path: {}\n", dir.path().display())).is_err());
    }

    #[tokio::test]
    async fn size_threshold_trips_on_growth() {
        let dir = tempfile::tempdir().unwrap();
        let mut mon = monitor(&format!("path: {}\nsize: 1M\n", dir.path().display())).unwrap();
        mon.start().await.unwrap();

        // 512K under a 1M threshold: quiet.
        std::fs::write(dir.path().join("pad"), vec![0u8; 512 * 1024]).unwrap();
        assert!(mon.poll().await.unwrap().is_none());

        // 2M over the threshold: trip.
        std::fs::write(dir.path().join("pad2"), vec![0u8; 2 * 1024 * 1024]).unwrap();
        let trip = mon.poll().await.unwrap().expect("size should trip");
        assert_eq!(trip.monitor, "filesystem");
    }

    #[tokio::test]
    async fn used_perc_zero_always_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut mon =
            monitor(&format!("path: {}\nused_perc: 0\n", dir.path().display())).unwrap();
        mon.start().await.unwrap();
        assert!(mon.poll().await.unwrap().is_some());
    }
}
