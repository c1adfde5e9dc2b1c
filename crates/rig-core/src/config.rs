//! Rigfile parsing and normalization.
//!
//! A rigfile is a YAML document with rig-wide tunables plus one mapping of
//! monitors and one of actions. Top-level keys not listed here are
//! rejected; per-plugin option blocks are validated later by the registry
//! against each plugin's own option struct.

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tracing::warn;

use crate::error::RigError;

/// Default repeat delay in seconds when `repeat` is set without one.
const DEFAULT_REPEAT_DELAY: u64 = 1;

/// Raw rigfile document, exactly as the operator wrote it.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RigFile {
    pub name: Option<String>,
    /// Polling interval in seconds. Values below 1 are clamped to 1.
    pub interval: Option<f64>,
    /// Seconds to wait between the trigger and running actions.
    pub delay: Option<u64>,
    /// Extra iterations for actions that support repetition.
    pub repeat: Option<u32>,
    /// Seconds between repeated action iterations.
    pub repeat_delay: Option<u64>,
    /// Keep the working directory instead of producing a tar archive.
    pub no_archive: Option<bool>,
    /// Monitor plugin name -> option block. Must be non-empty.
    pub monitors: serde_yaml::Mapping,
    /// Action plugin name -> option block. Must be non-empty.
    pub actions: serde_yaml::Mapping,
}

impl RigFile {
    /// Load and parse a rigfile from disk.
    pub fn load(path: &Path) -> Result<Self, RigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RigError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&raw)
    }

    /// Parse a rigfile from a YAML string.
    pub fn parse(raw: &str) -> Result<Self, RigError> {
        let file: Self = serde_yaml::from_str(raw)
            .map_err(|e| RigError::config(format!("invalid rigfile: {e}")))?;
        if file.monitors.is_empty() {
            return Err(RigError::config("rigfile defines no monitors"));
        }
        if file.actions.is_empty() {
            return Err(RigError::config("rigfile defines no actions"));
        }
        Ok(file)
    }

    /// Normalize the rig-wide settings, generating a name if none was
    /// given and clamping the interval to the 1 second floor.
    pub fn settings(&self) -> Result<RigSettings, RigError> {
        let name = match &self.name {
            Some(n) => {
                validate_name(n)?;
                n.clone()
            }
            None => random_name(),
        };

        let interval = self.interval.unwrap_or(1.0);
        let interval = if interval < 1.0 {
            warn!(requested = interval, "interval below 1s floor, clamping to 1s");
            1
        } else {
            interval as u64
        };

        Ok(RigSettings {
            name,
            interval: Duration::from_secs(interval),
            delay: Duration::from_secs(self.delay.unwrap_or(0)),
            repeat: self.repeat.unwrap_or(0),
            repeat_delay: Duration::from_secs(
                self.repeat_delay.unwrap_or(DEFAULT_REPEAT_DELAY),
            ),
            no_archive: self.no_archive.unwrap_or(false),
        })
    }
}

/// Normalized rig-wide settings.
#[derive(Debug, Clone)]
pub struct RigSettings {
    pub name: String,
    pub interval: Duration,
    pub delay: Duration,
    pub repeat: u32,
    pub repeat_delay: Duration,
    pub no_archive: bool,
}

/// Rig names become socket filenames and directory names, so keep them to
/// a conservative character set.
fn validate_name(name: &str) -> Result<(), RigError> {
    if name.is_empty() || name.len() > 64 {
        return Err(RigError::config("rig name must be 1-64 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(RigError::config(
            "rig name may only contain letters, digits, '-' and '_'",
        ));
    }
    Ok(())
}

/// Five random lowercase letters, matching the historical naming scheme.
fn random_name() -> String {
    let mut rng = rand::thread_rng();
    (0..5).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

/// A rigfile value that may be a single item or a list of items.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}
