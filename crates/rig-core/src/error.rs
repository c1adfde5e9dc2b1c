//! Error types for the rig runtime.
//!
//! Every failure surfaced to the operator maps onto one of the documented
//! exit codes: 1 for a privilege problem, 2 for a configuration problem
//! detected before detaching, 3 for a deployment/probe failure, 4 for an
//! external destroy, 5 for a fatal runtime error.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error for rig operations.
#[derive(Debug, Error)]
pub enum RigError {
    /// The process is not running with effective UID 0.
    #[error("rig must be run as root")]
    NotRoot,

    /// The rigfile or one of its plugin option blocks is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Deployment failed: probe failure, socket collision, or working
    /// directory creation failure.
    #[error("deployment error: {0}")]
    Deploy(String),

    /// The rig was destroyed externally (control socket or signal).
    #[error("rig destroyed: {0}")]
    Destroyed(String),

    /// A fatal error inside the running supervisor.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl RigError {
    /// Exit code for the process when terminating with this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::NotRoot => 1,
            Self::Config(_) => 2,
            Self::Deploy(_) => 3,
            Self::Destroyed(_) => 4,
            Self::Runtime(_) => 5,
        }
    }

    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Shorthand for a deployment error.
    pub fn deploy(msg: impl Into<String>) -> Self {
        Self::Deploy(msg.into())
    }

    /// Shorthand for a runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }
}

/// Errors from monitor polling.
///
/// Transient errors are logged and retried on the next tick; they never
/// propagate out of the supervisor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// Errors from action execution.
///
/// A failing action is logged and skipped; subsequent actions still run.
/// `fatal` is reserved for actions whose failure must take the rig down
/// with it (kdump).
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("command `{cmd}` failed: {detail}")]
    Command { cmd: String, detail: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl ActionError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_documented_mapping() {
        assert_eq!(RigError::NotRoot.exit_code(), 1);
        assert_eq!(RigError::config("x").exit_code(), 2);
        assert_eq!(RigError::deploy("x").exit_code(), 3);
        assert_eq!(RigError::Destroyed("x".into()).exit_code(), 4);
        assert_eq!(RigError::runtime("x").exit_code(), 5);
    }
}
