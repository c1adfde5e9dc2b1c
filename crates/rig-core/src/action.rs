//! The action capability set.
//!
//! Actions collect diagnostic data into the rig's working directory.
//! Every action implements `run`, executed once per trigger (plus
//! repeats, for repeatable actions). Pre-trigger collectors additionally
//! implement `pre_start`, called at deployment, and `stop`, called at
//! trigger time in reverse priority order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ActionError;

/// Grace window for a pre-trigger collector to wind down before its
/// child is killed outright.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

/// Rig-wide context handed to actions.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Rig name, used in generated filenames.
    pub rig_name: String,
    /// Working directory the action writes into. Each action uses
    /// disjoint filenames within it.
    pub workdir: PathBuf,
    /// The rig polling interval; periodic samplers reuse it.
    pub interval: Duration,
}

impl ActionContext {
    /// A file path inside the working directory.
    #[must_use]
    pub fn out_path(&self, name: &str) -> PathBuf {
        self.workdir.join(name)
    }
}

/// A configured diagnostic collector.
#[async_trait]
pub trait Action: Send {
    /// Called at deployment, before polling begins. Probes feasibility
    /// and starts any long-lived collection. A failure here aborts the
    /// deployment.
    async fn pre_start(&mut self, _ctx: &ActionContext) -> Result<(), ActionError> {
        Ok(())
    }

    /// Collect once. Output lands in the working directory.
    async fn run(&mut self, ctx: &ActionContext) -> Result<(), ActionError>;

    /// Stop a pre-trigger collection. Must complete within
    /// [`STOP_GRACE`], killing its own children if necessary. Idempotent.
    async fn stop(&mut self, _ctx: &ActionContext) -> Result<(), ActionError> {
        Ok(())
    }
}

/// Turn an arbitrary string into a safe filename within the workdir.
#[must_use]
pub fn sanitize_filename(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' => '.',
            ' ' => '_',
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' => c,
            _ => '_',
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

/// Timestamp prefix used in sampler record headers and archive names.
#[must_use]
pub fn timestamp_header(now: chrono::DateTime<chrono::Local>) -> String {
    format!("==== {} ====", now.format("%Y-%m-%d %H:%M:%S%.3f"))
}

/// Copy a file produced outside the working directory into it.
pub fn import_into_workdir(src: &Path, workdir: &Path) -> Result<PathBuf, ActionError> {
    let name = src
        .file_name()
        .ok_or_else(|| ActionError::other(format!("no filename in {}", src.display())))?;
    let dest = workdir.join(name);
    std::fs::copy(src, &dest).map_err(|e| ActionError::Io {
        path: src.to_path_buf(),
        source: e,
    })?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_lose_separators_and_spaces() {
        assert_eq!(sanitize_filename("/proc/net/dev"), "proc.net.dev");
        assert_eq!(sanitize_filename("ss -noemitaup"), "ss_-noemitaup");
        assert_eq!(sanitize_filename("tc -s qdisc"), "tc_-s_qdisc");
    }

    #[test]
    fn import_copies_into_workdir() {
        let src_dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("sosreport-x.tar.xz");
        std::fs::write(&src, b"data").unwrap();

        let dest = import_into_workdir(&src, work.path()).unwrap();
        assert!(dest.exists());
        assert_eq!(std::fs::read(dest).unwrap(), b"data");
    }
}
