//! Application core dumps via gcore.
//!
//! Resolves configured process names to PIDs at execution time and dumps
//! one core per PID into the working directory. With `freeze`, the
//! target is `SIGSTOP`ped for the duration of each dump and `SIGCONT`ed
//! afterwards; the stop/cont pair is balanced even when the dump fails.

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::action::{Action, ActionContext};
use crate::adapters::cmd::{binary_exists, run_captured, DEFAULT_TIMEOUT};
use crate::adapters::procfs::ProcFs;
use crate::config::OneOrMany;
use crate::error::{ActionError, RigError};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ProcRef {
    Pid(i32),
    Name(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GcoreOptions {
    procs: OneOrMany<ProcRef>,
    #[serde(default)]
    freeze: bool,
}

pub struct GcoreAction {
    refs: Vec<ProcRef>,
    freeze: bool,
    procfs: ProcFs,
    iteration: u32,
}

/// Balances SIGSTOP with SIGCONT: the continue fires on drop, so every
/// exit path out of a dump resumes the target.
struct FreezeGuard(Pid);

impl FreezeGuard {
    fn stop(pid: Pid) -> Option<Self> {
        match kill(pid, Signal::SIGSTOP) {
            Ok(()) => Some(Self(pid)),
            Err(e) => {
                warn!(pid = pid.as_raw(), error = %e, "SIGSTOP failed, dumping unfrozen");
                None
            }
        }
    }
}

impl Drop for FreezeGuard {
    fn drop(&mut self) {
        if let Err(e) = kill(self.0, Signal::SIGCONT) {
            error!(pid = self.0.as_raw(), error = %e, "SIGCONT failed, target may stay stopped");
        }
    }
}

impl GcoreAction {
    pub fn from_options(options: &serde_yaml::Value) -> Result<Self, RigError> {
        let opts: GcoreOptions = serde_yaml::from_value(options.clone())
            .map_err(|e| RigError::config(format!("gcore action: {e}")))?;
        let refs = opts.procs.into_vec();
        if refs.is_empty() {
            return Err(RigError::config("gcore action: 'procs' is empty"));
        }
        Ok(Self {
            refs,
            freeze: opts.freeze,
            procfs: ProcFs::default(),
            iteration: 0,
        })
    }

    /// (pid, label) pairs, with names resolved at call time so repeats
    /// pick up restarted processes.
    fn resolve(&self) -> Vec<(i32, String)> {
        let mut out = Vec::new();
        for proc_ref in &self.refs {
            match proc_ref {
                ProcRef::Pid(pid) => out.push((*pid, String::new())),
                ProcRef::Name(name) => {
                    let pids = self.procfs.pids_matching(name);
                    if pids.is_empty() {
                        warn!(name, "no PIDs found for process name, skipping");
                    }
                    for pid in pids {
                        out.push((pid, name.clone()));
                    }
                }
            }
        }
        out
    }
}

#[async_trait]
impl Action for GcoreAction {
    async fn pre_start(&mut self, _ctx: &ActionContext) -> Result<(), ActionError> {
        if !binary_exists("gcore") {
            return Err(ActionError::other("required binary 'gcore' not found"));
        }
        Ok(())
    }

    async fn run(&mut self, ctx: &ActionContext) -> Result<(), ActionError> {
        self.iteration += 1;
        for (pid, name) in self.resolve() {
            // gcore appends .<pid> itself; iterations are disambiguated by
            // their own suffix so repeats do not overwrite earlier dumps.
            let mut base = String::from("core");
            if !name.is_empty() {
                base.push_str(&format!(".{name}"));
            }
            if self.iteration > 1 {
                base.push_str(&format!(".{}", self.iteration));
            }
            let out = ctx.out_path(&base);

            let _guard = if self.freeze {
                FreezeGuard::stop(Pid::from_raw(pid))
            } else {
                None
            };

            debug!(pid, out = %out.display(), "collecting core dump");
            let argv = vec![
                "gcore".to_string(),
                "-o".to_string(),
                out.display().to_string(),
                pid.to_string(),
            ];
            match run_captured(&argv, DEFAULT_TIMEOUT).await {
                Ok(res) if res.success() => {
                    info!(pid, "core dump collected");
                }
                Ok(res) => {
                    error!(pid, stderr = %res.stderr.trim(), "gcore failed");
                }
                Err(e) => {
                    error!(pid, error = %e, "gcore did not run");
                }
            }
            // _guard drops here: SIGCONT is sent regardless of outcome.
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_procs() {
        let opts = serde_yaml::from_str("procs: []").unwrap();
        assert!(GcoreAction::from_options(&opts).is_err());
    }

    #[test]
    fn accepts_mixed_pids_and_names() {
        let opts = serde_yaml::from_str("procs: [123, sshd]\nfreeze: true\n").unwrap();
        let action = GcoreAction::from_options(&opts).unwrap();
        assert_eq!(action.refs.len(), 2);
        assert!(action.freeze);
    }

    #[test]
    fn rejects_unknown_fields() {
        let opts = serde_yaml::from_str("procs: [1]\nall_pids: true\n").unwrap();
        assert!(GcoreAction::from_options(&opts).is_err());
    }
}
