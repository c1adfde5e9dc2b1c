//! sos report / collect execution.
//!
//! Runs `sos` when the rig triggers, in either local `report` mode or
//! multi-host `collect` mode (mutually exclusive). With
//! `initial_archive: true` the same mode also runs once at deployment,
//! so the triggered archive can be diffed against a healthy baseline.
//! The initial run failing is logged, not fatal.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::{error, info, warn};

use crate::action::{import_into_workdir, Action, ActionContext};
use crate::adapters::cmd::{binary_exists, run_captured};
use crate::error::{ActionError, RigError};

const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SosOptions {
    /// Local report mode: `true`, `enabled`, or a mapping of sos
    /// options (`plugin-option: value` becomes `--plugin-option value`).
    report: Option<Value>,
    /// Multi-host collect mode, same value forms as `report`.
    collect: Option<Value>,
    #[serde(default)]
    initial_archive: bool,
    #[serde(default = "default_timeout")]
    timeout: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

pub struct SosAction {
    argv: Vec<String>,
    initial_archive: bool,
    timeout: Duration,
}

/// Expand a mode value into trailing sos arguments.
fn mode_args(value: &Value, mode: &str) -> Result<Vec<String>, RigError> {
    match value {
        Value::Bool(true) => Ok(Vec::new()),
        Value::String(s) if s == "enabled" => Ok(Vec::new()),
        Value::Mapping(map) => {
            let mut args = Vec::new();
            for (key, val) in map {
                let key = key.as_str().ok_or_else(|| {
                    RigError::config(format!("sos action: non-string option in '{mode}'"))
                })?;
                args.push(format!("--{key}"));
                match val {
                    Value::Bool(true) => {}
                    Value::String(s) => args.push(s.clone()),
                    Value::Number(n) => args.push(n.to_string()),
                    other => {
                        return Err(RigError::config(format!(
                            "sos action: unsupported value {other:?} for option '{key}'"
                        )))
                    }
                }
            }
            Ok(args)
        }
        other => Err(RigError::config(format!(
            "sos action: '{mode}' must be 'enabled', true, or an option mapping, not {other:?}"
        ))),
    }
}

impl SosAction {
    pub fn from_options(options: &Value) -> Result<Self, RigError> {
        let opts: SosOptions = serde_yaml::from_value(options.clone())
            .map_err(|e| RigError::config(format!("sos action: {e}")))?;

        let (mode, value) = match (&opts.report, &opts.collect) {
            (Some(_), Some(_)) => {
                return Err(RigError::config(
                    "sos action: both 'report' and 'collect' defined, only one is supported",
                ))
            }
            (Some(v), None) => ("report", v),
            (None, Some(v)) => ("collect", v),
            (None, None) => {
                return Err(RigError::config(
                    "sos action: neither 'report' nor 'collect' defined",
                ))
            }
        };

        let mut argv = vec!["sos".to_string(), mode.to_string(), "--batch".to_string()];
        argv.extend(mode_args(value, mode)?);

        Ok(Self {
            argv,
            initial_archive: opts.initial_archive,
            timeout: Duration::from_secs(opts.timeout),
        })
    }

    /// Run sos once and pull the produced tarball into the workdir.
    async fn collect_archive(&self, ctx: &ActionContext, label: &str) -> Result<(), ActionError> {
        let mut argv = self.argv.clone();
        argv.push("--label".to_string());
        argv.push(format!("{}-{label}", ctx.rig_name));

        info!(cmd = %argv.join(" "), "collecting sos archive");
        let out = run_captured(&argv, self.timeout)
            .await
            .map_err(ActionError::other)?;
        if !out.success() {
            let tail: Vec<&str> = out.stdout.lines().rev().take(3).collect();
            return Err(ActionError::other(format!(
                "sos exited {}: {}",
                out.status,
                if out.stderr.trim().is_empty() {
                    tail.join(" / ")
                } else {
                    out.stderr.trim().to_string()
                }
            )));
        }

        // sos prints the archive path on its own line; find it rather
        // than guessing the distribution's output directory.
        let path = out
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| l.contains("sos") && l.contains(".tar."))
            .ok_or_else(|| {
                ActionError::other("could not determine final path of sos archive")
            })?;
        import_into_workdir(std::path::Path::new(path), &ctx.workdir)?;
        info!(archive = path, "sos archive stored");
        Ok(())
    }
}

#[async_trait]
impl Action for SosAction {
    async fn pre_start(&mut self, ctx: &ActionContext) -> Result<(), ActionError> {
        if !binary_exists("sos") {
            return Err(ActionError::other("required binary 'sos' not found"));
        }
        if self.initial_archive {
            if let Err(e) = self.collect_archive(ctx, "initial").await {
                warn!(error = %e, "initial sos archive failed, continuing");
            }
        }
        Ok(())
    }

    async fn run(&mut self, ctx: &ActionContext) -> Result<(), ActionError> {
        if let Err(e) = self.collect_archive(ctx, "triggered").await {
            error!(error = %e, "triggered sos collection failed");
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(yaml: &str) -> Result<SosAction, RigError> {
        SosAction::from_options(&serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn report_and_collect_are_mutually_exclusive() {
        assert!(action("report: enabled\ncollect: enabled\n").is_err());
    }

    #[test]
    fn one_mode_is_required() {
        assert!(action("initial_archive: true\n").is_err());
    }

    #[test]
    fn option_mapping_becomes_flags() {
        let a = action("report:\n  only-plugins: networking\n  allow-system-changes: true\n")
            .unwrap();
        assert!(a.argv.contains(&"--only-plugins".to_string()));
        assert!(a.argv.contains(&"networking".to_string()));
        assert!(a.argv.contains(&"--allow-system-changes".to_string()));
    }

    #[test]
    fn collect_mode_selects_subcommand() {
        let a = action("collect: enabled\ntimeout: 600\n").unwrap();
        assert_eq!(a.argv[1], "collect");
        assert_eq!(a.timeout, Duration::from_secs(600));
    }
}
