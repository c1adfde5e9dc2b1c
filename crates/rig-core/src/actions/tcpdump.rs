//! Background packet capture for the life of the rig.
//!
//! A rolling tcpdump starts at deployment and is stopped at trigger
//! time, leaving up to `capture_count` files of `capture_size` MB each
//! in the working directory. A feasibility probe runs first so a bad
//! interface or filter expression fails the deployment instead of
//! silently capturing nothing.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Deserialize;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::action::{Action, ActionContext, STOP_GRACE};
use crate::error::{ActionError, RigError};

const TCPDUMP: &str = "tcpdump";

/// How long the probe is allowed to run before we conclude the command
/// line is viable. tcpdump reports interface and filter errors within
/// the first second.
const PROBE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TcpdumpOptions {
    /// Interface to listen on; `any` is accepted by tcpdump itself.
    interface: String,
    /// pcap-filter expression.
    expression: Option<String>,
    #[serde(default = "default_capture_count")]
    capture_count: u32,
    /// Per-file size in MB.
    #[serde(default = "default_capture_size")]
    capture_size: u32,
    /// Snapshot length in bytes; 0 uses the tool default.
    #[serde(default)]
    snapshot_length: u32,
}

fn default_capture_count() -> u32 {
    1
}

fn default_capture_size() -> u32 {
    10
}

pub struct TcpdumpAction {
    opts: TcpdumpOptions,
    child: Option<Child>,
}

impl TcpdumpAction {
    pub fn from_options(options: &serde_yaml::Value) -> Result<Self, RigError> {
        let opts: TcpdumpOptions = serde_yaml::from_value(options.clone())
            .map_err(|e| RigError::config(format!("tcpdump action: {e}")))?;
        if opts.capture_count == 0 {
            return Err(RigError::config("tcpdump action: 'capture_count' must be >= 1"));
        }
        if opts.capture_size == 0 {
            return Err(RigError::config("tcpdump action: 'capture_size' must be >= 1"));
        }
        Ok(Self { opts, child: None })
    }

    /// Shared option prefix for the probe and the real capture. The
    /// filter expression is appended after all options by the callers,
    /// as tcpdump requires.
    ///
    /// `-Z root` avoids the privilege drop tcpdump performs before
    /// opening its first savefile, which would fail the write into the
    /// rig-owned working directory.
    fn base_args(&self) -> Vec<String> {
        vec![
            "-Z".into(),
            "root".into(),
            "-n".into(),
            "-i".into(),
            self.opts.interface.clone(),
            "-s".into(),
            self.opts.snapshot_length.to_string(),
        ]
    }

    fn push_expression(&self, args: &mut Vec<String>) {
        if let Some(expr) = &self.opts.expression {
            args.push(expr.clone());
        }
    }

    fn capture_path(&self, ctx: &ActionContext) -> std::path::PathBuf {
        ctx.out_path(&format!("{}-{}.pcap", ctx.rig_name, self.opts.interface))
    }

    /// Run the capture command briefly; an early exit with stderr output
    /// means tcpdump rejected the interface or expression.
    async fn probe(&self) -> Result<(), ActionError> {
        let mut args = self.base_args();
        // Probe writes nowhere; one packet or the window, whichever first.
        args.extend(["-c".into(), "1".into(), "-w".into(), "/dev/null".into()]);
        self.push_expression(&mut args);

        let mut child = Command::new(TCPDUMP)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ActionError::other(format!("cannot spawn tcpdump: {e}")))?;

        match tokio::time::timeout(PROBE_WINDOW, child.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    use tokio::io::AsyncReadExt;
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                Err(ActionError::other(format!(
                    "tcpdump probe failed: {}",
                    stderr.trim()
                )))
            }
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ActionError::other(format!("tcpdump probe error: {e}"))),
            // Still running after the window: the command line is viable.
            Err(_) => {
                let _ = child.kill().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Action for TcpdumpAction {
    async fn pre_start(&mut self, ctx: &ActionContext) -> Result<(), ActionError> {
        self.probe().await?;
        debug!("tcpdump command validated");

        let mut args = self.base_args();
        args.extend([
            "-C".into(),
            self.opts.capture_size.to_string(),
            "-W".into(),
            self.opts.capture_count.to_string(),
            "-w".into(),
            self.capture_path(ctx).display().to_string(),
        ]);
        self.push_expression(&mut args);

        let child = Command::new(TCPDUMP)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ActionError::other(format!("cannot start packet capture: {e}")))?;

        info!(interface = %self.opts.interface, "background packet capture started");
        self.child = Some(child);
        Ok(())
    }

    async fn run(&mut self, _ctx: &ActionContext) -> Result<(), ActionError> {
        // Capture files are already in the working directory; collection
        // happened during the rig's life.
        Ok(())
    }

    async fn stop(&mut self, _ctx: &ActionContext) -> Result<(), ActionError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        info!("stopping packet capture");
        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!("tcpdump ignored SIGTERM, killing");
                child
                    .kill()
                    .await
                    .map_err(|e| ActionError::other(format!("cannot kill tcpdump: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_interface() {
        let opts = serde_yaml::from_str("capture_count: 2").unwrap();
        assert!(TcpdumpAction::from_options(&opts).is_err());
    }

    #[test]
    fn defaults_apply() {
        let opts = serde_yaml::from_str("interface: any").unwrap();
        let action = TcpdumpAction::from_options(&opts).unwrap();
        assert_eq!(action.opts.capture_count, 1);
        assert_eq!(action.opts.capture_size, 10);
        assert_eq!(action.opts.snapshot_length, 0);
    }

    #[test]
    fn zero_capture_count_is_rejected() {
        let opts = serde_yaml::from_str("interface: any\ncapture_count: 0\n").unwrap();
        assert!(TcpdumpAction::from_options(&opts).is_err());
    }

    #[test]
    fn expression_lands_after_all_options() {
        let opts =
            serde_yaml::from_str("interface: eth0\nexpression: port 443\n").unwrap();
        let action = TcpdumpAction::from_options(&opts).unwrap();
        let mut args = action.base_args();
        args.extend(["-w".into(), "/dev/null".into()]);
        action.push_expression(&mut args);
        assert_eq!(args.last().unwrap(), "port 443");
    }
}
