//! Kernel crash dump via sysrq.
//!
//! Writes `c` to `/proc/sysrq-trigger`, crashing the kernel so kdump
//! captures a vmcore. This reboots the host and preempts all rig
//! cleanup, so the supervisor runs it strictly last and removes the
//! control socket beforehand. No verification of the kdump service is
//! performed; it is assumed to have been tested on the host already.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::action::{Action, ActionContext};
use crate::error::{ActionError, RigError};

const SYSRQ_KNOB: &str = "/proc/sys/kernel/sysrq";
const SYSRQ_TRIGGER: &str = "/proc/sysrq-trigger";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct KdumpOptions {
    /// Value to write to /proc/sys/kernel/sysrq before arming. Zero is
    /// rejected: it would disable sysrq and with it the dump itself.
    sysrq: Option<u32>,
}

pub struct KdumpAction {
    sysrq: Option<u32>,
}

impl KdumpAction {
    pub fn from_options(options: &serde_yaml::Value) -> Result<Self, RigError> {
        let opts: KdumpOptions = serde_yaml::from_value(options.clone())
            .map_err(|e| RigError::config(format!("kdump action: {e}")))?;
        if opts.sysrq == Some(0) {
            return Err(RigError::config(
                "kdump action: sysrq=0 would disable kdump, cannot continue",
            ));
        }
        Ok(Self { sysrq: opts.sysrq })
    }
}

#[async_trait]
impl Action for KdumpAction {
    async fn pre_start(&mut self, _ctx: &ActionContext) -> Result<(), ActionError> {
        if let Some(sysrq) = self.sysrq {
            info!(sysrq, "setting {SYSRQ_KNOB}");
            std::fs::write(SYSRQ_KNOB, sysrq.to_string()).map_err(|e| ActionError::Io {
                path: SYSRQ_KNOB.into(),
                source: e,
            })?;
        }
        Ok(())
    }

    async fn run(&mut self, _ctx: &ActionContext) -> Result<(), ActionError> {
        info!(
            "writing 'c' to {SYSRQ_TRIGGER}; look in the configured crash location \
             for a vmcore after reboot"
        );
        std::fs::write(SYSRQ_TRIGGER, "c").map_err(|e| ActionError::Io {
            path: SYSRQ_TRIGGER.into(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysrq_zero_is_rejected() {
        let opts = serde_yaml::from_str("sysrq: 0").unwrap();
        assert!(KdumpAction::from_options(&opts).is_err());
    }

    #[test]
    fn bare_enable_is_accepted() {
        let opts = serde_yaml::from_str("{}").unwrap();
        assert!(KdumpAction::from_options(&opts).is_ok());
    }
}
