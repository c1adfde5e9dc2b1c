//! Do-nothing action for exercising rig configurations.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::action::{Action, ActionContext};
use crate::error::{ActionError, RigError};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoopOptions {
    /// Allows `noop: {enabled: false}` to be caught as a mistake.
    enabled: Option<bool>,
}

pub struct NoopAction;

impl NoopAction {
    pub fn from_options(options: &serde_yaml::Value) -> Result<Self, RigError> {
        let opts: NoopOptions = serde_yaml::from_value(options.clone())
            .map_err(|e| RigError::config(format!("noop action: {e}")))?;
        if opts.enabled == Some(false) {
            return Err(RigError::config(
                "noop action requested but explicitly disabled",
            ));
        }
        Ok(Self)
    }
}

#[async_trait]
impl Action for NoopAction {
    async fn run(&mut self, ctx: &ActionContext) -> Result<(), ActionError> {
        info!("no-op action triggered, doing nothing");
        let out = ctx.out_path("noop.out");
        std::fs::write(
            &out,
            format!("noop triggered at {}\n", chrono::Local::now().to_rfc3339()),
        )
        .map_err(|e| ActionError::Io {
            path: out,
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &std::path::Path) -> ActionContext {
        ActionContext {
            rig_name: "test".into(),
            workdir: dir.to_path_buf(),
            interval: std::time::Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn writes_marker_file() {
        let dir = tempfile::tempdir().unwrap();
        let opts = serde_yaml::from_str("{}").unwrap();
        let mut action = NoopAction::from_options(&opts).unwrap();
        action.run(&ctx(dir.path())).await.unwrap();
        assert!(dir.path().join("noop.out").exists());
    }

    #[test]
    fn explicit_disable_is_a_config_error() {
        let opts = serde_yaml::from_str("enabled: false").unwrap();
        assert!(NoopAction::from_options(&opts).is_err());
    }

    #[test]
    fn empty_mapping_is_accepted() {
        let opts = serde_yaml::from_str("{}").unwrap();
        assert!(NoopAction::from_options(&opts).is_ok());
    }
}
