//! Shared rig runtime state.
//!
//! One `RigState` is shared between the supervisor and the control
//! server. The supervisor is the only writer; the server reads it to
//! answer `status`. The trip record is write-once.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::control::protocol::{PluginState, StatusResponse};
use crate::monitor::TripEvidence;

/// High-level state of the rig runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RigPhase {
    Initializing,
    PreTriggerRunning,
    Polling,
    Triggered,
    Collecting,
    Archiving,
    Finished,
    Failed,
}

impl RigPhase {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::PreTriggerRunning => "pre_trigger_running",
            Self::Polling => "polling",
            Self::Triggered => "triggered",
            Self::Collecting => "collecting",
            Self::Archiving => "archiving",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RigPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

pub struct RigState {
    pub name: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    phase: RwLock<RigPhase>,
    trigger: RwLock<Option<TripEvidence>>,
    monitors: RwLock<Vec<PluginState>>,
    actions: RwLock<Vec<PluginState>>,
}

impl RigState {
    #[must_use]
    pub fn new(name: String, monitor_names: &[String], action_names: &[String]) -> Self {
        Self {
            name,
            pid: std::process::id(),
            started_at: Utc::now(),
            phase: RwLock::new(RigPhase::Initializing),
            trigger: RwLock::new(None),
            monitors: RwLock::new(
                monitor_names
                    .iter()
                    .map(|n| PluginState {
                        name: n.clone(),
                        state: "watching".into(),
                    })
                    .collect(),
            ),
            actions: RwLock::new(
                action_names
                    .iter()
                    .map(|n| PluginState {
                        name: n.clone(),
                        state: "armed".into(),
                    })
                    .collect(),
            ),
        }
    }

    pub fn set_phase(&self, phase: RigPhase) {
        *self.phase.write().expect("phase lock poisoned") = phase;
    }

    #[must_use]
    pub fn phase(&self) -> RigPhase {
        *self.phase.read().expect("phase lock poisoned")
    }

    /// Record the trigger source. Only the first call takes effect; at
    /// most one trigger source exists per rig.
    pub fn record_trigger(&self, evidence: TripEvidence) -> bool {
        let mut slot = self.trigger.write().expect("trigger lock poisoned");
        if slot.is_some() {
            return false;
        }
        *slot = Some(evidence);
        true
    }

    #[must_use]
    pub fn trigger(&self) -> Option<TripEvidence> {
        self.trigger.read().expect("trigger lock poisoned").clone()
    }

    pub fn set_monitor_state(&self, name: &str, state: &str) {
        let mut monitors = self.monitors.write().expect("monitor lock poisoned");
        if let Some(entry) = monitors.iter_mut().find(|m| m.name == name) {
            entry.state = state.to_string();
        }
    }

    pub fn set_action_state(&self, name: &str, state: &str) {
        let mut actions = self.actions.write().expect("action lock poisoned");
        if let Some(entry) = actions.iter_mut().find(|a| a.name == name) {
            entry.state = state.to_string();
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            name: self.name.clone(),
            pid: self.pid,
            phase: self.phase().label().to_string(),
            uptime_s: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            trigger_source: self.trigger(),
            monitors: self.monitors.read().expect("monitor lock poisoned").clone(),
            actions: self.actions.read().expect("action lock poisoned").clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RigState {
        RigState::new(
            "abcde".into(),
            &["logs".into()],
            &["noop".into(), "gcore".into()],
        )
    }

    #[test]
    fn trigger_is_write_once() {
        let s = state();
        assert!(s.record_trigger(TripEvidence::new("logs", "a", "first")));
        assert!(!s.record_trigger(TripEvidence::new("logs", "b", "second")));
        assert_eq!(s.trigger().unwrap().detail, "first");
    }

    #[test]
    fn status_reflects_phase_and_states() {
        let s = state();
        s.set_phase(RigPhase::Polling);
        s.set_monitor_state("logs", "tripped");
        s.set_action_state("noop", "done");

        let status = s.status();
        assert_eq!(status.phase, "polling");
        assert_eq!(status.monitors[0].state, "tripped");
        assert_eq!(status.actions[0].state, "done");
        assert_eq!(status.actions[1].state, "armed");
    }
}
