//! Plugin registry.
//!
//! Fixed tables mapping stable plugin names to factories and, for
//! actions, their scheduling attributes. The tables are baked in at
//! build time; dynamic loading is deliberately not supported.

use serde_yaml::Value;

use crate::action::Action;
use crate::actions::{
    GcoreAction, KdumpAction, NoopAction, SosAction, TcpdumpAction, WatchAction,
};
use crate::error::RigError;
use crate::monitor::Monitor;
use crate::monitors::{FilesystemMonitor, LogsMonitor, ProcessMonitor};

type MonitorFactory = fn(&Value) -> Result<Box<dyn Monitor>, RigError>;
type ActionFactory = fn(&Value) -> Result<Box<dyn Action>, RigError>;

pub struct MonitorSpec {
    pub name: &'static str,
    build: MonitorFactory,
}

pub struct ActionSpec {
    pub name: &'static str,
    /// Post-trigger execution weight; lower runs earlier.
    pub priority: u32,
    /// Starts at deployment and is stopped at trigger time.
    pub pre_trigger: bool,
    /// Honors the rig-wide `repeat` count.
    pub repeatable: bool,
    /// A failure takes the whole rig down rather than being skipped.
    pub fatal_on_error: bool,
    /// Preempts normal cleanup (the host will not come back); the
    /// supervisor tears the control socket down before running it.
    pub preempts_cleanup: bool,
    build: ActionFactory,
}

macro_rules! monitor_factory {
    ($ty:ty) => {
        |options| Ok(Box::new(<$ty>::from_options(options)?) as Box<dyn Monitor>)
    };
}

macro_rules! action_factory {
    ($ty:ty) => {
        |options| Ok(Box::new(<$ty>::from_options(options)?) as Box<dyn Action>)
    };
}

static MONITORS: &[MonitorSpec] = &[
    MonitorSpec {
        name: "logs",
        build: monitor_factory!(LogsMonitor),
    },
    MonitorSpec {
        name: "process",
        build: monitor_factory!(ProcessMonitor),
    },
    MonitorSpec {
        name: "filesystem",
        build: monitor_factory!(FilesystemMonitor),
    },
];

static ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: "gcore",
        priority: 10,
        pre_trigger: false,
        repeatable: true,
        fatal_on_error: false,
        preempts_cleanup: false,
        build: action_factory!(GcoreAction),
    },
    ActionSpec {
        name: "tcpdump",
        priority: 20,
        pre_trigger: true,
        repeatable: false,
        fatal_on_error: false,
        preempts_cleanup: false,
        build: action_factory!(TcpdumpAction),
    },
    ActionSpec {
        name: "watch",
        priority: 20,
        pre_trigger: true,
        repeatable: false,
        fatal_on_error: false,
        preempts_cleanup: false,
        build: action_factory!(WatchAction),
    },
    ActionSpec {
        name: "sos",
        priority: 50,
        pre_trigger: false,
        repeatable: false,
        fatal_on_error: false,
        preempts_cleanup: false,
        build: action_factory!(SosAction),
    },
    ActionSpec {
        name: "noop",
        priority: 90,
        pre_trigger: false,
        repeatable: false,
        fatal_on_error: false,
        preempts_cleanup: false,
        build: action_factory!(NoopAction),
    },
    ActionSpec {
        name: "kdump",
        priority: 100,
        pre_trigger: false,
        repeatable: false,
        fatal_on_error: true,
        preempts_cleanup: true,
        build: action_factory!(KdumpAction),
    },
];

/// A configured monitor plus its bookkeeping state.
pub struct MonitorInstance {
    pub name: String,
    pub inner: Box<dyn Monitor>,
}

impl std::fmt::Debug for MonitorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorInstance")
            .field("name", &self.name)
            .finish()
    }
}

/// A configured action plus its scheduling attributes.
pub struct ActionInstance {
    pub name: String,
    pub priority: u32,
    pub config_index: usize,
    pub pre_trigger: bool,
    pub repeatable: bool,
    pub fatal_on_error: bool,
    pub preempts_cleanup: bool,
    pub inner: Box<dyn Action>,
}

impl std::fmt::Debug for ActionInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionInstance")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("config_index", &self.config_index)
            .field("pre_trigger", &self.pre_trigger)
            .field("repeatable", &self.repeatable)
            .field("fatal_on_error", &self.fatal_on_error)
            .field("preempts_cleanup", &self.preempts_cleanup)
            .finish()
    }
}

fn monitor_spec(name: &str) -> Option<&'static MonitorSpec> {
    MONITORS.iter().find(|s| s.name == name)
}

fn action_spec(name: &str) -> Option<&'static ActionSpec> {
    ACTIONS.iter().find(|s| s.name == name)
}

/// Names of all registered monitors, for error messages.
pub fn monitor_names() -> Vec<&'static str> {
    MONITORS.iter().map(|s| s.name).collect()
}

/// Names of all registered actions.
pub fn action_names() -> Vec<&'static str> {
    ACTIONS.iter().map(|s| s.name).collect()
}

/// An omitted option block (`noop:`) arrives as null; treat it as empty.
fn normalize(options: &Value) -> Value {
    match options {
        Value::Null => Value::Mapping(serde_yaml::Mapping::new()),
        other => other.clone(),
    }
}

/// Build every monitor named in the rigfile mapping, preserving order.
pub fn build_monitors(mapping: &serde_yaml::Mapping) -> Result<Vec<MonitorInstance>, RigError> {
    let mut instances = Vec::new();
    for (key, options) in mapping {
        let name = key
            .as_str()
            .ok_or_else(|| RigError::config("monitor names must be strings"))?;
        let spec = monitor_spec(name).ok_or_else(|| {
            RigError::config(format!(
                "unknown monitor '{name}' (available: {})",
                monitor_names().join(", ")
            ))
        })?;
        instances.push(MonitorInstance {
            name: name.to_string(),
            inner: (spec.build)(&normalize(options))?,
        });
    }
    Ok(instances)
}

/// Build every action named in the rigfile mapping, sorted into
/// execution order: priority ascending, rigfile order breaking ties.
/// The sort is stable, so the result is deterministic regardless of how
/// the mapping was keyed.
pub fn build_actions(mapping: &serde_yaml::Mapping) -> Result<Vec<ActionInstance>, RigError> {
    let mut instances = Vec::new();
    for (config_index, (key, options)) in mapping.iter().enumerate() {
        let name = key
            .as_str()
            .ok_or_else(|| RigError::config("action names must be strings"))?;
        let spec = action_spec(name).ok_or_else(|| {
            RigError::config(format!(
                "unknown action '{name}' (available: {})",
                action_names().join(", ")
            ))
        })?;
        instances.push(ActionInstance {
            name: name.to_string(),
            priority: spec.priority,
            config_index,
            pre_trigger: spec.pre_trigger,
            repeatable: spec.repeatable,
            fatal_on_error: spec.fatal_on_error,
            preempts_cleanup: spec.preempts_cleanup,
            inner: (spec.build)(&normalize(options))?,
        });
    }
    instances.sort_by_key(|a| (a.priority, a.config_index));
    Ok(instances)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(yaml: &str) -> serde_yaml::Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn unknown_monitor_is_rejected() {
        let err = build_monitors(&mapping("cpu: {}")).unwrap_err();
        assert!(err.to_string().contains("unknown monitor 'cpu'"));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = build_actions(&mapping("reboot: {}")).unwrap_err();
        assert!(err.to_string().contains("unknown action 'reboot'"));
    }

    #[test]
    fn actions_sort_by_weight_then_config_order() {
        let actions = build_actions(&mapping(
            "kdump: {}\nnoop: {}\ngcore:\n  procs: [1]\n",
        ))
        .unwrap();
        let order: Vec<&str> = actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(order, ["gcore", "noop", "kdump"]);
    }

    #[test]
    fn equal_weights_keep_config_order() {
        let actions = build_actions(&mapping(
            "watch:\n  files: [{path: /proc/vmstat}]\ntcpdump:\n  interface: any\n",
        ))
        .unwrap();
        let order: Vec<&str> = actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(order, ["watch", "tcpdump"]);
    }

    #[test]
    fn null_option_block_builds() {
        let monitors = build_monitors(&mapping("logs:\n  message: x\n")).unwrap();
        assert_eq!(monitors.len(), 1);
        let actions = build_actions(&mapping("noop:\n")).unwrap();
        assert_eq!(actions[0].name, "noop");
        assert_eq!(actions[0].priority, 90);
    }

    #[test]
    fn kdump_flags_are_set() {
        let actions = build_actions(&mapping("kdump: {}")).unwrap();
        assert!(actions[0].fatal_on_error);
        assert!(actions[0].preempts_cleanup);
        assert!(!actions[0].pre_trigger);
    }
}
