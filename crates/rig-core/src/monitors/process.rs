//! Process state and utilization monitor.
//!
//! Processes are named by PID or by command name; a name is resolved to
//! every matching PID at start and each instance is tracked
//! independently. The monitor trips as soon as any watched instance
//! meets a configured threshold or matches the state predicate.
//!
//! Percentages are computed over the sampling window between two polls;
//! `rss` and `vms` are absolute sizes. A watched PID that disappears is
//! an exit event for `state: "!running"` and a benign loss otherwise.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::adapters::procfs::{clock_ticks_per_sec, ProcError, ProcFs, ProcState};
use crate::config::OneOrMany;
use crate::error::{MonitorError, RigError};
use crate::monitor::{Monitor, TripEvidence};
use crate::units::{to_human, ByteSize};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ProcRef {
    Pid(i32),
    Name(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProcessOptions {
    procs: OneOrMany<ProcRef>,
    cpu_percent: Option<f64>,
    memory_percent: Option<f64>,
    rss: Option<ByteSize>,
    vms: Option<ByteSize>,
    state: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct StatePredicate {
    state: ProcState,
    inverted: bool,
}

impl StatePredicate {
    fn parse(spec: &str) -> Result<Self, RigError> {
        let (inverted, name) = match spec.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let state = ProcState::parse_name(name).ok_or_else(|| {
            RigError::config(format!(
                "process monitor: unknown state '{spec}', see man rig for supported values"
            ))
        })?;
        Ok(Self { state, inverted })
    }

    /// Whether an observed state satisfies the predicate.
    ///
    /// Default semantics trip when the process enters the named state.
    /// Inverted semantics trip when the observed state differs, except
    /// that `!running` tolerates `sleeping`: a healthy process spends
    /// most of its life asleep.
    fn matches(&self, observed: ProcState) -> bool {
        if self.inverted {
            if self.state == ProcState::Running && observed == ProcState::Sleeping {
                return false;
            }
            observed != self.state
        } else {
            observed == self.state
        }
    }

    /// `!running` also trips when the process exits outright.
    const fn trips_on_exit(&self) -> bool {
        self.inverted && matches!(self.state, ProcState::Running)
    }

    fn label(&self) -> String {
        format!(
            "{}{}",
            if self.inverted { "!" } else { "" },
            self.state.label()
        )
    }
}

struct Watched {
    pid: i32,
    /// "name/pid" for name-matched processes, bare pid otherwise.
    label: String,
    alive: bool,
    last_cpu: Option<(u64, Instant)>,
}

pub struct ProcessMonitor {
    procfs: ProcFs,
    refs: Vec<ProcRef>,
    watched: Vec<Watched>,
    cpu_percent: Option<f64>,
    memory_percent: Option<f64>,
    rss: Option<ByteSize>,
    vms: Option<ByteSize>,
    state: Option<StatePredicate>,
    mem_total: Option<u64>,
}

impl ProcessMonitor {
    pub fn from_options(options: &serde_yaml::Value) -> Result<Self, RigError> {
        Self::with_procfs(options, ProcFs::default())
    }

    fn with_procfs(options: &serde_yaml::Value, procfs: ProcFs) -> Result<Self, RigError> {
        let opts: ProcessOptions = serde_yaml::from_value(options.clone())
            .map_err(|e| RigError::config(format!("process monitor: {e}")))?;

        let state = opts.state.as_deref().map(StatePredicate::parse).transpose()?;

        if opts.cpu_percent.is_none()
            && opts.memory_percent.is_none()
            && opts.rss.is_none()
            && opts.vms.is_none()
            && state.is_none()
        {
            return Err(RigError::config(
                "process monitor: set at least one of cpu_percent, memory_percent, rss, vms, state",
            ));
        }

        let refs = opts.procs.into_vec();
        if refs.is_empty() {
            return Err(RigError::config("process monitor: 'procs' is empty"));
        }

        Ok(Self {
            procfs,
            refs,
            watched: Vec::new(),
            cpu_percent: opts.cpu_percent,
            memory_percent: opts.memory_percent,
            rss: opts.rss,
            vms: opts.vms,
            state,
            mem_total: None,
        })
    }

    fn check_thresholds(&self, watched: &Watched, sample: &crate::adapters::procfs::ProcSample, now: Instant) -> Option<TripEvidence> {
        if let Some(pred) = &self.state {
            if pred.matches(sample.state) {
                info!(
                    pid = watched.pid,
                    state = sample.state.label(),
                    "process state matches trigger"
                );
                return Some(TripEvidence::new(
                    "process",
                    &watched.label,
                    format!(
                        "state {} matches trigger '{}'",
                        sample.state.label(),
                        pred.label()
                    ),
                ));
            }
        }

        if let Some(threshold) = self.cpu_percent {
            if let Some((last_ticks, last_at)) = watched.last_cpu {
                let elapsed = now.duration_since(last_at).as_secs_f64();
                if elapsed > 0.0 {
                    let delta = sample.cpu_ticks.saturating_sub(last_ticks) as f64;
                    let pct = delta / clock_ticks_per_sec() as f64 / elapsed * 100.0;
                    if pct > threshold {
                        return Some(TripEvidence::new(
                            "process",
                            &watched.label,
                            format!("cpu {pct:.1}% exceeds {threshold}%"),
                        ));
                    }
                }
            }
        }

        if let (Some(threshold), Some(total)) = (self.memory_percent, self.mem_total) {
            let pct = sample.rss_bytes as f64 / total as f64 * 100.0;
            if pct > threshold {
                return Some(TripEvidence::new(
                    "process",
                    &watched.label,
                    format!("memory {pct:.1}% exceeds {threshold}%"),
                ));
            }
        }

        if let Some(limit) = self.rss {
            if sample.rss_bytes > limit.bytes() {
                return Some(TripEvidence::new(
                    "process",
                    &watched.label,
                    format!("rss {} exceeds {limit}", to_human(sample.rss_bytes)),
                ));
            }
        }

        if let Some(limit) = self.vms {
            if sample.vms_bytes > limit.bytes() {
                return Some(TripEvidence::new(
                    "process",
                    &watched.label,
                    format!("vms {} exceeds {limit}", to_human(sample.vms_bytes)),
                ));
            }
        }

        None
    }
}

#[async_trait]
impl Monitor for ProcessMonitor {
    async fn start(&mut self) -> Result<(), MonitorError> {
        for proc_ref in &self.refs {
            match proc_ref {
                ProcRef::Pid(pid) => {
                    if self.procfs.pid_exists(*pid) {
                        self.watched.push(Watched {
                            pid: *pid,
                            label: pid.to_string(),
                            alive: true,
                            last_cpu: None,
                        });
                    } else {
                        // Consistent with missing log files: a benign
                        // empty watch, not a configuration error.
                        warn!(pid, "watched PID not present at start");
                    }
                }
                ProcRef::Name(name) => {
                    let pids = self.procfs.pids_matching(name);
                    if pids.is_empty() {
                        warn!(name, "no processes match name at start");
                    }
                    for pid in pids {
                        self.watched.push(Watched {
                            pid,
                            label: format!("{name}/{pid}"),
                            alive: true,
                            last_cpu: None,
                        });
                    }
                }
            }
        }

        if self.memory_percent.is_some() {
            match self.procfs.mem_total() {
                Ok(total) => self.mem_total = Some(total),
                Err(e) => warn!(error = %e, "cannot read system memory total"),
            }
        }

        debug!(count = self.watched.len(), "process watch started");
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<TripEvidence>, MonitorError> {
        let now = Instant::now();
        let mut tripped = None;

        for i in 0..self.watched.len() {
            if !self.watched[i].alive {
                continue;
            }
            let pid = self.watched[i].pid;
            match self.procfs.sample(pid) {
                Ok(sample) => {
                    if tripped.is_none() {
                        tripped = self.check_thresholds(&self.watched[i], &sample, now);
                    }
                    self.watched[i].last_cpu = Some((sample.cpu_ticks, now));
                }
                Err(ProcError::Gone(_)) => {
                    self.watched[i].alive = false;
                    if let Some(pred) = &self.state {
                        if pred.trips_on_exit() && tripped.is_none() {
                            info!(pid, "watched process exited, matching '!running'");
                            tripped = Some(TripEvidence::new(
                                "process",
                                &self.watched[i].label,
                                "process no longer exists, matching trigger state '!running'",
                            ));
                            continue;
                        }
                    }
                    debug!(pid, "watched process disappeared, dropping from watch");
                }
                Err(e) => {
                    warn!(pid, error = %e, "process sample failed, will retry");
                }
            }
        }

        Ok(tripped)
    }

    fn describe(&self) -> String {
        let pids: Vec<String> = self.watched.iter().map(|w| w.label.clone()).collect();
        let mut parts = Vec::new();
        if let Some(p) = self.cpu_percent {
            parts.push(format!("cpu>{p}%"));
        }
        if let Some(p) = self.memory_percent {
            parts.push(format!("mem>{p}%"));
        }
        if let Some(s) = self.rss {
            parts.push(format!("rss>{s}"));
        }
        if let Some(s) = self.vms {
            parts.push(format!("vms>{s}"));
        }
        if let Some(pred) = &self.state {
            parts.push(format!("state={}", pred.label()));
        }
        format!("procs [{}] for {}", pids.join(", "), parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_proc(root: &std::path::Path, pid: i32, comm: &str, state: char, ticks: u64) {
        let dir = root.join(pid.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("stat"),
            format!(
                "{pid} ({comm}) {state} 1 1 1 0 -1 4194304 0 0 0 0 {ticks} 0 0 0 20 0 1 0 1 0 0"
            ),
        )
        .unwrap();
        std::fs::write(dir.join("statm"), "4096 1024 0 0 0 0 0\n").unwrap();
        std::fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
    }

    fn monitor(root: &std::path::Path, yaml: &str) -> ProcessMonitor {
        let opts = serde_yaml::from_str(yaml).unwrap();
        ProcessMonitor::with_procfs(&opts, ProcFs::with_root(root)).unwrap()
    }

    #[test]
    fn requires_a_threshold() {
        let opts = serde_yaml::from_str("procs: [1]").unwrap();
        assert!(ProcessMonitor::from_options(&opts).is_err());
    }

    #[test]
    fn rejects_unknown_state() {
        let opts = serde_yaml::from_str("procs: [1]\nstate: flying\n").unwrap();
        assert!(ProcessMonitor::from_options(&opts).is_err());
    }

    #[tokio::test]
    async fn name_matches_every_instance() {
        let root = tempfile::tempdir().unwrap();
        write_proc(root.path(), 10, "myd", 'S', 0);
        write_proc(root.path(), 11, "myd", 'S', 0);
        write_proc(root.path(), 12, "other", 'S', 0);

        let mut mon = monitor(root.path(), "procs: myd\nstate: zombie\n");
        mon.start().await.unwrap();
        assert_eq!(mon.watched.len(), 2);
    }

    #[tokio::test]
    async fn state_predicate_trips_on_entry() {
        let root = tempfile::tempdir().unwrap();
        write_proc(root.path(), 10, "myd", 'S', 0);

        let mut mon = monitor(root.path(), "procs: [10]\nstate: zombie\n");
        mon.start().await.unwrap();
        assert!(mon.poll().await.unwrap().is_none());

        write_proc(root.path(), 10, "myd", 'Z', 0);
        let trip = mon.poll().await.unwrap().expect("zombie should trip");
        assert!(trip.detail.contains("zombie"));
    }

    #[tokio::test]
    async fn not_running_tolerates_sleeping_but_trips_on_exit() {
        let root = tempfile::tempdir().unwrap();
        write_proc(root.path(), 10, "myd", 'S', 0);

        let mut mon = monitor(root.path(), "procs: [10]\nstate: \"!running\"\n");
        mon.start().await.unwrap();
        assert!(mon.poll().await.unwrap().is_none(), "sleeping must not trip");

        std::fs::remove_dir_all(root.path().join("10")).unwrap();
        let trip = mon.poll().await.unwrap().expect("exit should trip");
        assert!(trip.detail.contains("no longer exists"));
    }

    #[tokio::test]
    async fn vanished_pid_is_benign_without_not_running() {
        let root = tempfile::tempdir().unwrap();
        write_proc(root.path(), 10, "myd", 'S', 0);

        let mut mon = monitor(root.path(), "procs: [10]\nstate: zombie\n");
        mon.start().await.unwrap();
        std::fs::remove_dir_all(root.path().join("10")).unwrap();
        assert!(mon.poll().await.unwrap().is_none());
        // Dropped from the watch; further polls stay quiet.
        assert!(mon.poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rss_threshold_trips() {
        let root = tempfile::tempdir().unwrap();
        write_proc(root.path(), 10, "myd", 'S', 0);

        // statm reports 1024 resident pages; 1M is well below that.
        let mut mon = monitor(root.path(), "procs: [10]\nrss: 1M\n");
        mon.start().await.unwrap();
        let trip = mon.poll().await.unwrap().expect("rss should trip");
        assert!(trip.detail.contains("rss"));
    }

    #[tokio::test]
    async fn missing_name_is_benign() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path()).unwrap();
        let mut mon = monitor(root.path(), "procs: ghostd\nstate: zombie\n");
        mon.start().await.unwrap();
        assert!(mon.poll().await.unwrap().is_none());
    }
}
