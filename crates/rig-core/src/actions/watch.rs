//! Periodic file and command sampling for the life of the rig.
//!
//! Each watched file or command gets its own sampler task that appends a
//! timestamped record to its output file at every rig interval, starting
//! with one sample at deployment. Samplers run until the rig triggers
//! (plus any configured delay, which the supervisor waits out before
//! stopping pre-trigger actions).
//!
//! `use_standard_set` expands to the fixed inventory of networking files
//! and commands carried over from the support monitor.sh script.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::action::{sanitize_filename, timestamp_header, Action, ActionContext, STOP_GRACE};
use crate::adapters::cmd::{binary_exists, run_captured, split_command};
use crate::error::{ActionError, RigError};

const STANDARD_FILES: &[(&str, &str)] = &[
    ("/proc/interrupts", "interrupts"),
    ("/proc/vmstat", "vmstat"),
    ("/proc/net/softnet_stat", "softnet_stat"),
    ("/proc/softirqs", "softirqs"),
    ("/proc/net/sockstat", "sockstat"),
    ("/proc/net/sockstat6", "sockstat6"),
    ("/proc/net/dev", "netdev"),
    ("/proc/net/sctp/assocs", "sctp_assocs"),
    ("/proc/net/sctp/snmp", "sctp_snmp"),
];

const STANDARD_COMMANDS: &[&str] = &[
    "netstat -s",
    "nstat -az",
    "ss -noemitaup",
    "ps -alfe",
    "top -c -b -n 1",
    "numastat",
    "ip neigh show",
    "tc -s qdisc",
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WatchFileSpec {
    path: String,
    /// Output filename within the archive; defaults to the basename.
    dest: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WatchOptions {
    #[serde(default)]
    files: Vec<WatchFileSpec>,
    #[serde(default)]
    commands: Vec<String>,
    #[serde(default)]
    use_standard_set: bool,
}

#[derive(Debug, Clone)]
enum Collector {
    File { src: PathBuf, dest: String },
    Cmd { argv: Vec<String>, dest: String },
}

pub struct WatchAction {
    collectors: Vec<Collector>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl WatchAction {
    pub fn from_options(options: &serde_yaml::Value) -> Result<Self, RigError> {
        let opts: WatchOptions = serde_yaml::from_value(options.clone())
            .map_err(|e| RigError::config(format!("watch action: {e}")))?;

        let mut collectors = Vec::new();

        for file in &opts.files {
            let dest = match &file.dest {
                Some(d) => d.replace('/', "_"),
                None => file
                    .path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&file.path)
                    .to_string(),
            };
            collectors.push(Collector::File {
                src: PathBuf::from(&file.path),
                dest,
            });
        }

        for cmd in &opts.commands {
            let argv = split_command(cmd);
            let Some(bin) = argv.first() else {
                return Err(RigError::config("watch action: empty command"));
            };
            if !binary_exists(bin) {
                return Err(RigError::config(format!(
                    "watch action: cannot watch command '{cmd}': command not found"
                )));
            }
            collectors.push(Collector::Cmd {
                argv,
                dest: sanitize_filename(cmd),
            });
        }

        if opts.use_standard_set {
            debug!("standard set requested, adding monitor.sh inventory");
            for (path, dest) in STANDARD_FILES {
                collectors.push(Collector::File {
                    src: PathBuf::from(path),
                    dest: (*dest).to_string(),
                });
            }
            for cmd in STANDARD_COMMANDS {
                let argv = split_command(cmd);
                if !binary_exists(&argv[0]) {
                    debug!(command = argv[0], "not found locally, skipping from standard set");
                    continue;
                }
                collectors.push(Collector::Cmd {
                    argv,
                    dest: sanitize_filename(cmd),
                });
            }
        }

        if collectors.is_empty() {
            return Err(RigError::config(
                "watch action: no valid files or commands to watch provided",
            ));
        }

        Ok(Self {
            collectors,
            token: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    #[cfg(test)]
    fn collector_count(&self) -> usize {
        self.collectors.len()
    }
}

async fn collect_once(collector: &Collector, out: &std::path::Path, interval: Duration) {
    let content = match collector {
        Collector::File { src, .. } => match std::fs::read_to_string(src) {
            Ok(text) => text,
            Err(e) => format!("unable to copy contents of {}: {e}", src.display()),
        },
        Collector::Cmd { argv, .. } => {
            let timeout = Duration::from_secs((interval.as_secs() / 2).max(1));
            match run_captured(argv, timeout).await {
                Ok(res) if res.stderr.is_empty() => res.stdout,
                Ok(res) => format!("{}{}", res.stdout, res.stderr),
                Err(e) => format!("could not collect command output: {e}"),
            }
        }
    };

    let record = format!("{}\n{content}\n", timestamp_header(chrono::Local::now()));
    let appended = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(out)
        .and_then(|mut f| {
            use std::io::Write;
            f.write_all(record.as_bytes())
        });
    if let Err(e) = appended {
        warn!(out = %out.display(), error = %e, "sampler write failed");
    }
}

#[async_trait]
impl Action for WatchAction {
    async fn pre_start(&mut self, ctx: &ActionContext) -> Result<(), ActionError> {
        for collector in self.collectors.drain(..) {
            let out = match &collector {
                Collector::File { dest, .. } | Collector::Cmd { dest, .. } => ctx.out_path(dest),
            };
            let token = self.token.clone();
            let interval = ctx.interval;
            debug!(out = %out.display(), "starting periodic collector");
            self.tasks.push(tokio::spawn(async move {
                loop {
                    collect_once(&collector, &out, interval).await;
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(interval) => {}
                    }
                }
            }));
        }
        Ok(())
    }

    async fn run(&mut self, _ctx: &ActionContext) -> Result<(), ActionError> {
        // Sampling output is already accumulating in the working
        // directory.
        Ok(())
    }

    async fn stop(&mut self, _ctx: &ActionContext) -> Result<(), ActionError> {
        self.token.cancel();
        for task in self.tasks.drain(..) {
            if tokio::time::timeout(STOP_GRACE, task).await.is_err() {
                warn!("sampler did not stop within grace window");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &std::path::Path, interval: Duration) -> ActionContext {
        ActionContext {
            rig_name: "test".into(),
            workdir: dir.to_path_buf(),
            interval,
        }
    }

    #[test]
    fn requires_something_to_watch() {
        let opts = serde_yaml::from_str("{}").unwrap();
        assert!(WatchAction::from_options(&opts).is_err());
    }

    #[test]
    fn unknown_command_is_a_config_error() {
        let opts =
            serde_yaml::from_str("commands: [definitely-not-a-binary-xyz arg]").unwrap();
        assert!(WatchAction::from_options(&opts).is_err());
    }

    #[test]
    fn dest_defaults_to_basename() {
        let opts = serde_yaml::from_str("files:\n  - path: /proc/vmstat\n").unwrap();
        let action = WatchAction::from_options(&opts).unwrap();
        assert_eq!(action.collector_count(), 1);
    }

    #[test]
    fn standard_set_expands() {
        let opts = serde_yaml::from_str("use_standard_set: true").unwrap();
        let action = WatchAction::from_options(&opts).unwrap();
        assert!(action.collector_count() >= STANDARD_FILES.len());
    }

    #[tokio::test]
    async fn samples_accumulate_until_stop() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("watched.txt");
        std::fs::write(&src, "payload\n").unwrap();

        let yaml = format!("files:\n  - path: {}\n    dest: out.txt\n", src.display());
        let opts = serde_yaml::from_str(&yaml).unwrap();
        let mut action = WatchAction::from_options(&opts).unwrap();

        let ctx = ctx(dir.path(), Duration::from_millis(50));
        action.pre_start(&ctx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(140)).await;
        action.stop(&ctx).await.unwrap();

        let out = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        let records = out.matches("====").count() / 2;
        assert!(records >= 2, "expected >=2 records, got {records}:\n{out}");
        assert!(out.contains("payload"));

        // No further records after stop.
        tokio::time::sleep(Duration::from_millis(120)).await;
        let after = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(out, after);
    }
}
