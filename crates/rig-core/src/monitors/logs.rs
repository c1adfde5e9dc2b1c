//! Log message monitor.
//!
//! Watches log files and/or the system journal for lines matching a
//! regular expression. Matches are counted across every watched source
//! combined; the monitor trips when the counter reaches `count`.
//!
//! Files are positioned at end-of-file on start, so only messages logged
//! after deployment count. The pattern is matched at the start of each
//! line, case-insensitively.

use std::path::PathBuf;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::adapters::journal::JournalTail;
use crate::adapters::tail::LogTail;
use crate::config::OneOrMany;
use crate::error::{MonitorError, RigError};
use crate::monitor::{Monitor, TripEvidence};

const DEFAULT_LOG_FILE: &str = "/var/log/messages";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogsOptions {
    /// Regular expression to match against new log lines.
    message: String,
    /// Total matches, across all sources, required to trip.
    #[serde(default = "default_count")]
    count: u64,
    /// Files to watch. Defaults to the system log; explicit null disables
    /// file watching.
    #[serde(default = "default_files")]
    files: Option<OneOrMany<String>>,
    /// Journal units to watch. Defaults to the whole journal; explicit
    /// null disables journal watching.
    #[serde(default = "default_journals")]
    journals: Option<OneOrMany<String>>,
}

fn default_count() -> u64 {
    1
}

fn default_files() -> Option<OneOrMany<String>> {
    Some(OneOrMany::One(DEFAULT_LOG_FILE.to_string()))
}

fn default_journals() -> Option<OneOrMany<String>> {
    // Empty unit list means the entire journal.
    Some(OneOrMany::Many(Vec::new()))
}

pub struct LogsMonitor {
    pattern: Regex,
    pattern_text: String,
    count: u64,
    matched: u64,
    files: Vec<PathBuf>,
    tails: Vec<LogTail>,
    journal: Option<JournalTail>,
}

impl LogsMonitor {
    pub fn from_options(options: &serde_yaml::Value) -> Result<Self, RigError> {
        let opts: LogsOptions = serde_yaml::from_value(options.clone())
            .map_err(|e| RigError::config(format!("logs monitor: {e}")))?;

        if opts.count == 0 {
            return Err(RigError::config("logs monitor: 'count' must be >= 1"));
        }

        // Anchored at line start, like the original matcher; ".*boom"
        // gets substring semantics when wanted.
        let pattern = RegexBuilder::new(&format!("^(?:{})", opts.message))
            .case_insensitive(true)
            .build()
            .map_err(|e| {
                RigError::config(format!(
                    "logs monitor: 'message' is not a valid regular expression: {e}"
                ))
            })?;

        let files: Vec<PathBuf> = opts
            .files
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect();

        let journal = opts
            .journals
            .map(|units| JournalTail::new(units.into_vec()));

        if journal.is_none() && files.is_empty() {
            return Err(RigError::config(
                "logs monitor: both 'files' and 'journals' are disabled",
            ));
        }

        Ok(Self {
            pattern,
            pattern_text: opts.message,
            count: opts.count,
            matched: 0,
            files,
            tails: Vec::new(),
            journal,
        })
    }

    fn match_lines(&mut self, source: &str, lines: &[String]) -> Option<TripEvidence> {
        for line in lines {
            if self.pattern.is_match(line.trim()) {
                self.matched += 1;
                debug!(
                    source,
                    matched = self.matched,
                    needed = self.count,
                    "log line matched pattern"
                );
                if self.matched >= self.count {
                    info!(source, line = line.trim(), "log match threshold reached");
                    return Some(TripEvidence::new(
                        "logs",
                        source,
                        format!("matched '{}': \"{}\"", self.pattern_text, line.trim()),
                    ));
                }
            }
        }
        None
    }
}

#[async_trait]
impl Monitor for LogsMonitor {
    async fn start(&mut self) -> Result<(), MonitorError> {
        for path in &self.files {
            match LogTail::open(path) {
                Ok(tail) => self.tails.push(tail),
                // Missing files are not a configuration error; they may
                // appear later under rotation, but we do not wait for them.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "log file absent at start, ignoring");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot open log file, ignoring");
                }
            }
        }
        if let Some(journal) = &mut self.journal {
            journal.seek_tail().await;
        }
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<TripEvidence>, MonitorError> {
        for i in 0..self.tails.len() {
            let source = self.tails[i].path().display().to_string();
            let lines = match self.tails[i].drain() {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(source, error = %e, "log read failed, will retry");
                    continue;
                }
            };
            if let Some(evidence) = self.match_lines(&source, &lines) {
                return Ok(Some(evidence));
            }
        }

        if let Some(journal) = &mut self.journal {
            let lines = journal.drain().await;
            if let Some(evidence) = self.match_lines("journal", &lines) {
                return Ok(Some(evidence));
            }
        }

        Ok(None)
    }

    fn describe(&self) -> String {
        let mut sources: Vec<String> = self
            .files
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        if self.journal.is_some() {
            sources.push("journal".to_string());
        }
        format!(
            "'{}' x{} in {}",
            self.pattern_text,
            self.count,
            sources.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(yaml: &str) -> serde_yaml::Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn file_only_monitor(path: &std::path::Path, yaml_extra: &str) -> LogsMonitor {
        let yaml = format!(
            "message: boom\nfiles: {}\njournals: null\n{yaml_extra}",
            path.display()
        );
        LogsMonitor::from_options(&options(&yaml)).unwrap()
    }

    #[tokio::test]
    async fn trips_on_matching_line_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, "boom before start\n").unwrap();

        let mut mon = file_only_monitor(&path, "");
        mon.start().await.unwrap();

        // Pre-existing content is behind the tail position.
        assert!(mon.poll().await.unwrap().is_none());

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        use std::io::Write;
        writeln!(f, "preboom").unwrap();
        writeln!(f, "boom occurred").unwrap();
        drop(f);

        let evidence = mon.poll().await.unwrap().expect("should trip");
        assert_eq!(evidence.monitor, "logs");
        assert!(evidence.detail.contains("boom occurred"));
    }

    #[tokio::test]
    async fn count_spans_polls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, "").unwrap();

        let mut mon = file_only_monitor(&path, "count: 3");
        mon.start().await.unwrap();

        use std::io::Write;
        for round in 0..3 {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "boom {round}").unwrap();
            drop(f);
            let tripped = mon.poll().await.unwrap();
            if round < 2 {
                assert!(tripped.is_none(), "tripped early on round {round}");
            } else {
                assert!(tripped.is_some());
            }
        }
    }

    #[tokio::test]
    async fn missing_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.log");
        let mut mon = file_only_monitor(&path, "");
        mon.start().await.unwrap();
        assert!(mon.poll().await.unwrap().is_none());
    }

    #[test]
    fn invalid_regex_is_a_config_error() {
        let opts = options("message: '['\njournals: null\n");
        assert!(LogsMonitor::from_options(&opts).is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let opts = options("message: x\nglob: true\n");
        assert!(LogsMonitor::from_options(&opts).is_err());
    }

    #[test]
    fn disabling_all_sources_is_rejected() {
        let opts = options("message: boom\njournals: null\nfiles: null\n");
        assert!(LogsMonitor::from_options(&opts).is_err());
    }

    #[tokio::test]
    async fn match_is_anchored_at_line_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, "").unwrap();

        let mut mon = file_only_monitor(&path, "");
        mon.start().await.unwrap();

        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "preboom").unwrap();
        drop(f);
        assert!(mon.poll().await.unwrap().is_none());
    }
}
