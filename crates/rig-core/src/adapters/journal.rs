//! System journal tailing via `journalctl` cursors.
//!
//! The journal is positioned at its tail when the rig deploys; each poll
//! asks `journalctl` for entries after the stored cursor and advances the
//! cursor from the `-- cursor:` trailer it prints with `--show-cursor`.
//! An empty unit list reads the entire journal.

use std::time::Duration;

use tracing::{debug, warn};

use super::cmd::{run_captured, CmdOutput};

const JOURNALCTL: &str = "journalctl";
const CURSOR_PREFIX: &str = "-- cursor:";

/// Ceiling for one journalctl invocation; a hung journal must not wedge
/// the polling loop.
const POLL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct JournalTail {
    units: Vec<String>,
    cursor: Option<String>,
    /// Set when journalctl is unusable on this host; the tail then yields
    /// nothing rather than erroring every tick.
    disabled: bool,
}

impl JournalTail {
    /// Create a tail over the given units (empty = whole journal).
    #[must_use]
    pub fn new(units: Vec<String>) -> Self {
        Self {
            units,
            cursor: None,
            disabled: false,
        }
    }

    /// Position at the current journal tail.
    pub async fn seek_tail(&mut self) {
        let mut argv = self.base_argv();
        argv.extend(["-n".into(), "0".into(), "--show-cursor".into()]);
        match run_captured(&argv, POLL_TIMEOUT).await {
            Ok(out) if out.success() => {
                self.cursor = parse_cursor(&out);
                if self.cursor.is_none() {
                    // Empty journal: first poll falls back to "everything
                    // from now", bounded by the tick that follows.
                    debug!("journal tail returned no cursor, starting empty");
                }
            }
            Ok(out) => {
                warn!(stderr = %out.stderr.trim(), "journalctl unusable, disabling journal watch");
                self.disabled = true;
            }
            Err(e) => {
                warn!(error = %e, "journalctl unavailable, disabling journal watch");
                self.disabled = true;
            }
        }
    }

    /// Drain journal lines appended since the last poll.
    pub async fn drain(&mut self) -> Vec<String> {
        if self.disabled {
            return Vec::new();
        }
        let mut argv = self.base_argv();
        match &self.cursor {
            Some(c) => argv.push(format!("--after-cursor={c}")),
            None => argv.extend(["-n".into(), "0".into()]),
        }
        argv.push("--show-cursor".into());

        match run_captured(&argv, POLL_TIMEOUT).await {
            Ok(out) if out.success() => {
                if let Some(cursor) = parse_cursor(&out) {
                    self.cursor = Some(cursor);
                }
                out.stdout
                    .lines()
                    .filter(|l| !l.starts_with(CURSOR_PREFIX) && !l.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            Ok(out) => {
                warn!(stderr = %out.stderr.trim(), "journalctl poll failed");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "journalctl poll failed");
                Vec::new()
            }
        }
    }

    fn base_argv(&self) -> Vec<String> {
        let mut argv = vec![JOURNALCTL.into(), "-q".into(), "-o".into(), "cat".into()];
        for unit in &self.units {
            argv.push("-u".into());
            // Bare unit names refer to services, as systemd tooling does.
            if unit.contains('.') {
                argv.push(unit.clone());
            } else {
                argv.push(format!("{unit}.service"));
            }
        }
        argv
    }
}

fn parse_cursor(out: &CmdOutput) -> Option<String> {
    out.stdout
        .lines()
        .rev()
        .find(|l| l.starts_with(CURSOR_PREFIX))
        .map(|l| l[CURSOR_PREFIX.len()..].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_parses_from_trailer() {
        let out = CmdOutput {
            status: 0,
            stdout: "line one\nline two\n-- cursor: s=abc;i=123\n".into(),
            stderr: String::new(),
        };
        assert_eq!(parse_cursor(&out).as_deref(), Some("s=abc;i=123"));
    }

    #[test]
    fn unit_names_gain_service_suffix() {
        let tail = JournalTail::new(vec!["myd".into(), "cron.timer".into()]);
        let argv = tail.base_argv();
        assert!(argv.contains(&"myd.service".to_string()));
        assert!(argv.contains(&"cron.timer".to_string()));
    }
}
