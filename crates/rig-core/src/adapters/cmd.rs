//! Subprocess execution with captured output.
//!
//! Collectors shell out to host binaries (`gcore`, `tcpdump`, `sos`,
//! `journalctl`, ...). This helper runs one command without a shell,
//! captures both output streams, and enforces a timeout. Arguments are
//! split on whitespace only; no shell metacharacters are interpreted.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Default ceiling for a captured command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Outcome of a captured command.
#[derive(Debug)]
pub struct CmdOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run `argv` and capture its output, killing it at `timeout`.
///
/// Returns `Err` for spawn failures (missing binary) and timeouts; a
/// nonzero exit is reported through [`CmdOutput::status`], not as an
/// error.
pub async fn run_captured(argv: &[String], timeout: Duration) -> Result<CmdOutput, String> {
    let (bin, args) = argv
        .split_first()
        .ok_or_else(|| "empty command".to_string())?;

    let mut child = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("cannot spawn {bin}: {e}"))?;

    let waited = tokio::time::timeout(timeout, child.wait_with_output()).await;

    match waited {
        Ok(Ok(out)) => Ok(CmdOutput {
            status: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(format!("error waiting for {bin}: {e}")),
        Err(_) => Err(format!("{bin} timed out after {}s", timeout.as_secs())),
    }
}

/// Split a command line on whitespace into argv form.
#[must_use]
pub fn split_command(cmd: &str) -> Vec<String> {
    cmd.split_whitespace().map(str::to_string).collect()
}

/// Whether `binary` resolves through `PATH` or is an existing path.
#[must_use]
pub fn binary_exists(binary: &str) -> bool {
    if binary.contains('/') {
        return is_executable(&PathBuf::from(binary));
    }
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(binary)))
        })
        .unwrap_or(false)
}

fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
