//! Process sampling from `/proc`.
//!
//! Reads `/proc/<pid>/stat` and `/proc/<pid>/statm` to expose the state,
//! accumulated CPU ticks, and memory footprint of a watched process, plus
//! `/proc/meminfo` for system memory and a comm-based name scan for
//! resolving process names to PIDs.
//!
//! The proc root is a parameter so tests can point the sampler at a
//! synthetic tree.

use std::path::PathBuf;
use std::sync::OnceLock;

use thiserror::Error;

/// Runtime-queried system page size.
fn page_size() -> u64 {
    static PAGE_SIZE: OnceLock<u64> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf reads system configuration without touching any
        // process state; _SC_PAGESIZE is valid on all POSIX systems.
        let result = unsafe { nix::libc::sysconf(nix::libc::_SC_PAGESIZE) };
        if result > 0 {
            result as u64
        } else {
            4096
        }
    })
}

/// Runtime-queried clock ticks per second (USER_HZ).
pub fn clock_ticks_per_sec() -> u64 {
    static CLK_TCK: OnceLock<u64> = OnceLock::new();
    *CLK_TCK.get_or_init(|| {
        // SAFETY: same contract as page_size() above.
        let result = unsafe { nix::libc::sysconf(nix::libc::_SC_CLK_TCK) };
        if result > 0 {
            result as u64
        } else {
            100
        }
    })
}

#[derive(Debug, Error)]
pub enum ProcError {
    /// The process is no longer present.
    #[error("process {0} is gone")]
    Gone(i32),

    #[error("unparseable {file}: {detail}")]
    Parse { file: String, detail: String },

    #[error("proc read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Scheduler state of a process, from the third `stat` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Running,
    Sleeping,
    DiskSleep,
    Stopped,
    Zombie,
    Other(char),
}

impl ProcState {
    #[must_use]
    pub fn from_code(code: char) -> Self {
        match code {
            'R' => Self::Running,
            'S' => Self::Sleeping,
            'D' => Self::DiskSleep,
            'T' | 't' => Self::Stopped,
            'Z' => Self::Zombie,
            other => Self::Other(other),
        }
    }

    /// Parse the symbolic spellings accepted in rigfiles. Both the long
    /// names and the kernel short codes are accepted.
    #[must_use]
    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "running" | "run" | "R" => Some(Self::Running),
            "sleeping" | "sleep" | "S" => Some(Self::Sleeping),
            "disk-sleep" | "disk_sleep" | "uninterruptible" | "uninterruptible_sleep" | "D"
            | "UN" => Some(Self::DiskSleep),
            "stopped" | "stop" | "T" => Some(Self::Stopped),
            "zombie" | "Z" => Some(Self::Zombie),
            _ => None,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::DiskSleep => "disk-sleep",
            Self::Stopped => "stopped",
            Self::Zombie => "zombie",
            Self::Other(_) => "other",
        }
    }
}

/// One observation of a process.
#[derive(Debug, Clone)]
pub struct ProcSample {
    pub pid: i32,
    pub comm: String,
    pub state: ProcState,
    /// utime + stime, in clock ticks.
    pub cpu_ticks: u64,
    pub rss_bytes: u64,
    pub vms_bytes: u64,
}

/// Sampler over a proc filesystem root.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/proc"),
        }
    }
}

impl ProcFs {
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Take one sample of `pid`.
    pub fn sample(&self, pid: i32) -> Result<ProcSample, ProcError> {
        let dir = self.root.join(pid.to_string());

        let stat = match std::fs::read_to_string(dir.join("stat")) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProcError::Gone(pid))
            }
            Err(e) => return Err(e.into()),
        };
        let (comm, state, cpu_ticks) = parse_stat(&stat)?;

        // statm may vanish between the two reads if the process exits.
        let statm = match std::fs::read_to_string(dir.join("statm")) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProcError::Gone(pid))
            }
            Err(e) => return Err(e.into()),
        };
        let (vms_pages, rss_pages) = parse_statm(&statm)?;

        Ok(ProcSample {
            pid,
            comm,
            state,
            cpu_ticks,
            rss_bytes: rss_pages * page_size(),
            vms_bytes: vms_pages * page_size(),
        })
    }

    /// Whether a PID directory still exists.
    #[must_use]
    pub fn pid_exists(&self, pid: i32) -> bool {
        self.root.join(pid.to_string()).exists()
    }

    /// All PIDs whose `comm` equals `name`.
    #[must_use]
    pub fn pids_matching(&self, name: &str) -> Vec<i32> {
        let mut pids = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return pids;
        };
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<i32>().ok())
            else {
                continue;
            };
            if let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) {
                if comm.trim_end() == name {
                    pids.push(pid);
                }
            }
        }
        pids.sort_unstable();
        pids
    }

    /// Total system memory in bytes, from `/proc/meminfo`.
    pub fn mem_total(&self) -> Result<u64, ProcError> {
        let meminfo = std::fs::read_to_string(self.root.join("meminfo"))?;
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                let kb: u64 = rest
                    .trim()
                    .trim_end_matches("kB")
                    .trim()
                    .parse()
                    .map_err(|_| ProcError::Parse {
                        file: "meminfo".into(),
                        detail: format!("bad MemTotal line: {line}"),
                    })?;
                return Ok(kb * 1024);
            }
        }
        Err(ProcError::Parse {
            file: "meminfo".into(),
            detail: "MemTotal not present".into(),
        })
    }
}

/// Parse `/proc/<pid>/stat`: comm (may contain spaces and parens), state,
/// utime+stime. Fields after the comm are located relative to the last
/// closing paren.
fn parse_stat(stat: &str) -> Result<(String, ProcState, u64), ProcError> {
    let parse_err = |detail: &str| ProcError::Parse {
        file: "stat".into(),
        detail: detail.into(),
    };

    let open = stat.find('(').ok_or_else(|| parse_err("no comm"))?;
    let close = stat.rfind(')').ok_or_else(|| parse_err("no comm"))?;
    let comm = stat[open + 1..close].to_string();

    let rest: Vec<&str> = stat[close + 1..].split_whitespace().collect();
    // rest[0] is the state (overall field 3); utime and stime are overall
    // fields 14 and 15.
    let state_code = rest
        .first()
        .and_then(|s| s.chars().next())
        .ok_or_else(|| parse_err("missing state"))?;
    let utime: u64 = rest
        .get(11)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| parse_err("missing utime"))?;
    let stime: u64 = rest
        .get(12)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| parse_err("missing stime"))?;

    Ok((comm, ProcState::from_code(state_code), utime + stime))
}

/// Parse `/proc/<pid>/statm`: total and resident program size, in pages.
fn parse_statm(statm: &str) -> Result<(u64, u64), ProcError> {
    let mut fields = statm.split_whitespace();
    let vms = fields.next().and_then(|s| s.parse().ok());
    let rss = fields.next().and_then(|s| s.parse().ok());
    match (vms, rss) {
        (Some(v), Some(r)) => Ok((v, r)),
        _ => Err(ProcError::Parse {
            file: "statm".into(),
            detail: "expected at least two fields".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_proc(pid: i32, comm: &str, state: char, utime: u64, stime: u64) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let piddir = dir.path().join(pid.to_string());
        std::fs::create_dir_all(&piddir).unwrap();
        std::fs::write(
            piddir.join("stat"),
            format!(
                "{pid} ({comm}) {state} 1 1 1 0 -1 4194304 100 0 0 0 {utime} {stime} 0 0 20 0 1 0 100 0 0"
            ),
        )
        .unwrap();
        std::fs::write(piddir.join("statm"), "2048 512 100 10 0 200 0\n").unwrap();
        std::fs::write(piddir.join("comm"), format!("{comm}\n")).unwrap();
        std::fs::write(dir.path().join("meminfo"), "MemTotal: 16384 kB\nMemFree: 1 kB\n")
            .unwrap();
        dir
    }

    #[test]
    fn samples_state_cpu_and_memory() {
        let root = fake_proc(42, "myproc", 'S', 30, 12);
        let fs = ProcFs::with_root(root.path());
        let sample = fs.sample(42).unwrap();
        assert_eq!(sample.comm, "myproc");
        assert_eq!(sample.state, ProcState::Sleeping);
        assert_eq!(sample.cpu_ticks, 42);
        assert_eq!(sample.vms_bytes, 2048 * page_size());
        assert_eq!(sample.rss_bytes, 512 * page_size());
    }

    #[test]
    fn comm_with_parens_and_spaces_parses() {
        let root = fake_proc(7, "weird) (name", 'R', 1, 1);
        let fs = ProcFs::with_root(root.path());
        let sample = fs.sample(7).unwrap();
        assert_eq!(sample.comm, "weird) (name");
        assert_eq!(sample.state, ProcState::Running);
    }

    #[test]
    fn missing_pid_reports_gone() {
        let root = fake_proc(42, "x", 'S', 0, 0);
        let fs = ProcFs::with_root(root.path());
        assert!(matches!(fs.sample(43), Err(ProcError::Gone(43))));
    }

    #[test]
    fn name_scan_finds_pids() {
        let root = fake_proc(42, "myproc", 'S', 0, 0);
        let fs = ProcFs::with_root(root.path());
        assert_eq!(fs.pids_matching("myproc"), vec![42]);
        assert!(fs.pids_matching("other").is_empty());
    }

    #[test]
    fn mem_total_scales_to_bytes() {
        let root = fake_proc(1, "x", 'S', 0, 0);
        let fs = ProcFs::with_root(root.path());
        assert_eq!(fs.mem_total().unwrap(), 16384 * 1024);
    }

    #[test]
    fn state_names_and_codes_parse() {
        assert_eq!(ProcState::parse_name("running"), Some(ProcState::Running));
        assert_eq!(ProcState::parse_name("R"), Some(ProcState::Running));
        assert_eq!(ProcState::parse_name("UN"), Some(ProcState::DiskSleep));
        assert_eq!(ProcState::parse_name("zombie"), Some(ProcState::Zombie));
        assert_eq!(ProcState::parse_name("flying"), None);
    }
}
