//! Well-known filesystem locations.
//!
//! The socket and working-directory bases are distribution-dependent, so
//! both can be overridden through the environment. Defaults match the
//! conventional layout: sockets under `/var/run/rig`, working directories
//! under `/var/tmp/rig`.

use std::path::PathBuf;

/// Environment override for the control-socket directory.
pub const SOCK_DIR_ENV: &str = "RIG_SOCK_DIR";

/// Environment override for the working-directory base.
pub const TMP_DIR_ENV: &str = "RIG_TMP_DIR";

const DEFAULT_SOCK_DIR: &str = "/var/run/rig";
const DEFAULT_TMP_DIR: &str = "/var/tmp/rig";

/// Directory holding one control socket per live rig.
#[must_use]
pub fn socket_dir() -> PathBuf {
    std::env::var_os(SOCK_DIR_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_SOCK_DIR), PathBuf::from)
}

/// Control socket path for a rig name.
#[must_use]
pub fn socket_path(name: &str) -> PathBuf {
    socket_dir().join(format!("{name}.sock"))
}

/// Base directory under which each rig creates its private working
/// directory.
#[must_use]
pub fn workdir_base() -> PathBuf {
    std::env::var_os(TMP_DIR_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_TMP_DIR), PathBuf::from)
}

/// Private working directory for a rig name.
#[must_use]
pub fn workdir_path(name: &str) -> PathBuf {
    workdir_base().join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_uses_name_and_suffix() {
        let p = socket_path("abcde");
        assert!(p.to_string_lossy().ends_with("abcde.sock"));
    }

    #[test]
    fn workdir_is_under_base() {
        let p = workdir_path("abcde");
        assert!(p.starts_with(workdir_base()));
    }
}
