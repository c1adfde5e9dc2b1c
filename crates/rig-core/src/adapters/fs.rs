//! Path and filesystem measurement.

use std::io;
use std::path::Path;

/// Recursively summed size of a path, in bytes.
///
/// Files are their length; directories are the sum of their regular-file
/// contents. Entries that vanish mid-walk are skipped, since the walk
/// races with whatever is filling the path up.
pub fn path_size(path: &Path) -> io::Result<u64> {
    let meta = std::fs::symlink_metadata(path)?;
    if !meta.is_dir() {
        return Ok(meta.len());
    }
    let mut total = 0;
    let entries = match std::fs::read_dir(path) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    for entry in entries.flatten() {
        let child = entry.path();
        match std::fs::symlink_metadata(&child) {
            Ok(m) if m.is_dir() => total += path_size(&child).unwrap_or(0),
            Ok(m) if m.is_file() => total += m.len(),
            _ => {}
        }
    }
    Ok(total)
}

/// Usage of the filesystem backing `path`.
#[derive(Debug, Clone, Copy)]
pub struct FsUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl FsUsage {
    #[must_use]
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Measure the backing filesystem of `path` via statvfs.
pub fn backing_fs_usage(path: &Path) -> io::Result<FsUsage> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
    let frsize = stat.fragment_size() as u64;
    let total_bytes = frsize * stat.blocks() as u64;
    let free_bytes = frsize * stat.blocks_free() as u64;
    Ok(FsUsage {
        total_bytes,
        used_bytes: total_bytes.saturating_sub(free_bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("b"), vec![0u8; 150]).unwrap();
        assert_eq!(path_size(dir.path()).unwrap(), 250);
    }

    #[test]
    fn single_file_size_is_its_length() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("f");
        std::fs::write(&f, vec![0u8; 42]).unwrap();
        assert_eq!(path_size(&f).unwrap(), 42);
    }

    #[test]
    fn statvfs_reports_plausible_usage() {
        let dir = tempfile::tempdir().unwrap();
        let usage = backing_fs_usage(dir.path()).unwrap();
        assert!(usage.total_bytes > 0);
        assert!(usage.used_bytes <= usage.total_bytes);
        assert!(usage.used_percent() <= 100.0);
    }
}
