//! Final archive assembly.
//!
//! The working directory is rolled into a gzip tarball next to it,
//! named `<rig-name>-<timestamp>.tar.gz`. The archive is read back and
//! verified before the caller is allowed to delete the working
//! directory.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use crate::error::RigError;

/// Create and verify the archive; returns its path.
pub fn create_archive(workdir: &Path, rig_name: &str) -> Result<PathBuf, RigError> {
    let parent = workdir
        .parent()
        .ok_or_else(|| RigError::runtime("working directory has no parent"))?;
    let stamp = chrono::Local::now().format("%Y-%m-%d-%H%M%S");
    let arc_name = format!("{rig_name}-{stamp}");
    let arc_path = parent.join(format!("{arc_name}.tar.gz"));

    let file = File::create(&arc_path).map_err(|e| {
        RigError::runtime(format!("cannot create archive {}: {e}", arc_path.display()))
    })?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let assembled = builder
        .append_dir_all(&arc_name, workdir)
        .and_then(|()| builder.into_inner())
        .and_then(GzEncoder::finish);
    if let Err(e) = assembled {
        let _ = std::fs::remove_file(&arc_path);
        return Err(RigError::runtime(format!("archive assembly failed: {e}")));
    }

    verify_archive(&arc_path)?;
    info!(archive = %arc_path.display(), "archive created");
    Ok(arc_path)
}

/// Read the tarball back and walk its entries.
fn verify_archive(path: &Path) -> Result<(), RigError> {
    let file = File::open(path)
        .map_err(|e| RigError::runtime(format!("cannot reopen archive: {e}")))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|e| RigError::runtime(format!("archive is unreadable: {e}")))?;
    let mut count = 0usize;
    for entry in entries {
        entry.map_err(|e| RigError::runtime(format!("archive entry is corrupt: {e}")))?;
        count += 1;
    }
    if count == 0 {
        return Err(RigError::runtime("archive verified empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archives_and_verifies_workdir_contents() {
        let base = tempfile::tempdir().unwrap();
        let workdir = base.path().join("abcde");
        std::fs::create_dir(&workdir).unwrap();
        std::fs::write(workdir.join("noop.out"), "triggered\n").unwrap();
        std::fs::write(workdir.join("rig.log"), "log line\n").unwrap();

        let archive = create_archive(&workdir, "abcde").unwrap();
        assert!(archive.exists());
        assert!(archive
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with(".tar.gz"));

        // The workdir contents are inside, under the archive's stem.
        let file = File::open(&archive).unwrap();
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        let names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("noop.out")));
        assert!(names.iter().any(|n| n.ends_with("rig.log")));
    }

    #[test]
    fn empty_workdir_still_archives_the_directory() {
        let base = tempfile::tempdir().unwrap();
        let workdir = base.path().join("xyzzy");
        std::fs::create_dir(&workdir).unwrap();
        // The directory entry itself counts; verification passes.
        assert!(create_archive(&workdir, "xyzzy").is_ok());
    }
}
