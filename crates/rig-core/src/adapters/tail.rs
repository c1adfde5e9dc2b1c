//! Tailing helper for watched log files.
//!
//! A `LogTail` remembers the byte offset and inode of the file it watches.
//! Opening positions the tail at end-of-file so that only lines appended
//! after deployment are observed. Rotation is detected by an inode change
//! or a size shrink, in which case reading restarts from the top of the
//! replacement file.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Upper bound on lines drained per poll, so a flood of appended data
/// cannot stall the tick.
const MAX_LINES_PER_POLL: usize = 10_000;

pub struct LogTail {
    path: PathBuf,
    offset: u64,
    inode: u64,
}

impl LogTail {
    /// Open `path` positioned at its current end.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let meta = fs::metadata(&path)?;
        Ok(Self {
            offset: meta.len(),
            inode: meta.ino(),
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drain lines appended since the previous call.
    ///
    /// A missing file is not an error: rotation may be in progress, so an
    /// empty batch is returned and the next call retries. When the file
    /// reappears under a new inode, or shrinks, the offset resets to zero
    /// and the new content is read from its beginning.
    pub fn drain(&mut self) -> io::Result<Vec<String>> {
        let meta = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        if meta.ino() != self.inode || meta.len() < self.offset {
            self.inode = meta.ino();
            self.offset = 0;
        }

        if meta.len() == self.offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut reader = BufReader::new(file);

        let mut lines = Vec::new();
        let mut buf = String::new();
        while lines.len() < MAX_LINES_PER_POLL {
            buf.clear();
            let n = reader.read_line(&mut buf)?;
            if n == 0 {
                break;
            }
            // Hold back a trailing partial line until the writer finishes it.
            if !buf.ends_with('\n') {
                break;
            }
            self.offset += n as u64;
            lines.push(buf.trim_end().to_string());
        }

        Ok(lines)
    }
}
