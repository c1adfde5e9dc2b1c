//! Administrative client for rig control sockets.
//!
//! Connects to a per-rig socket, sends one line-delimited JSON request,
//! and reads one response line. Connections are stateless and carry
//! read/write timeouts so a wedged rig cannot hang the CLI.
//!
//! Discovery enumerates the well-known socket directory and classifies
//! each entry by whether a listener answers `ping`.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use super::protocol::{Ack, Request, StatusResponse};
use crate::paths;

/// Per-request connect/read/write timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    /// The socket file does not exist.
    #[error("no socket found for rig '{0}'")]
    NotFound(String),

    /// The socket exists but nothing is listening on it.
    #[error("rig '{0}' is not responding (stale socket?)")]
    Dead(String),

    #[error("I/O error talking to rig: {0}")]
    Io(#[from] std::io::Error),

    #[error("unintelligible response from rig: {0}")]
    BadResponse(String),

    /// The rig answered with `ok:false`.
    #[error("rig refused request: {0}")]
    Refused(String),
}

/// Send one request to the rig named `name` and parse the JSON reply.
pub fn request(name: &str, request: &Request) -> Result<serde_json::Value, ClientError> {
    let path = paths::socket_path(name);
    request_at(name, &path, request)
}

/// Like [`request`], but against an explicit socket path.
pub fn request_at(
    name: &str,
    path: &Path,
    request: &Request,
) -> Result<serde_json::Value, ClientError> {
    if !path.exists() {
        return Err(ClientError::NotFound(name.to_string()));
    }
    let mut stream =
        UnixStream::connect(path).map_err(|_| ClientError::Dead(name.to_string()))?;
    stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
    stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;

    let mut line = serde_json::to_string(request)
        .map_err(|e| ClientError::BadResponse(e.to_string()))?;
    line.push('\n');
    stream.write_all(line.as_bytes())?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader.read_line(&mut response)?;
    if response.trim().is_empty() {
        return Err(ClientError::Dead(name.to_string()));
    }
    serde_json::from_str(response.trim()).map_err(|e| ClientError::BadResponse(e.to_string()))
}

/// Fetch the status of a named rig.
pub fn status(name: &str) -> Result<StatusResponse, ClientError> {
    let value = request(name, &Request::Status)?;
    serde_json::from_value(value).map_err(|e| ClientError::BadResponse(e.to_string()))
}

/// Ask a named rig to destroy itself.
pub fn destroy(name: &str, force: bool) -> Result<(), ClientError> {
    let value = request(name, &Request::Destroy { force })?;
    let ack: Ack =
        serde_json::from_value(value).map_err(|e| ClientError::BadResponse(e.to_string()))?;
    if ack.ok {
        Ok(())
    } else {
        Err(ClientError::Refused(
            ack.err.unwrap_or_else(|| "no reason given".into()),
        ))
    }
}

/// One socket found in the well-known directory.
#[derive(Debug)]
pub struct DiscoveredRig {
    pub name: String,
    pub path: PathBuf,
    /// `Some` when the rig answered `status`; `None` marks a stale
    /// socket left behind by a dead rig.
    pub status: Option<StatusResponse>,
}

impl DiscoveredRig {
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.status.is_some()
    }
}

/// Enumerate the socket directory and probe every entry.
pub fn discover() -> std::io::Result<Vec<DiscoveredRig>> {
    let dir = paths::socket_dir();
    let mut found = Vec::new();
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path
            .file_name()
            .and_then(|f| f.to_str())
            .and_then(|f| f.strip_suffix(".sock"))
            .map(str::to_string)
        else {
            continue;
        };
        let status = request_at(&name, &path, &Request::Status)
            .ok()
            .and_then(|v| serde_json::from_value(v).ok());
        found.push(DiscoveredRig { name, path, status });
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_socket_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            request_at("ghost", &dir.path().join("ghost.sock"), &Request::Ping).unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[test]
    fn stale_socket_is_dead() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        // A bound-then-dropped listener leaves the file with no reader.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        let err = request_at("stale", &path, &Request::Ping).unwrap_err();
        assert!(matches!(err, ClientError::Dead(_)));
    }
}
