//! Control-socket wire types.
//!
//! The protocol is line-delimited JSON over a per-rig Unix stream
//! socket. Requests carry an `op` discriminator; `status` answers with
//! the full status object, everything else answers with an ack.

use serde::{Deserialize, Serialize};

use crate::monitor::TripEvidence;

/// A request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Status,
    Destroy {
        #[serde(default)]
        force: bool,
    },
    Ping,
}

/// Ack for `ping`, `destroy`, and every failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl Ack {
    #[must_use]
    pub const fn ok() -> Self {
        Self { ok: true, err: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            err: Some(msg.into()),
        }
    }

    /// Bare `{"ok":false}` for malformed requests.
    #[must_use]
    pub const fn malformed() -> Self {
        Self {
            ok: false,
            err: None,
        }
    }
}

/// Per-plugin state summary inside a status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginState {
    pub name: String,
    pub state: String,
}

/// Answer to `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub name: String,
    pub pid: u32,
    pub phase: String,
    pub uptime_s: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_source: Option<TripEvidence>,
    pub monitors: Vec<PluginState>,
    pub actions: Vec<PluginState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_round_trip() {
        for (line, expected) in [
            (r#"{"op":"status"}"#, Request::Status),
            (r#"{"op":"ping"}"#, Request::Ping),
            (r#"{"op":"destroy"}"#, Request::Destroy { force: false }),
            (
                r#"{"op":"destroy","force":true}"#,
                Request::Destroy { force: true },
            ),
        ] {
            let parsed: Request = serde_json::from_str(line).unwrap();
            assert_eq!(parsed, expected);
        }
    }

    #[test]
    fn unknown_op_fails_to_parse() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"reboot"}"#).is_err());
    }

    #[test]
    fn ack_omits_absent_error() {
        assert_eq!(serde_json::to_string(&Ack::ok()).unwrap(), r#"{"ok":true}"#);
        assert_eq!(
            serde_json::to_string(&Ack::err("unknown op")).unwrap(),
            r#"{"ok":false,"err":"unknown op"}"#
        );
    }

    #[test]
    fn status_skips_absent_trigger() {
        let status = StatusResponse {
            name: "abcde".into(),
            pid: 42,
            phase: "polling".into(),
            uptime_s: 7,
            trigger_source: None,
            monitors: vec![],
            actions: vec![],
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("trigger_source"));
    }
}
