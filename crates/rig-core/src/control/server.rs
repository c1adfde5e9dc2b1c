//! Per-rig control-socket server.
//!
//! Listens on the rig's Unix socket and answers line-delimited JSON
//! requests until shut down. `destroy` is acknowledged before the
//! shutdown request is handed to the supervisor, so the administrative
//! client always gets its answer. Malformed requests get a bare
//! `{"ok":false}` and the connection is closed; the server itself keeps
//! serving.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::protocol::{Ack, Request};
use crate::rig::state::RigState;

/// A destroy request forwarded to the supervisor; `force` kills any
/// in-flight action instead of letting it finish.
#[derive(Debug, Clone, Copy)]
pub struct DestroyRequest {
    pub force: bool,
}

/// Serve the control socket until `shutdown` fires.
pub async fn serve(
    listener: UnixListener,
    state: Arc<RigState>,
    destroy_tx: mpsc::Sender<DestroyRequest>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!("control server shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        let destroy_tx = destroy_tx.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, state, destroy_tx).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "control accept failed"),
                }
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    state: Arc<RigState>,
    destroy_tx: mpsc::Sender<DestroyRequest>,
) {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(64 * 1024));

    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                debug!(error = %e, "control read failed");
                break;
            }
        };

        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(_) => {
                // Valid JSON with a bogus op gets a named error; line
                // noise gets a bare failure and the connection closed.
                if serde_json::from_str::<serde_json::Value>(&line).is_ok() {
                    let _ = send_json(&mut framed, &Ack::err("unknown op")).await;
                    continue;
                }
                let _ = send_json(&mut framed, &Ack::malformed()).await;
                break;
            }
        };

        debug!(?request, "control request");
        match request {
            Request::Ping => {
                if send_json(&mut framed, &Ack::ok()).await.is_err() {
                    break;
                }
            }
            Request::Status => {
                if send_json(&mut framed, &state.status()).await.is_err() {
                    break;
                }
            }
            Request::Destroy { force } => {
                // Acknowledge first; the shutdown that follows tears
                // this very socket down.
                let _ = send_json(&mut framed, &Ack::ok()).await;
                let _ = destroy_tx.send(DestroyRequest { force }).await;
                break;
            }
        }
    }
}

async fn send_json<T: serde::Serialize>(
    framed: &mut Framed<UnixStream, LinesCodec>,
    payload: &T,
) -> Result<(), ()> {
    let line = serde_json::to_string(payload).map_err(|_| ())?;
    framed.send(line).await.map_err(|_| ())
}
