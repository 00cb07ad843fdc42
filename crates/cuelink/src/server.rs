//! WebSocket session server.
//!
//! One WebSocket connection is one session. Clients send JSON requests
//! tagged by `op`; every request is answered with a `result` event, and
//! pushed events (`connected`, `cueInfo`, `cueList`, `performance`)
//! arrive on the same socket.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cuelink_core::{Bridge, Command, CommandResult, CoreError, Reply, SessionEvent};

use crate::error::CliError;

// ── Requests ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    Hello {
        #[serde(default)]
        session_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Attach { workspace_id: String },
    Detach,
    Command(Command),
    #[serde(rename_all = "camelCase")]
    SelectCue { cue_id: String },
    CueInfo,
    CueList,
    Workspaces,
    Instances,
    Rescan,
    Performance,
    ClearPerformance,
}

impl Request {
    /// Wire name, echoed in the reply.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Attach { .. } => "attach",
            Self::Detach => "detach",
            Self::Command(_) => "command",
            Self::SelectCue { .. } => "selectCue",
            Self::CueInfo => "cueInfo",
            Self::CueList => "cueList",
            Self::Workspaces => "workspaces",
            Self::Instances => "instances",
            Self::Rescan => "rescan",
            Self::Performance => "performance",
            Self::ClearPerformance => "clearPerformance",
        }
    }
}

/// Parse one text frame. Malformed input becomes a failed `invalid` reply.
pub fn parse_request(text: &str) -> Result<Request, Reply> {
    serde_json::from_str(text).map_err(|e| Reply::failure("invalid", format!("bad request: {e}")))
}

// ── Request handling ─────────────────────────────────────────────────

/// Run one request for an admitted session.
pub async fn handle_request(bridge: &Bridge, session_id: &str, request: Request) -> Reply {
    let op = request.op();
    match request {
        Request::Hello { .. } => Reply::failure(op, "session already established"),
        Request::Attach { workspace_id } => done(op, bridge.attach(session_id, &workspace_id).await),
        Request::Detach => done(op, bridge.detach(session_id).await),
        Request::Command(command) => command_reply(op, bridge.execute(session_id, command).await),
        Request::SelectCue { cue_id } => command_reply(
            op,
            bridge
                .execute(session_id, Command::SelectCue { cue_id })
                .await,
        ),
        Request::CueInfo => data(op, bridge.cue_info(session_id).await),
        Request::CueList => data(op, bridge.cue_list(session_id).await),
        Request::Workspaces => data(op, Ok(bridge.list_workspaces().await)),
        Request::Instances => data(op, Ok(bridge.instances().await)),
        Request::Rescan => data(op, Ok(bridge.rescan().await)),
        Request::Performance => data(op, Ok(bridge.performance())),
        Request::ClearPerformance => {
            bridge.clear_performance();
            Reply::ok(op, None)
        }
    }
}

fn done(op: &str, result: Result<(), CoreError>) -> Reply {
    match result {
        Ok(()) => Reply::ok(op, None),
        Err(e) => Reply::failure(op, e.to_string()),
    }
}

fn command_reply(op: &str, result: CommandResult) -> Reply {
    Reply {
        op: op.to_owned(),
        success: result.success,
        message: result.message,
        data: None,
    }
}

fn data<T: Serialize>(op: &str, result: Result<T, CoreError>) -> Reply {
    match result.map(serde_json::to_value) {
        Ok(Ok(value)) => Reply::ok(op, Some(value)),
        Ok(Err(e)) => Reply::failure(op, format!("encoding failed: {e}")),
        Err(e) => Reply::failure(op, e.to_string()),
    }
}

// ── Server loop ──────────────────────────────────────────────────────

/// Accept sessions until Ctrl+C, then tear the bridge down within the
/// configured shutdown timeout.
pub async fn run(bridge: Bridge, bind: SocketAddr) -> Result<(), CliError> {
    let listener = TcpListener::bind(bind).await.map_err(|source| CliError::Bind {
        address: bind.to_string(),
        source,
    })?;
    info!(address = %bind, "session server listening");

    let cancel = CancellationToken::new();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutdown requested");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(bridge.clone(), stream, peer, cancel.child_token()));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }

    drop(listener);
    cancel.cancel();

    let limit = bridge.config().timings.shutdown_timeout;
    tokio::time::timeout(limit, bridge.shutdown())
        .await
        .map_err(|_| CliError::ShutdownTimeout {
            millis: limit.as_millis(),
        })
}

async fn serve_connection(
    bridge: Bridge,
    stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut outgoing, mut incoming) = ws.split();
    let (sink, mut events) = mpsc::channel::<SessionEvent>(bridge.config().session_buffer);

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(event = event.name(), error = %e, "event not encodable");
                    continue;
                }
            };
            if outgoing.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = outgoing.close().await;
    });

    let mut session: Option<String> = None;
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = incoming.next() => frame,
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(%peer, error = %e, "websocket read failed");
                break;
            }
        };

        let request = match parse_request(text.as_str()) {
            Ok(request) => request,
            Err(reply) => {
                let _ = sink.send(SessionEvent::Result(reply)).await;
                continue;
            }
        };

        let reply = match (&session, request) {
            (None, Request::Hello { session_id }) => {
                let (id, admission) = bridge
                    .connect_session(session_id.as_deref(), sink.clone())
                    .await;
                info!(%peer, session = %id, ?admission, "session admitted");
                session = Some(id);
                continue;
            }
            (None, request) => {
                // First frame without a hello: admit under a fresh id.
                let (id, _) = bridge.connect_session(None, sink.clone()).await;
                info!(%peer, session = %id, "session admitted");
                let reply = handle_request(&bridge, &id, request).await;
                session = Some(id);
                reply
            }
            (Some(id), request) => handle_request(&bridge, id, request).await,
        };
        let _ = sink.send(SessionEvent::Result(reply)).await;
    }

    // During server shutdown the bridge drains every session itself.
    if let Some(id) = &session {
        if !cancel.is_cancelled() && bridge.sessions().is_bound_to(id, &sink) {
            bridge.disconnect_session(id);
        }
    }
    debug!(%peer, session = ?session, "connection closed");
    drop(sink);
    let _ = writer.await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cuelink_api::testing::ScriptedTransport;
    use cuelink_core::BridgeConfig;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    #[test]
    fn parses_every_op() {
        let cases = [
            (json!({"op": "hello", "sessionId": "s1"}), "hello"),
            (json!({"op": "hello"}), "hello"),
            (json!({"op": "attach", "workspaceId": "W1"}), "attach"),
            (json!({"op": "detach"}), "detach"),
            (json!({"op": "command", "command": "go"}), "command"),
            (json!({"op": "selectCue", "cueId": "42"}), "selectCue"),
            (json!({"op": "cueInfo"}), "cueInfo"),
            (json!({"op": "cueList"}), "cueList"),
            (json!({"op": "workspaces"}), "workspaces"),
            (json!({"op": "instances"}), "instances"),
            (json!({"op": "rescan"}), "rescan"),
            (json!({"op": "performance"}), "performance"),
            (json!({"op": "clearPerformance"}), "clearPerformance"),
        ];
        for (frame, op) in cases {
            let request = parse_request(&frame.to_string()).unwrap();
            assert_eq!(request.op(), op);
        }
    }

    #[test]
    fn hello_carries_optional_session_id() {
        assert_eq!(
            parse_request(r#"{"op":"hello","sessionId":"abc"}"#).unwrap(),
            Request::Hello {
                session_id: Some("abc".into())
            }
        );
        assert_eq!(
            parse_request(r#"{"op":"hello"}"#).unwrap(),
            Request::Hello { session_id: None }
        );
    }

    #[test]
    fn command_op_embeds_the_command() {
        assert_eq!(
            parse_request(r#"{"op":"command","command":"selectCue","cueId":"7"}"#).unwrap(),
            Request::Command(Command::SelectCue { cue_id: "7".into() })
        );
    }

    #[test]
    fn malformed_frames_become_failed_replies() {
        for text in ["not json", r#"{"op":"launch"}"#, r#"{"op":"attach"}"#] {
            let reply = parse_request(text).unwrap_err();
            assert_eq!(reply.op, "invalid");
            assert!(!reply.success);
        }
    }

    fn device() -> Arc<ScriptedTransport> {
        ScriptedTransport::new(|m| match m.addr.as_str() {
            "/workspaces" => Ok(json!([{ "uniqueID": "W1", "displayName": "Main Show" }])),
            _ => Ok(Value::Null),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn requests_before_attach_fail_cleanly() {
        let bridge = Bridge::with_transport(BridgeConfig::default(), device());
        let (tx, _rx) = mpsc::channel(16);
        let (id, _) = bridge.connect_session(Some("s1"), tx).await;

        let reply = handle_request(&bridge, &id, Request::Command(Command::Go)).await;
        assert!(!reply.success);
        assert_eq!(reply.op, "command");

        let reply = handle_request(&bridge, &id, Request::CueInfo).await;
        assert!(!reply.success);

        let reply = handle_request(&bridge, &id, Request::Hello { session_id: None }).await;
        assert!(!reply.success);
    }

    #[tokio::test(start_paused = true)]
    async fn attach_and_workspaces_replies() {
        let transport = device();
        let bridge = Bridge::with_transport(BridgeConfig::default(), transport.clone());
        let (tx, _rx) = mpsc::channel(16);
        let (id, _) = bridge.connect_session(Some("s1"), tx).await;

        let reply = handle_request(&bridge, &id, Request::Workspaces).await;
        assert!(reply.success);
        assert_eq!(reply.data.unwrap()[0]["displayName"], "Main Show");

        let reply = handle_request(
            &bridge,
            &id,
            Request::Attach {
                workspace_id: "W1".into(),
            },
        )
        .await;
        assert!(reply.success, "{reply:?}");

        let reply = handle_request(&bridge, &id, Request::Command(Command::Go)).await;
        assert!(reply.success);
        assert_eq!(transport.count("/workspace/W1/go"), 1);

        let reply = handle_request(&bridge, &id, Request::Performance).await;
        assert_eq!(reply.data.unwrap()["commands_sent"], 1);
    }
}
