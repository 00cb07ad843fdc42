//! OSC message construction and inbound classification.
//!
//! The device speaks plain OSC: textual hierarchical addresses with typed
//! arguments. Replies echo the request address under `/reply` and carry a
//! JSON status envelope as their first string argument. Unsolicited state
//! changes arrive under `/update` and are recognised by address substring.

use bytes::Bytes;
use rosc::{OscMessage, OscPacket, OscType};
use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;

pub const REPLY_PREFIX: &str = "/reply";
pub const UPDATE_PREFIX: &str = "/update";
pub const KEEP_ALIVE: &str = "/thump";

// ── Outgoing ─────────────────────────────────────────────────────────

/// Build a message with no arguments.
pub fn bare(address: impl Into<String>) -> OscMessage {
    OscMessage {
        addr: address.into(),
        args: Vec::new(),
    }
}

/// Build a message with arguments.
pub fn with_args(address: impl Into<String>, args: Vec<OscType>) -> OscMessage {
    OscMessage {
        addr: address.into(),
        args,
    }
}

/// Encode a single message as an OSC packet.
pub fn encode(message: OscMessage) -> Result<Bytes, Error> {
    rosc::encoder::encode(&OscPacket::Message(message))
        .map(Bytes::from)
        .map_err(|e| Error::Encode(format!("{e:?}")))
}

/// Decode one framed OSC packet, flattening bundles into their messages.
pub fn decode(frame: &[u8]) -> Result<Vec<OscMessage>, Error> {
    let (_rest, packet) = rosc::decoder::decode_udp(frame)?;
    let mut out = Vec::new();
    flatten(packet, &mut out);
    Ok(out)
}

fn flatten(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(msg),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out);
            }
        }
    }
}

// ── Inbound ──────────────────────────────────────────────────────────

/// What kind of state change an `/update` message announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Playhead / selection moved within a cue list.
    PlaybackPosition,
    /// Cue-list structure changed.
    CueList,
    /// A single cue's properties or running state changed.
    Cue,
    /// Anything else about the workspace.
    Workspace,
}

/// An unsolicited device notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceUpdate {
    pub address: String,
    pub kind: UpdateKind,
    /// Workspace the update refers to, when the address names one.
    pub workspace_id: Option<String>,
    /// First string argument, e.g. the cue id for a playback-position update.
    pub value: Option<String>,
}

/// Routing decision for one inbound message.
#[derive(Debug)]
pub enum Inbound {
    KeepAlive,
    Reply {
        address: String,
        outcome: Result<Value, Error>,
    },
    Update(DeviceUpdate),
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: Option<String>,
}

/// Classify an inbound message by its address.
pub fn classify(message: OscMessage) -> Inbound {
    let OscMessage { addr, args } = message;

    if addr == KEEP_ALIVE || addr.ends_with(KEEP_ALIVE) {
        return Inbound::KeepAlive;
    }

    if let Some(original) = addr.strip_prefix(REPLY_PREFIX) {
        let address = original.to_owned();
        let outcome = parse_envelope(&address, args.first());
        return Inbound::Reply { address, outcome };
    }

    if addr.starts_with(UPDATE_PREFIX) {
        let kind = if addr.contains("playbackPosition") {
            UpdateKind::PlaybackPosition
        } else if addr.contains("cueList") {
            UpdateKind::CueList
        } else if addr.contains("cue_id") {
            UpdateKind::Cue
        } else {
            UpdateKind::Workspace
        };
        let workspace_id = workspace_segment(&addr);
        let value = args.into_iter().find_map(|a| match a {
            OscType::String(s) => Some(s),
            _ => None,
        });
        return Inbound::Update(DeviceUpdate {
            address: addr,
            kind,
            workspace_id,
            value,
        });
    }

    Inbound::Unknown(addr)
}

fn parse_envelope(address: &str, first: Option<&OscType>) -> Result<Value, Error> {
    let Some(OscType::String(body)) = first else {
        return Err(Error::Decode {
            message: format!("reply to {address} has no status envelope"),
        });
    };

    let envelope: StatusEnvelope = serde_json::from_str(body).map_err(|e| Error::Decode {
        message: format!("reply to {address}: {e}"),
    })?;

    if envelope.status == "ok" {
        Ok(envelope.data)
    } else {
        Err(Error::Protocol {
            address: address.to_owned(),
            status: if envelope.status.is_empty() {
                "unknown".into()
            } else {
                envelope.status
            },
            message: envelope.message.filter(|m| !m.is_empty()),
        })
    }
}

/// Extract `{id}` from `/update/workspace/{id}/...`.
fn workspace_segment(address: &str) -> Option<String> {
    let mut parts = address.split('/').skip_while(|p| *p != "workspace");
    parts.next()?;
    parts.next().filter(|s| !s.is_empty()).map(str::to_owned)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn reply(addr: &str, json: &str) -> OscMessage {
        with_args(addr, vec![OscType::String(json.into())])
    }

    #[test]
    fn ok_reply_yields_data() {
        let msg = reply(
            "/reply/workspaces",
            r#"{"status":"ok","data":[{"uniqueID":"W1"}],"address":"/workspaces"}"#,
        );
        match classify(msg) {
            Inbound::Reply { address, outcome } => {
                assert_eq!(address, "/workspaces");
                assert_eq!(outcome.unwrap()[0]["uniqueID"], "W1");
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn error_reply_keeps_device_message() {
        let msg = reply(
            "/reply/workspace/W1/go",
            r#"{"status":"error","message":"cue is broken"}"#,
        );
        match classify(msg) {
            Inbound::Reply { outcome, .. } => {
                let err = outcome.unwrap_err();
                assert!(matches!(
                    &err,
                    Error::Protocol { message: Some(m), .. } if m == "cue is broken"
                ));
                assert_eq!(
                    err.to_string(),
                    "Device rejected /workspace/W1/go: error (cue is broken)"
                );
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn error_reply_is_protocol_failure() {
        let msg = reply("/reply/workspace/W1/connect", r#"{"status":"denied"}"#);
        match classify(msg) {
            Inbound::Reply { outcome, .. } => match outcome.unwrap_err() {
                Error::Protocol {
                    status,
                    address,
                    message,
                } => {
                    assert_eq!(status, "denied");
                    assert_eq!(address, "/workspace/W1/connect");
                    assert_eq!(message, None);
                }
                e => panic!("unexpected error {e:?}"),
            },
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn malformed_reply_still_routes_as_reply() {
        let msg = reply("/reply/go", "not json");
        assert!(matches!(
            classify(msg),
            Inbound::Reply {
                outcome: Err(Error::Decode { .. }),
                ..
            }
        ));
    }

    #[test]
    fn keep_alive_is_never_a_reply() {
        assert!(matches!(classify(bare("/thump")), Inbound::KeepAlive));
        assert!(matches!(
            classify(reply("/reply/thump", r#"{"status":"ok"}"#)),
            Inbound::KeepAlive
        ));
    }

    #[test]
    fn classifies_updates() {
        let pos = with_args(
            "/update/workspace/W1/cueList/L1/playbackPosition",
            vec![OscType::String("C7".into())],
        );
        match classify(pos) {
            Inbound::Update(u) => {
                assert_eq!(u.kind, UpdateKind::PlaybackPosition);
                assert_eq!(u.workspace_id.as_deref(), Some("W1"));
                assert_eq!(u.value.as_deref(), Some("C7"));
            }
            other => panic!("expected update, got {other:?}"),
        }

        let cue = bare("/update/workspace/W1/cue_id/C7");
        assert!(matches!(classify(cue), Inbound::Update(u) if u.kind == UpdateKind::Cue));

        let ws = bare("/update/workspace/W1");
        assert!(matches!(classify(ws), Inbound::Update(u) if u.kind == UpdateKind::Workspace));
    }

    #[test]
    fn unknown_address_passes_through() {
        assert!(matches!(classify(bare("/foo")), Inbound::Unknown(a) if a == "/foo"));
    }

    #[test]
    fn encode_decode_single_message() {
        let bytes = encode(with_args("/select_id/42", vec![OscType::Int(1)])).unwrap();
        let msgs = decode(&bytes).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].addr, "/select_id/42");
        assert_eq!(msgs[0].args, vec![OscType::Int(1)]);
    }
}
