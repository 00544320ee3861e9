//! Line-oriented operator console and JSONL event output.
//!
//! Commands are read from stdin, one per line:
//!
//! ```text
//! /msg <node-id> <text>      send an encrypted message
//! /find <node-id>            flood a discovery
//! /sms <phone> <text>        send an SMS through the internet gateway
//! /pos <lat> <lng>           new GPS fix
//! /neighbors                 list the neighbor table
//! /status <packet-id>        delivery status of a sent message
//! /history <node-id>         stored conversation with a contact
//! /stats                     relay counters
//! /quit                      leave
//! ```
//!
//! Everything the node reports goes to stdout as one JSON object per line.

use std::io::Write;

use kenet_protocol::{DropReason, GeoPoint, NodeId, PacketId, RelayEvent};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Message { to: NodeId, text: String },
    Discover(NodeId),
    Sms { phone: String, text: String },
    Position(GeoPoint),
    Neighbors,
    Status(PacketId),
    History(NodeId),
    Stats,
    Quit,
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb {
        "/msg" => {
            let (to, text) = split_arg(rest).ok_or("usage: /msg <node-id> <text>")?;
            ConsoleCommand::Message {
                to: NodeId::new(to),
                text: text.to_string(),
            }
        }
        "/find" if !rest.is_empty() => ConsoleCommand::Discover(NodeId::new(rest)),
        "/find" => return Err("usage: /find <node-id>".into()),
        "/sms" => {
            let (phone, text) = split_arg(rest).ok_or("usage: /sms <phone> <text>")?;
            ConsoleCommand::Sms {
                phone: phone.to_string(),
                text: text.to_string(),
            }
        }
        "/pos" => {
            let mut parts = rest.split_whitespace();
            let (Some(lat), Some(lng), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err("usage: /pos <lat> <lng>".into());
            };
            let lat: f32 = lat.parse().map_err(|e| format!("bad latitude: {e}"))?;
            let lng: f32 = lng.parse().map_err(|e| format!("bad longitude: {e}"))?;
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                return Err("position out of range".into());
            }
            ConsoleCommand::Position(GeoPoint::new(lat, lng))
        }
        "/neighbors" => ConsoleCommand::Neighbors,
        "/status" => {
            let id = rest
                .parse::<PacketId>()
                .map_err(|e| format!("bad packet id: {e}"))?;
            ConsoleCommand::Status(id)
        }
        "/history" if !rest.is_empty() => ConsoleCommand::History(NodeId::new(rest)),
        "/history" => return Err("usage: /history <node-id>".into()),
        "/stats" => ConsoleCommand::Stats,
        "/quit" | "/exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command {other}")),
    };
    Ok(Some(command))
}

/// Split `"<word> <rest>"`, both parts non-empty.
fn split_arg(s: &str) -> Option<(&str, &str)> {
    let (first, rest) = s.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    (!first.is_empty() && !rest.is_empty()).then_some((first, rest))
}

/// Read stdin for the life of the process, forwarding parsed commands.
///
/// The channel closes when stdin does; the node keeps relaying.
pub fn spawn_stdin_reader() -> mpsc::Receiver<ConsoleCommand> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!("stdin read failed: {e}");
                    return;
                }
            };
            match parse_line(&line) {
                Ok(Some(cmd)) => {
                    if tx.send(cmd).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => emit(&json!({ "event": "console_error", "error": e })),
            }
        }
    });
    rx
}

/// Write one JSON line to stdout, flushed for piped output.
pub fn emit(value: &Value) {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    let _ = writeln!(lock, "{value}");
    let _ = lock.flush();
}

fn position(p: GeoPoint) -> Value {
    json!({ "lat": p.lat, "lng": p.lng })
}

/// JSON rendering of a relay event.
pub fn event_json(event: &RelayEvent) -> Value {
    match event {
        RelayEvent::MessageReceived {
            packet_id,
            from,
            plaintext,
            timestamp,
        } => json!({
            "event": "message",
            "packet_id": packet_id.to_string(),
            "from": from.as_str(),
            "text": String::from_utf8_lossy(plaintext),
            "timestamp": timestamp,
        }),
        RelayEvent::LocationLearned { peer, position: p } => json!({
            "event": "location_learned",
            "peer": peer.as_str(),
            "position": position(*p),
        }),
        RelayEvent::DeliveryConfirmed { packet_id } => json!({
            "event": "delivered",
            "packet_id": packet_id.to_string(),
        }),
        RelayEvent::StatusChanged(change) => json!({
            "event": "status",
            "packet_id": change.packet_id.to_string(),
            "previous": format!("{:?}", change.previous),
            "current": format!("{:?}", change.current),
        }),
        RelayEvent::NeighborUpdated { peer, position: p } => json!({
            "event": "neighbor",
            "peer": peer.as_str(),
            "position": position(*p),
        }),
        RelayEvent::Forwarded { key, next_hop } => json!({
            "event": "forwarded",
            "kind": format!("{:?}", key.kind),
            "packet_id": key.id.to_string(),
            "next_hop": next_hop.as_ref().map(|n| n.as_str()),
        }),
        RelayEvent::Held { key } => json!({
            "event": "held",
            "kind": format!("{:?}", key.kind),
            "packet_id": key.id.to_string(),
        }),
        RelayEvent::Dropped {
            kind,
            packet_id,
            reason,
        } => json!({
            "event": "dropped",
            "kind": kind.map(|k| format!("{k:?}")),
            "packet_id": packet_id.map(|id| id.to_string()),
            "reason": drop_reason(reason),
        }),
        RelayEvent::GatewayHandedOff { packet_id } => json!({
            "event": "gateway_handoff",
            "packet_id": packet_id.to_string(),
        }),
        RelayEvent::Error { description } => json!({
            "event": "error",
            "error": description,
        }),
    }
}

fn drop_reason(reason: &DropReason) -> String {
    match reason {
        DropReason::Malformed(e) => format!("malformed: {e}"),
        DropReason::TtlExpired => "ttl expired".into(),
        DropReason::DecryptFailed(e) => format!("decrypt failed: {e}"),
        DropReason::HoldExpired => "hold expired".into(),
        DropReason::HoldEvicted => "hold evicted".into(),
        DropReason::Oversized { size, max } => format!("oversized: {size} bytes (max {max})"),
    }
}
