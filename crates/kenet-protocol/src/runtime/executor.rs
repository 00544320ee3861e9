//! Effect executor: the only place that touches I/O.
//!
//! - Send -> encode + transport.send_frame() (I/O errors, or a link already down, are
//!   fatal; an oversized frame is dropped)
//! - StoreInbound / StoreOutbound / MarkDelivered / UpdateContactLocation -> persistence
//! - GatewayHandoff -> gateway.submit()
//! - Emit -> event_tx.try_send()

use kenet_transport::LinkError;
use tokio::sync::mpsc;

use super::effect::RuntimeEffect;
use super::transport::Transport;
use super::{Collaborators, DropReason, RelayEvent};

/// Execute effects in order. Returns early on a link failure; every other
/// failure is reported as a [`RelayEvent::Error`] and skipped.
pub(super) async fn execute_effects<T: Transport + ?Sized>(
    effects: Vec<RuntimeEffect>,
    transport: &T,
    collab: &Collaborators,
    event_tx: &mpsc::Sender<RelayEvent>,
) -> Result<(), LinkError> {
    for effect in effects {
        match effect {
            RuntimeEffect::Send { .. } if !transport.is_connected() => {
                return Err(LinkError::Closed);
            }
            RuntimeEffect::Send { packet, hint } => match packet.encode() {
                Ok(frame) => match transport.send_frame(&frame, &hint).await {
                    Ok(()) => {}
                    // Never reached the socket: lose the packet, keep the link.
                    Err(LinkError::FrameTooLarge { size, max }) => {
                        tracing::warn!(
                            kind = ?packet.kind(),
                            id = %packet.packet_id(),
                            size,
                            max,
                            "frame too large, dropped"
                        );
                        let _ = event_tx.try_send(RelayEvent::Dropped {
                            kind: Some(packet.kind()),
                            packet_id: Some(packet.packet_id()),
                            reason: DropReason::Oversized { size, max },
                        });
                    }
                    Err(e) => return Err(e),
                },
                Err(e) => report(event_tx, format!("encode {:?} failed: {e}", packet.kind())),
            },
            RuntimeEffect::StoreInbound {
                packet_id,
                sender,
                plaintext,
                timestamp,
            } => {
                if let Err(e) = collab
                    .persistence
                    .store_inbound_message(&packet_id, &sender, &plaintext, timestamp)
                {
                    report(event_tx, format!("store inbound {packet_id} failed: {e}"));
                }
            }
            RuntimeEffect::StoreOutbound {
                packet_id,
                recipient,
                plaintext,
                timestamp,
            } => {
                if let Err(e) = collab
                    .persistence
                    .store_outbound_message(&packet_id, &recipient, &plaintext, timestamp)
                {
                    report(event_tx, format!("store outbound {packet_id} failed: {e}"));
                }
            }
            RuntimeEffect::MarkDelivered(packet_id) => {
                if let Err(e) = collab.persistence.mark_message_delivered(&packet_id) {
                    report(event_tx, format!("mark delivered {packet_id} failed: {e}"));
                }
            }
            RuntimeEffect::UpdateContactLocation { peer, position } => {
                if let Err(e) = collab.persistence.update_contact_location(&peer, position) {
                    report(event_tx, format!("update location of {peer} failed: {e}"));
                }
            }
            RuntimeEffect::GatewayHandoff(payload) => {
                if let Err(e) = collab.gateway.submit(&payload).await {
                    report(
                        event_tx,
                        format!("gateway handoff {} failed: {e}", payload.packet_id),
                    );
                }
            }
            RuntimeEffect::Emit(event) => {
                // try_send: a slow consumer must never stall the relay
                let _ = event_tx.try_send(event);
            }
        }
    }
    Ok(())
}

fn report(event_tx: &mpsc::Sender<RelayEvent>, description: String) {
    tracing::warn!("{description}");
    let _ = event_tx.try_send(RelayEvent::Error { description });
}
