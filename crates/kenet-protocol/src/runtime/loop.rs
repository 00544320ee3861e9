/// The relay runtime event loop.
///
/// A single task owns the [`RelaySession`] and multiplexes over inbound
/// frames, application commands and timers. Frames are read by a separate
/// reader task because `recv_frame` is not cancellation safe.
use std::sync::Arc;

use kenet_transport::LinkError;
use tokio::sync::mpsc;

use crate::error::KenetError;
use crate::types::{now_ms, GeoPoint, NodeId, PacketId};

use super::executor::execute_effects;
use super::memory::NodeState;
use super::state::RelaySession;
use super::transport::Transport;
use super::{Collaborators, RelayEvent, RuntimeCommand, RuntimeConfig, SessionEnd};

/// Frames buffered between the reader task and the loop.
const INBOUND_BUFFER: usize = 64;

type Inbound = Result<Option<Vec<u8>>, LinkError>;

/// Main event loop. Owns the session; parks its memory in `state` on exit.
#[allow(clippy::too_many_arguments)]
pub(super) async fn runtime_loop<T: Transport>(
    transport: Arc<T>,
    mut session: RelaySession,
    state: Arc<NodeState>,
    collab: Collaborators,
    config: RuntimeConfig,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    event_tx: mpsc::Sender<RelayEvent>,
) -> Result<SessionEnd, KenetError> {
    let (frame_tx, mut frame_rx) = mpsc::channel::<Inbound>(INBOUND_BUFFER);
    let reader = tokio::spawn(read_frames(Arc::clone(&transport), frame_tx));

    tracing::info!(id = %session.local_id(), position = %session.position(), "relay session started");

    let outcome = drive(
        transport.as_ref(),
        &mut session,
        &collab,
        &config,
        &mut cmd_rx,
        &mut frame_rx,
        &event_tx,
    )
    .await;
    reader.abort();
    state.check_in(session.into_memory());

    match &outcome {
        Ok(end) => tracing::info!(?end, "relay session ended"),
        Err(e) => tracing::warn!("relay session failed: {e}"),
    }
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn drive<T: Transport>(
    transport: &T,
    session: &mut RelaySession,
    collab: &Collaborators,
    config: &RuntimeConfig,
    cmd_rx: &mut mpsc::Receiver<RuntimeCommand>,
    frame_rx: &mut mpsc::Receiver<Inbound>,
    event_tx: &mpsc::Sender<RelayEvent>,
) -> Result<SessionEnd, KenetError> {
    // ── Timers ──────────────────────────────────────────────────────
    // The beacon fires immediately so the peer learns our position at once,
    // and so does the sweep, for packets held over from an earlier link.
    let mut beacon = tokio::time::interval(config.beacon_interval);
    let mut sweep = tokio::time::interval(config.sweep_interval);
    let mut cleanup = tokio::time::interval(config.cleanup_interval);
    cleanup.tick().await;

    loop {
        let effects = tokio::select! {
            // ── 1. Inbound frames ───────────────────────────────────
            inbound = frame_rx.recv() => match inbound {
                Some(Ok(Some(frame))) => session.handle_frame(&frame),
                Some(Ok(None)) | None => return Ok(SessionEnd::PeerClosed),
                Some(Err(e)) => return Err(e.into()),
            },

            // ── 2. Application commands ─────────────────────────────
            cmd = cmd_rx.recv() => match cmd {
                Some(RuntimeCommand::Shutdown) | None => return Ok(SessionEnd::Shutdown),
                Some(cmd) => handle_command(session, collab, cmd),
            },

            // ── 3. Timers ───────────────────────────────────────────
            _ = beacon.tick() => session.hello_beacon(),
            _ = sweep.tick() => session.tick_sweep(),
            _ = cleanup.tick() => session.tick_cleanup(now_ms()),
        };

        execute_effects(effects, transport, collab, event_tx).await?;
    }
}

fn handle_command(
    session: &mut RelaySession,
    collab: &Collaborators,
    cmd: RuntimeCommand,
) -> Vec<super::RuntimeEffect> {
    match cmd {
        RuntimeCommand::SendMessage {
            to,
            plaintext,
            reply,
        } => match originate_message(session, collab, to, &plaintext) {
            Ok((packet_id, effects)) => {
                let _ = reply.send(Ok(packet_id));
                effects
            }
            Err(e) => {
                let _ = reply.send(Err(e));
                Vec::new()
            }
        },
        RuntimeCommand::Discover { target } => session.discover(target),
        RuntimeCommand::SendGatewaySms {
            target_phone,
            text,
            reply,
        } => match session.send_gateway_sms(target_phone, &text) {
            Ok((packet_id, effects)) => {
                let _ = reply.send(Ok(packet_id));
                effects
            }
            Err(e) => {
                let _ = reply.send(Err(e));
                Vec::new()
            }
        },
        RuntimeCommand::UpdatePosition(position) => session.set_position(position),
        RuntimeCommand::GetNeighbors { reply } => {
            let neighbors: Vec<(NodeId, GeoPoint)> = session
                .neighbors()
                .iter()
                .map(|(id, rec)| (id.clone(), rec.position))
                .collect();
            let _ = reply.send(neighbors);
            Vec::new()
        }
        RuntimeCommand::GetStatus { packet_id, reply } => {
            let _ = reply.send(session.tracker().status(&packet_id));
            Vec::new()
        }
        RuntimeCommand::Shutdown => Vec::new(),
    }
}

/// Look up the contact's key (and, if not cached, its stored location),
/// then hand off to the session.
fn originate_message(
    session: &mut RelaySession,
    collab: &Collaborators,
    to: NodeId,
    plaintext: &[u8],
) -> Result<(PacketId, Vec<super::RuntimeEffect>), KenetError> {
    let public_key = collab
        .persistence
        .load_contact_public_key(&to)?
        .ok_or_else(|| KenetError::UnknownContact(to.to_string()))?;
    if session.contact_location(&to).is_none() {
        if let Some(position) = collab.persistence.load_contact_location(&to)? {
            session.remember_contact(to.clone(), position);
        }
    }
    session.send_message(to, &public_key, plaintext)
}

/// Reader task: forwards frames until EOF or error, then stops.
async fn read_frames<T: Transport>(transport: Arc<T>, frame_tx: mpsc::Sender<Inbound>) {
    loop {
        let inbound = transport.recv_frame().await;
        let last = !matches!(inbound, Ok(Some(_)));
        if frame_tx.send(inbound).await.is_err() || last {
            return;
        }
    }
}
