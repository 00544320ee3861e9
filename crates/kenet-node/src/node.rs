//! Link lifecycle: open a link, run one relay session over it, repeat.
//!
//! The group owner keeps its listener and accepts the next peer after a
//! link drops; the client redials with exponential backoff. One
//! `NodeState` outlives every session: packets seen before a reconnect are
//! not relayed twice, and held messages and their delivery records carry
//! over to the next link.

use std::sync::Arc;
use std::time::Duration;

use kenet_protocol::{
    Collaborators, KenetError, NodeState, RelayRuntime, RuntimeChannels, RuntimeConfig,
    RuntimeHandle, SessionEnd, StaticConnectivity,
};
use kenet_transport::{LinkConfig, LinkError, LinkListener, LinkNode};
use serde_json::json;
use tokio::sync::mpsc;

use crate::console::{emit, event_json, ConsoleCommand};
use crate::gateway::StdoutGateway;
use crate::store::SqliteStore;

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Which end of the link this node is.
#[derive(Debug, Clone)]
pub enum Role {
    /// Group owner: bind and accept.
    Listen,
    /// Client: dial the group owner at this host.
    Connect(String),
}

pub struct Node {
    pub role: Role,
    pub link: LinkConfig,
    pub runtime: RuntimeConfig,
    pub store: Arc<SqliteStore>,
    pub connectivity: Arc<StaticConnectivity>,
}

enum Outcome {
    Quit,
    LinkLost,
}

impl Node {
    /// Run sessions until the operator quits or Ctrl+C.
    pub async fn run(self, mut console: mpsc::Receiver<ConsoleCommand>) -> anyhow::Result<()> {
        let collab = Collaborators {
            persistence: self.store.clone(),
            connectivity: self.connectivity.clone(),
            gateway: Arc::new(StdoutGateway),
        };
        let state = Arc::new(NodeState::new(&self.runtime));
        let listener = match &self.role {
            Role::Listen => Some(LinkListener::bind(&self.link).await?),
            Role::Connect(_) => None,
        };
        let mut console_open = true;
        let mut backoff = RECONNECT_MIN;

        loop {
            let opened = tokio::select! {
                opened = self.open_link(listener.as_ref()) => opened,
                _ = tokio::signal::ctrl_c() => return Ok(()),
            };
            let link = match opened {
                Ok(link) => {
                    backoff = RECONNECT_MIN;
                    link
                }
                Err(e) => {
                    tracing::warn!("link unavailable: {e}; retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(RECONNECT_MAX);
                    continue;
                }
            };
            emit(&json!({ "event": "link_up", "peer": link.peer_addr().to_string() }));

            let channels = RelayRuntime::spawn_with_state(
                Arc::new(link),
                collab.clone(),
                self.runtime.clone(),
                Arc::clone(&state),
            )?;
            let outcome = drive_session(channels, &mut console, &mut console_open, &self.store).await;
            emit(&json!({ "event": "link_down" }));
            if let Outcome::Quit = outcome {
                return Ok(());
            }
            if let Role::Connect(_) = self.role {
                tokio::time::sleep(RECONNECT_MIN).await;
            }
        }
    }

    async fn open_link(&self, listener: Option<&LinkListener>) -> Result<LinkNode, LinkError> {
        match (&self.role, listener) {
            (Role::Connect(host), _) => LinkNode::connect(host, &self.link).await,
            (Role::Listen, Some(listener)) => listener.accept().await,
            (Role::Listen, None) => Err(LinkError::Closed),
        }
    }
}

/// Pump events and console commands until the session ends.
async fn drive_session(
    channels: RuntimeChannels,
    console: &mut mpsc::Receiver<ConsoleCommand>,
    console_open: &mut bool,
    store: &SqliteStore,
) -> Outcome {
    let RuntimeChannels {
        handle,
        mut events,
        mut session,
    } = channels;

    loop {
        tokio::select! {
            end = &mut session => {
                return match end {
                    Ok(Ok(SessionEnd::Shutdown)) => Outcome::Quit,
                    Ok(Ok(SessionEnd::PeerClosed)) => {
                        tracing::info!("peer closed the link");
                        Outcome::LinkLost
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("link lost: {e}");
                        Outcome::LinkLost
                    }
                    Err(e) => {
                        tracing::error!("relay task failed: {e}");
                        Outcome::LinkLost
                    }
                };
            }
            Some(event) = events.recv() => emit(&event_json(&event)),
            cmd = console.recv(), if *console_open => match cmd {
                Some(ConsoleCommand::Quit) => {
                    handle.shutdown().await;
                    let _ = session.await;
                    return Outcome::Quit;
                }
                Some(cmd) => run_command(&handle, store, cmd).await,
                None => *console_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                handle.shutdown().await;
                let _ = session.await;
                return Outcome::Quit;
            }
        }
    }
}

async fn run_command(handle: &RuntimeHandle, store: &SqliteStore, cmd: ConsoleCommand) {
    let result: Result<(), KenetError> = async {
        match cmd {
            ConsoleCommand::Message { to, text } => {
                let id = handle.send_message(to.clone(), text.into_bytes()).await?;
                emit(&json!({ "event": "sent", "packet_id": id.to_string(), "to": to.as_str() }));
            }
            ConsoleCommand::Discover(target) => handle.discover(target).await?,
            ConsoleCommand::Sms { phone, text } => {
                let id = handle.send_gateway_sms(phone, text).await?;
                emit(&json!({ "event": "sms_sent", "packet_id": id.to_string() }));
            }
            ConsoleCommand::Position(position) => {
                store.set_position(position)?;
                handle.update_position(position).await?;
            }
            ConsoleCommand::Neighbors => {
                let neighbors: Vec<_> = handle
                    .neighbors()
                    .await
                    .into_iter()
                    .map(|(id, p)| json!({ "peer": id.as_str(), "lat": p.lat, "lng": p.lng }))
                    .collect();
                emit(&json!({ "event": "neighbors", "neighbors": neighbors }));
            }
            ConsoleCommand::Status(packet_id) => {
                let status = handle.status(packet_id).await;
                emit(&json!({
                    "event": "status",
                    "packet_id": packet_id.to_string(),
                    "current": status.map(|s| format!("{s:?}")),
                }));
            }
            ConsoleCommand::History(peer) => {
                let messages: Vec<_> = store
                    .messages_with(&peer)?
                    .into_iter()
                    .map(|m| {
                        json!({
                            "packet_id": m.packet_id.to_string(),
                            "outbound": m.outbound,
                            "delivered": m.delivered,
                            "timestamp": m.timestamp,
                            "text": String::from_utf8_lossy(&m.plaintext),
                        })
                    })
                    .collect();
                emit(&json!({ "event": "history", "peer": peer.as_str(), "messages": messages }));
            }
            ConsoleCommand::Stats => emit(&json!({ "event": "stats", "stats": handle.stats() })),
            ConsoleCommand::Quit => {}
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        emit(&json!({ "event": "command_error", "error": e.to_string() }));
    }
}
