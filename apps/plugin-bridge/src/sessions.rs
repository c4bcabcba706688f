use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::metadata::MetadataStore;
use crate::protocol::Envelope;
use crate::registry::EndpointRegistry;
use crate::runner::{PluginRunner, RemoteAwareRunner};

/// Heartbeat period for client-facing sessions. One missed pong means the
/// next sweep terminates the connection; this is the sole liveness mechanism.
pub const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Frame queued for a client session's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Ping,
    Close,
}

struct ClientSession {
    id: u64,
    tx: mpsc::UnboundedSender<OutboundFrame>,
    alive: Arc<AtomicBool>,
}

/// Active client-facing sessions, keyed by their monotonically assigned id.
pub struct ClientSessions {
    sessions: DashMap<u64, ClientSession>,
    next_id: AtomicU64,
}

impl ClientSessions {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a newly connected client; the session starts out alive.
    pub fn register(&self, tx: mpsc::UnboundedSender<OutboundFrame>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions.insert(
            id,
            ClientSession {
                id,
                tx,
                alive: Arc::new(AtomicBool::new(true)),
            },
        );
        id
    }

    /// Remove one session. Other sessions' bookkeeping is untouched.
    pub fn remove(&self, id: u64) {
        self.sessions.remove(&id);
    }

    pub fn mark_alive(&self, id: u64) {
        if let Some(session) = self.sessions.get(&id) {
            session.alive.store(true, Ordering::SeqCst);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn send_text(&self, id: u64, text: String) {
        if let Some(session) = self.sessions.get(&id) {
            if session.tx.send(OutboundFrame::Text(text)).is_err() {
                debug!(session = id, "client writer already gone");
            }
        }
    }

    /// Fan a message out to every active session. A failing target is logged
    /// and skipped; it never aborts delivery to the others. Returns how many
    /// sessions the message was queued to.
    pub fn broadcast(&self, text: &str) -> usize {
        let mut delivered = 0;
        for session in self.sessions.iter() {
            match session.tx.send(OutboundFrame::Text(text.to_owned())) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    warn!(session = session.id, "failed to deliver message to client session");
                }
            }
        }
        delivered
    }

    /// One heartbeat pass: terminate every session that failed to answer the
    /// previous probe, then clear the flag and ping the rest. Returns the ids
    /// of the sessions that were terminated.
    pub fn sweep_heartbeats(&self) -> Vec<u64> {
        // Collect first; removing while holding iteration guards deadlocks
        // the map.
        let mut dead = Vec::new();
        let mut live = Vec::new();
        for session in self.sessions.iter() {
            if session.alive.load(Ordering::SeqCst) {
                live.push(session.id);
            } else {
                dead.push(session.id);
            }
        }

        for id in &dead {
            if let Some((_, session)) = self.sessions.remove(id) {
                warn!(session = id, "terminating unresponsive client session");
                let _ = session.tx.send(OutboundFrame::Close);
            }
        }

        for id in live {
            if let Some(session) = self.sessions.get(&id) {
                session.alive.store(false, Ordering::SeqCst);
                if session.tx.send(OutboundFrame::Ping).is_err() {
                    debug!(session = id, "ping skipped, client writer already gone");
                }
            }
        }

        dead
    }
}

/// Background task driving the heartbeat sweep at a fixed interval.
pub fn spawn_heartbeat(sessions: Arc<ClientSessions>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            interval.tick().await;
            let reaped = sessions.sweep_heartbeats();
            if !reaped.is_empty() {
                debug!(count = reaped.len(), "heartbeat sweep reaped sessions");
            }
        }
    })
}

/// Shared handles threaded through the axum router.
#[derive(Clone)]
pub struct BridgeState {
    pub sessions: Arc<ClientSessions>,
    pub runner: Arc<RemoteAwareRunner>,
    pub metadata: Arc<MetadataStore>,
    pub registry: Arc<EndpointRegistry>,
}

/// WebSocket upgrade handler for the client-facing listener.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<BridgeState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: BridgeState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let session_id = state.sessions.register(tx);
    debug!(session = session_id, "client session connected");

    // Writer task: drain the outbound queue into the socket.
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let result = match frame {
                OutboundFrame::Text(text) => sender.send(Message::Text(text)).await,
                OutboundFrame::Ping => sender.send(Message::Ping(Vec::new())).await,
                OutboundFrame::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
        debug!(session = session_id, "client writer task ended");
    });

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                error!(session = session_id, "client socket error: {err}");
                break;
            }
        };

        match frame {
            Message::Text(text) => handle_client_frame(&state, session_id, &text),
            Message::Binary(data) => {
                // Binary frames carrying JSON are accepted for compatibility.
                match String::from_utf8(data) {
                    Ok(text) => handle_client_frame(&state, session_id, &text),
                    Err(_) => {
                        warn!(session = session_id, "dropping non-UTF8 binary frame");
                    }
                }
            }
            Message::Pong(_) => state.sessions.mark_alive(session_id),
            Message::Close(_) => break,
            Message::Ping(_) => {}
        }
    }

    state.sessions.remove(session_id);
    debug!(session = session_id, "client session disconnected");
}

/// Dispatch one inbound client frame: internal metadata requests are answered
/// on the same session; everything else goes to the plugin runner.
fn handle_client_frame(state: &BridgeState, session_id: u64, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(session = session_id, "dropping malformed frame: {err}");
            return;
        }
    };

    match envelope {
        Envelope::Internal { internal } if internal.metadata.is_request() => {
            let entries = state.metadata.local_stamped(&internal.endpoint_name);
            let reply = Envelope::metadata_result(&internal.endpoint_name, entries);
            match serde_json::to_string(&reply) {
                Ok(text) => state.sessions.send_text(session_id, text),
                Err(err) => error!(session = session_id, "failed to encode metadata reply: {err}"),
            }
        }
        Envelope::Internal { internal } => {
            debug!(
                session = session_id,
                endpoint = %internal.endpoint_name,
                "ignoring unexpected internal envelope from client"
            );
        }
        envelope => state.runner.on_message(envelope),
    }
}
