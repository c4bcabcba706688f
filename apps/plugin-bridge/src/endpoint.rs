use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::metadata::MetadataStore;
use crate::protocol::{Envelope, MetadataExchange};
use crate::registry::Endpoint;
use crate::router::MessageRouter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound channels of the endpoint-facing sessions, keyed by endpoint
/// address. The router sends serialized envelopes through these.
pub struct EndpointSessions {
    senders: DashMap<String, mpsc::UnboundedSender<String>>,
}

impl EndpointSessions {
    pub fn new() -> Self {
        Self {
            senders: DashMap::new(),
        }
    }

    pub fn attach(&self, address: &str, tx: mpsc::UnboundedSender<String>) {
        self.senders.insert(address.to_string(), tx);
    }

    pub fn detach(&self, address: &str) {
        self.senders.remove(address);
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.senders.contains_key(address)
    }

    pub fn send(&self, address: &str, text: String) -> bool {
        match self.senders.get(address) {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }
}

/// Dial one remote endpoint and run its session until the socket closes.
///
/// On open the session asks the endpoint for its plugin manifest; manifest
/// responses go to the metadata store, everything else is handed to the
/// client-facing delivery path unmodified. A connect failure is logged and
/// the endpoint simply never contributes plugins or traffic.
pub fn spawn_endpoint_session(
    endpoint: Endpoint,
    sessions: Arc<EndpointSessions>,
    metadata: Arc<MetadataStore>,
    router: Arc<MessageRouter>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let connected = match timeout(CONNECT_TIMEOUT, connect_async(&endpoint.address)).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(err)) => {
                warn!(endpoint = %endpoint.address, "failed to connect to remote endpoint: {err}");
                return;
            }
            Err(_) => {
                warn!(endpoint = %endpoint.address, "timed out connecting to remote endpoint");
                return;
            }
        };
        info!(endpoint = %endpoint.address, "connected to remote endpoint");

        let (mut write, mut read) = connected.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        sessions.attach(&endpoint.address, tx.clone());

        // Ask for the manifest before any plugin traffic is routed.
        let request = Envelope::metadata_request(&endpoint.address);
        match serde_json::to_string(&request) {
            Ok(text) => {
                let _ = tx.send(text);
            }
            Err(err) => warn!(endpoint = %endpoint.address, "failed to encode metadata request: {err}"),
        }

        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    let Some(text) = outbound else { break };
                    if write.send(Message::Text(text.into())).await.is_err() {
                        warn!(endpoint = %endpoint.address, "endpoint socket write failed");
                        break;
                    }
                }
                inbound = read.next() => {
                    let Some(frame) = inbound else { break };
                    match frame {
                        Ok(Message::Text(text)) => {
                            handle_endpoint_frame(&endpoint, &metadata, &router, &text);
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(endpoint = %endpoint.address, "endpoint socket error: {err}");
                            break;
                        }
                    }
                }
            }
        }

        sessions.detach(&endpoint.address);
        warn!(endpoint = %endpoint.address, "endpoint session ended");
    })
}

/// Dispatch one inbound frame from a remote endpoint: a metadata result is
/// stashed, everything else flows to the connected clients as-is.
pub fn handle_endpoint_frame(
    endpoint: &Endpoint,
    metadata: &MetadataStore,
    router: &MessageRouter,
    text: &str,
) {
    if let Ok(Envelope::Internal { internal }) = serde_json::from_str::<Envelope>(text) {
        match internal.metadata {
            MetadataExchange::Result { result } => {
                metadata.store_remote(endpoint, result);
                return;
            }
            MetadataExchange::Request(_) => {
                debug!(
                    endpoint = %endpoint.address,
                    "ignoring metadata request from remote endpoint"
                );
                return;
            }
        }
    }
    router.deliver_to_client(text);
}
