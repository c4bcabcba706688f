use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::endpoint::EndpointSessions;
use crate::protocol::Envelope;
use crate::registry::EndpointRegistry;
use crate::sessions::ClientSessions;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("envelope carries no plugin identity")]
    MissingPluginId,
    #[error("no remote endpoint bound for plugin {0}")]
    UnboundPlugin(String),
    #[error("endpoint session for {0} is not connected")]
    EndpointUnavailable(String),
    #[error("failed to serialize envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Dispatches envelopes between the client-facing sessions and the
/// endpoint-facing sessions by plugin identity.
///
/// Messages are never queued or retried: a routing miss drops the message
/// with a log line, and a message arriving while no client is attached is
/// discarded.
pub struct MessageRouter {
    registry: Arc<EndpointRegistry>,
    endpoints: Arc<EndpointSessions>,
    clients: Arc<ClientSessions>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        endpoints: Arc<EndpointSessions>,
        clients: Arc<ClientSessions>,
    ) -> Self {
        Self {
            registry,
            endpoints,
            clients,
        }
    }

    pub fn has_remote_endpoint(&self, plugin_id: &str) -> bool {
        self.registry.has_binding(plugin_id)
    }

    /// Forward an envelope to the remote endpoint its plugin is bound to.
    /// Routing must succeed or the message is lost; failures are logged and
    /// never propagated to the caller.
    pub fn route_to_remote(&self, envelope: &Envelope) {
        if let Err(err) = self.try_route(envelope) {
            error!("dropping message: {err}");
        }
    }

    pub fn try_route(&self, envelope: &Envelope) -> Result<(), RoutingError> {
        let plugin_id = envelope.plugin_id().ok_or(RoutingError::MissingPluginId)?;
        let endpoint = self
            .registry
            .resolve_binding(plugin_id)
            .ok_or_else(|| RoutingError::UnboundPlugin(plugin_id.to_string()))?;
        let text = serde_json::to_string(envelope)?;
        if !self.endpoints.send(&endpoint.address, text) {
            return Err(RoutingError::EndpointUnavailable(endpoint.address.clone()));
        }
        debug!(plugin = plugin_id, endpoint = %endpoint.address, "routed message to remote endpoint");
        Ok(())
    }

    /// Hand a raw message from an endpoint session to every attached client.
    /// With no client attached the message is discarded, by design.
    pub fn deliver_to_client(&self, raw: &str) {
        if self.clients.is_empty() {
            debug!("no client attached, discarding endpoint message");
            return;
        }
        let delivered = self.clients.broadcast(raw);
        if delivered == 0 {
            warn!("endpoint message reached no client session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn router_with_endpoint() -> (MessageRouter, mpsc::UnboundedReceiver<String>) {
        let registry = Arc::new(EndpointRegistry::from_entries([(
            "PLUGIN_REMOTE_ENDPOINT_X",
            "ws://h1",
        )]));
        let endpoints = Arc::new(EndpointSessions::new());
        let (tx, rx) = mpsc::unbounded_channel();
        endpoints.attach("ws://h1", tx);
        let router = MessageRouter::new(registry, endpoints, Arc::new(ClientSessions::new()));
        (router, rx)
    }

    #[test_timeout::timeout]
    fn bound_plugin_routes_exactly_one_message() {
        let (router, mut rx) = router_with_endpoint();
        let envelope = Envelope::Content {
            plugin_id: "X".to_string(),
            content: json!({"method": "call"}),
        };

        router.route_to_remote(&envelope);

        let sent = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(value["pluginID"], "X");
        assert_eq!(value["content"]["method"], "call");
        assert!(rx.try_recv().is_err());
    }

    #[test_timeout::timeout]
    fn unbound_plugin_is_dropped_without_send() {
        let (router, mut rx) = router_with_endpoint();
        let envelope = Envelope::Content {
            plugin_id: "unbound".to_string(),
            content: json!({}),
        };

        assert!(matches!(
            router.try_route(&envelope),
            Err(RoutingError::UnboundPlugin(id)) if id == "unbound"
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test_timeout::timeout]
    fn detached_endpoint_reports_unavailable() {
        let registry = Arc::new(EndpointRegistry::from_entries([(
            "PLUGIN_REMOTE_ENDPOINT_X",
            "ws://h1",
        )]));
        let endpoints = Arc::new(EndpointSessions::new());
        let router = MessageRouter::new(registry, endpoints, Arc::new(ClientSessions::new()));

        let envelope = Envelope::Content {
            plugin_id: "X".to_string(),
            content: json!({}),
        };
        assert!(matches!(
            router.try_route(&envelope),
            Err(RoutingError::EndpointUnavailable(_))
        ));
    }

    #[test_timeout::timeout]
    fn delivery_without_clients_discards_silently() {
        let (router, _rx) = router_with_endpoint();
        // Must not panic or error.
        router.deliver_to_client("{\"pluginID\":\"X\",\"content\":null}");
    }
}
