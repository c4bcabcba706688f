use std::sync::Arc;
use tracing::debug;

use crate::metadata::MetadataStore;
use crate::protocol::{Envelope, PluginMetadataEntry};
use crate::router::MessageRouter;

/// The host's plugin-runner contract: decide whether a message is yours and
/// consume it.
pub trait PluginRunner: Send + Sync {
    fn accept(&self, envelope: &Envelope) -> bool;
    fn on_message(&self, envelope: Envelope);
}

/// Routing-capable runner: messages for plugins bound to a remote endpoint go
/// through the router, everything else is delegated to the wrapped default
/// runner unchanged. Selected per message, not per session.
pub struct RemoteAwareRunner {
    router: Arc<MessageRouter>,
    metadata: Arc<MetadataStore>,
    default_runner: Box<dyn PluginRunner>,
}

impl RemoteAwareRunner {
    pub fn new(
        router: Arc<MessageRouter>,
        metadata: Arc<MetadataStore>,
        default_runner: Box<dyn PluginRunner>,
    ) -> Self {
        Self {
            router,
            metadata,
            default_runner,
        }
    }

    /// Remote plugin metadata for the deployment framework to concatenate
    /// with its locally-discovered list.
    pub fn extra_plugin_metadata(&self) -> Vec<PluginMetadataEntry> {
        self.metadata.aggregated()
    }
}

impl PluginRunner for RemoteAwareRunner {
    fn accept(&self, envelope: &Envelope) -> bool {
        envelope.plugin_id().is_some()
    }

    fn on_message(&self, envelope: Envelope) {
        let remote = envelope
            .plugin_id()
            .is_some_and(|plugin_id| self.router.has_remote_endpoint(plugin_id));
        if remote {
            self.router.route_to_remote(&envelope);
        } else {
            self.default_runner.on_message(envelope);
        }
    }
}

/// Stand-in for the in-process plugin host collaborator. The bridge only
/// needs to hand envelopes over; what the local host does with them is out of
/// its hands.
#[derive(Default)]
pub struct InProcessRunner;

impl PluginRunner for InProcessRunner {
    fn accept(&self, envelope: &Envelope) -> bool {
        envelope.plugin_id().is_some()
    }

    fn on_message(&self, envelope: Envelope) {
        debug!(plugin = ?envelope.plugin_id(), "delegated message to in-process plugin host");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointSessions;
    use crate::registry::EndpointRegistry;
    use crate::sessions::ClientSessions;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingRunner {
        received: Mutex<Vec<Envelope>>,
    }

    impl PluginRunner for RecordingRunner {
        fn accept(&self, _envelope: &Envelope) -> bool {
            true
        }

        fn on_message(&self, envelope: Envelope) {
            self.received.lock().unwrap().push(envelope);
        }
    }

    fn fixture() -> (
        RemoteAwareRunner,
        Arc<RecordingRunner>,
        mpsc::UnboundedReceiver<String>,
        Arc<MetadataStore>,
    ) {
        let registry = Arc::new(EndpointRegistry::from_entries([(
            "PLUGIN_REMOTE_ENDPOINT_remote.plugin",
            "ws://h1",
        )]));
        let endpoints = Arc::new(EndpointSessions::new());
        let (tx, rx) = mpsc::unbounded_channel();
        endpoints.attach("ws://h1", tx);
        let metadata = Arc::new(MetadataStore::new(registry.endpoints()));
        let router = Arc::new(MessageRouter::new(
            registry,
            endpoints,
            Arc::new(ClientSessions::new()),
        ));

        let recording = Arc::new(RecordingRunner::default());
        struct Shared(Arc<RecordingRunner>);
        impl PluginRunner for Shared {
            fn accept(&self, envelope: &Envelope) -> bool {
                self.0.accept(envelope)
            }
            fn on_message(&self, envelope: Envelope) {
                self.0.on_message(envelope);
            }
        }
        let runner = RemoteAwareRunner::new(
            router,
            metadata.clone(),
            Box::new(Shared(recording.clone())),
        );
        (runner, recording, rx, metadata)
    }

    #[test_timeout::timeout]
    fn accepts_only_plugin_addressed_envelopes() {
        let (runner, _, _, _) = fixture();
        let content = Envelope::Content {
            plugin_id: "any".to_string(),
            content: json!(null),
        };
        assert!(runner.accept(&content));
        assert!(!runner.accept(&Envelope::metadata_request("e")));
    }

    #[test_timeout::timeout]
    fn remote_bound_messages_go_through_the_router() {
        let (runner, recording, mut rx, _) = fixture();
        runner.on_message(Envelope::Content {
            plugin_id: "remote.plugin".to_string(),
            content: json!({"call": 1}),
        });

        assert!(rx.try_recv().is_ok());
        assert!(recording.received.lock().unwrap().is_empty());
    }

    #[test_timeout::timeout]
    fn unbound_messages_are_delegated_unchanged() {
        let (runner, recording, mut rx, _) = fixture();
        runner.on_message(Envelope::Content {
            plugin_id: "local.plugin".to_string(),
            content: json!({"call": 2}),
        });

        assert!(rx.try_recv().is_err());
        let received = recording.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].plugin_id(), Some("local.plugin"));
    }

    #[test_timeout::timeout]
    fn extra_metadata_surfaces_the_aggregate() {
        let (runner, _, _, metadata) = fixture();
        assert!(runner.extra_plugin_metadata().is_empty());

        let endpoint = crate::registry::Endpoint::new("ws://h1");
        metadata.store_remote(
            &endpoint,
            vec![crate::protocol::PluginMetadataEntry::new("x.y", "1.0.0")],
        );
        let extra = runner.extra_plugin_metadata();
        assert_eq!(extra.len(), 1);
        assert_eq!(extra[0].host, endpoint.host_tag);
    }
}
