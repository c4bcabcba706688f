use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One wire frame, exactly one JSON object per WebSocket message.
///
/// Either a content envelope carrying an opaque plugin RPC payload, addressed
/// by plugin identity, or an internal control envelope used by the bridge for
/// metadata exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Internal {
        internal: InternalMessage,
    },
    Content {
        #[serde(rename = "pluginID")]
        plugin_id: String,
        content: Value,
    },
}

impl Envelope {
    /// The plugin identity this envelope is addressed to, if any.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Envelope::Content { plugin_id, .. } => Some(plugin_id),
            Envelope::Internal { .. } => None,
        }
    }

    pub fn metadata_request(endpoint_name: &str) -> Self {
        Envelope::Internal {
            internal: InternalMessage {
                endpoint_name: endpoint_name.to_string(),
                metadata: MetadataExchange::request(),
            },
        }
    }

    pub fn metadata_result(endpoint_name: &str, entries: Vec<PluginMetadataEntry>) -> Self {
        Envelope::Internal {
            internal: InternalMessage {
                endpoint_name: endpoint_name.to_string(),
                metadata: MetadataExchange::Result { result: entries },
            },
        }
    }
}

/// Bridge control traffic: metadata request/response tagged with the name of
/// the endpoint the exchange concerns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalMessage {
    #[serde(rename = "endpointName")]
    pub endpoint_name: String,
    pub metadata: MetadataExchange,
}

/// Payload of an internal envelope: the literal string `"request"` or a
/// result object carrying one endpoint's plugin manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataExchange {
    Result { result: Vec<PluginMetadataEntry> },
    Request(String),
}

impl MetadataExchange {
    pub const REQUEST_TAG: &'static str = "request";

    pub fn request() -> Self {
        MetadataExchange::Request(Self::REQUEST_TAG.to_string())
    }

    pub fn is_request(&self) -> bool {
        matches!(self, MetadataExchange::Request(tag) if tag == Self::REQUEST_TAG)
    }
}

/// One plugin's descriptor as advertised in a host manifest.
///
/// `host` is overwritten with the owning endpoint's tag before the entry is
/// exposed to the rest of the system; any manifest fields the bridge does not
/// interpret ride along untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadataEntry {
    pub id: String,
    pub version: String,
    #[serde(
        rename = "entryPoint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub host: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PluginMetadataEntry {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            entry_point: None,
            host: String::new(),
            extra: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn content_envelope_wire_shape() {
        let text = r#"{"pluginID":"publisher.plugin","content":{"method":"ping","args":[1,2]}}"#;
        let envelope: Envelope = serde_json::from_str(text).unwrap();
        match &envelope {
            Envelope::Content { plugin_id, content } => {
                assert_eq!(plugin_id, "publisher.plugin");
                assert_eq!(content["method"], "ping");
            }
            other => panic!("expected content envelope, got {other:?}"),
        }
        assert_eq!(envelope.plugin_id(), Some("publisher.plugin"));
    }

    #[test_timeout::timeout]
    fn internal_request_wire_shape() {
        let value = serde_json::to_value(Envelope::metadata_request("ws://sidecar:2504")).unwrap();
        assert_eq!(
            value,
            json!({"internal": {"endpointName": "ws://sidecar:2504", "metadata": "request"}})
        );

        let parsed: Envelope = serde_json::from_value(value).unwrap();
        match parsed {
            Envelope::Internal { internal } => {
                assert!(internal.metadata.is_request());
                assert_eq!(internal.endpoint_name, "ws://sidecar:2504");
            }
            other => panic!("expected internal envelope, got {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn internal_result_wire_shape() {
        let text = r#"{"internal":{"endpointName":"ws://sidecar:2504","metadata":{"result":[{"id":"a.b","version":"1.0.0","entryPoint":"lib/index.js","host":"","publisher":"a"}]}}}"#;
        let envelope: Envelope = serde_json::from_str(text).unwrap();
        let Envelope::Internal { internal } = envelope else {
            panic!("expected internal envelope");
        };
        assert!(!internal.metadata.is_request());
        let MetadataExchange::Result { result } = internal.metadata else {
            panic!("expected metadata result");
        };
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "a.b");
        assert_eq!(result[0].entry_point.as_deref(), Some("lib/index.js"));
        assert_eq!(result[0].extra["publisher"], "a");
    }

    #[test_timeout::timeout]
    fn envelope_without_plugin_id_is_internal_traffic() {
        let envelope = Envelope::metadata_result("e", vec![]);
        assert_eq!(envelope.plugin_id(), None);
    }
}
