use std::collections::HashMap;
use tracing::debug;

/// Environment variables named `PLUGIN_REMOTE_ENDPOINT_<pluginID>` declare
/// both the remote endpoint set and the plugin-ID bindings.
pub const ENDPOINT_ENV_PREFIX: &str = "PLUGIN_REMOTE_ENDPOINT_";

/// One remote sidecar plugin host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Connection URI, e.g. `ws://plugin-sidecar:2504`.
    pub address: String,
    /// Sanitized address used as the display/grouping key stamped into
    /// metadata entries.
    pub host_tag: String,
}

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let host_tag = sanitize_host_tag(&address);
        Self { address, host_tag }
    }
}

fn sanitize_host_tag(address: &str) -> String {
    address
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Startup-time lookup table from plugin identity to remote endpoint.
///
/// Built once from the environment snapshot and read-only afterwards; a
/// plugin without a binding runs on the local/default host.
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
    bindings: HashMap<String, usize>,
}

impl EndpointRegistry {
    /// Parse configuration entries into an ordered, deduplicated endpoint set
    /// plus the plugin-ID bindings. Malformed entries are skipped, never an
    /// error.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut endpoints: Vec<Endpoint> = Vec::new();
        let mut index_by_address: HashMap<String, usize> = HashMap::new();
        let mut bindings = HashMap::new();

        for (key, value) in entries {
            let key = key.as_ref();
            let Some(plugin_id) = key.strip_prefix(ENDPOINT_ENV_PREFIX) else {
                continue;
            };
            let address = value.as_ref().trim();
            if plugin_id.is_empty() || address.is_empty() {
                debug!(key, "skipping malformed remote endpoint entry");
                continue;
            }
            let index = *index_by_address
                .entry(address.to_string())
                .or_insert_with(|| {
                    endpoints.push(Endpoint::new(address));
                    endpoints.len() - 1
                });
            bindings.insert(plugin_id.to_string(), index);
        }

        Self {
            endpoints,
            bindings,
        }
    }

    /// Build from the process environment. Variables are sorted by name so
    /// registration order is deterministic.
    pub fn from_env() -> Self {
        let mut vars: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENDPOINT_ENV_PREFIX))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Self::from_entries(vars)
    }

    /// All configured endpoints, in registration order, deduplicated.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn resolve_binding(&self, plugin_id: &str) -> Option<&Endpoint> {
        self.bindings
            .get(plugin_id)
            .map(|&index| &self.endpoints[index])
    }

    pub fn has_binding(&self, plugin_id: &str) -> bool {
        self.bindings.contains_key(plugin_id)
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}
