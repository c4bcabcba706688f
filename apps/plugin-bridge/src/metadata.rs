use dashmap::DashMap;
use std::sync::RwLock;
use tracing::debug;

use crate::protocol::PluginMetadataEntry;
use crate::registry::Endpoint;

/// In-memory cache of plugin metadata, remote and local.
///
/// Remote manifests are stashed per endpoint address as responses arrive;
/// the aggregate is a snapshot of whoever has answered so far, flattened in
/// endpoint-registration order. A non-responding endpoint is simply absent,
/// indistinguishable from one with zero plugins.
pub struct MetadataStore {
    remote: DashMap<String, Vec<PluginMetadataEntry>>,
    /// Endpoint addresses in registration order, fixed at construction.
    order: Vec<String>,
    /// Metadata of plugins running on the local/default host, supplied by the
    /// surrounding deployer.
    local: RwLock<Vec<PluginMetadataEntry>>,
}

impl MetadataStore {
    pub fn new(endpoints: &[Endpoint]) -> Self {
        Self {
            remote: DashMap::new(),
            order: endpoints.iter().map(|e| e.address.clone()).collect(),
            local: RwLock::new(Vec::new()),
        }
    }

    /// Stash one endpoint's manifest, stamping each entry with the owning
    /// endpoint's host tag. Replaces any previous manifest from that endpoint.
    pub fn store_remote(&self, endpoint: &Endpoint, mut entries: Vec<PluginMetadataEntry>) {
        for entry in &mut entries {
            entry.host = endpoint.host_tag.clone();
        }
        debug!(
            endpoint = %endpoint.address,
            plugins = entries.len(),
            "stored remote plugin metadata"
        );
        self.remote.insert(endpoint.address.clone(), entries);
    }

    /// All remote metadata received so far, in endpoint-registration order.
    pub fn aggregated(&self) -> Vec<PluginMetadataEntry> {
        let mut all = Vec::new();
        for address in &self.order {
            if let Some(entries) = self.remote.get(address) {
                all.extend(entries.iter().cloned());
            }
        }
        all
    }

    /// Replace the locally-known plugin metadata list.
    pub fn set_local(&self, entries: Vec<PluginMetadataEntry>) {
        *self.local.write().expect("local metadata lock poisoned") = entries;
    }

    /// Stamp `host` onto every locally-known record and return the full
    /// current list. Stamping mutates the stored records; each call reflects
    /// the local state at that moment.
    pub fn local_stamped(&self, endpoint_name: &str) -> Vec<PluginMetadataEntry> {
        let mut local = self.local.write().expect("local metadata lock poisoned");
        for entry in local.iter_mut() {
            entry.host = endpoint_name.to_string();
        }
        local.clone()
    }

    pub fn remote_endpoint_count(&self) -> usize {
        self.remote.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PluginMetadataEntry;

    fn entry(id: &str) -> PluginMetadataEntry {
        PluginMetadataEntry::new(id, "1.0.0")
    }

    #[test_timeout::timeout]
    fn aggregate_preserves_registration_order_and_stamps_hosts() {
        let e1 = Endpoint::new("ws://h1");
        let e2 = Endpoint::new("ws://h2");
        let store = MetadataStore::new(&[e1.clone(), e2.clone()]);

        // Responses arrive out of registration order.
        store.store_remote(&e2, vec![entry("second.plugin")]);
        store.store_remote(&e1, vec![entry("first.plugin")]);

        let all = store.aggregated();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "first.plugin");
        assert_eq!(all[0].host, e1.host_tag);
        assert_eq!(all[1].id, "second.plugin");
        assert_eq!(all[1].host, e2.host_tag);
    }

    #[test_timeout::timeout]
    fn unanswered_endpoint_is_absent_from_aggregate() {
        let e1 = Endpoint::new("ws://h1");
        let e2 = Endpoint::new("ws://h2");
        let store = MetadataStore::new(&[e1.clone(), e2]);

        store.store_remote(&e1, vec![entry("only.plugin")]);

        let all = store.aggregated();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "only.plugin");
    }

    #[test_timeout::timeout]
    fn restash_replaces_previous_manifest() {
        let e1 = Endpoint::new("ws://h1");
        let store = MetadataStore::new(&[e1.clone()]);

        store.store_remote(&e1, vec![entry("old.plugin")]);
        store.store_remote(&e1, vec![entry("new.plugin")]);

        let all = store.aggregated();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "new.plugin");
    }

    #[test_timeout::timeout]
    fn local_stamping_reflects_current_state_per_request() {
        let store = MetadataStore::new(&[]);

        store.set_local(vec![entry("local.one")]);
        let first = store.local_stamped("main");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].host, "main");

        // Local metadata changes between requests; each response is fresh.
        store.set_local(vec![entry("local.one"), entry("local.two")]);
        let second = store.local_stamped("other");
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|e| e.host == "other"));
    }
}
