//! Shared cluster control-plane state mutated by the generic handlers.
//!
//! Concurrency-safe by construction: every map is a `DashMap`, handlers
//! hold the state behind an `Arc` and never exchange other mutable state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Control-plane state for compute nodes, dist variables, and metadata
/// versions. Storage-side effects stay behind the excluded driver layer;
/// this records the proxy's own view.
#[derive(Default)]
pub struct ClusterState {
    dist_variables: DashMap<String, String>,
    node_labels: DashMap<String, Vec<String>>,
    disabled_instances: DashMap<String, ()>,
    metadata_versions: DashMap<String, Arc<AtomicU64>>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dist_variable(&self, name: &str, value: &str) {
        self.dist_variables.insert(name.to_string(), value.to_string());
    }

    pub fn dist_variable(&self, name: &str) -> Option<String> {
        self.dist_variables.get(name).map(|v| v.clone())
    }

    /// Returns the number of labels newly added.
    pub fn add_labels(&self, instance_id: &str, labels: &[String]) -> u64 {
        let mut entry = self.node_labels.entry(instance_id.to_string()).or_default();
        let mut added = 0;
        for label in labels {
            if !entry.contains(label) {
                entry.push(label.clone());
                added += 1;
            }
        }
        added
    }

    /// Returns the number of labels removed. Empty `labels` removes all.
    pub fn remove_labels(&self, instance_id: &str, labels: &[String]) -> u64 {
        let Some(mut entry) = self.node_labels.get_mut(instance_id) else {
            return 0;
        };
        if labels.is_empty() {
            let removed = entry.len() as u64;
            entry.clear();
            return removed;
        }
        let before = entry.len();
        entry.retain(|l| !labels.contains(l));
        (before - entry.len()) as u64
    }

    pub fn labels(&self, instance_id: &str) -> Vec<String> {
        self.node_labels
            .get(instance_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn set_instance_enabled(&self, instance_id: &str, enable: bool) {
        if enable {
            self.disabled_instances.remove(instance_id);
        } else {
            self.disabled_instances.insert(instance_id.to_string(), ());
        }
    }

    pub fn is_instance_enabled(&self, instance_id: &str) -> bool {
        !self.disabled_instances.contains_key(instance_id)
    }

    /// Bump and return the metadata version for a database or table key.
    pub fn bump_metadata_version(&self, key: &str) -> u64 {
        let counter = self
            .metadata_versions
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn metadata_version(&self, key: &str) -> u64 {
        self.metadata_versions
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}
