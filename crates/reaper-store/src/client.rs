use crate::selector::LabelSelector;
use async_trait::async_trait;
use reaper_core::{Resource, Result};
use std::time::Duration;

/// Index function: maps an object to the index values it should be found under
pub type IndexFn<K> = Box<dyn Fn(&K) -> Vec<String> + Send + Sync>;

/// What happens to dependents (objects owned via ownerReferences) on removal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PropagationPolicy {
    /// Dependents are deleted once the owner is gone
    #[default]
    Background,
    /// Dependents are left in place
    Orphan,
}

/// Must hold on the stored object for a delete to proceed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub uid: Option<String>,
    pub resource_version: Option<String>,
}

/// Options accepted by `ResourceClient::delete`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub propagation_policy: PropagationPolicy,
    pub preconditions: Option<Preconditions>,
}

impl DeleteOptions {
    pub fn orphan() -> Self {
        Self {
            propagation_policy: PropagationPolicy::Orphan,
            ..Default::default()
        }
    }

    /// Only delete the object instance with this uid
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.preconditions.get_or_insert_with(Preconditions::default).uid = Some(uid.into());
        self
    }

    /// Only delete if the stored resourceVersion still matches
    pub fn with_resource_version(mut self, resource_version: impl Into<String>) -> Self {
        self.preconditions
            .get_or_insert_with(Preconditions::default)
            .resource_version = Some(resource_version.into());
        self
    }
}

/// Typed access to one resource kind
///
/// Cluster-scoped kinds take an empty namespace. Every "not found" outcome is
/// reported as `ReaperError::ResourceNotFound` so call sites can tolerate it
/// with `is_not_found()`.
#[async_trait]
pub trait ResourceClient<K: Resource>: Send + Sync {
    /// Fetch one object
    async fn get(&self, namespace: &str, name: &str) -> Result<K>;

    /// List objects in a namespace (empty = all namespaces) matching a selector
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>>;

    /// List objects registered under `key` in a secondary index
    async fn list_by_index(&self, index: &str, key: &str) -> Result<Vec<K>>;

    /// Register a maintained secondary index
    fn add_indexer(&self, index: &str, func: IndexFn<K>);

    /// Request deletion; objects with finalizers are only marked
    async fn delete(&self, namespace: &str, name: &str, options: &DeleteOptions) -> Result<()>;

    /// Replace metadata and spec (status is preserved)
    async fn update(&self, object: &K) -> Result<K>;

    /// Replace only the status
    async fn update_status(&self, object: &K) -> Result<K>;

    /// Ask the owning controller to reconcile this object again after `delay`
    fn enqueue_after(&self, namespace: &str, name: &str, delay: Duration);
}
