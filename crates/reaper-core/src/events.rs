use crate::types::{GroupVersionKind, ResourceKey};
use serde::{Deserialize, Serialize};

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// A resource event emitted by the store on mutations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEvent {
    /// Type of watch event (ADDED, MODIFIED, DELETED)
    pub event_type: WatchEventType,
    /// GroupVersionKind of the resource
    pub gvk: GroupVersionKind,
    /// Full resource key (gvk + namespace + name)
    pub resource_key: ResourceKey,
    /// The serialized resource object
    pub object: serde_json::Value,
    /// Resource version at the time of the event
    pub resource_version: String,
}

impl ResourceEvent {
    fn new(
        event_type: WatchEventType,
        resource_key: ResourceKey,
        object: serde_json::Value,
        resource_version: String,
    ) -> Self {
        Self {
            event_type,
            gvk: resource_key.gvk.clone(),
            resource_key,
            object,
            resource_version,
        }
    }

    /// Create an ADDED event
    pub fn added(resource_key: ResourceKey, object: serde_json::Value, resource_version: String) -> Self {
        Self::new(WatchEventType::Added, resource_key, object, resource_version)
    }

    /// Create a MODIFIED event
    pub fn modified(resource_key: ResourceKey, object: serde_json::Value, resource_version: String) -> Self {
        Self::new(WatchEventType::Modified, resource_key, object, resource_version)
    }

    /// Create a DELETED event
    pub fn deleted(resource_key: ResourceKey, object: serde_json::Value, resource_version: String) -> Self {
        Self::new(WatchEventType::Deleted, resource_key, object, resource_version)
    }
}
