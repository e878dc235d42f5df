pub mod capi;
pub mod management;
pub mod provisioning;

pub use capi::{CapiCluster, CapiClusterSpec, CapiClusterStatus, Machine, MachineSpec, MachineStatus, CLUSTER_NAME_LABEL};
pub use management::{ManagementCluster, ManagementClusterSpec, ManagementClusterStatus};
pub use provisioning::{ClusterSpec, ClusterStatus, ProvisioningCluster};

use crate::{GroupVersionKind, ResourceKey};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// Base validation for all resources
pub fn validate_base(metadata: &ObjectMeta, namespaced: bool) -> Result<(), ResourceError> {
    let name = metadata
        .name
        .as_deref()
        .ok_or_else(|| ResourceError::MissingField("metadata.name".to_string()))?;

    if !is_valid_name(name) {
        return Err(ResourceError::InvalidName(name.to_string()));
    }

    match metadata.namespace.as_deref() {
        Some(ns) if namespaced && !is_valid_name(ns) => {
            Err(ResourceError::InvalidNamespace(ns.to_string()))
        }
        None if namespaced => Err(ResourceError::MissingField("metadata.namespace".to_string())),
        Some(ns) if !namespaced && !ns.is_empty() => Err(ResourceError::ValidationFailed(format!(
            "cluster-scoped resource must not set metadata.namespace (got '{}')",
            ns
        ))),
        _ => Ok(()),
    }
}

/// Trait for stored resource kinds
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// apiVersion, e.g. "cluster.x-k8s.io/v1beta1"
    const API_VERSION: &'static str;

    /// Kind, e.g. "Machine"
    const KIND: &'static str;

    /// Whether objects of this kind live in a namespace
    const NAMESPACED: bool;

    /// Get the metadata of this resource
    fn metadata(&self) -> &ObjectMeta;

    /// Get mutable metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Get the GroupVersionKind
    fn gvk() -> GroupVersionKind {
        GroupVersionKind::from_api_version_kind(Self::API_VERSION, Self::KIND)
    }

    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// Get the ResourceKey
    fn resource_key(&self) -> Result<ResourceKey, ResourceError> {
        let metadata = self.metadata();
        let name = metadata
            .name
            .as_ref()
            .ok_or_else(|| ResourceError::MissingField("metadata.name".to_string()))?;
        let namespace = metadata.namespace.clone().unwrap_or_default();

        Ok(ResourceKey::new(Self::gvk(), namespace, name))
    }

    fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }

    fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata().labels.as_ref()
    }

    /// True once a delete has been requested and finalizers are holding the object
    fn is_deleting(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }

    fn finalizers(&self) -> &[String] {
        self.metadata().finalizers.as_deref().unwrap_or_default()
    }

    fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// Add a finalizer; returns false if it was already present
    fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.metadata_mut()
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
        true
    }

    /// Remove a finalizer; returns false if it was not present
    fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let Some(finalizers) = self.metadata_mut().finalizers.as_mut() else {
            return false;
        };
        let before = finalizers.len();
        finalizers.retain(|f| f != finalizer);
        let removed = finalizers.len() != before;
        if finalizers.is_empty() {
            self.metadata_mut().finalizers = None;
        }
        removed
    }

    /// Validate the resource
    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(self.metadata(), Self::NAMESPACED)
    }
}

/// Resource-related errors
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid resource name: {0}")]
    InvalidName(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Validate a resource name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let bytes = name.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }

    bytes.iter().all(|&b| alnum(b) || b == b'-' || b == b'.')
}

pub(crate) fn named(namespace: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}
