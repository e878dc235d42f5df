//! Reaper Core - Fundamental types for the Reaper cluster teardown controllers
//!
//! This crate provides:
//! - Resource keys, GVKs and the `Resource` trait
//! - The cluster, cluster-api and machine resource kinds
//! - Status conditions with change-only timestamp updates
//! - Error types with miette diagnostics
//! - Serialization helpers

pub mod condition;
pub mod error;
pub mod events;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use condition::{Condition, ConditionStatus, ConditionType, HasConditions};
pub use error::{ReaperError, Result};
pub use events::{ResourceEvent, WatchEventType};
pub use resources::{
    is_valid_name, CapiCluster, ClusterStatus, ManagementCluster, Machine, ProvisioningCluster,
    Resource, ResourceError, CLUSTER_NAME_LABEL,
};
pub use types::{object_key, split_object_key, GroupVersionKind, ResourceKey};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};

/// Convert a resource into a JSON value
pub fn to_value<T: serde::Serialize>(resource: &T) -> Result<serde_json::Value> {
    serde_json::to_value(resource).map_err(|e| {
        ReaperError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Convert a JSON value back into a resource
pub fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        ReaperError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Split a multi-document YAML stream into JSON values, skipping empty documents
pub fn from_yaml_documents(data: &str) -> Result<Vec<serde_json::Value>> {
    use serde::Deserialize;

    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(data) {
        let value = serde_json::Value::deserialize(document).map_err(|e| {
            ReaperError::serialization_error(
                format!("Failed to deserialize from YAML: {}", e),
                Some(Box::new(e)),
            )
        })?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_value_roundtrip() {
        let cluster = ProvisioningCluster::new("ns", "foo").with_management_cluster("mgmt1");

        let value = to_value(&cluster).unwrap();
        let back: ProvisioningCluster = from_value(value).unwrap();
        assert_eq!(back, cluster);
    }

    #[test]
    fn test_yaml_documents() {
        let yaml = r#"
apiVersion: management.reaper.dev/v3
kind: Cluster
metadata:
  name: mgmt1
---
---
apiVersion: cluster.x-k8s.io/v1beta1
kind: Machine
metadata:
  name: m-1
  namespace: ns
"#;
        let docs = from_yaml_documents(yaml).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["metadata"]["name"], "mgmt1");
        assert_eq!(docs[1]["kind"], "Machine");
    }

    #[test]
    fn test_invalid_yaml_is_serialization_error() {
        let err = from_yaml_documents("kind: [unterminated").unwrap_err();
        assert!(matches!(err, ReaperError::SerializationError { .. }));
    }
}
