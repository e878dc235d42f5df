use super::{named, Resource};
use crate::condition::{Condition, HasConditions};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// User-facing cluster record whose deletion drives the teardown
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningCluster {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: ClusterStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_credential_secret_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Name of the management cluster backing this cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ClusterStatus {
    /// The referenced management cluster, ignoring an empty reference
    pub fn management_cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref().filter(|name| !name.is_empty())
    }
}

impl HasConditions for ClusterStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl ProvisioningCluster {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: named(Some(namespace), name),
            ..Default::default()
        }
    }

    /// Builder-style setter for the management cluster reference
    pub fn with_management_cluster(mut self, cluster_name: &str) -> Self {
        self.status.cluster_name = Some(cluster_name.to_string());
        self
    }
}

impl Resource for ProvisioningCluster {
    const API_VERSION: &'static str = "provisioning.reaper.dev/v1";
    const KIND: &'static str = "Cluster";
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_reference_is_none() {
        let mut status = ClusterStatus::default();
        assert_eq!(status.management_cluster_name(), None);

        status.cluster_name = Some(String::new());
        assert_eq!(status.management_cluster_name(), None);

        status.cluster_name = Some("c-m-1".to_string());
        assert_eq!(status.management_cluster_name(), Some("c-m-1"));
    }

    #[test]
    fn test_status_field_names() {
        let cluster = ProvisioningCluster::new("ns", "foo").with_management_cluster("mgmt1");
        let json = serde_json::to_value(&cluster).unwrap();
        assert_eq!(json["status"]["clusterName"], "mgmt1");
        assert!(json["status"].get("conditions").is_none());
    }
}
