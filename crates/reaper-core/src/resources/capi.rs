//! cluster-api objects observed during teardown

use super::{named, Resource};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label cluster-api puts on every machine of a cluster
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Orchestration-layer cluster object, same namespace/name as the provisioning cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapiCluster {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: CapiClusterSpec,
    #[serde(default)]
    pub status: CapiClusterStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapiClusterSpec {
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapiClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl CapiCluster {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: named(Some(namespace), name),
            ..Default::default()
        }
    }
}

impl Resource for CapiCluster {
    const API_VERSION: &'static str = "cluster.x-k8s.io/v1beta1";
    const KIND: &'static str = "Cluster";
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Member machine of a cluster-api cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: MachineSpec,
    #[serde(default)]
    pub status: MachineStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    #[serde(default)]
    pub cluster_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

impl Machine {
    /// A machine labeled as a member of `cluster_name`
    pub fn new(namespace: &str, name: &str, cluster_name: &str) -> Self {
        let mut metadata = named(Some(namespace), name);
        metadata.labels = Some(BTreeMap::from([(
            CLUSTER_NAME_LABEL.to_string(),
            cluster_name.to_string(),
        )]));
        Self {
            metadata,
            spec: MachineSpec {
                cluster_name: cluster_name.to_string(),
            },
            ..Default::default()
        }
    }
}

impl Resource for Machine {
    const API_VERSION: &'static str = "cluster.x-k8s.io/v1beta1";
    const KIND: &'static str = "Machine";
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
