use super::{named, Resource};
use crate::condition::{Condition, HasConditions};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Cluster-scoped administrative cluster record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagementCluster {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ManagementClusterSpec,
    #[serde(default)]
    pub status: ManagementClusterStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementClusterStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HasConditions for ManagementClusterStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl ManagementCluster {
    pub fn new(name: &str) -> Self {
        Self {
            metadata: named(None, name),
            ..Default::default()
        }
    }
}

impl Resource for ManagementCluster {
    const API_VERSION: &'static str = "management.reaper.dev/v3";
    const KIND: &'static str = "Cluster";
    const NAMESPACED: bool = false;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
