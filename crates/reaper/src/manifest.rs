//! Loading objects from YAML manifests and naming objects on the command line

use reaper_core::{
    from_value, from_yaml_documents, CapiCluster, GroupVersionKind, Machine, ManagementCluster,
    ProvisioningCluster, ReaperError, Resource, ResourceKey, Result,
};
use reaper_store::{DeleteOptions, MemoryStore, ResourceClient};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Create every object of a multi-document YAML stream; returns their keys in order
pub fn load_manifest_str(store: &MemoryStore, data: &str) -> Result<Vec<ResourceKey>> {
    from_yaml_documents(data)?
        .into_iter()
        .map(|document| create_object(store, document))
        .collect()
}

/// Read and load a manifest file
pub fn load_manifest(store: &MemoryStore, path: &Path) -> miette::Result<Vec<ResourceKey>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read manifest '{}': {}", path.display(), e))?;
    Ok(load_manifest_str(store, &data)?)
}

fn create_object(store: &MemoryStore, document: Value) -> Result<ResourceKey> {
    let api_version = document["apiVersion"].as_str().unwrap_or_default();
    let kind = document["kind"].as_str().unwrap_or_default();
    let gvk = GroupVersionKind::from_api_version_kind(api_version, kind);

    if gvk == ProvisioningCluster::gvk() {
        create_typed::<ProvisioningCluster>(store, document)
    } else if gvk == ManagementCluster::gvk() {
        create_typed::<ManagementCluster>(store, document)
    } else if gvk == CapiCluster::gvk() {
        create_typed::<CapiCluster>(store, document)
    } else if gvk == Machine::gvk() {
        create_typed::<Machine>(store, document)
    } else {
        Err(ReaperError::invalid_kind(api_version, kind))
    }
}

fn create_typed<K: Resource>(store: &MemoryStore, document: Value) -> Result<ResourceKey> {
    let object: K = from_value(document)?;
    let created = store.create(&object)?;
    debug!("Loaded {} {}/{}", K::gvk(), created.namespace(), created.name());
    created
        .resource_key()
        .map_err(|e| ReaperError::internal_error(e.to_string()))
}

/// Kinds that can be named on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Cluster,
    Management,
    CapiCluster,
    Machine,
}

impl TargetKind {
    fn gvk(&self) -> GroupVersionKind {
        match self {
            TargetKind::Cluster => ProvisioningCluster::gvk(),
            TargetKind::Management => ManagementCluster::gvk(),
            TargetKind::CapiCluster => CapiCluster::gvk(),
            TargetKind::Machine => Machine::gvk(),
        }
    }

    fn namespaced(&self) -> bool {
        !matches!(self, TargetKind::Management)
    }
}

/// An object named as `<kind>/<namespace>/<name>`, or `management/<name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub kind: TargetKind,
    pub namespace: String,
    pub name: String,
}

impl Target {
    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(self.kind.gvk(), self.namespace.as_str(), self.name.as_str())
    }

    /// Issue a delete for this object
    pub async fn delete(&self, store: &Arc<MemoryStore>) -> Result<()> {
        let options = DeleteOptions::default();
        match self.kind {
            TargetKind::Cluster => {
                store
                    .client::<ProvisioningCluster>()
                    .delete(&self.namespace, &self.name, &options)
                    .await
            }
            TargetKind::Management => {
                store
                    .client::<ManagementCluster>()
                    .delete("", &self.name, &options)
                    .await
            }
            TargetKind::CapiCluster => {
                store
                    .client::<CapiCluster>()
                    .delete(&self.namespace, &self.name, &options)
                    .await
            }
            TargetKind::Machine => {
                store
                    .client::<Machine>()
                    .delete(&self.namespace, &self.name, &options)
                    .await
            }
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once('/')
            .ok_or_else(|| format!("expected <kind>/<namespace>/<name>, got '{}'", s))?;

        let kind = match kind {
            "cluster" => TargetKind::Cluster,
            "management" => TargetKind::Management,
            "capi-cluster" => TargetKind::CapiCluster,
            "machine" => TargetKind::Machine,
            other => {
                return Err(format!(
                    "unknown kind '{}' (expected cluster, management, capi-cluster or machine)",
                    other
                ))
            }
        };

        let (namespace, name) = if kind.namespaced() {
            rest.split_once('/')
                .ok_or_else(|| format!("expected <kind>/<namespace>/<name>, got '{}'", s))?
        } else {
            ("", rest)
        };

        if name.is_empty() || name.contains('/') || (kind.namespaced() && namespace.is_empty()) {
            return Err(format!("invalid object reference '{}'", s));
        }

        Ok(Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource_key())
    }
}
