//! Decides how far the teardown of a provisioning cluster has progressed
//!
//! Every pass recomputes from live state: nothing about the teardown progress
//! is persisted except the condition written by the remove handler. The
//! evaluator walks dependents strictly in order and stops at the first one
//! still pending, issuing the deletes needed to make progress on the way.

use crate::error::Result;
use reaper_core::{
    CapiCluster, Machine, ManagementCluster, ProvisioningCluster, Resource, CLUSTER_NAME_LABEL,
};
use reaper_store::{DeleteOptions, LabelSelector, ResourceClient};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The dependent a teardown is blocked on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitReason {
    /// The backing management cluster still exists
    ManagementCluster(String),
    /// A member machine still exists (lowest name first)
    Machine(String),
    /// The cluster-api cluster still exists
    CapiCluster(String),
}

impl fmt::Display for WaitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitReason::ManagementCluster(name) => {
                write!(f, "waiting for cluster [{}] to delete", name)
            }
            WaitReason::Machine(name) => write!(f, "waiting for machine [{}] to delete", name),
            WaitReason::CapiCluster(name) => {
                write!(f, "waiting for cluster-api cluster [{}] to delete", name)
            }
        }
    }
}

/// Teardown progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Complete,
    Waiting(WaitReason),
}

impl Stage {
    pub fn is_complete(&self) -> bool {
        matches!(self, Stage::Complete)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Complete => write!(f, "teardown complete"),
            Stage::Waiting(reason) => reason.fmt(f),
        }
    }
}

/// Evaluates and drives the teardown of one provisioning cluster
pub struct StageEvaluator {
    management: Arc<dyn ResourceClient<ManagementCluster>>,
    capi_clusters: Arc<dyn ResourceClient<CapiCluster>>,
    machines: Arc<dyn ResourceClient<Machine>>,
}

impl StageEvaluator {
    pub fn new(
        management: Arc<dyn ResourceClient<ManagementCluster>>,
        capi_clusters: Arc<dyn ResourceClient<CapiCluster>>,
        machines: Arc<dyn ResourceClient<Machine>>,
    ) -> Self {
        Self {
            management,
            capi_clusters,
            machines,
        }
    }

    /// Run one pass over the dependents of `cluster`
    pub async fn evaluate(&self, cluster: &ProvisioningCluster) -> Result<Stage> {
        let namespace = cluster.namespace();
        let name = cluster.name();

        if let Some(mgmt_name) = cluster.status.management_cluster_name() {
            if let Err(e) = self
                .management
                .delete("", mgmt_name, &DeleteOptions::default())
                .await
            {
                if !e.is_not_found() {
                    return Err(e.into());
                }
            }

            // Only NotFound counts as gone. Any other read failure is treated
            // as "still there" and reported as a wait.
            match self.management.get("", mgmt_name).await {
                Err(e) if e.is_not_found() => {
                    debug!("Management cluster {} is gone", mgmt_name);
                }
                Err(e) => {
                    debug!("Reading management cluster {} failed: {}", mgmt_name, e);
                    return Ok(Stage::Waiting(WaitReason::ManagementCluster(
                        mgmt_name.to_string(),
                    )));
                }
                Ok(_) => {
                    return Ok(Stage::Waiting(WaitReason::ManagementCluster(
                        mgmt_name.to_string(),
                    )));
                }
            }
        }

        let capi_cluster = match self.capi_clusters.get(namespace, name).await {
            Ok(c) => Some(c),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        if let Some(capi) = capi_cluster.as_ref().filter(|c| !c.is_deleting()) {
            debug!("Deleting cluster-api cluster {}/{}", namespace, name);
            if let Err(e) = self
                .capi_clusters
                .delete(capi.namespace(), capi.name(), &DeleteOptions::default())
                .await
            {
                if !e.is_not_found() {
                    return Err(e.into());
                }
            }
        }

        // Machines go away before their cluster, so report them first
        let selector = LabelSelector::everything().with(CLUSTER_NAME_LABEL, name);
        let mut machines = self.machines.list(namespace, &selector).await?;
        machines.sort_by(|a, b| a.name().cmp(b.name()));
        if let Some(machine) = machines.first() {
            return Ok(Stage::Waiting(WaitReason::Machine(machine.name().to_string())));
        }

        if capi_cluster.is_some() {
            return Ok(Stage::Waiting(WaitReason::CapiCluster(name.to_string())));
        }

        Ok(Stage::Complete)
    }
}
