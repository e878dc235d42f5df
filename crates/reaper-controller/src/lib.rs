//! Reaper Controller - Cascading teardown controllers
//!
//! This crate provides:
//! - StageEvaluator: ordered checks over the dependents of a provisioning cluster
//! - ClusterRemoveHandler: the teardown state machine behind the `Removed` condition
//! - ManagementRemoveHandler: deletes provisioning clusters when their
//!   management cluster goes away
//! - FinalizerController: work queue, event pump and finalizer bookkeeping
//! - Manager: wires both controllers to a store

// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod cascade;
pub mod config;
pub mod error;
pub mod handler;
pub mod outcome;
pub mod queue;
pub mod remove;
pub mod runner;
pub mod teardown;

#[cfg(test)]
mod testing;

// Re-export primary types
pub use cascade::{register_by_cluster_index, ManagementRemoveHandler, BY_CLUSTER, MANAGEMENT_FINALIZER};
pub use config::ControllerConfig;
pub use error::{ControllerError, Result};
pub use handler::RemoveHandler;
pub use outcome::{Outcome, Reconciled};
pub use queue::{RateLimiter, WorkQueue};
pub use remove::{ClusterRemoveHandler, CLUSTER_FINALIZER, REMOVED};
pub use runner::FinalizerController;
pub use teardown::{Stage, StageEvaluator, WaitReason};

use reaper_core::{CapiCluster, Machine, ManagementCluster, ProvisioningCluster};
use reaper_store::{MemoryClient, MemoryStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Owns the clients for every kind and runs both teardown controllers
pub struct Manager {
    store: Arc<MemoryStore>,
    config: ControllerConfig,
    clusters: MemoryClient<ProvisioningCluster>,
    management: MemoryClient<ManagementCluster>,
    capi_clusters: MemoryClient<CapiCluster>,
    machines: MemoryClient<Machine>,
}

impl Manager {
    pub fn new(store: Arc<MemoryStore>, config: ControllerConfig) -> Result<Self> {
        config.validate()?;

        let clusters = store.client::<ProvisioningCluster>();
        register_by_cluster_index(&clusters);

        Ok(Self {
            management: store.client(),
            capi_clusters: store.client(),
            machines: store.client(),
            clusters,
            config,
            store,
        })
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn evaluator(&self) -> StageEvaluator {
        StageEvaluator::new(
            Arc::new(self.management.clone()),
            Arc::new(self.capi_clusters.clone()),
            Arc::new(self.machines.clone()),
        )
    }

    pub fn cluster_controller(&self) -> Arc<FinalizerController<ProvisioningCluster>> {
        let handler = ClusterRemoveHandler::new(
            Arc::new(self.clusters.clone()),
            self.evaluator(),
            self.config.requeue_delay,
        );
        FinalizerController::new(
            Arc::clone(&self.store),
            Arc::new(self.clusters.clone()),
            Arc::new(handler),
            self.config.clone(),
        )
    }

    pub fn management_controller(&self) -> Arc<FinalizerController<ManagementCluster>> {
        let handler = ManagementRemoveHandler::new(Arc::new(self.clusters.clone()));
        FinalizerController::new(
            Arc::clone(&self.store),
            Arc::new(self.management.clone()),
            Arc::new(handler),
            self.config.clone(),
        )
    }

    /// Run both controllers until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!("Starting teardown controllers");

        let clusters = tokio::spawn(self.cluster_controller().run(token.clone()));
        let management = tokio::spawn(self.management_controller().run(token.clone()));

        let (clusters, management) = tokio::join!(clusters, management);
        for result in [clusters, management] {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    error!("Controller task failed: {}", e);
                    return Err(ControllerError::internal_error(format!(
                        "controller task failed: {}",
                        e
                    )));
                }
            }
        }

        info!("Teardown controllers stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_core::{OwnerReference, Resource};
    use reaper_store::{DeleteOptions, ResourceClient};
    use std::time::Duration;

    fn owned_by(capi: &CapiCluster) -> Option<Vec<OwnerReference>> {
        Some(vec![OwnerReference {
            api_version: CapiCluster::API_VERSION.to_string(),
            kind: CapiCluster::KIND.to_string(),
            name: capi.name().to_string(),
            uid: capi.uid().unwrap_or_default().to_string(),
            ..Default::default()
        }])
    }

    async fn wait_for<F: FnMut() -> bool>(mut check: F) {
        for _ in 0..2000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ControllerConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(Manager::new(MemoryStore::new(), config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_management_removal_cascades_through_teardown() {
        let store = MemoryStore::new();
        let manager = Arc::new(Manager::new(store.clone(), ControllerConfig::default()).unwrap());

        store.create(&ManagementCluster::new("mgmt1")).unwrap();
        let capi = store.create(&CapiCluster::new("ns", "foo")).unwrap();
        for name in ["foo-a", "foo-b"] {
            let mut machine = Machine::new("ns", name, "foo");
            machine.metadata.owner_references = owned_by(&capi);
            store.create(&machine).unwrap();
        }
        store
            .create(&ProvisioningCluster::new("ns", "foo").with_management_cluster("mgmt1"))
            .unwrap();

        let token = CancellationToken::new();
        let run = {
            let token = token.clone();
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.run(token).await })
        };

        // Both kinds pick up their finalizers before anything is deleted
        let clusters = store.client::<ProvisioningCluster>();
        let management = store.client::<ManagementCluster>();
        wait_for(|| {
            store.snapshot().iter().filter(|o| o["metadata"]["finalizers"].is_array()).count() == 2
        })
        .await;

        management
            .delete("", "mgmt1", &DeleteOptions::default())
            .await
            .unwrap();

        wait_for(|| store.is_empty()).await;
        assert!(clusters.get("ns", "foo").await.unwrap_err().is_not_found());
        assert!(manager.evaluator().evaluate(&ProvisioningCluster::new("ns", "foo")).await.unwrap().is_complete());

        token.cancel();
        run.await.unwrap().unwrap();
    }
}
