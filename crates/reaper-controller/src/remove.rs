use crate::handler::RemoveHandler;
use crate::outcome::{Outcome, Reconciled};
use crate::teardown::{Stage, StageEvaluator};
use async_trait::async_trait;
use reaper_core::{ClusterStatus, ConditionType, ProvisioningCluster, Resource};
use reaper_store::ResourceClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Condition tracking teardown progress on a provisioning cluster
pub const REMOVED: ConditionType = ConditionType::new("Removed");

/// Finalizer held on provisioning clusters until their dependents are gone
pub const CLUSTER_FINALIZER: &str = "reaper.dev/cluster-teardown";

/// Drives the teardown of a deleted provisioning cluster and records progress
/// on its `Removed` condition
pub struct ClusterRemoveHandler {
    clusters: Arc<dyn ResourceClient<ProvisioningCluster>>,
    evaluator: StageEvaluator,
    requeue_delay: Duration,
}

impl ClusterRemoveHandler {
    pub fn new(
        clusters: Arc<dyn ResourceClient<ProvisioningCluster>>,
        evaluator: StageEvaluator,
        requeue_delay: Duration,
    ) -> Self {
        Self {
            clusters,
            evaluator,
            requeue_delay,
        }
    }

    pub async fn on_cluster_remove(&self, cluster: ProvisioningCluster) -> Reconciled<ProvisioningCluster> {
        let namespace = cluster.namespace().to_string();
        let name = cluster.name().to_string();

        // Removed=True is terminal
        if REMOVED.is_true(&cluster.status) {
            debug!("Cluster {}/{} already removed", namespace, name);
            return Reconciled::done(cluster);
        }

        let mut status = cluster.status.clone();
        let outcome = match self.evaluator.evaluate(&cluster).await {
            Err(err) => {
                warn!("Teardown of cluster {}/{} failed: {}", namespace, name, err);
                REMOVED.set_error(&mut status, "", &err);
                Outcome::Failed(err)
            }
            Ok(Stage::Complete) => {
                info!("Teardown of cluster {}/{} complete", namespace, name);
                REMOVED.true_(&mut status);
                REMOVED.reason(&mut status, "");
                REMOVED.message(&mut status, "");
                Outcome::Done
            }
            Ok(Stage::Waiting(reason)) => {
                let message = reason.to_string();
                debug!("Cluster {}/{}: {}", namespace, name, message);
                REMOVED.unknown(&mut status);
                REMOVED.reason(&mut status, "Waiting");
                REMOVED.message(&mut status, &message);
                self.clusters
                    .enqueue_after(&namespace, &name, self.requeue_delay);
                Outcome::Waiting(message)
            }
        };

        self.update_status(cluster, status, outcome).await
    }

    /// Persist `status` when it differs from what is stored; a failed write
    /// replaces the outcome
    async fn update_status(
        &self,
        cluster: ProvisioningCluster,
        status: ClusterStatus,
        outcome: Outcome,
    ) -> Reconciled<ProvisioningCluster> {
        if status == cluster.status {
            return Reconciled::new(cluster, outcome);
        }

        let mut updated = cluster.clone();
        updated.status = status;
        match self.clusters.update_status(&updated).await {
            Ok(persisted) => Reconciled::new(persisted, outcome),
            Err(e) => {
                warn!(
                    "Failed to update status of cluster {}/{}: {}",
                    cluster.namespace(),
                    cluster.name(),
                    e
                );
                Reconciled::failed(cluster, e)
            }
        }
    }
}

#[async_trait]
impl RemoveHandler<ProvisioningCluster> for ClusterRemoveHandler {
    fn finalizer(&self) -> &str {
        CLUSTER_FINALIZER
    }

    async fn on_remove(&self, object: ProvisioningCluster) -> Reconciled<ProvisioningCluster> {
        self.on_cluster_remove(object).await
    }
}
