use crate::error::Result;
use crate::handler::RemoveHandler;
use crate::outcome::Reconciled;
use async_trait::async_trait;
use reaper_core::{ManagementCluster, ProvisioningCluster, Resource};
use reaper_store::{DeleteOptions, ResourceClient};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Index of provisioning clusters by the management cluster backing them
pub const BY_CLUSTER: &str = "byCluster";

/// Finalizer held on management clusters until dependents have been deleted
pub const MANAGEMENT_FINALIZER: &str = "reaper.dev/management-cascade";

/// Register the `byCluster` index on a provisioning cluster client
pub fn register_by_cluster_index(clusters: &dyn ResourceClient<ProvisioningCluster>) {
    clusters.add_indexer(
        BY_CLUSTER,
        Box::new(|cluster: &ProvisioningCluster| {
            cluster
                .status
                .management_cluster_name()
                .map(|name| vec![name.to_string()])
                .unwrap_or_default()
        }),
    );
}

/// Deletes every provisioning cluster backed by a management cluster that is
/// being removed
pub struct ManagementRemoveHandler {
    clusters: Arc<dyn ResourceClient<ProvisioningCluster>>,
}

impl ManagementRemoveHandler {
    pub fn new(clusters: Arc<dyn ResourceClient<ProvisioningCluster>>) -> Self {
        Self { clusters }
    }

    pub async fn on_management_remove(&self, cluster: ManagementCluster) -> Reconciled<ManagementCluster> {
        match self.cascade(&cluster).await {
            Ok(()) => Reconciled::done(cluster),
            Err(e) => {
                warn!("Cascade from management cluster {} failed: {}", cluster.name(), e);
                Reconciled::failed(cluster, e)
            }
        }
    }

    async fn cascade(&self, cluster: &ManagementCluster) -> Result<()> {
        let dependents = self.clusters.list_by_index(BY_CLUSTER, cluster.name()).await?;
        for dependent in dependents {
            info!(
                "Deleting cluster {}/{} backed by management cluster {}",
                dependent.namespace(),
                dependent.name(),
                cluster.name()
            );
            match self
                .clusters
                .delete(dependent.namespace(), dependent.name(), &DeleteOptions::default())
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!("Cluster {}/{} already gone", dependent.namespace(), dependent.name());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoveHandler<ManagementCluster> for ManagementRemoveHandler {
    fn finalizer(&self) -> &str {
        MANAGEMENT_FINALIZER
    }

    async fn on_remove(&self, object: ManagementCluster) -> Reconciled<ManagementCluster> {
        self.on_management_remove(object).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remove::CLUSTER_FINALIZER;
    use crate::testing::{Broken, Fixture, Vanished};

    #[tokio::test]
    async fn test_deletes_only_backed_clusters() {
        let fx = Fixture::new();
        let mut held = ProvisioningCluster::new("ns", "foo").with_management_cluster("mgmt1");
        held.add_finalizer(CLUSTER_FINALIZER);
        fx.create_cluster(held);
        fx.create_cluster(ProvisioningCluster::new("other", "bar").with_management_cluster("mgmt1"));
        fx.create_cluster(ProvisioningCluster::new("ns", "baz").with_management_cluster("mgmt2"));
        let mgmt = fx.store.create(&ManagementCluster::new("mgmt1")).unwrap();

        let result = fx.cascade_handler().on_management_remove(mgmt).await;

        assert!(result.outcome.is_done());
        assert!(fx.clusters.get("ns", "foo").await.unwrap().is_deleting());
        assert!(fx.clusters.get("other", "bar").await.unwrap_err().is_not_found());
        assert!(!fx.clusters.get("ns", "baz").await.unwrap().is_deleting());

        let calls = fx.clusters.calls();
        assert_eq!(calls.list_by_index, 1);
        assert_eq!(calls.list, 0);
        assert_eq!(calls.delete, 2);
    }

    #[tokio::test]
    async fn test_no_dependents_is_done() {
        let fx = Fixture::new();
        let mgmt = fx.store.create(&ManagementCluster::new("mgmt1")).unwrap();

        let result = fx.cascade_handler().on_management_remove(mgmt).await;
        assert!(result.outcome.is_done());
        assert_eq!(fx.clusters.calls().delete, 0);
    }

    #[tokio::test]
    async fn test_repeat_pass_is_harmless() {
        let fx = Fixture::new();
        let mut held = ProvisioningCluster::new("ns", "foo").with_management_cluster("mgmt1");
        held.add_finalizer(CLUSTER_FINALIZER);
        fx.create_cluster(held);
        let mgmt = fx.store.create(&ManagementCluster::new("mgmt1")).unwrap();
        let handler = fx.cascade_handler();

        let first = handler.on_management_remove(mgmt).await;
        let second = handler.on_management_remove(first.object).await;

        assert!(second.outcome.is_done());
        assert!(fx.clusters.get("ns", "foo").await.unwrap().is_deleting());
    }

    #[tokio::test]
    async fn test_dependent_gone_before_delete_is_done() {
        let fx = Fixture::new();
        let mgmt = fx.store.create(&ManagementCluster::new("mgmt1")).unwrap();
        let gone = ProvisioningCluster::new("ns", "gone").with_management_cluster("mgmt1");
        let handler = ManagementRemoveHandler::new(Arc::new(Vanished::new(vec![gone])));

        let result = handler.on_management_remove(mgmt).await;
        assert!(result.outcome.is_done());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_failed() {
        let fx = Fixture::new();
        let mgmt = fx.store.create(&ManagementCluster::new("mgmt1")).unwrap();
        let handler = ManagementRemoveHandler::new(Arc::new(Broken::<ProvisioningCluster>::new()));

        let result = handler.on_management_remove(mgmt).await;
        assert!(result.outcome.is_failed());
        assert_eq!(result.object.name(), "mgmt1");
    }
}
