//! Shared fixtures for controller tests

use crate::cascade::{register_by_cluster_index, ManagementRemoveHandler};
use crate::remove::ClusterRemoveHandler;
use crate::teardown::StageEvaluator;
use async_trait::async_trait;
use reaper_core::{
    CapiCluster, Machine, ManagementCluster, ProvisioningCluster, ReaperError, Resource, Result,
};
use reaper_store::{DeleteOptions, IndexFn, LabelSelector, MemoryClient, MemoryStore, ResourceClient};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clusters: MemoryClient<ProvisioningCluster>,
    pub management: MemoryClient<ManagementCluster>,
    pub capi: MemoryClient<CapiCluster>,
    pub machines: MemoryClient<Machine>,
}

impl Fixture {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let clusters = store.client::<ProvisioningCluster>();
        register_by_cluster_index(&clusters);
        Self {
            management: store.client(),
            capi: store.client(),
            machines: store.client(),
            clusters,
            store,
        }
    }

    pub fn create_cluster(&self, cluster: ProvisioningCluster) -> ProvisioningCluster {
        self.store.create(&cluster).unwrap()
    }

    pub fn evaluator(&self) -> StageEvaluator {
        StageEvaluator::new(
            Arc::new(self.management.clone()),
            Arc::new(self.capi.clone()),
            Arc::new(self.machines.clone()),
        )
    }

    pub fn remove_handler(&self) -> ClusterRemoveHandler {
        self.remove_handler_with(self.evaluator())
    }

    pub fn remove_handler_with(&self, evaluator: StageEvaluator) -> ClusterRemoveHandler {
        ClusterRemoveHandler::new(
            Arc::new(self.clusters.clone()),
            evaluator,
            Duration::from_secs(5),
        )
    }

    pub fn cascade_handler(&self) -> ManagementRemoveHandler {
        ManagementRemoveHandler::new(Arc::new(self.clusters.clone()))
    }
}

/// A client whose calls all fail with an internal error
pub(crate) struct Broken<K> {
    delete_not_found: bool,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Broken<K> {
    pub fn new() -> Self {
        Self {
            delete_not_found: false,
            _kind: PhantomData,
        }
    }

    /// Deletes report NotFound; everything else still fails
    pub fn not_found_on_delete() -> Self {
        Self {
            delete_not_found: true,
            _kind: PhantomData,
        }
    }

    fn fail<T>(&self, op: &str) -> Result<T> {
        Err(ReaperError::internal_error(format!("{} unavailable", op)))
    }
}

#[async_trait]
impl<K: Resource> ResourceClient<K> for Broken<K> {
    async fn get(&self, _namespace: &str, _name: &str) -> Result<K> {
        self.fail("get")
    }

    async fn list(&self, _namespace: &str, _selector: &LabelSelector) -> Result<Vec<K>> {
        self.fail("list")
    }

    async fn list_by_index(&self, _index: &str, _key: &str) -> Result<Vec<K>> {
        self.fail("index")
    }

    fn add_indexer(&self, _index: &str, _func: IndexFn<K>) {}

    async fn delete(&self, namespace: &str, name: &str, _options: &DeleteOptions) -> Result<()> {
        if self.delete_not_found {
            return Err(ReaperError::resource_not_found(format!("{}/{}", namespace, name)));
        }
        self.fail("delete")
    }

    async fn update(&self, _object: &K) -> Result<K> {
        self.fail("update")
    }

    async fn update_status(&self, _object: &K) -> Result<K> {
        self.fail("update status")
    }

    fn enqueue_after(&self, _namespace: &str, _name: &str, _delay: Duration) {}
}

/// A client whose index still lists objects that deletes report as NotFound
pub(crate) struct Vanished<K> {
    listed: Vec<K>,
}

impl<K> Vanished<K> {
    pub fn new(listed: Vec<K>) -> Self {
        Self { listed }
    }
}

#[async_trait]
impl<K: Resource> ResourceClient<K> for Vanished<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        Err(ReaperError::resource_not_found(format!("{}/{}", namespace, name)))
    }

    async fn list(&self, _namespace: &str, _selector: &LabelSelector) -> Result<Vec<K>> {
        Ok(self.listed.clone())
    }

    async fn list_by_index(&self, _index: &str, _key: &str) -> Result<Vec<K>> {
        Ok(self.listed.clone())
    }

    fn add_indexer(&self, _index: &str, _func: IndexFn<K>) {}

    async fn delete(&self, namespace: &str, name: &str, _options: &DeleteOptions) -> Result<()> {
        Err(ReaperError::resource_not_found(format!("{}/{}", namespace, name)))
    }

    async fn update(&self, object: &K) -> Result<K> {
        Err(ReaperError::resource_not_found(object.name()))
    }

    async fn update_status(&self, object: &K) -> Result<K> {
        Err(ReaperError::resource_not_found(object.name()))
    }

    fn enqueue_after(&self, _namespace: &str, _name: &str, _delay: Duration) {}
}
