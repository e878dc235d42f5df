use crate::config::ControllerConfig;
use crate::error::Result;
use crate::handler::RemoveHandler;
use crate::outcome::{Outcome, Reconciled};
use crate::queue::{RateLimiter, WorkQueue};
use reaper_core::{object_key, split_object_key, Resource};
use reaper_store::{LabelSelector, MemoryStore, ResourceClient};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Keeps a finalizer on every object of kind `K` and runs the remove handler
/// once such an object is deletion-marked
///
/// Store events and requeue requests for `K` feed a work queue served by
/// `workers` tasks. Each pass re-reads the object, so a key may be queued any
/// number of times.
pub struct FinalizerController<K: Resource> {
    client: Arc<dyn ResourceClient<K>>,
    handler: Arc<dyn RemoveHandler<K>>,
    store: Arc<MemoryStore>,
    queue: Arc<WorkQueue>,
    limiter: RateLimiter,
    config: ControllerConfig,
}

impl<K: Resource> FinalizerController<K> {
    pub fn new(
        store: Arc<MemoryStore>,
        client: Arc<dyn ResourceClient<K>>,
        handler: Arc<dyn RemoveHandler<K>>,
        config: ControllerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            handler,
            store,
            queue: WorkQueue::new(),
            limiter: RateLimiter::new(config.backoff_base, config.backoff_max),
            config,
        })
    }

    /// Run until `token` is cancelled
    pub async fn run(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        info!(
            "Starting {} controller (finalizer: {}, workers: {})",
            K::gvk(),
            self.handler.finalizer(),
            self.config.workers
        );

        let mut workers = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let this = Arc::clone(&self);
            workers.push(tokio::spawn(async move { this.worker(id).await }));
        }

        self.pump(token).await;
        self.queue.shut_down();

        for worker in workers {
            if let Err(e) = worker.await {
                error!("{} worker task failed: {}", K::gvk(), e);
            }
        }

        info!("{} controller stopped", K::gvk());
        Ok(())
    }

    /// Feed the queue from store events, requeue requests and periodic resyncs
    async fn pump(&self, token: CancellationToken) {
        let gvk = K::gvk();
        let mut events = self.store.subscribe();
        let mut requeues = self.store.subscribe_requeues();
        let mut resync = tokio::time::interval(self.config.resync_interval);
        // The first tick completes immediately and doubles as the initial list
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("{} event pump shutting down", gvk);
                    return;
                }
                _ = resync.tick() => self.resync().await,
                event = events.recv() => match event {
                    Ok(event) if event.gvk == gvk => {
                        self.queue.add(event.resource_key.object_key());
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!("{} controller missed {} events, re-listing", gvk, missed);
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => return,
                },
                request = requeues.recv() => match request {
                    Ok(request) if request.gvk == gvk => {
                        self.queue
                            .add_after(object_key(&request.namespace, &request.name), request.delay);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!("{} controller missed {} requeues, re-listing", gvk, missed);
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => return,
                },
            }
        }
    }

    /// Queue every object of this kind
    async fn resync(&self) {
        match self.client.list("", &LabelSelector::everything()).await {
            Ok(objects) => {
                debug!("Resyncing {} {} objects", objects.len(), K::gvk());
                for object in objects {
                    self.queue.add(object_key(object.namespace(), object.name()));
                }
            }
            Err(e) => warn!("Failed to list {} for resync: {}", K::gvk(), e),
        }
    }

    async fn worker(&self, id: usize) {
        debug!("{} worker {} started", K::gvk(), id);
        while let Some(key) = self.queue.get().await {
            let (namespace, name) = split_object_key(&key);
            match self.reconcile(namespace, name).await {
                Ok(()) => self.limiter.forget(&key),
                Err(e) => {
                    let delay = self.limiter.when(&key);
                    warn!(
                        "Reconcile of {} {} failed, retrying in {:?}: {}",
                        K::gvk(),
                        key,
                        delay,
                        e
                    );
                    self.queue.add_after(key.clone(), delay);
                }
            }
            self.queue.done(&key);
        }
        debug!("{} worker {} stopped", K::gvk(), id);
    }

    /// One pass over a single object
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<()> {
        let object = match self.client.get(namespace, name).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => {
                debug!("{} {} is gone", K::gvk(), object_key(namespace, name));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let finalizer = self.handler.finalizer();

        if !object.is_deleting() {
            if object.has_finalizer(finalizer) {
                return Ok(());
            }
            let mut updated = object;
            updated.add_finalizer(finalizer);
            self.client.update(&updated).await?;
            debug!(
                "Added finalizer {} to {} {}",
                finalizer,
                K::gvk(),
                object_key(namespace, name)
            );
            return Ok(());
        }

        if !object.has_finalizer(finalizer) {
            return Ok(());
        }

        let Reconciled { object, outcome } = self.handler.on_remove(object).await;
        match outcome {
            Outcome::Done => {
                let mut updated = object;
                if updated.remove_finalizer(finalizer) {
                    self.client.update(&updated).await?;
                    info!(
                        "Removed finalizer {} from {} {}",
                        finalizer,
                        K::gvk(),
                        object_key(namespace, name)
                    );
                }
                Ok(())
            }
            Outcome::Waiting(message) => {
                debug!("{} {}: {}", K::gvk(), object_key(namespace, name), message);
                Ok(())
            }
            Outcome::Failed(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remove::{CLUSTER_FINALIZER, REMOVED};
    use crate::testing::Fixture;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reaper_core::{CapiCluster, ProvisioningCluster, ReaperError};
    use reaper_store::DeleteOptions;

    /// Handler that replays scripted outcomes
    struct Scripted {
        outcomes: Mutex<Vec<Outcome>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<Outcome>) -> Arc<Self> {
            outcomes.reverse();
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl RemoveHandler<ProvisioningCluster> for Scripted {
        fn finalizer(&self) -> &str {
            CLUSTER_FINALIZER
        }

        async fn on_remove(&self, object: ProvisioningCluster) -> Reconciled<ProvisioningCluster> {
            *self.calls.lock() += 1;
            let outcome = self.outcomes.lock().pop().unwrap_or(Outcome::Done);
            Reconciled::new(object, outcome)
        }
    }

    fn controller(
        fx: &Fixture,
        handler: Arc<dyn RemoveHandler<ProvisioningCluster>>,
    ) -> Arc<FinalizerController<ProvisioningCluster>> {
        FinalizerController::new(
            fx.store.clone(),
            Arc::new(fx.clusters.clone()),
            handler,
            ControllerConfig::default(),
        )
    }

    async fn mark_deleted(fx: &Fixture, namespace: &str, name: &str) {
        fx.clusters
            .delete(namespace, name, &DeleteOptions::default())
            .await
            .unwrap();
    }

    async fn eventually<F>(mut check: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..1000 {
            if check() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_live_object_gets_finalizer() {
        let fx = Fixture::new();
        fx.create_cluster(ProvisioningCluster::new("ns", "foo"));
        let ctrl = controller(&fx, Scripted::new(vec![]));

        ctrl.reconcile("ns", "foo").await.unwrap();
        let stored = fx.clusters.get("ns", "foo").await.unwrap();
        assert!(stored.has_finalizer(CLUSTER_FINALIZER));

        // Second pass writes nothing
        ctrl.reconcile("ns", "foo").await.unwrap();
        assert_eq!(fx.clusters.calls().update, 1);
    }

    #[tokio::test]
    async fn test_missing_object_is_ignored() {
        let fx = Fixture::new();
        let ctrl = controller(&fx, Scripted::new(vec![]));
        assert!(ctrl.reconcile("ns", "foo").await.is_ok());
    }

    #[tokio::test]
    async fn test_waiting_keeps_finalizer_and_done_releases() {
        let fx = Fixture::new();
        let mut cluster = ProvisioningCluster::new("ns", "foo");
        cluster.add_finalizer(CLUSTER_FINALIZER);
        fx.create_cluster(cluster);
        mark_deleted(&fx, "ns", "foo").await;

        let handler = Scripted::new(vec![Outcome::Waiting("waiting for machine [a] to delete".into())]);
        let ctrl = controller(&fx, handler.clone());

        ctrl.reconcile("ns", "foo").await.unwrap();
        let stored = fx.clusters.get("ns", "foo").await.unwrap();
        assert!(stored.has_finalizer(CLUSTER_FINALIZER));

        ctrl.reconcile("ns", "foo").await.unwrap();
        assert!(fx.clusters.get("ns", "foo").await.unwrap_err().is_not_found());
        assert_eq!(handler.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_outcome_is_returned() {
        let fx = Fixture::new();
        let mut cluster = ProvisioningCluster::new("ns", "foo");
        cluster.add_finalizer(CLUSTER_FINALIZER);
        fx.create_cluster(cluster);
        mark_deleted(&fx, "ns", "foo").await;

        let failure = ReaperError::internal_error("store unavailable");
        let ctrl = controller(&fx, Scripted::new(vec![Outcome::Failed(failure.into())]));

        assert!(ctrl.reconcile("ns", "foo").await.is_err());
        assert!(fx.clusters.get("ns", "foo").await.unwrap().has_finalizer(CLUSTER_FINALIZER));
    }

    #[tokio::test]
    async fn test_foreign_finalizers_survive_release() {
        let fx = Fixture::new();
        let mut cluster = ProvisioningCluster::new("ns", "foo");
        cluster.add_finalizer(CLUSTER_FINALIZER);
        cluster.add_finalizer("example.dev/other");
        fx.create_cluster(cluster);
        mark_deleted(&fx, "ns", "foo").await;

        let ctrl = controller(&fx, Scripted::new(vec![]));
        ctrl.reconcile("ns", "foo").await.unwrap();

        let stored = fx.clusters.get("ns", "foo").await.unwrap();
        assert_eq!(stored.finalizers(), ["example.dev/other".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_waits_for_capi_then_completes() {
        let fx = Fixture::new();
        let mut capi = CapiCluster::new("ns", "foo");
        capi.add_finalizer("cluster.x-k8s.io/cluster");
        fx.store.create(&capi).unwrap();
        fx.create_cluster(ProvisioningCluster::new("ns", "foo").with_management_cluster("mgmt1"));

        let mut requeues = fx.store.subscribe_requeues();
        let ctrl = controller(&fx, Arc::new(fx.remove_handler()));
        let token = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&ctrl).run(token.clone()));

        let clusters = fx.clusters.clone();
        eventually(|| {
            clusters
                .store()
                .snapshot()
                .iter()
                .any(|o| o["metadata"]["finalizers"][0] == CLUSTER_FINALIZER)
        })
        .await;

        mark_deleted(&fx, "ns", "foo").await;

        let request = requeues.recv().await.unwrap();
        assert_eq!(request.delay, std::time::Duration::from_secs(5));

        let waiting = loop {
            let current = fx.clusters.get("ns", "foo").await.unwrap();
            if REMOVED.get(&current.status).is_some() {
                break current;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        };
        assert!(waiting.has_finalizer(CLUSTER_FINALIZER));
        assert_eq!(
            REMOVED.get_message(&waiting.status),
            Some("waiting for cluster-api cluster [foo] to delete")
        );

        // The cluster-api controller finishes its own teardown
        let mut capi = fx.capi.get("ns", "foo").await.unwrap();
        capi.remove_finalizer("cluster.x-k8s.io/cluster");
        fx.capi.update(&capi).await.unwrap();

        let store = fx.store.clone();
        let key = ProvisioningCluster::new("ns", "foo").resource_key().unwrap();
        eventually(|| !store.contains(&key)).await;

        token.cancel();
        task.await.unwrap().unwrap();
    }
}
