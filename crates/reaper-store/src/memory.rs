use crate::client::{DeleteOptions, IndexFn, Preconditions, PropagationPolicy, ResourceClient};
use crate::index::{Index, RawIndexFn};
use crate::selector::LabelSelector;
use crate::stats::{Call, CallCounts, ClientStats};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use reaper_core::{
    from_value, to_value, GroupVersionKind, ObjectMeta, ReaperError, Resource, ResourceEvent,
    ResourceKey, Result, Time,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Configuration for the in-memory store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the event and requeue broadcast channels
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_capacity: 4096,
        }
    }
}

/// A request to reconcile an object again after a delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequeueRequest {
    pub gvk: GroupVersionKind,
    pub namespace: String,
    pub name: String,
    pub delay: Duration,
}

struct Entry {
    key: ResourceKey,
    value: Value,
}

enum Deletion {
    /// Finalizers are still present; only deletionTimestamp was set
    Marked,
    /// The object is gone; carries its uid for garbage collection
    Removed { uid: Option<String> },
}

#[derive(Default)]
struct Inner {
    /// storage key -> object
    objects: BTreeMap<String, Entry>,
    /// "{gvk}#{index}" -> index
    indices: HashMap<String, Index>,
    version: u64,
}

/// In-memory object store with Kubernetes-style deletion semantics
///
/// Objects are kept as JSON keyed by `ResourceKey::storage_key()`. Every write
/// bumps a store-wide resourceVersion; writes carrying a stale version fail
/// with `Conflict`. Deleting an object that still has finalizers only sets
/// `deletionTimestamp`; the object is removed once an update empties its
/// finalizers. Removal garbage-collects dependents that point at the removed
/// uid through `ownerReferences`.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    event_tx: broadcast::Sender<ResourceEvent>,
    requeue_tx: broadcast::Sender<RequeueRequest>,
}

impl MemoryStore {
    /// Create a new store with default config
    pub fn new() -> Arc<Self> {
        Self::with_config(StoreConfig::default())
    }

    /// Create a new store with custom config
    pub fn with_config(config: StoreConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let (requeue_tx, _) = broadcast::channel(config.event_capacity);
        Arc::new(Self {
            inner: RwLock::new(Inner::default()),
            event_tx,
            requeue_tx,
        })
    }

    /// Typed client for one kind
    pub fn client<K: Resource>(self: &Arc<Self>) -> MemoryClient<K> {
        MemoryClient {
            store: Arc::clone(self),
            stats: Arc::new(ClientStats::default()),
            _kind: PhantomData,
        }
    }

    /// Subscribe to resource events
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to delayed reconcile requests
    pub fn subscribe_requeues(&self) -> broadcast::Receiver<RequeueRequest> {
        self.requeue_tx.subscribe()
    }

    /// Create an object, assigning uid, resourceVersion and creationTimestamp
    pub fn create<K: Resource>(&self, object: &K) -> Result<K> {
        object.validate().map_err(|e| {
            ReaperError::invalid_resource(e.to_string(), "Fix the object metadata and retry")
        })?;
        let key = object.resource_key().map_err(|e| {
            ReaperError::invalid_resource(e.to_string(), "Set metadata.name on the object")
        })?;

        let mut value = to_value(object)?;
        stamp_type(&mut value, &key.gvk);

        let version = {
            let mut inner = self.inner.write();
            if inner.objects.contains_key(&key.storage_key()) {
                return Err(ReaperError::resource_already_exists(key.to_string()));
            }

            let version = inner.next_version();
            let mut meta = metadata_of(&value);
            meta.uid = Some(Uuid::new_v4().to_string());
            meta.resource_version = Some(version.clone());
            meta.creation_timestamp = Some(Time(Utc::now()));
            meta.deletion_timestamp = None;
            set_metadata(&mut value, &meta);

            inner.put(key.clone(), value.clone());
            version
        };

        info!("Created resource: {} with version {}", key, version);
        self.publish(vec![ResourceEvent::added(key, value.clone(), version)]);

        from_value(value)
    }

    /// Check whether an object is currently stored (deletion-marked objects count)
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.inner.read().objects.contains_key(&key.storage_key())
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored objects in storage-key order
    pub fn snapshot(&self) -> Vec<Value> {
        self.inner
            .read()
            .objects
            .values()
            .map(|e| e.value.clone())
            .collect()
    }

    fn get_raw(&self, key: &ResourceKey) -> Result<Value> {
        debug!("Getting resource: {}", key);
        self.inner
            .read()
            .objects
            .get(&key.storage_key())
            .map(|e| e.value.clone())
            .ok_or_else(|| ReaperError::resource_not_found(key.to_string()))
    }

    fn list_raw(&self, gvk: &GroupVersionKind, namespace: &str) -> Vec<Value> {
        let prefix = ResourceKey::kind_prefix(gvk, Some(namespace));
        let inner = self.inner.read();
        inner
            .objects
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(_, e)| e.key.gvk == *gvk)
            .map(|(_, e)| e.value.clone())
            .collect()
    }

    fn delete_raw(&self, key: &ResourceKey, options: &DeleteOptions) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.write();
            if let Some(preconditions) = &options.preconditions {
                let entry = inner
                    .objects
                    .get(&key.storage_key())
                    .ok_or_else(|| ReaperError::resource_not_found(key.to_string()))?;
                check_preconditions(key, &metadata_of(&entry.value), preconditions)?;
            }
            match inner.delete_one(&key.storage_key(), &mut events) {
                None => return Err(ReaperError::resource_not_found(key.to_string())),
                Some(Deletion::Marked) => debug!("Marked {} for deletion", key),
                Some(Deletion::Removed { uid }) => {
                    info!("Deleted resource: {}", key);
                    if let (PropagationPolicy::Background, Some(uid)) =
                        (options.propagation_policy, uid)
                    {
                        inner.collect_garbage(uid, &mut events);
                    }
                }
            }
        }
        self.publish(events);
        Ok(())
    }

    /// Write an object back. With `status_only` only `.status` is taken from
    /// `incoming`; otherwise everything but `.status` and server-owned metadata.
    fn update_raw(&self, key: &ResourceKey, incoming: Value, status_only: bool) -> Result<Value> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.write();
            let storage_key = key.storage_key();
            let current = inner
                .objects
                .get(&storage_key)
                .map(|e| e.value.clone())
                .ok_or_else(|| ReaperError::resource_not_found(key.to_string()))?;

            let current_meta = metadata_of(&current);
            let incoming_meta = metadata_of(&incoming);
            let current_version = current_meta.resource_version.clone().unwrap_or_default();
            if let Some(expected) = incoming_meta.resource_version.as_deref() {
                if expected != current_version {
                    return Err(ReaperError::conflict(
                        key.to_string(),
                        expected,
                        current_version,
                    ));
                }
            }

            let mut next = if status_only {
                let mut next = current.clone();
                copy_field(&mut next, "status", incoming.get("status"));
                next
            } else {
                let mut next = incoming.clone();
                copy_field(&mut next, "status", current.get("status"));
                let mut meta = incoming_meta;
                meta.name = current_meta.name.clone();
                meta.namespace = current_meta.namespace.clone();
                meta.uid = current_meta.uid.clone();
                meta.creation_timestamp = current_meta.creation_timestamp.clone();
                meta.deletion_timestamp = current_meta.deletion_timestamp.clone();
                meta.resource_version = current_meta.resource_version.clone();
                set_metadata(&mut next, &meta);
                stamp_type(&mut next, &key.gvk);
                next
            };

            if next == current {
                debug!("Update of {} is a no-op, keeping version {}", key, current_version);
                return Ok(current);
            }

            let version = inner.next_version();
            let mut meta = metadata_of(&next);
            meta.resource_version = Some(version.clone());
            set_metadata(&mut next, &meta);
            inner.put(key.clone(), next.clone());
            debug!("Updated {} to version {}", key, version);
            events.push(ResourceEvent::modified(key.clone(), next.clone(), version));

            let released = meta.deletion_timestamp.is_some()
                && meta.finalizers.as_ref().is_none_or(|f| f.is_empty());
            if released {
                info!("Finalizers cleared, removing {}", key);
                if let Some(uid) = inner.remove(&storage_key, &mut events) {
                    inner.collect_garbage(uid, &mut events);
                }
            }

            next
        };
        self.publish(events);
        Ok(result)
    }

    fn add_index(&self, gvk: GroupVersionKind, name: &str, func: RawIndexFn) {
        let mut inner = self.inner.write();
        let mut index = Index::new(gvk.clone(), func);
        for (storage_key, entry) in &inner.objects {
            index.update(&entry.key.gvk, storage_key, Some(&entry.value));
        }
        inner.indices.insert(index_id(&gvk, name), index);
        debug!("Registered index {} for {}", name, gvk);
    }

    fn lookup_index(&self, gvk: &GroupVersionKind, name: &str, value: &str) -> Result<Vec<Value>> {
        let inner = self.inner.read();
        let index = inner.indices.get(&index_id(gvk, name)).ok_or_else(|| {
            ReaperError::internal_error(format!("Index '{}' is not registered for {}", name, gvk))
        })?;
        Ok(index
            .lookup(value)
            .iter()
            .filter_map(|k| inner.objects.get(k))
            .map(|e| e.value.clone())
            .collect())
    }

    fn request_requeue(&self, request: RequeueRequest) {
        debug!(
            "Requeue {}/{} ({}) after {:?}",
            request.namespace, request.name, request.gvk, request.delay
        );
        let _ = self.requeue_tx.send(request);
    }

    fn publish(&self, events: Vec<ResourceEvent>) {
        // Best-effort: no subscribers is fine
        for event in events {
            let _ = self.event_tx.send(event);
        }
    }
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn put(&mut self, key: ResourceKey, value: Value) {
        let storage_key = key.storage_key();
        for index in self.indices.values_mut() {
            index.update(&key.gvk, &storage_key, Some(&value));
        }
        self.objects.insert(storage_key, Entry { key, value });
    }

    /// Drop an object; returns its uid
    fn remove(&mut self, storage_key: &str, events: &mut Vec<ResourceEvent>) -> Option<String> {
        let entry = self.objects.remove(storage_key)?;
        for index in self.indices.values_mut() {
            index.update(&entry.key.gvk, storage_key, None);
        }
        let uid = metadata_of(&entry.value).uid;
        let version = self.next_version();
        events.push(ResourceEvent::deleted(entry.key, entry.value, version));
        uid
    }

    fn delete_one(&mut self, storage_key: &str, events: &mut Vec<ResourceEvent>) -> Option<Deletion> {
        let entry = self.objects.get(storage_key)?;
        let (key, mut value) = (entry.key.clone(), entry.value.clone());
        let mut meta = metadata_of(&value);

        if meta.finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
            if meta.deletion_timestamp.is_none() {
                let version = self.next_version();
                meta.deletion_timestamp = Some(Time(Utc::now()));
                meta.resource_version = Some(version.clone());
                set_metadata(&mut value, &meta);
                self.put(key.clone(), value.clone());
                events.push(ResourceEvent::modified(key, value, version));
            }
            return Some(Deletion::Marked);
        }

        Some(Deletion::Removed {
            uid: self.remove(storage_key, events),
        })
    }

    /// Delete everything transitively owned by `uid`
    fn collect_garbage(&mut self, uid: String, events: &mut Vec<ResourceEvent>) {
        let mut owners = vec![uid];
        while let Some(owner) = owners.pop() {
            let dependents: Vec<String> = self
                .objects
                .iter()
                .filter(|(_, e)| owned_by(&e.value, &owner))
                .map(|(k, _)| k.clone())
                .collect();

            for dependent in dependents {
                debug!("Garbage collecting {} (owner {})", dependent, owner);
                if let Some(Deletion::Removed { uid: Some(uid) }) = self.delete_one(&dependent, events)
                {
                    owners.push(uid);
                }
            }
        }
    }
}

fn check_preconditions(key: &ResourceKey, meta: &ObjectMeta, want: &Preconditions) -> Result<()> {
    let checks = [
        (want.uid.as_deref(), meta.uid.as_deref()),
        (want.resource_version.as_deref(), meta.resource_version.as_deref()),
    ];
    for (expected, actual) in checks {
        if let Some(expected) = expected {
            let actual = actual.unwrap_or_default();
            if expected != actual {
                return Err(ReaperError::conflict(key.to_string(), expected, actual));
            }
        }
    }
    Ok(())
}

fn index_id(gvk: &GroupVersionKind, name: &str) -> String {
    format!("{}#{}", gvk, name)
}

fn metadata_of(value: &Value) -> ObjectMeta {
    value
        .get("metadata")
        .cloned()
        .and_then(|m| serde_json::from_value(m).ok())
        .unwrap_or_default()
}

fn set_metadata(value: &mut Value, meta: &ObjectMeta) {
    if let Ok(m) = serde_json::to_value(meta) {
        value["metadata"] = m;
    }
}

fn stamp_type(value: &mut Value, gvk: &GroupVersionKind) {
    value["apiVersion"] = Value::String(gvk.api_version());
    value["kind"] = Value::String(gvk.kind.clone());
}

fn copy_field(target: &mut Value, field: &str, source: Option<&Value>) {
    match source {
        Some(v) => target[field] = v.clone(),
        None => {
            if let Some(obj) = target.as_object_mut() {
                obj.remove(field);
            }
        }
    }
}

fn owned_by(value: &Value, uid: &str) -> bool {
    metadata_of(value)
        .owner_references
        .unwrap_or_default()
        .iter()
        .any(|r| r.uid == uid)
}

/// Typed view of a `MemoryStore` for one kind
pub struct MemoryClient<K> {
    store: Arc<MemoryStore>,
    stats: Arc<ClientStats>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for MemoryClient<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            stats: Arc::clone(&self.stats),
            _kind: PhantomData,
        }
    }
}

impl<K: Resource> MemoryClient<K> {
    fn key(&self, namespace: &str, name: &str) -> ResourceKey {
        ResourceKey::new(K::gvk(), namespace, name)
    }

    /// Calls made through this client and its clones
    pub fn calls(&self) -> CallCounts {
        self.stats.snapshot()
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    fn decode_all(values: Vec<Value>) -> Result<Vec<K>> {
        values.into_iter().map(from_value).collect()
    }
}

#[async_trait]
impl<K: Resource> ResourceClient<K> for MemoryClient<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        self.stats.record(Call::Get);
        from_value(self.store.get_raw(&self.key(namespace, name))?)
    }

    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>> {
        self.stats.record(Call::List);
        let objects = Self::decode_all(self.store.list_raw(&K::gvk(), namespace))?;
        Ok(objects
            .into_iter()
            .filter(|o| selector.matches(o.labels()))
            .collect())
    }

    async fn list_by_index(&self, index: &str, key: &str) -> Result<Vec<K>> {
        self.stats.record(Call::ListByIndex);
        Self::decode_all(self.store.lookup_index(&K::gvk(), index, key)?)
    }

    fn add_indexer(&self, index: &str, func: IndexFn<K>) {
        let raw: RawIndexFn = Arc::new(move |value: &Value| {
            serde_json::from_value::<K>(value.clone())
                .map(|object| func(&object))
                .unwrap_or_default()
        });
        self.store.add_index(K::gvk(), index, raw);
    }

    async fn delete(&self, namespace: &str, name: &str, options: &DeleteOptions) -> Result<()> {
        self.stats.record(Call::Delete);
        self.store.delete_raw(&self.key(namespace, name), options)
    }

    async fn update(&self, object: &K) -> Result<K> {
        self.stats.record(Call::Update);
        let key = self.key(object.namespace(), object.name());
        from_value(self.store.update_raw(&key, to_value(object)?, false)?)
    }

    async fn update_status(&self, object: &K) -> Result<K> {
        self.stats.record(Call::UpdateStatus);
        let key = self.key(object.namespace(), object.name());
        from_value(self.store.update_raw(&key, to_value(object)?, true)?)
    }

    fn enqueue_after(&self, namespace: &str, name: &str, delay: Duration) {
        self.stats.record(Call::EnqueueAfter);
        self.store.request_requeue(RequeueRequest {
            gvk: K::gvk(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            delay,
        });
    }
}
