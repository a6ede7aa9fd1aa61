//! In-memory cluster with live field indexes and watch broadcast.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use stratus_core::{Error, ObjectKey, ObjectMeta, Result};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

use crate::client::{
    object_meta, ClusterClient, EventType, FieldIndexer, IndexFn, WatchEvent, WatchSource,
};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    object: Value,
    /// finalizer -> field owners claiming it
    finalizer_owners: HashMap<String, BTreeSet<String>>,
    /// field owner -> top-level status fields it applied
    status_fields: HashMap<String, BTreeSet<String>>,
}

type KindStore = BTreeMap<ObjectKey, StoredObject>;

/// Cluster API backed by process memory.
///
/// Indexes are evaluated against the live objects on every query, so a
/// lookup always reflects the latest write.
pub struct InMemoryCluster {
    objects: RwLock<HashMap<String, KindStore>>,
    indexes: RwLock<HashMap<(String, String), IndexFn>>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            objects: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            events,
        }
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored objects of a kind, including ones being deleted.
    pub async fn count(&self, kind: &str) -> usize {
        self.objects.read().await.get(kind).map_or(0, BTreeMap::len)
    }

    fn emit(&self, kind: &str, key: &ObjectKey, event_type: EventType, object: &Value) {
        trace!(kind, object = %key, ?event_type, "Emitting watch event");
        // No receivers is not an error: nothing is watching yet.
        let _ = self.events.send(WatchEvent {
            kind: kind.to_string(),
            key: key.clone(),
            event_type,
            object: object.clone(),
        });
    }
}

fn write_meta(object: &mut Value, meta: &ObjectMeta) -> Result<()> {
    let metadata = serde_json::to_value(meta)?;
    match object {
        Value::Object(map) => {
            map.insert("metadata".to_string(), metadata);
            Ok(())
        }
        _ => Err(Error::serialization("object is not a JSON document")),
    }
}

fn not_found(kind: &str, key: &ObjectKey) -> Error {
    Error::not_found(kind, key.to_string())
}

fn lookup<'a>(
    objects: &'a mut HashMap<String, KindStore>,
    kind: &str,
    key: &ObjectKey,
) -> Result<&'a mut StoredObject> {
    objects
        .get_mut(kind)
        .and_then(|store| store.get_mut(key))
        .ok_or_else(|| not_found(kind, key))
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<Option<Value>> {
        let objects = self.objects.read().await;
        Ok(objects
            .get(kind)
            .and_then(|store| store.get(key))
            .map(|stored| stored.object.clone()))
    }

    async fn list(&self, kind: &str, namespace: Option<&str>) -> Result<Vec<Value>> {
        let objects = self.objects.read().await;
        Ok(objects
            .get(kind)
            .map(|store| {
                store
                    .iter()
                    .filter(|(key, _)| namespace.map_or(true, |ns| key.namespace == ns))
                    .map(|(_, stored)| stored.object.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_by_field(
        &self,
        kind: &str,
        namespace: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>> {
        let extract = self
            .indexes
            .read()
            .await
            .get(&(kind.to_string(), field.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::cluster(
                    "list_by_field",
                    format!("no index registered for {kind} field {field}"),
                )
            })?;

        let mut matched = Vec::new();
        for object in self.list(kind, Some(namespace)).await? {
            if extract(&object)?.iter().any(|v| v == value) {
                matched.push(object);
            }
        }
        Ok(matched)
    }

    async fn create(&self, kind: &str, mut object: Value) -> Result<Value> {
        let mut meta = object_meta(&object)?;
        if meta.name.is_empty() {
            return Err(Error::cluster("create", format!("{kind} object has no name")));
        }
        meta.generation = 1;
        meta.deletion_timestamp = None;
        write_meta(&mut object, &meta)?;

        let key = meta.key();
        let mut objects = self.objects.write().await;
        let store = objects.entry(kind.to_string()).or_default();
        if store.contains_key(&key) {
            return Err(Error::conflict(format!("{kind} {key} already exists")));
        }
        store.insert(
            key.clone(),
            StoredObject {
                object: object.clone(),
                finalizer_owners: HashMap::new(),
                status_fields: HashMap::new(),
            },
        );
        drop(objects);

        debug!(kind, object = %key, "Created object");
        self.emit(kind, &key, EventType::Applied, &object);
        Ok(object)
    }

    async fn update_spec(&self, kind: &str, key: &ObjectKey, spec: Value) -> Result<Value> {
        let mut objects = self.objects.write().await;
        let stored = lookup(&mut objects, kind, key)?;
        if stored.object.get("spec") == Some(&spec) {
            return Ok(stored.object.clone());
        }

        let mut meta = object_meta(&stored.object)?;
        meta.generation += 1;
        write_meta(&mut stored.object, &meta)?;
        if let Value::Object(map) = &mut stored.object {
            map.insert("spec".to_string(), spec);
        }
        let object = stored.object.clone();
        drop(objects);

        debug!(kind, object = %key, generation = meta.generation, "Updated spec");
        self.emit(kind, key, EventType::Applied, &object);
        Ok(object)
    }

    async fn apply_status(
        &self,
        kind: &str,
        key: &ObjectKey,
        field_owner: &str,
        status: Value,
    ) -> Result<()> {
        let Value::Object(applied) = status else {
            return Err(Error::serialization("status must be a JSON object"));
        };

        let mut objects = self.objects.write().await;
        let stored = lookup(&mut objects, kind, key)?;
        let mut current = match stored.object.get("status") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let before = current.clone();

        let owned = stored.status_fields.entry(field_owner.to_string()).or_default();
        for stale in owned.iter().filter(|f| !applied.contains_key(f.as_str())) {
            current.remove(stale);
        }
        *owned = applied.keys().cloned().collect();
        current.extend(applied);

        if current == before {
            return Ok(());
        }
        if let Value::Object(map) = &mut stored.object {
            map.insert("status".to_string(), Value::Object(current));
        }
        let object = stored.object.clone();
        drop(objects);

        trace!(kind, object = %key, field_owner, "Applied status");
        self.emit(kind, key, EventType::Applied, &object);
        Ok(())
    }

    async fn add_finalizer(
        &self,
        kind: &str,
        key: &ObjectKey,
        field_owner: &str,
        finalizer: &str,
    ) -> Result<()> {
        let mut objects = self.objects.write().await;
        let stored = lookup(&mut objects, kind, key)?;
        let mut meta = object_meta(&stored.object)?;

        stored
            .finalizer_owners
            .entry(finalizer.to_string())
            .or_default()
            .insert(field_owner.to_string());
        if meta.has_finalizer(finalizer) {
            return Ok(());
        }
        if meta.is_deleting() {
            return Err(Error::cluster(
                "add_finalizer",
                format!("{kind} {key} is being deleted"),
            ));
        }

        meta.finalizers.push(finalizer.to_string());
        write_meta(&mut stored.object, &meta)?;
        let object = stored.object.clone();
        drop(objects);

        debug!(kind, object = %key, finalizer, field_owner, "Added finalizer");
        self.emit(kind, key, EventType::Applied, &object);
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        kind: &str,
        key: &ObjectKey,
        field_owner: &str,
        finalizer: &str,
    ) -> Result<()> {
        let mut objects = self.objects.write().await;
        let Some(store) = objects.get_mut(kind) else {
            return Ok(());
        };
        let Some(stored) = store.get_mut(key) else {
            return Ok(());
        };

        let still_claimed = stored.finalizer_owners.get_mut(finalizer).is_some_and(|owners| {
            owners.remove(field_owner);
            !owners.is_empty()
        });
        let mut meta = object_meta(&stored.object)?;
        if still_claimed || !meta.has_finalizer(finalizer) {
            return Ok(());
        }

        stored.finalizer_owners.remove(finalizer);
        meta.finalizers.retain(|f| f != finalizer);
        write_meta(&mut stored.object, &meta)?;
        let object = stored.object.clone();

        let purge = meta.is_deleting() && meta.finalizers.is_empty();
        if purge {
            store.remove(key);
        }
        drop(objects);

        debug!(kind, object = %key, finalizer, field_owner, "Removed finalizer");
        if purge {
            debug!(kind, object = %key, "Object deleted");
            self.emit(kind, key, EventType::Deleted, &object);
        } else {
            self.emit(kind, key, EventType::Applied, &object);
        }
        Ok(())
    }

    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.write().await;
        let Some(store) = objects.get_mut(kind) else {
            return Ok(());
        };
        let Some(stored) = store.get_mut(key) else {
            return Ok(());
        };

        let mut meta = object_meta(&stored.object)?;
        if meta.finalizers.is_empty() {
            let removed = store.remove(key).map(|s| s.object);
            drop(objects);
            if let Some(object) = removed {
                debug!(kind, object = %key, "Object deleted");
                self.emit(kind, key, EventType::Deleted, &object);
            }
            return Ok(());
        }
        if meta.is_deleting() {
            return Ok(());
        }

        meta.deletion_timestamp = Some(Utc::now());
        write_meta(&mut stored.object, &meta)?;
        let object = stored.object.clone();
        drop(objects);

        debug!(kind, object = %key, finalizers = ?meta.finalizers, "Deletion requested");
        self.emit(kind, key, EventType::Applied, &object);
        Ok(())
    }
}

#[async_trait]
impl FieldIndexer for InMemoryCluster {
    async fn index_field(&self, kind: &str, field: &str, extract: IndexFn) -> Result<()> {
        let mut indexes = self.indexes.write().await;
        let index_key = (kind.to_string(), field.to_string());
        if indexes.contains_key(&index_key) {
            return Err(Error::conflict(format!(
                "index for {kind} field {field} already registered"
            )));
        }
        indexes.insert(index_key, extract);
        debug!(kind, field, "Registered field index");
        Ok(())
    }
}

impl WatchSource for InMemoryCluster {
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
