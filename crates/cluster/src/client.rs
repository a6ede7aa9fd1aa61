//! Cluster API contract.
//!
//! Objects travel as JSON documents so one client serves every kind; the
//! [`ClusterClientExt`] helpers add typed access on top.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use stratus_core::{ObjectKey, ObjectMeta, Resource, Result};
use tokio::sync::broadcast;

/// Extracts the values indexed for one field of an object. An object the
/// extractor cannot read fails every lookup on the index.
pub type IndexFn = Arc<dyn Fn(&Value) -> Result<Vec<String>> + Send + Sync>;

/// Storage and patch operations on cluster objects.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch one object, `None` if it does not exist.
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<Option<Value>>;

    /// List objects of a kind, optionally restricted to one namespace.
    async fn list(&self, kind: &str, namespace: Option<&str>) -> Result<Vec<Value>>;

    /// List objects whose indexed `field` contains `value`.
    ///
    /// Fails if no index was registered for `(kind, field)`.
    async fn list_by_field(
        &self,
        kind: &str,
        namespace: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>>;

    /// Store a new object. Fails with a conflict if the key is taken.
    async fn create(&self, kind: &str, object: Value) -> Result<Value>;

    /// Replace the spec of an object, bumping its generation when it changes.
    async fn update_spec(&self, kind: &str, key: &ObjectKey, spec: Value) -> Result<Value>;

    /// Apply the status fields owned by `field_owner`.
    ///
    /// Top-level status fields previously applied by the same owner and
    /// missing from `status` are removed; fields of other owners are kept.
    async fn apply_status(
        &self,
        kind: &str,
        key: &ObjectKey,
        field_owner: &str,
        status: Value,
    ) -> Result<()>;

    /// Ensure `finalizer` is present, owned by `field_owner`.
    async fn add_finalizer(
        &self,
        kind: &str,
        key: &ObjectKey,
        field_owner: &str,
        finalizer: &str,
    ) -> Result<()>;

    /// Release `field_owner`'s claim on `finalizer`. The finalizer is dropped
    /// once no owner claims it.
    async fn remove_finalizer(
        &self,
        kind: &str,
        key: &ObjectKey,
        field_owner: &str,
        finalizer: &str,
    ) -> Result<()>;

    /// Request deletion. Objects with finalizers stay stored, marked deleting.
    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<()>;
}

/// Registration of field indexes used by [`ClusterClient::list_by_field`].
#[async_trait]
pub trait FieldIndexer: Send + Sync {
    async fn index_field(&self, kind: &str, field: &str, extract: IndexFn) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Applied,
    Deleted,
}

/// A change to one stored object.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: String,
    pub key: ObjectKey,
    pub event_type: EventType,
    pub object: Value,
}

/// Source of watch events for every kind.
pub trait WatchSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Decode a stored document into a typed object.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Read the metadata of a stored document.
pub fn object_meta(value: &Value) -> Result<ObjectMeta> {
    let metadata = value.get("metadata").cloned().unwrap_or(Value::Null);
    Ok(serde_json::from_value(metadata)?)
}

/// Typed helpers over [`ClusterClient`].
#[async_trait]
pub trait ClusterClientExt: ClusterClient {
    async fn get_typed<T: Resource>(&self, key: &ObjectKey) -> Result<Option<T>> {
        self.get(T::KIND, key).await?.map(decode).transpose()
    }

    async fn list_typed<T: Resource>(&self, namespace: Option<&str>) -> Result<Vec<T>> {
        self.list(T::KIND, namespace)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn list_by_field_typed<T: Resource>(
        &self,
        namespace: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<T>> {
        self.list_by_field(T::KIND, namespace, field, value)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn create_typed<T: Resource>(&self, object: &T) -> Result<T> {
        let value = serde_json::to_value(object)?;
        decode(self.create(T::KIND, value).await?)
    }
}

impl<C: ClusterClient + ?Sized> ClusterClientExt for C {}
