//! Object identity and metadata.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Namespaced name identifying one object of a given kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata carried by every cluster object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Incremented by the cluster on every spec change.
    #[serde(default)]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Set once deletion has been requested; the object stays stored until
    /// its finalizer list is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    pub const fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }
}

/// A typed cluster object.
///
/// Objects are stored as JSON documents with a top-level `metadata` field;
/// `KIND` selects the collection.
pub trait Resource:
    Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn is_deleting(&self) -> bool {
        self.meta().is_deleting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let meta = ObjectMeta::new("default", "trunk-a");
        assert_eq!(meta.key().to_string(), "default/trunk-a");
    }

    #[test]
    fn test_meta_serializes_camel_case() {
        let mut meta = ObjectMeta::new("default", "port-a");
        meta.finalizers.push("stratus.dev/port".to_string());
        meta.deletion_timestamp = Some(Utc::now());

        let value = serde_json::to_value(&meta).ok();
        let has_field = value
            .as_ref()
            .and_then(|v| v.get("deletionTimestamp"))
            .is_some();
        assert!(has_field);
        assert!(meta.is_deleting());
        assert!(meta.has_finalizer("stratus.dev/port"));
    }

    #[test]
    fn test_meta_defaults_on_deserialize() {
        let meta: Option<ObjectMeta> = serde_json::from_str(r#"{"name": "p"}"#).ok();
        assert_eq!(meta.map(|m| (m.generation, m.finalizers.len())), Some((0, 0)));
    }
}
