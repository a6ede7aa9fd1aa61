//! Offline simulation: manifests are applied to an in-memory cluster backed
//! by the fake network and reconciled until every managed object is
//! available or the deadline passes.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use stratus_cluster::{ClusterClient, ClusterClientExt, InMemoryCluster, Manager};
use stratus_core::{HasStatus, Resource};
use stratus_dependency::DeletionGuardRegistry;
use stratus_networking::{
    setup_controllers, FakeNetworkClient, FakeScopeFactory, Port, Project, Trunk,
};
use stratus_reconciler::{ControllerContext, ManagedObject, Secret};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::StratusConfig;

/// Namespace given to manifests that name none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Kinds accepted in manifests, in the order they are printed.
pub const MANIFEST_KINDS: [&str; 4] = [Secret::KIND, Project::KIND, Port::KIND, Trunk::KIND];

const SETTLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum SimulateError {
    #[error("failed to parse manifest document {index}: {source}")]
    Parse {
        index: usize,
        source: serde_yaml::Error,
    },

    #[error("manifest document {index}: unsupported kind '{kind}'")]
    UnsupportedKind { index: usize, kind: String },

    #[error("manifest document {index}: missing {field}")]
    Missing { index: usize, field: &'static str },

    #[error(transparent)]
    Engine(#[from] stratus_core::Error),

    #[error("controller manager failed: {0}")]
    Manager(String),

    #[error("failed to render objects: {0}")]
    Render(#[source] serde_yaml::Error),
}

/// One object of a manifest file.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub kind: String,
    pub object: Value,
}

/// Parse a multi-document YAML manifest. Empty documents are skipped.
pub fn parse_manifests(text: &str) -> Result<Vec<Manifest>, SimulateError> {
    serde_yaml::Deserializer::from_str(text)
        .enumerate()
        .filter_map(|(index, document)| match Value::deserialize(document) {
            Ok(Value::Null) => None,
            Ok(value) => Some(manifest(index, value)),
            Err(source) => Some(Err(SimulateError::Parse { index, source })),
        })
        .collect()
}

fn manifest(index: usize, value: Value) -> Result<Manifest, SimulateError> {
    let Value::Object(mut object) = value else {
        return Err(SimulateError::Missing {
            index,
            field: "kind",
        });
    };
    let kind = match object.remove("kind") {
        Some(Value::String(kind)) => kind,
        _ => {
            return Err(SimulateError::Missing {
                index,
                field: "kind",
            })
        }
    };
    if !MANIFEST_KINDS.contains(&kind.as_str()) {
        return Err(SimulateError::UnsupportedKind { index, kind });
    }
    object.remove("apiVersion");

    let metadata = object
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(metadata) = metadata.as_object_mut() else {
        return Err(SimulateError::Missing {
            index,
            field: "metadata",
        });
    };
    if !metadata.get("name").is_some_and(Value::is_string) {
        return Err(SimulateError::Missing {
            index,
            field: "metadata.name",
        });
    }
    metadata
        .entry("namespace")
        .or_insert_with(|| Value::String(DEFAULT_NAMESPACE.to_string()));

    Ok(Manifest {
        kind,
        object: Value::Object(object),
    })
}

/// Outcome of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Every managed object became available before the deadline.
    pub converged: bool,
    /// `Kind/namespace/name` of managed objects still not available.
    pub pending: Vec<String>,
    /// Final state of every stored object.
    pub objects: Vec<Value>,
}

impl SimulationReport {
    /// The stored objects as a multi-document YAML stream.
    pub fn to_yaml(&self) -> Result<String, SimulateError> {
        self.objects
            .iter()
            .map(|object| serde_yaml::to_string(object).map_err(SimulateError::Render))
            .collect::<Result<Vec<_>, _>>()
            .map(|documents| documents.join("---\n"))
    }
}

/// Run the networking controllers over `manifests` until convergence or
/// `timeout`.
pub async fn simulate(
    manifests: Vec<Manifest>,
    config: &StratusConfig,
    timeout: Duration,
) -> Result<SimulationReport, SimulateError> {
    let cluster = InMemoryCluster::new_arc();
    let network = Arc::new(FakeNetworkClient::new());
    let scopes = FakeScopeFactory::new(Arc::clone(&network));
    let ctx = ControllerContext::new(
        cluster.clone(),
        cluster.clone(),
        DeletionGuardRegistry::new_arc(),
        config.controller_config(),
    );
    let mut manager = Manager::new(cluster.clone(), cluster.clone(), config.manager_config());
    setup_controllers(&mut manager, &ctx, &scopes).await?;

    for manifest in manifests {
        debug!(kind = %manifest.kind, "Applying manifest");
        cluster.create(&manifest.kind, manifest.object).await?;
    }

    let (stop, stopped) = watch::channel(false);
    let handle = tokio::spawn(manager.run(stopped));

    let deadline = Instant::now() + timeout;
    let pending = loop {
        let pending = pending_objects(cluster.as_ref()).await?;
        if pending.is_empty() || Instant::now() >= deadline {
            break pending;
        }
        tokio::time::sleep(SETTLE_POLL).await;
    };

    if stop.send(true).is_err() {
        warn!("Manager exited before shutdown was requested");
    }
    match handle.await {
        Ok(result) => result?,
        Err(e) => return Err(SimulateError::Manager(e.to_string())),
    }

    let converged = pending.is_empty();
    if converged {
        info!("All managed objects are available");
    } else {
        warn!(pending = ?pending, "Deadline passed before convergence");
    }

    let mut objects = Vec::new();
    for kind in MANIFEST_KINDS {
        objects.extend(cluster.list(kind, None).await?);
    }
    Ok(SimulationReport {
        converged,
        pending,
        objects,
    })
}

async fn pending_objects(cluster: &dyn ClusterClient) -> stratus_core::Result<Vec<String>> {
    let mut pending = unavailable::<Project>(cluster).await?;
    pending.extend(unavailable::<Port>(cluster).await?);
    pending.extend(unavailable::<Trunk>(cluster).await?);
    Ok(pending)
}

/// Managed objects of `T` without an Available=True condition.
async fn unavailable<T: ManagedObject>(
    cluster: &dyn ClusterClient,
) -> stratus_core::Result<Vec<String>> {
    Ok(cluster
        .list_typed::<T>(None)
        .await?
        .into_iter()
        .filter(|obj| obj.resource_spec().is_some() || obj.import_spec().is_some())
        .filter(|obj| !obj.is_available())
        .map(|obj| format!("{}/{}", T::KIND, obj.key()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_namespace_and_strips_type_fields() {
        let text = "\
---
kind: Secret
metadata:
  name: cloud-config
data:
  clouds.yaml: \"clouds: {}\"
---
apiVersion: stratus.dev/v1
kind: Port
metadata:
  name: web
  namespace: prod
spec:
  resource: {}
";
        let manifests = parse_manifests(text);
        assert!(manifests.is_ok(), "{manifests:?}");
        let manifests = manifests.unwrap_or_default();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].kind, "Secret");
        assert_eq!(
            manifests[0].object.pointer("/metadata/namespace"),
            Some(&Value::String(DEFAULT_NAMESPACE.to_string()))
        );
        assert_eq!(manifests[1].object.pointer("/metadata/namespace"), Some(&Value::from("prod")));
        assert!(manifests[1].object.get("kind").is_none());
        assert!(manifests[1].object.get("apiVersion").is_none());
    }

    #[test]
    fn test_unknown_kind_is_rejected_with_its_position() {
        let text = "kind: Secret\nmetadata: {name: a}\n---\nkind: Router\nmetadata: {name: r}\n";
        assert!(matches!(
            parse_manifests(text),
            Err(SimulateError::UnsupportedKind { index: 1, ref kind }) if kind == "Router"
        ));
    }

    #[test]
    fn test_missing_name_is_rejected() {
        assert!(matches!(
            parse_manifests("kind: Port\nspec: {}\n"),
            Err(SimulateError::Missing {
                field: "metadata.name",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_yaml_is_a_parse_error() {
        assert!(matches!(
            parse_manifests("kind: [Port\n"),
            Err(SimulateError::Parse { index: 0, .. })
        ));
    }

    #[test]
    fn test_report_renders_one_document_per_object() {
        let report = SimulationReport {
            converged: true,
            pending: Vec::new(),
            objects: vec![
                serde_json::json!({ "metadata": { "name": "a" } }),
                serde_json::json!({ "metadata": { "name": "b" } }),
            ],
        };
        let yaml = report.to_yaml().unwrap_or_default();
        assert_eq!(yaml.matches("---").count(), 1);
        assert!(yaml.contains("name: a") && yaml.contains("name: b"));
    }
}
