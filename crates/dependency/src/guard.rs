//! Controller releasing guard finalizers from deleting dependency objects.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stratus_cluster::{object_meta, ClusterClient, Reconcile};
use stratus_core::{ObjectKey, Requeue};
use tracing::{debug, info, warn};

use crate::dependency::GuardSpec;
use crate::registry::DeletionGuardRegistry;

/// Runs on the dependency kind. Once an object is being deleted and still
/// carries the guard finalizer, the finalizer is released as soon as no
/// registered guard sees a reference.
pub struct DeletionGuardController {
    name: String,
    kind: &'static str,
    guard: GuardSpec,
    cluster: Arc<dyn ClusterClient>,
    registry: Arc<DeletionGuardRegistry>,
    poll: Duration,
}

impl DeletionGuardController {
    pub fn new(
        name: impl Into<String>,
        kind: &'static str,
        guard: GuardSpec,
        cluster: Arc<dyn ClusterClient>,
        registry: Arc<DeletionGuardRegistry>,
        poll: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            guard,
            cluster,
            registry,
            poll,
        }
    }
}

#[async_trait]
impl Reconcile for DeletionGuardController {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        self.kind
    }

    async fn reconcile(&self, key: &ObjectKey) -> Requeue {
        let object = match self.cluster.get(self.kind, key).await {
            Ok(Some(object)) => object,
            Ok(None) => return Requeue::Done,
            Err(e) => {
                warn!(controller = %self.name, object = %key, error = %e, "Failed to fetch object");
                return Requeue::Backoff;
            }
        };
        let meta = match object_meta(&object) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(controller = %self.name, object = %key, error = %e, "Unreadable metadata");
                return Requeue::Backoff;
            }
        };
        if !meta.is_deleting() || !meta.has_finalizer(&self.guard.finalizer) {
            return Requeue::Done;
        }

        match self
            .registry
            .check_all_guards(self.cluster.as_ref(), &meta, &self.guard.finalizer, self.kind)
            .await
        {
            Ok(true) => {
                debug!(controller = %self.name, object = %key, "Still referenced");
                return Requeue::After(self.poll);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(controller = %self.name, object = %key, error = %e, "Guard check failed");
                return Requeue::Backoff;
            }
        }

        match self
            .cluster
            .remove_finalizer(self.kind, key, &self.guard.field_owner, &self.guard.finalizer)
            .await
        {
            Ok(()) => {
                info!(
                    controller = %self.name,
                    object = %key,
                    finalizer = %self.guard.finalizer,
                    "Released deletion guard"
                );
                Requeue::Done
            }
            Err(e) => {
                warn!(controller = %self.name, object = %key, error = %e, "Failed to remove finalizer");
                Requeue::Backoff
            }
        }
    }
}
