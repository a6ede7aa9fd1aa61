//! Deletion guard registry.
//!
//! Several dependencies can guard the same dependency kind with the same
//! finalizer (a trunk guards ports both as its parent and as subports). Each
//! guard registers a checker here, and whoever wants to release the
//! finalizer asks every checker first.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use stratus_cluster::ClusterClient;
use stratus_core::{Error, ObjectMeta, Result};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Decides whether a dependency object is still referenced.
#[async_trait]
pub trait GuardChecker: Send + Sync {
    async fn has_references(
        &self,
        cluster: &dyn ClusterClient,
        dependency: &ObjectMeta,
    ) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GuardKey {
    finalizer: String,
    kind: String,
}

/// Checkers keyed by (finalizer, dependency kind), in registration order.
///
/// Constructed once at startup and shared by reference with every
/// dependency that registers a guard.
#[derive(Default)]
pub struct DeletionGuardRegistry {
    guards: RwLock<HashMap<GuardKey, Vec<Arc<dyn GuardChecker>>>>,
}

impl fmt::Debug for DeletionGuardRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionGuardRegistry").finish_non_exhaustive()
    }
}

impl DeletionGuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Append a checker for `(finalizer, kind)`.
    pub async fn register_guard(
        &self,
        finalizer: &str,
        kind: &str,
        checker: Arc<dyn GuardChecker>,
    ) {
        let mut guards = self.guards.write().await;
        let checkers = guards
            .entry(GuardKey {
                finalizer: finalizer.to_string(),
                kind: kind.to_string(),
            })
            .or_default();
        checkers.push(checker);
        debug!(finalizer, kind, guard_count = checkers.len(), "Registered deletion guard");
    }

    pub async fn guard_count(&self, finalizer: &str, kind: &str) -> usize {
        self.guards
            .read()
            .await
            .get(&GuardKey {
                finalizer: finalizer.to_string(),
                kind: kind.to_string(),
            })
            .map_or(0, Vec::len)
    }

    /// Whether any guard registered for `(finalizer, kind)` still sees a
    /// reference to `dependency`.
    ///
    /// Checkers run in registration order and the first blocking answer
    /// wins. A checker error blocks as well and is returned wrapped in
    /// [`Error::GuardCheck`]. With no checker registered nothing blocks.
    pub async fn check_all_guards(
        &self,
        cluster: &dyn ClusterClient,
        dependency: &ObjectMeta,
        finalizer: &str,
        kind: &str,
    ) -> Result<bool> {
        let checkers = self
            .guards
            .read()
            .await
            .get(&GuardKey {
                finalizer: finalizer.to_string(),
                kind: kind.to_string(),
            })
            .cloned()
            .unwrap_or_default();

        for checker in &checkers {
            match checker.has_references(cluster, dependency).await {
                Ok(true) => {
                    debug!(
                        kind,
                        object = %dependency.key(),
                        finalizer,
                        "Deletion blocked by remaining references"
                    );
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        kind,
                        object = %dependency.key(),
                        finalizer,
                        error = %e,
                        "Deletion guard check failed"
                    );
                    return Err(Error::guard_check(e));
                }
            }
        }
        Ok(false)
    }
}
