//! Declarative references from an owning object to dependency objects.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use stratus_cluster::{
    decode, ClusterClient, ClusterClientExt, FieldIndexer, IndexFn, Watch, WatchEvent,
};
use stratus_core::{ObjectKey, ObjectMeta, Resource, Result};
use stratus_progress::{Outcome, ReconcileStatus, WaitingReason};
use tracing::{debug, warn};

use crate::guard::DeletionGuardController;
use crate::registry::{DeletionGuardRegistry, GuardChecker};

/// Extracts referenced object names from an owner.
pub type RefsFn<O> = fn(&O) -> Vec<String>;

/// Finalizer attached to every referenced object, and the field owner it is
/// attached under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardSpec {
    pub finalizer: String,
    pub field_owner: String,
}

/// "Objects of kind `O` name objects of kind `D` through field `field`."
pub struct Dependency<O, D> {
    field: String,
    refs: RefsFn<O>,
    guard: Option<GuardSpec>,
    _dependency: PhantomData<fn() -> D>,
}

impl<O, D> Clone for Dependency<O, D> {
    fn clone(&self) -> Self {
        Self {
            field: self.field.clone(),
            refs: self.refs,
            guard: self.guard.clone(),
            _dependency: PhantomData,
        }
    }
}

impl<O, D> std::fmt::Debug for Dependency<O, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("field", &self.field)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

impl<O: Resource, D: Resource> Dependency<O, D> {
    /// A plain dependency: resolution and watches only.
    pub fn new(field: impl Into<String>, refs: RefsFn<O>) -> Self {
        Self {
            field: field.into(),
            refs,
            guard: None,
            _dependency: PhantomData,
        }
    }

    /// A dependency which also keeps referenced objects from being deleted
    /// while referenced.
    pub fn deletion_guard(
        field: impl Into<String>,
        refs: RefsFn<O>,
        finalizer: impl Into<String>,
        field_owner: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            refs,
            guard: Some(GuardSpec {
                finalizer: finalizer.into(),
                field_owner: field_owner.into(),
            }),
            _dependency: PhantomData,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub const fn guard(&self) -> Option<&GuardSpec> {
        self.guard.as_ref()
    }

    /// Distinct, non-empty names referenced by `owner`.
    pub fn references(&self, owner: &O) -> Vec<String> {
        (self.refs)(owner)
            .into_iter()
            .filter(|name| !name.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Resolve every referenced object.
    ///
    /// Only objects passing `ready` are returned. Missing objects wait on
    /// creation; unready or deleting ones wait on readiness. With a guard,
    /// the finalizer is ensured on every object found that is not deleting.
    pub async fn get_dependencies(
        &self,
        cluster: &dyn ClusterClient,
        owner: &O,
        ready: impl Fn(&D) -> bool + Send + Sync,
    ) -> (BTreeMap<String, D>, ReconcileStatus) {
        let namespace = &owner.meta().namespace;
        let mut resolved = BTreeMap::new();
        let mut status = ReconcileStatus::ok();

        for name in self.references(owner) {
            let key = ObjectKey::new(namespace, &name);
            let dependency = match cluster.get_typed::<D>(&key).await {
                Ok(Some(dependency)) => dependency,
                Ok(None) => {
                    status = status.merge(ReconcileStatus::waiting_on_object(
                        D::KIND,
                        &name,
                        WaitingReason::Creation,
                    ));
                    continue;
                }
                Err(e) => {
                    status = status.merge(ReconcileStatus::wrap_error(e));
                    continue;
                }
            };

            if dependency.is_deleting() {
                status = status.merge(ReconcileStatus::waiting_on_object(
                    D::KIND,
                    &name,
                    WaitingReason::Ready,
                ));
                continue;
            }

            if let Some(guard) = &self.guard {
                if let Err(e) = cluster
                    .add_finalizer(D::KIND, &key, &guard.field_owner, &guard.finalizer)
                    .await
                {
                    status = status.merge(ReconcileStatus::wrap_error(e));
                    continue;
                }
            }

            if ready(&dependency) {
                resolved.insert(name, dependency);
            } else {
                status = status.merge(ReconcileStatus::waiting_on_object(
                    D::KIND,
                    &name,
                    WaitingReason::Ready,
                ));
            }
        }

        (resolved, status)
    }

    /// Resolve the single referenced object, if the owner references one.
    pub async fn get_dependency(
        &self,
        cluster: &dyn ClusterClient,
        owner: &O,
        ready: impl Fn(&D) -> bool + Send + Sync,
    ) -> Outcome<Option<D>> {
        let (mut resolved, status) = self.get_dependencies(cluster, owner, ready).await;
        if status.needs_reschedule().0 {
            return Err(status);
        }
        Ok(resolved.pop_first().map(|(_, dependency)| dependency))
    }

    /// Register the field index and, for guarded dependencies, the guard
    /// checker.
    pub async fn add_to_manager(
        &self,
        indexer: &dyn FieldIndexer,
        registry: &DeletionGuardRegistry,
    ) -> Result<()> {
        // An owner that fails to decode may still hold a reference, so the
        // lookup fails and guards stay blocked.
        let refs = self.refs;
        let extract: IndexFn =
            Arc::new(move |object: &Value| decode::<O>(object.clone()).map(|owner| refs(&owner)));
        indexer.index_field(O::KIND, &self.field, extract).await?;

        if let Some(guard) = &self.guard {
            let checker = Arc::new(FieldIndexGuard {
                owner_kind: O::KIND,
                field: self.field.clone(),
            });
            registry
                .register_guard(&guard.finalizer, D::KIND, checker)
                .await;
        }
        Ok(())
    }

    /// Watch on `D` enqueueing every owner currently referencing the
    /// changed object.
    pub fn watch_event_handler(&self, cluster: Arc<dyn ClusterClient>) -> Watch {
        let field = self.field.clone();
        let mapper = Arc::new(move |event: WatchEvent| {
            let cluster = Arc::clone(&cluster);
            let field = field.clone();
            async move {
                match cluster
                    .list_by_field(O::KIND, &event.key.namespace, &field, &event.key.name)
                    .await
                {
                    Ok(owners) => owners
                        .iter()
                        .filter_map(|owner| stratus_cluster::object_meta(owner).ok())
                        .map(|meta| meta.key())
                        .collect(),
                    Err(e) => {
                        warn!(
                            kind = D::KIND,
                            object = %event.key,
                            field = %field,
                            error = %e,
                            "Failed to list referencing objects"
                        );
                        Vec::new()
                    }
                }
            }
            .boxed()
        });
        Watch::new(D::KIND, mapper)
    }

    /// Controller releasing the guard finalizer from deleting dependency
    /// objects, with a watch on owners so their changes re-check references.
    ///
    /// `None` for plain dependencies.
    pub fn guard_controller(
        &self,
        name: impl Into<String>,
        cluster: Arc<dyn ClusterClient>,
        registry: Arc<DeletionGuardRegistry>,
        poll: Duration,
    ) -> Option<(Arc<DeletionGuardController>, Vec<Watch>)> {
        let guard = self.guard.clone()?;
        let controller = DeletionGuardController::new(
            name,
            D::KIND,
            guard,
            Arc::clone(&cluster),
            registry,
            poll,
        );

        let refs = self.refs;
        let mapper = Arc::new(move |event: WatchEvent| {
            let keys = decode::<O>(event.object).map_or_else(
                |_| Vec::new(),
                |owner| {
                    refs(&owner)
                        .into_iter()
                        .map(|name| ObjectKey::new(&event.key.namespace, name))
                        .collect()
                },
            );
            async move { keys }.boxed()
        });
        Some((Arc::new(controller), vec![Watch::new(O::KIND, mapper)]))
    }
}

/// "Has references" answered from the live field index of the owner kind.
struct FieldIndexGuard {
    owner_kind: &'static str,
    field: String,
}

#[async_trait]
impl GuardChecker for FieldIndexGuard {
    async fn has_references(
        &self,
        cluster: &dyn ClusterClient,
        dependency: &ObjectMeta,
    ) -> Result<bool> {
        let owners = cluster
            .list_by_field(
                self.owner_kind,
                &dependency.namespace,
                &self.field,
                &dependency.name,
            )
            .await?;
        debug!(
            owner_kind = self.owner_kind,
            field = %self.field,
            object = %dependency.key(),
            references = owners.len(),
            "Checked references"
        );
        Ok(!owners.is_empty())
    }
}

/// Kind-erased view of a [`Dependency`], for wiring a controller's
/// dependencies into a manager.
#[async_trait]
pub trait DependencyRegistration: Send + Sync {
    fn owner_kind(&self) -> &'static str;

    fn dependency_kind(&self) -> &'static str;

    fn field(&self) -> &str;

    async fn add_to_manager(
        &self,
        indexer: &dyn FieldIndexer,
        registry: &DeletionGuardRegistry,
    ) -> Result<()>;

    fn watch_event_handler(&self, cluster: Arc<dyn ClusterClient>) -> Watch;

    fn guard_controller(
        &self,
        name: String,
        cluster: Arc<dyn ClusterClient>,
        registry: Arc<DeletionGuardRegistry>,
        poll: Duration,
    ) -> Option<(Arc<DeletionGuardController>, Vec<Watch>)>;
}

#[async_trait]
impl<O: Resource, D: Resource> DependencyRegistration for Dependency<O, D> {
    fn owner_kind(&self) -> &'static str {
        O::KIND
    }

    fn dependency_kind(&self) -> &'static str {
        D::KIND
    }

    fn field(&self) -> &str {
        &self.field
    }

    async fn add_to_manager(
        &self,
        indexer: &dyn FieldIndexer,
        registry: &DeletionGuardRegistry,
    ) -> Result<()> {
        Dependency::add_to_manager(self, indexer, registry).await
    }

    fn watch_event_handler(&self, cluster: Arc<dyn ClusterClient>) -> Watch {
        Dependency::watch_event_handler(self, cluster)
    }

    fn guard_controller(
        &self,
        name: String,
        cluster: Arc<dyn ClusterClient>,
        registry: Arc<DeletionGuardRegistry>,
        poll: Duration,
    ) -> Option<(Arc<DeletionGuardController>, Vec<Watch>)> {
        Dependency::guard_controller(self, name, cluster, registry, poll)
    }
}
