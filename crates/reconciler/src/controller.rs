//! The generic controller: one reconcile pass for any managed kind.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use stratus_cluster::{ClusterClientExt, Manager, Reconcile, Watch};
use stratus_core::{
    ConditionReason, ConditionStatus, Error, HasStatus, ManagedStatus, ObjectKey, Requeue,
    Resource, Result,
};
use stratus_progress::{Outcome, ReconcileError, ReconcileStatus, WaitingReason};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::context::ControllerContext;
use crate::interfaces::{Actuator, ActuatorFactory, ManagedObject, RemoteStream, StatusWriter};
use crate::status::conditions;
use crate::types::ObjectState;

type ObjectOf<F> = <F as ActuatorFactory>::Object;
type ActuatorOf<F> = <F as ActuatorFactory>::Actuator;
type RemoteOf<F> = <ActuatorOf<F> as Actuator>::Remote;

/// Drives objects of one kind through adoption, creation, convergence and
/// deletion using the kind's actuator and status writer.
pub struct GenericController<F, W> {
    name: String,
    finalizer: String,
    ctx: ControllerContext,
    factory: F,
    writer: W,
}

impl<F, W> GenericController<F, W>
where
    F: ActuatorFactory,
    W: StatusWriter<Object = ObjectOf<F>, Remote = RemoteOf<F>>,
{
    /// `name` doubles as the field owner of status writes and of the
    /// controller finalizer.
    pub fn new(
        name: impl Into<String>,
        finalizer: impl Into<String>,
        ctx: ControllerContext,
        factory: F,
        writer: W,
    ) -> Self {
        Self {
            name: name.into(),
            finalizer: finalizer.into(),
            ctx,
            factory,
            writer,
        }
    }

    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    /// Register dependency indexes, guards and watches, then the controller
    /// itself and one guard controller per guarded dependency.
    pub async fn register(self: Arc<Self>, manager: &mut Manager) -> Result<()> {
        let mut watches: Vec<Watch> = Vec::new();
        let mut guards = Vec::new();
        for dependency in self.factory.dependencies() {
            dependency
                .add_to_manager(self.ctx.indexer.as_ref(), &self.ctx.registry)
                .await?;
            watches.push(dependency.watch_event_handler(Arc::clone(&self.ctx.cluster)));
            if let Some(guard) = dependency.guard_controller(
                format!("{}/{}", self.name, dependency.field()),
                Arc::clone(&self.ctx.cluster),
                Arc::clone(&self.ctx.registry),
                self.ctx.config.poll_interval,
            ) {
                guards.push(guard);
            }
        }

        manager.add_controller(self, watches);
        for (guard, guard_watches) in guards {
            manager.add_controller(guard, guard_watches);
        }
        Ok(())
    }

    /// Run one pass for `key` and return its aggregated status.
    pub async fn reconcile_object(&self, key: &ObjectKey) -> ReconcileStatus {
        self.pass(key).await.0
    }

    async fn pass(&self, key: &ObjectKey) -> (ReconcileStatus, bool) {
        let obj = match self.ctx.cluster.get_typed::<ObjectOf<F>>(key).await {
            Ok(Some(obj)) => obj,
            Ok(None) => {
                debug!("Object no longer exists");
                return (ReconcileStatus::ok(), false);
            }
            Err(e) => return (ReconcileStatus::wrap_error(e), false),
        };

        let generation = obj.meta().generation;
        if !obj.is_deleting() && obj.status().terminal_for_generation(generation) {
            debug!(generation, "Terminal error recorded for this generation, skipping");
            return (ReconcileStatus::ok(), false);
        }

        let state = match ObjectState::of(&obj) {
            Ok(state) => state,
            Err(e) => {
                let status = ReconcileStatus::wrap_error(e.into());
                return (self.finish(&obj, None, None, status).await, false);
            }
        };
        debug!(%state, "Reconciling");

        match state {
            ObjectState::Unmanaged => (ReconcileStatus::ok(), false),
            ObjectState::Deleting => (self.reconcile_delete(&obj).await, false),
            _ => (
                self.reconcile_normal(&obj, state).await,
                state.is_imported(),
            ),
        }
    }

    async fn reconcile_normal(&self, obj: &ObjectOf<F>, state: ObjectState) -> ReconcileStatus {
        if let Err(e) = self
            .ctx
            .cluster
            .add_finalizer(ObjectOf::<F>::KIND, &obj.key(), &self.name, &self.finalizer)
            .await
        {
            return self
                .finish(obj, None, None, ReconcileStatus::wrap_error(e))
                .await;
        }

        let mut actuator = match self.factory.new_create_actuator(&self.ctx, obj).await {
            Ok(actuator) => actuator,
            Err(status) => return self.finish(obj, None, None, status).await,
        };

        let dependencies = actuator.resolve_dependencies(obj).await;
        if dependencies.needs_reschedule().0 {
            debug!(result = %dependencies, "Dependencies not ready");
            return self.finish(obj, None, None, dependencies).await;
        }

        let mut remote = match self.resolve_remote(&actuator, obj, state).await {
            Ok(remote) => remote,
            Err(status) => return self.finish(obj, None, None, status).await,
        };
        let id = actuator.resource_id(&remote);

        let mut status = ReconcileStatus::ok();
        if !state.is_imported() {
            for step in actuator.steps() {
                if status.needs_refresh() {
                    match self.fetch(&actuator, &id).await {
                        Ok(fresh) => remote = fresh,
                        Err(e) => {
                            status = status
                                .without_refresh()
                                .merge(ReconcileStatus::wrap_error(e));
                            break;
                        }
                    }
                    status = status.without_refresh();
                }

                let step_status = actuator.run_step(step, obj, &remote).await;
                debug!(?step, result = %step_status, "Ran convergence step");
                status = status.merge(step_status);
                if status.needs_reschedule().0 {
                    break;
                }
            }

            if status.needs_refresh() {
                match self.fetch(&actuator, &id).await {
                    Ok(fresh) => {
                        remote = fresh;
                        status = status.without_refresh();
                    }
                    Err(e) => status = status.merge(ReconcileStatus::wrap_error(e)),
                }
            }
        }

        if !status.needs_reschedule().0
            && self.writer.available_status(obj, Some(&remote)) != ConditionStatus::True
        {
            status = status.merge(ReconcileStatus::waiting_on_remote(
                format!("Waiting for {} to become available", ObjectOf::<F>::KIND),
                self.ctx.config.poll_interval,
            ));
        }

        self.finish(obj, Some(id), Some(&remote), status).await
    }

    /// Bind the object to its remote resource: fetch it by ID, import it,
    /// adopt it, or create it.
    async fn resolve_remote(
        &self,
        actuator: &ActuatorOf<F>,
        obj: &ObjectOf<F>,
        state: ObjectState,
    ) -> Outcome<RemoteOf<F>> {
        if let Some(id) = obj.status_id() {
            return match self.fetch(actuator, id).await {
                Ok(remote) => Ok(remote),
                Err(e) if e.is_not_found() => {
                    Err(ReconcileStatus::wrap_error(Error::terminal_from(
                        ConditionReason::UnrecoverableError,
                        format!("resource {id} has been deleted from the remote system"),
                        e,
                    )))
                }
                Err(e) => Err(ReconcileStatus::wrap_error(e)),
            };
        }

        let remote = match (state, obj.import_spec()) {
            (ObjectState::Importing, Some(import)) => {
                if let Some(id) = &import.id {
                    match self.fetch(actuator, id).await {
                        Ok(remote) => remote,
                        Err(e) if e.is_not_found() => {
                            return Err(ReconcileStatus::waiting_on_remote(
                                format!("Waiting for resource {id} to be created externally"),
                                self.ctx.config.poll_interval,
                            ));
                        }
                        Err(e) => return Err(ReconcileStatus::wrap_error(e)),
                    }
                } else if let Some(filter) = &import.filter {
                    let candidates = actuator.list_for_import(obj, filter).await?;
                    match self.single(candidates, "import filter").await? {
                        Some(remote) => remote,
                        None => {
                            return Err(ReconcileStatus::waiting_on_remote(
                                "Waiting for a resource matching the import filter to be created externally",
                                self.ctx.config.poll_interval,
                            ));
                        }
                    }
                } else {
                    return Err(ReconcileStatus::wrap_error(
                        crate::error::SpecError::EmptyImport.into(),
                    ));
                }
            }
            _ => {
                let adopted = match actuator.list_for_adoption(obj).await {
                    Some(candidates) => self.single(candidates, "adoption").await?,
                    None => None,
                };
                if let Some(remote) = adopted {
                    info!(id = %actuator.resource_id(&remote), "Adopted existing resource");
                    remote
                } else {
                    let remote = actuator.create_resource(obj).await?;
                    info!(id = %actuator.resource_id(&remote), "Created resource");
                    remote
                }
            }
        };

        self.record_id(obj, actuator.resource_id(&remote), &remote)
            .await
            .map_err(ReconcileStatus::wrap_error)?;
        Ok(remote)
    }

    /// Take zero or one candidate; more than one is ambiguous and terminal.
    async fn single(
        &self,
        candidates: RemoteStream<RemoteOf<F>>,
        purpose: &str,
    ) -> Outcome<Option<RemoteOf<F>>> {
        let mut found: Vec<RemoteOf<F>> = self
            .ctx
            .remote("list", candidates.take(2).try_collect())
            .await
            .map_err(ReconcileStatus::wrap_error)?;
        if found.len() > 1 {
            return Err(ReconcileStatus::wrap_error(Error::terminal(
                ConditionReason::InvalidConfiguration,
                format!("found more than one matching resource for {purpose}"),
            )));
        }
        Ok(found.pop())
    }

    async fn fetch(&self, actuator: &ActuatorOf<F>, id: &str) -> Result<RemoteOf<F>> {
        self.ctx.remote("get", actuator.get_resource(id)).await
    }

    /// Persist a newly bound ID right away, before any further remote call.
    async fn record_id(&self, obj: &ObjectOf<F>, id: String, remote: &RemoteOf<F>) -> Result<()> {
        let mut managed = obj.status().clone();
        managed.id = Some(id);
        managed.resource = Some(self.writer.resource_status(remote));
        self.write_status(obj, &managed).await
    }

    /// Publish conditions, the ID and the remote mirror for a pass.
    async fn finish(
        &self,
        obj: &ObjectOf<F>,
        id: Option<String>,
        remote: Option<&RemoteOf<F>>,
        status: ReconcileStatus,
    ) -> ReconcileStatus {
        let available = self.writer.available_status(obj, remote);
        let mut managed = obj.status().clone();
        if id.is_some() {
            managed.id = id;
        }
        if let Some(remote) = remote {
            managed.resource = Some(self.writer.resource_status(remote));
        }
        for condition in conditions(&status, available, obj.meta().generation) {
            managed.set_condition(condition);
        }

        match self.write_status(obj, &managed).await {
            Ok(()) => status,
            Err(e) => status.merge(ReconcileStatus::wrap_error(e)),
        }
    }

    async fn write_status(
        &self,
        obj: &ObjectOf<F>,
        managed: &ManagedStatus<<ObjectOf<F> as HasStatus>::ResourceStatus>,
    ) -> Result<()> {
        let value = serde_json::to_value(managed)?;
        self.ctx
            .cluster
            .apply_status(ObjectOf::<F>::KIND, &obj.key(), &self.name, value)
            .await
    }

    async fn reconcile_delete(&self, obj: &ObjectOf<F>) -> ReconcileStatus {
        let meta = obj.meta();
        if !meta.has_finalizer(&self.finalizer) {
            return ReconcileStatus::ok();
        }

        let mut status = ReconcileStatus::ok();
        for finalizer in meta.finalizers.iter().filter(|f| **f != self.finalizer) {
            match self
                .ctx
                .registry
                .check_all_guards(
                    self.ctx.cluster.as_ref(),
                    meta,
                    finalizer,
                    ObjectOf::<F>::KIND,
                )
                .await
            {
                Ok(true) => {
                    status = status.merge(ReconcileStatus::waiting_on_object(
                        ObjectOf::<F>::KIND,
                        &meta.name,
                        WaitingReason::Released,
                    ));
                }
                Ok(false) => {}
                Err(e) => status = status.merge(ReconcileStatus::wrap_error(e)),
            }
        }
        if status.needs_reschedule().0 {
            return self.finish_deleting(obj, status).await;
        }

        // Imported resources belong to someone else.
        if obj.import_spec().is_none() && obj.resource_spec().is_some() {
            let status = self.delete_remote(obj).await;
            if status.needs_reschedule().0 {
                return self.finish_deleting(obj, status).await;
            }
        }

        match self
            .ctx
            .cluster
            .remove_finalizer(ObjectOf::<F>::KIND, &obj.key(), &self.name, &self.finalizer)
            .await
        {
            Ok(()) => {
                info!("Deletion complete, finalizer removed");
                ReconcileStatus::ok()
            }
            Err(e) => ReconcileStatus::wrap_error(e),
        }
    }

    async fn delete_remote(&self, obj: &ObjectOf<F>) -> ReconcileStatus {
        let actuator = match self.factory.new_delete_actuator(&self.ctx, obj).await {
            Ok(actuator) => actuator,
            Err(status) => return status,
        };

        let remote = match obj.status_id() {
            Some(id) => match self.fetch(&actuator, id).await {
                Ok(remote) => Some(remote),
                Err(e) if e.is_not_found() => None,
                Err(e) => return ReconcileStatus::wrap_error(e),
            },
            // A create may have succeeded without its ID being recorded.
            None => match actuator.list_for_adoption(obj).await {
                Some(candidates) => match self.single(candidates, "deletion").await {
                    Ok(remote) => remote,
                    Err(status) => return status,
                },
                None => None,
            },
        };

        let Some(remote) = remote else {
            debug!("Remote resource already gone");
            return ReconcileStatus::ok();
        };
        info!(id = %actuator.resource_id(&remote), "Deleting remote resource");
        actuator.delete_resource(obj, &remote).await
    }

    async fn finish_deleting(&self, obj: &ObjectOf<F>, status: ReconcileStatus) -> ReconcileStatus {
        let [_, progressing] = conditions(&status, ConditionStatus::Unknown, obj.meta().generation);
        let mut managed = obj.status().clone();
        managed.set_condition(progressing);
        match self.write_status(obj, &managed).await {
            Ok(()) => status,
            Err(e) => status.merge(ReconcileStatus::wrap_error(e)),
        }
    }
}

#[async_trait]
impl<F, W> Reconcile for GenericController<F, W>
where
    F: ActuatorFactory,
    W: StatusWriter<Object = ObjectOf<F>, Remote = RemoteOf<F>>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        ObjectOf::<F>::KIND
    }

    async fn reconcile(&self, key: &ObjectKey) -> Requeue {
        let span = info_span!(
            "reconcile",
            controller = %self.name,
            kind = ObjectOf::<F>::KIND,
            object = %key
        );
        let (status, imported) = self.pass(key).instrument(span.clone()).await;

        span.in_scope(|| match status.error() {
            Some(ReconcileError::Terminal(err)) => {
                warn!(error = %err, "Terminal error, waiting for a spec change");
            }
            Some(ReconcileError::Transient(_)) => warn!(%status, "Transient error, backing off"),
            None if status.needs_reschedule().0 => debug!(%status, "Waiting"),
            None => debug!("Reconciled"),
        });

        match status.requeue(self.ctx.config.poll_interval) {
            Requeue::Done if imported => Requeue::After(self.ctx.config.resync_period),
            requeue => requeue,
        }
    }
}
