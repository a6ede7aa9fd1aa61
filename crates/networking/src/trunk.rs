//! Trunk controller.
//!
//! A trunk depends on its parent port, its subport ports and optionally a
//! project. All three are deletion-guarded under the trunk finalizer, each
//! under its own field owner, so a port stays stored while any trunk names
//! it as parent or subport.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use stratus_cluster::{ClusterClient, Manager};
use stratus_core::{ConditionReason, ConditionStatus, Error, Result};
use stratus_dependency::{Dependency, DependencyRegistration};
use stratus_progress::{Outcome, ReconcileStatus};
use stratus_reconciler::{
    credentials_dependency, keyed_diff, resolve_scope, resolve_scope_for_deletion, with_timeout,
    Actuator, ActuatorFactory, ControllerContext, GenericController, RemoteStream, ScopeFactory,
    Secret, StatusWriter,
};
use tracing::info;

use crate::api::{
    resource_name, Port, Project, SubportStatus, Trunk, TrunkFilter, TrunkResourceSpec,
    TrunkResourceStatus,
};
use crate::client::{
    ListOpts, NetworkScope, RemoteSubport, RemoteTrunk, TagCollection, TrunkCreateOpts,
    STATUS_ACTIVE, STATUS_DOWN,
};
use crate::common::{
    available_when, create_error, delete_status, dependency_id, is_ready, reconcile_tags,
    tag_filter, update_opts, update_status, Attributes,
};

pub const TRUNK_CONTROLLER: &str = "trunk";
pub const TRUNK_FINALIZER: &str = "stratus.dev/trunk";

fn port_ref(trunk: &Trunk) -> Vec<String> {
    trunk
        .spec
        .resource
        .as_ref()
        .map(|r| r.port_ref.clone())
        .into_iter()
        .collect()
}

fn import_port_ref(trunk: &Trunk) -> Vec<String> {
    trunk
        .spec
        .import
        .as_ref()
        .and_then(|i| i.filter.as_ref())
        .and_then(|f| f.port_ref.clone())
        .into_iter()
        .collect()
}

fn subport_refs(trunk: &Trunk) -> Vec<String> {
    trunk
        .spec
        .resource
        .iter()
        .flat_map(|r| r.subports.iter().map(|s| s.port_ref.clone()))
        .collect()
}

fn project_ref(trunk: &Trunk) -> Vec<String> {
    trunk
        .spec
        .resource
        .as_ref()
        .and_then(|r| r.project_ref.clone())
        .into_iter()
        .collect()
}

fn import_project_ref(trunk: &Trunk) -> Vec<String> {
    trunk
        .spec
        .import
        .as_ref()
        .and_then(|i| i.filter.as_ref())
        .and_then(|f| f.project_ref.clone())
        .into_iter()
        .collect()
}

struct TrunkDependencies {
    port: Dependency<Trunk, Port>,
    import_port: Dependency<Trunk, Port>,
    subports: Dependency<Trunk, Port>,
    project: Dependency<Trunk, Project>,
    import_project: Dependency<Trunk, Project>,
    credentials: Dependency<Trunk, Secret>,
}

impl TrunkDependencies {
    fn new() -> Self {
        Self {
            port: Dependency::deletion_guard(
                "spec.resource.portRef",
                port_ref,
                TRUNK_FINALIZER,
                format!("{TRUNK_CONTROLLER}/port"),
            ),
            import_port: Dependency::new("spec.import.filter.portRef", import_port_ref),
            subports: Dependency::deletion_guard(
                "spec.resource.subports[].portRef",
                subport_refs,
                TRUNK_FINALIZER,
                format!("{TRUNK_CONTROLLER}/subports"),
            ),
            project: Dependency::deletion_guard(
                "spec.resource.projectRef",
                project_ref,
                TRUNK_FINALIZER,
                format!("{TRUNK_CONTROLLER}/project"),
            ),
            import_project: Dependency::new("spec.import.filter.projectRef", import_project_ref),
            credentials: credentials_dependency(TRUNK_FINALIZER, TRUNK_CONTROLLER),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrunkStep {
    Tags,
    Update,
    Subports,
}

pub struct TrunkActuator {
    client: NetworkScope,
    cluster: Arc<dyn ClusterClient>,
    deps: Arc<TrunkDependencies>,
    timeout: Duration,
    port_id: Option<String>,
    project_id: Option<String>,
    /// Remote port ID of each subport, by port object name.
    subport_ids: BTreeMap<String, String>,
}

type SubportParams = (String, i32);

impl TrunkActuator {
    /// Converge the trunk's subports on the spec, keyed by port ID.
    async fn reconcile_subports(
        &self,
        resource: &TrunkResourceSpec,
        remote: &RemoteTrunk,
    ) -> ReconcileStatus {
        let desired: BTreeMap<String, SubportParams> = resource
            .subports
            .iter()
            .filter_map(|s| {
                self.subport_ids.get(&s.port_ref).map(|port_id| {
                    (
                        port_id.clone(),
                        (s.segmentation_type.clone(), s.segmentation_id),
                    )
                })
            })
            .collect();
        let observed: BTreeMap<String, SubportParams> = remote
            .subports
            .iter()
            .map(|s| {
                (
                    s.port_id.clone(),
                    (s.segmentation_type.clone(), s.segmentation_id),
                )
            })
            .collect();

        let diff = keyed_diff(&desired, &observed);
        if diff.is_empty() {
            return ReconcileStatus::ok();
        }

        if !diff.remove.is_empty() {
            let port_ids = diff.remove.keys().cloned().collect_vec();
            info!(trunk = %remote.id, ?port_ids, "Removing subports");
            if let Err(e) = with_timeout(
                self.timeout,
                "remove subports",
                self.client.remove_subports(&remote.id, port_ids),
            )
            .await
            {
                return ReconcileStatus::wrap_error(e);
            }
        }

        if !diff.add.is_empty() {
            let subports = diff
                .add
                .into_iter()
                .map(|(port_id, (segmentation_type, segmentation_id))| RemoteSubport {
                    port_id,
                    segmentation_type,
                    segmentation_id,
                })
                .collect_vec();
            info!(trunk = %remote.id, count = subports.len(), "Adding subports");
            if let Err(e) = with_timeout(
                self.timeout,
                "add subports",
                self.client.add_subports(&remote.id, subports),
            )
            .await
            {
                return ReconcileStatus::wrap_error(e);
            }
        }

        ReconcileStatus::refresh()
    }
}

#[async_trait]
impl Actuator for TrunkActuator {
    type Object = Trunk;
    type Remote = RemoteTrunk;
    type Step = TrunkStep;

    fn resource_id(&self, remote: &RemoteTrunk) -> String {
        remote.id.clone()
    }

    async fn resolve_dependencies(&mut self, obj: &Trunk) -> ReconcileStatus {
        let cluster = self.cluster.as_ref();
        let (port, port_status) = self
            .deps
            .port
            .get_dependencies(cluster, obj, is_ready::<Port>)
            .await;
        let (project, project_status) = self
            .deps
            .project
            .get_dependencies(cluster, obj, is_ready::<Project>)
            .await;
        let (subports, subports_status) = self
            .deps
            .subports
            .get_dependencies(cluster, obj, is_ready::<Port>)
            .await;

        self.port_id = port.values().next().map(dependency_id);
        self.project_id = project.values().next().map(dependency_id);
        self.subport_ids = subports
            .iter()
            .map(|(name, port)| (name.clone(), dependency_id(port)))
            .collect();
        port_status.merge(project_status).merge(subports_status)
    }

    async fn get_resource(&self, id: &str) -> Result<RemoteTrunk> {
        self.client.get_trunk(id).await
    }

    async fn list_for_adoption(&self, obj: &Trunk) -> Option<RemoteStream<RemoteTrunk>> {
        let resource = obj.spec.resource.as_ref()?;
        Some(self.client.list_trunks(ListOpts {
            name: Some(resource_name(obj, resource.name.as_ref())),
            description: Some(resource.description.clone().unwrap_or_default()),
            ..ListOpts::default()
        }))
    }

    async fn list_for_import(
        &self,
        obj: &Trunk,
        filter: &TrunkFilter,
    ) -> Outcome<RemoteStream<RemoteTrunk>> {
        let cluster = self.cluster.as_ref();
        let (port, port_status) = match self
            .deps
            .import_port
            .get_dependency(cluster, obj, is_ready::<Port>)
            .await
        {
            Ok(port) => (port, ReconcileStatus::ok()),
            Err(status) => (None, status),
        };
        let (project, project_status) = match self
            .deps
            .import_project
            .get_dependency(cluster, obj, is_ready::<Project>)
            .await
        {
            Ok(project) => (project, ReconcileStatus::ok()),
            Err(status) => (None, status),
        };
        let status = port_status.merge(project_status);
        if status.needs_reschedule().0 {
            return Err(status);
        }

        Ok(self.client.list_trunks(ListOpts {
            name: filter.name.clone(),
            description: filter.description.clone(),
            project_id: project.as_ref().map(dependency_id),
            port_id: port.as_ref().map(dependency_id),
            status: filter.status.clone(),
            admin_state_up: filter.admin_state_up,
            tags: tag_filter(&filter.tags),
        }))
    }

    async fn create_resource(&self, obj: &Trunk) -> Outcome<RemoteTrunk> {
        let resource = obj.spec.resource.as_ref().ok_or_else(|| {
            ReconcileStatus::wrap_error(Error::terminal(
                ConditionReason::InvalidConfiguration,
                "Creation requested, but spec.resource is not set",
            ))
        })?;
        let Some(port_id) = self.port_id.clone() else {
            return Err(ReconcileStatus::wrap_error(Error::terminal(
                ConditionReason::InvalidConfiguration,
                "spec.resource.portRef is not set",
            )));
        };

        let opts = TrunkCreateOpts {
            name: resource_name(obj, resource.name.as_ref()),
            description: resource.description.clone().unwrap_or_default(),
            port_id,
            project_id: self.project_id.clone(),
            admin_state_up: resource.admin_state_up,
        };
        with_timeout(self.timeout, "create trunk", self.client.create_trunk(opts))
            .await
            .map_err(|e| ReconcileStatus::wrap_error(create_error(e)))
    }

    async fn delete_resource(&self, _obj: &Trunk, remote: &RemoteTrunk) -> ReconcileStatus {
        delete_status(
            with_timeout(
                self.timeout,
                "delete trunk",
                self.client.delete_trunk(&remote.id),
            )
            .await,
        )
    }

    fn steps(&self) -> Vec<TrunkStep> {
        vec![TrunkStep::Tags, TrunkStep::Update, TrunkStep::Subports]
    }

    async fn run_step(
        &self,
        step: TrunkStep,
        obj: &Trunk,
        remote: &RemoteTrunk,
    ) -> ReconcileStatus {
        let Some(resource) = obj.spec.resource.as_ref() else {
            return ReconcileStatus::ok();
        };
        match step {
            TrunkStep::Tags => {
                reconcile_tags(
                    self.client.as_ref(),
                    self.timeout,
                    TagCollection::Trunks,
                    &remote.id,
                    &resource.tags,
                    &remote.tags,
                )
                .await
            }
            TrunkStep::Update => {
                let desired = Attributes {
                    name: resource_name(obj, resource.name.as_ref()),
                    description: resource.description.as_deref().unwrap_or_default(),
                    admin_state_up: resource.admin_state_up,
                };
                let opts = update_opts(
                    &desired,
                    &remote.name,
                    &remote.description,
                    remote.admin_state_up,
                );
                if opts.is_empty() {
                    return ReconcileStatus::ok();
                }
                update_status(
                    with_timeout(
                        self.timeout,
                        "update trunk",
                        self.client.update_trunk(&remote.id, opts),
                    )
                    .await,
                )
            }
            TrunkStep::Subports => self.reconcile_subports(resource, remote).await,
        }
    }
}

pub struct TrunkActuatorFactory<S> {
    scopes: S,
    deps: Arc<TrunkDependencies>,
}

impl<S> TrunkActuatorFactory<S> {
    pub fn new(scopes: S) -> Self {
        Self {
            scopes,
            deps: Arc::new(TrunkDependencies::new()),
        }
    }

    fn actuator(&self, ctx: &ControllerContext, client: NetworkScope) -> TrunkActuator {
        TrunkActuator {
            client,
            cluster: Arc::clone(&ctx.cluster),
            deps: Arc::clone(&self.deps),
            timeout: ctx.config.operation_timeout,
            port_id: None,
            project_id: None,
            subport_ids: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl<S> ActuatorFactory for TrunkActuatorFactory<S>
where
    S: ScopeFactory<Scope = NetworkScope> + 'static,
{
    type Object = Trunk;
    type Actuator = TrunkActuator;

    async fn new_create_actuator(
        &self,
        ctx: &ControllerContext,
        obj: &Trunk,
    ) -> Outcome<TrunkActuator> {
        let client = resolve_scope(
            ctx.cluster.as_ref(),
            &self.deps.credentials,
            &self.scopes,
            obj,
        )
        .await?;
        Ok(self.actuator(ctx, client))
    }

    async fn new_delete_actuator(
        &self,
        ctx: &ControllerContext,
        obj: &Trunk,
    ) -> Outcome<TrunkActuator> {
        let client = resolve_scope_for_deletion(ctx.cluster.as_ref(), &self.scopes, obj).await?;
        Ok(self.actuator(ctx, client))
    }

    fn dependencies(&self) -> Vec<&dyn DependencyRegistration> {
        vec![
            &self.deps.port as &dyn DependencyRegistration,
            &self.deps.import_port,
            &self.deps.subports,
            &self.deps.project,
            &self.deps.import_project,
            &self.deps.credentials,
        ]
    }
}

pub struct TrunkStatusWriter;

impl StatusWriter for TrunkStatusWriter {
    type Object = Trunk;
    type Remote = RemoteTrunk;

    fn resource_status(&self, remote: &RemoteTrunk) -> TrunkResourceStatus {
        TrunkResourceStatus {
            name: remote.name.clone(),
            description: remote.description.clone(),
            port_id: remote.port_id.clone(),
            project_id: remote.project_id.clone(),
            status: remote.status.clone(),
            admin_state_up: remote.admin_state_up,
            tags: remote.tags.clone(),
            subports: remote
                .subports
                .iter()
                .map(|s| SubportStatus {
                    port_id: s.port_id.clone(),
                    segmentation_type: s.segmentation_type.clone(),
                    segmentation_id: s.segmentation_id,
                })
                .collect(),
            revision_number: remote.revision_number,
            created_at: remote.created_at,
            updated_at: remote.updated_at,
        }
    }

    fn available_status(&self, obj: &Trunk, remote: Option<&RemoteTrunk>) -> ConditionStatus {
        available_when(
            obj,
            remote.map(|r| r.status.as_str()),
            &[STATUS_ACTIVE, STATUS_DOWN],
        )
    }
}

/// Register the trunk controller and its dependency guards.
pub async fn setup<S>(manager: &mut Manager, ctx: ControllerContext, scopes: S) -> Result<()>
where
    S: ScopeFactory<Scope = NetworkScope> + 'static,
{
    Arc::new(GenericController::new(
        TRUNK_CONTROLLER,
        TRUNK_FINALIZER,
        ctx,
        TrunkActuatorFactory::new(scopes),
        TrunkStatusWriter,
    ))
    .register(manager)
    .await
}
