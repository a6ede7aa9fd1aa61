//! Port controller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stratus_cluster::{ClusterClient, Manager};
use stratus_core::{ConditionReason, ConditionStatus, Error, Result};
use stratus_dependency::{Dependency, DependencyRegistration};
use stratus_progress::{Outcome, ReconcileStatus};
use stratus_reconciler::{
    credentials_dependency, resolve_scope, resolve_scope_for_deletion, with_timeout, Actuator,
    ActuatorFactory, ControllerContext, GenericController, RemoteStream, ScopeFactory, Secret,
    StatusWriter,
};

use crate::api::{resource_name, Port, PortFilter, PortResourceStatus, Project};
use crate::client::{
    ListOpts, NetworkScope, PortCreateOpts, RemotePort, TagCollection, STATUS_ACTIVE, STATUS_DOWN,
};
use crate::common::{
    available_when, create_error, delete_status, dependency_id, is_ready, reconcile_tags,
    tag_filter, update_opts, update_status, Attributes,
};

pub const PORT_CONTROLLER: &str = "port";
pub const PORT_FINALIZER: &str = "stratus.dev/port";

fn project_ref(port: &Port) -> Vec<String> {
    port.spec
        .resource
        .as_ref()
        .and_then(|r| r.project_ref.clone())
        .into_iter()
        .collect()
}

fn import_project_ref(port: &Port) -> Vec<String> {
    port.spec
        .import
        .as_ref()
        .and_then(|i| i.filter.as_ref())
        .and_then(|f| f.project_ref.clone())
        .into_iter()
        .collect()
}

struct PortDependencies {
    project: Dependency<Port, Project>,
    import_project: Dependency<Port, Project>,
    credentials: Dependency<Port, Secret>,
}

impl PortDependencies {
    fn new() -> Self {
        Self {
            project: Dependency::deletion_guard(
                "spec.resource.projectRef",
                project_ref,
                PORT_FINALIZER,
                format!("{PORT_CONTROLLER}/project"),
            ),
            import_project: Dependency::new("spec.import.filter.projectRef", import_project_ref),
            credentials: credentials_dependency(PORT_FINALIZER, PORT_CONTROLLER),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStep {
    Tags,
    Update,
}

pub struct PortActuator {
    client: NetworkScope,
    cluster: Arc<dyn ClusterClient>,
    deps: Arc<PortDependencies>,
    timeout: Duration,
    project_id: Option<String>,
}

#[async_trait]
impl Actuator for PortActuator {
    type Object = Port;
    type Remote = RemotePort;
    type Step = PortStep;

    fn resource_id(&self, remote: &RemotePort) -> String {
        remote.id.clone()
    }

    async fn resolve_dependencies(&mut self, obj: &Port) -> ReconcileStatus {
        let (project, status) = self
            .deps
            .project
            .get_dependencies(self.cluster.as_ref(), obj, is_ready::<Project>)
            .await;
        self.project_id = project.values().next().map(dependency_id);
        status
    }

    async fn get_resource(&self, id: &str) -> Result<RemotePort> {
        self.client.get_port(id).await
    }

    async fn list_for_adoption(&self, obj: &Port) -> Option<RemoteStream<RemotePort>> {
        let resource = obj.spec.resource.as_ref()?;
        Some(self.client.list_ports(ListOpts {
            name: Some(resource_name(obj, resource.name.as_ref())),
            description: Some(resource.description.clone().unwrap_or_default()),
            ..ListOpts::default()
        }))
    }

    async fn list_for_import(
        &self,
        obj: &Port,
        filter: &PortFilter,
    ) -> Outcome<RemoteStream<RemotePort>> {
        let project = self
            .deps
            .import_project
            .get_dependency(self.cluster.as_ref(), obj, is_ready::<Project>)
            .await?;

        Ok(self.client.list_ports(ListOpts {
            name: filter.name.clone(),
            description: filter.description.clone(),
            project_id: project.as_ref().map(dependency_id),
            tags: tag_filter(&filter.tags),
            ..ListOpts::default()
        }))
    }

    async fn create_resource(&self, obj: &Port) -> Outcome<RemotePort> {
        let resource = obj.spec.resource.as_ref().ok_or_else(|| {
            ReconcileStatus::wrap_error(Error::terminal(
                ConditionReason::InvalidConfiguration,
                "Creation requested, but spec.resource is not set",
            ))
        })?;
        let opts = PortCreateOpts {
            name: resource_name(obj, resource.name.as_ref()),
            description: resource.description.clone().unwrap_or_default(),
            project_id: self.project_id.clone(),
            admin_state_up: resource.admin_state_up,
        };
        with_timeout(self.timeout, "create port", self.client.create_port(opts))
            .await
            .map_err(|e| ReconcileStatus::wrap_error(create_error(e)))
    }

    async fn delete_resource(&self, _obj: &Port, remote: &RemotePort) -> ReconcileStatus {
        delete_status(
            with_timeout(self.timeout, "delete port", self.client.delete_port(&remote.id)).await,
        )
    }

    fn steps(&self) -> Vec<PortStep> {
        vec![PortStep::Tags, PortStep::Update]
    }

    async fn run_step(&self, step: PortStep, obj: &Port, remote: &RemotePort) -> ReconcileStatus {
        let Some(resource) = obj.spec.resource.as_ref() else {
            return ReconcileStatus::ok();
        };
        match step {
            PortStep::Tags => {
                reconcile_tags(
                    self.client.as_ref(),
                    self.timeout,
                    TagCollection::Ports,
                    &remote.id,
                    &resource.tags,
                    &remote.tags,
                )
                .await
            }
            PortStep::Update => {
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
                        "update port",
                        self.client.update_port(&remote.id, opts),
                    )
                    .await,
                )
            }
        }
    }
}

pub struct PortActuatorFactory<S> {
    scopes: S,
    deps: Arc<PortDependencies>,
}

impl<S> PortActuatorFactory<S> {
    pub fn new(scopes: S) -> Self {
        Self {
            scopes,
            deps: Arc::new(PortDependencies::new()),
        }
    }
}

#[async_trait]
impl<S> ActuatorFactory for PortActuatorFactory<S>
where
    S: ScopeFactory<Scope = NetworkScope> + 'static,
{
    type Object = Port;
    type Actuator = PortActuator;

    async fn new_create_actuator(
        &self,
        ctx: &ControllerContext,
        obj: &Port,
    ) -> Outcome<PortActuator> {
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
        obj: &Port,
    ) -> Outcome<PortActuator> {
        let client = resolve_scope_for_deletion(ctx.cluster.as_ref(), &self.scopes, obj).await?;
        Ok(self.actuator(ctx, client))
    }

    fn dependencies(&self) -> Vec<&dyn DependencyRegistration> {
        vec![
            &self.deps.project as &dyn DependencyRegistration,
            &self.deps.import_project,
            &self.deps.credentials,
        ]
    }
}

impl<S> PortActuatorFactory<S> {
    fn actuator(&self, ctx: &ControllerContext, client: NetworkScope) -> PortActuator {
        PortActuator {
            client,
            cluster: Arc::clone(&ctx.cluster),
            deps: Arc::clone(&self.deps),
            timeout: ctx.config.operation_timeout,
            project_id: None,
        }
    }
}

pub struct PortStatusWriter;

impl StatusWriter for PortStatusWriter {
    type Object = Port;
    type Remote = RemotePort;

    fn resource_status(&self, remote: &RemotePort) -> PortResourceStatus {
        PortResourceStatus {
            name: remote.name.clone(),
            description: remote.description.clone(),
            project_id: remote.project_id.clone(),
            status: remote.status.clone(),
            admin_state_up: remote.admin_state_up,
            tags: remote.tags.clone(),
            revision_number: remote.revision_number,
            created_at: remote.created_at,
            updated_at: remote.updated_at,
        }
    }

    fn available_status(&self, obj: &Port, remote: Option<&RemotePort>) -> ConditionStatus {
        available_when(
            obj,
            remote.map(|r| r.status.as_str()),
            &[STATUS_ACTIVE, STATUS_DOWN],
        )
    }
}

/// Register the port controller and its dependency guards.
pub async fn setup<S>(manager: &mut Manager, ctx: ControllerContext, scopes: S) -> Result<()>
where
    S: ScopeFactory<Scope = NetworkScope> + 'static,
{
    Arc::new(GenericController::new(
        PORT_CONTROLLER,
        PORT_FINALIZER,
        ctx,
        PortActuatorFactory::new(scopes),
        PortStatusWriter,
    ))
    .register(manager)
    .await
}
