//! Project controller. Projects are usually imported; creation is supported
//! for self-contained environments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stratus_cluster::Manager;
use stratus_core::{ConditionReason, ConditionStatus, Error, HasStatus, Result};
use stratus_dependency::{Dependency, DependencyRegistration};
use stratus_progress::{Outcome, ReconcileStatus};
use stratus_reconciler::{
    credentials_dependency, resolve_scope, resolve_scope_for_deletion, with_timeout, Actuator,
    ActuatorFactory, ControllerContext, GenericController, RemoteStream, ScopeFactory, Secret,
    StatusWriter,
};

use crate::api::{resource_name, Project, ProjectFilter, ProjectResourceStatus};
use crate::client::{NetworkScope, ProjectCreateOpts, RemoteProject, TagCollection, TagFilter};
use crate::common::{create_error, delete_status, reconcile_tags, tag_filter};

pub const PROJECT_CONTROLLER: &str = "project";
pub const PROJECT_FINALIZER: &str = "stratus.dev/project";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectStep {
    Tags,
}

pub struct ProjectActuator {
    client: NetworkScope,
    timeout: Duration,
}

#[async_trait]
impl Actuator for ProjectActuator {
    type Object = Project;
    type Remote = RemoteProject;
    type Step = ProjectStep;

    fn resource_id(&self, remote: &RemoteProject) -> String {
        remote.id.clone()
    }

    // Credentials are the only dependency, resolved with the actuator.
    async fn resolve_dependencies(&mut self, _obj: &Project) -> ReconcileStatus {
        ReconcileStatus::ok()
    }

    async fn get_resource(&self, id: &str) -> Result<RemoteProject> {
        self.client.get_project(id).await
    }

    async fn list_for_adoption(&self, obj: &Project) -> Option<RemoteStream<RemoteProject>> {
        let resource = obj.spec.resource.as_ref()?;
        Some(self.client.list_projects(
            Some(resource_name(obj, resource.name.as_ref())),
            TagFilter::default(),
        ))
    }

    async fn list_for_import(
        &self,
        _obj: &Project,
        filter: &ProjectFilter,
    ) -> Outcome<RemoteStream<RemoteProject>> {
        Ok(self
            .client
            .list_projects(filter.name.clone(), tag_filter(&filter.tags)))
    }

    async fn create_resource(&self, obj: &Project) -> Outcome<RemoteProject> {
        let resource = obj.spec.resource.as_ref().ok_or_else(|| {
            ReconcileStatus::wrap_error(Error::terminal(
                ConditionReason::InvalidConfiguration,
                "Creation requested, but spec.resource is not set",
            ))
        })?;
        let opts = ProjectCreateOpts {
            name: resource_name(obj, resource.name.as_ref()),
            description: resource.description.clone().unwrap_or_default(),
            enabled: resource.enabled,
        };
        with_timeout(self.timeout, "create project", self.client.create_project(opts))
            .await
            .map_err(|e| ReconcileStatus::wrap_error(create_error(e)))
    }

    async fn delete_resource(&self, _obj: &Project, remote: &RemoteProject) -> ReconcileStatus {
        delete_status(
            with_timeout(
                self.timeout,
                "delete project",
                self.client.delete_project(&remote.id),
            )
            .await,
        )
    }

    fn steps(&self) -> Vec<ProjectStep> {
        vec![ProjectStep::Tags]
    }

    async fn run_step(
        &self,
        step: ProjectStep,
        obj: &Project,
        remote: &RemoteProject,
    ) -> ReconcileStatus {
        let Some(resource) = obj.spec.resource.as_ref() else {
            return ReconcileStatus::ok();
        };
        match step {
            ProjectStep::Tags => {
                reconcile_tags(
                    self.client.as_ref(),
                    self.timeout,
                    TagCollection::Projects,
                    &remote.id,
                    &resource.tags,
                    &remote.tags,
                )
                .await
            }
        }
    }
}

pub struct ProjectActuatorFactory<S> {
    scopes: S,
    credentials: Arc<Dependency<Project, Secret>>,
}

impl<S> ProjectActuatorFactory<S> {
    pub fn new(scopes: S) -> Self {
        Self {
            scopes,
            credentials: Arc::new(credentials_dependency(PROJECT_FINALIZER, PROJECT_CONTROLLER)),
        }
    }
}

#[async_trait]
impl<S> ActuatorFactory for ProjectActuatorFactory<S>
where
    S: ScopeFactory<Scope = NetworkScope> + 'static,
{
    type Object = Project;
    type Actuator = ProjectActuator;

    async fn new_create_actuator(
        &self,
        ctx: &ControllerContext,
        obj: &Project,
    ) -> Outcome<ProjectActuator> {
        let client =
            resolve_scope(ctx.cluster.as_ref(), &self.credentials, &self.scopes, obj).await?;
        Ok(ProjectActuator {
            client,
            timeout: ctx.config.operation_timeout,
        })
    }

    async fn new_delete_actuator(
        &self,
        ctx: &ControllerContext,
        obj: &Project,
    ) -> Outcome<ProjectActuator> {
        let client = resolve_scope_for_deletion(ctx.cluster.as_ref(), &self.scopes, obj).await?;
        Ok(ProjectActuator {
            client,
            timeout: ctx.config.operation_timeout,
        })
    }

    fn dependencies(&self) -> Vec<&dyn DependencyRegistration> {
        vec![self.credentials.as_ref() as &dyn DependencyRegistration]
    }
}

pub struct ProjectStatusWriter;

impl StatusWriter for ProjectStatusWriter {
    type Object = Project;
    type Remote = RemoteProject;

    fn resource_status(&self, remote: &RemoteProject) -> ProjectResourceStatus {
        ProjectResourceStatus {
            name: remote.name.clone(),
            description: remote.description.clone(),
            enabled: remote.enabled,
            tags: remote.tags.clone(),
        }
    }

    fn available_status(&self, obj: &Project, remote: Option<&RemoteProject>) -> ConditionStatus {
        match remote {
            Some(_) => ConditionStatus::True,
            None if obj.status_id().is_none() => ConditionStatus::False,
            None => ConditionStatus::Unknown,
        }
    }
}

/// Register the project controller.
pub async fn setup<S>(manager: &mut Manager, ctx: ControllerContext, scopes: S) -> Result<()>
where
    S: ScopeFactory<Scope = NetworkScope> + 'static,
{
    Arc::new(GenericController::new(
        PROJECT_CONTROLLER,
        PROJECT_FINALIZER,
        ctx,
        ProjectActuatorFactory::new(scopes),
        ProjectStatusWriter,
    ))
    .register(manager)
    .await
}
