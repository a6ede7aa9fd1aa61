//! Contracts between the generic controller and a resource kind.

use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use stratus_core::{ConditionStatus, HasStatus, ImportSpec, Result};
use stratus_dependency::DependencyRegistration;
use stratus_progress::{Outcome, ReconcileStatus};

use crate::context::ControllerContext;
use crate::credentials::CloudCredentialsRef;

/// Lazy, finite listing of remote resources. Consumers stop early.
pub type RemoteStream<R> = BoxStream<'static, Result<R>>;

/// A cluster object managing one remote resource.
pub trait ManagedObject: HasStatus {
    /// Desired attributes of a managed resource.
    type ResourceSpec: Clone + Debug + Send + Sync;
    /// Kind-specific search used to import an existing resource.
    type Filter: Clone + Debug + Send + Sync;

    fn resource_spec(&self) -> Option<&Self::ResourceSpec>;

    fn import_spec(&self) -> Option<&ImportSpec<Self::Filter>>;

    fn credentials_ref(&self) -> &CloudCredentialsRef;
}

/// Remote operations for one resource kind, bound to a client scope.
#[async_trait]
pub trait Actuator: Send + Sync {
    type Object: ManagedObject;
    type Remote: Clone + Debug + Send + Sync + 'static;
    /// A convergence step, run in the order given by [`Actuator::steps`].
    type Step: Copy + Debug + Send + Sync;

    fn resource_id(&self, remote: &Self::Remote) -> String;

    /// Resolve and guard the objects the managed resource depends on, keeping
    /// whatever creation needs from them. Runs on every managed pass before
    /// the remote resource is looked up; a blocking status ends the pass.
    async fn resolve_dependencies(&mut self, obj: &Self::Object) -> ReconcileStatus;

    /// Fetch by ID. A missing resource is a not-found error.
    async fn get_resource(&self, id: &str) -> Result<Self::Remote>;

    /// Resources this object may have created in an earlier pass whose ID
    /// was never recorded. `None` when the object cannot adopt.
    async fn list_for_adoption(&self, obj: &Self::Object) -> Option<RemoteStream<Self::Remote>>;

    /// Resources matching an import filter. May wait on objects the filter
    /// refers to.
    async fn list_for_import(
        &self,
        obj: &Self::Object,
        filter: &<Self::Object as ManagedObject>::Filter,
    ) -> Outcome<RemoteStream<Self::Remote>>;

    async fn create_resource(&self, obj: &Self::Object) -> Outcome<Self::Remote>;

    async fn delete_resource(&self, obj: &Self::Object, remote: &Self::Remote) -> ReconcileStatus;

    /// Convergence steps for a managed resource.
    fn steps(&self) -> Vec<Self::Step>;

    async fn run_step(
        &self,
        step: Self::Step,
        obj: &Self::Object,
        remote: &Self::Remote,
    ) -> ReconcileStatus;
}

/// Builds actuators, resolving credentials first.
#[async_trait]
pub trait ActuatorFactory: Send + Sync + 'static {
    type Object: ManagedObject;
    type Actuator: Actuator<Object = Self::Object>;

    async fn new_create_actuator(
        &self,
        ctx: &ControllerContext,
        obj: &Self::Object,
    ) -> Outcome<Self::Actuator>;

    async fn new_delete_actuator(
        &self,
        ctx: &ControllerContext,
        obj: &Self::Object,
    ) -> Outcome<Self::Actuator>;

    /// Every dependency of the kind, credentials included.
    fn dependencies(&self) -> Vec<&dyn DependencyRegistration>;
}

/// Maps a remote snapshot onto the object's status.
pub trait StatusWriter: Send + Sync + 'static {
    type Object: ManagedObject;
    type Remote;

    /// Mirror of the remote attributes published under `status.resource`.
    fn resource_status(
        &self,
        remote: &Self::Remote,
    ) -> <Self::Object as HasStatus>::ResourceStatus;

    /// Availability of the remote resource. `remote` is `None` when no
    /// snapshot was fetched this pass.
    fn available_status(
        &self,
        obj: &Self::Object,
        remote: Option<&Self::Remote>,
    ) -> ConditionStatus;
}
