//! Networking kinds for Stratus: ports, trunks and the projects owning them.
//!
//! Each kind plugs an actuator, an actuator factory and a status writer into
//! the generic controller. Remote calls go through [`NetworkClient`];
//! [`FakeNetworkClient`] is an in-memory implementation used by the
//! simulator and the tests.

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod api;
pub mod client;
mod common;
pub mod fake;
pub mod port;
pub mod project;
pub mod scope;
pub mod trunk;

use stratus_cluster::Manager;
use stratus_core::Result;
use stratus_reconciler::{ControllerContext, ScopeFactory};

pub use api::{
    FilterByTags, ManagedSpec, Port, PortFilter, PortResourceSpec, Project, ProjectFilter,
    ProjectResourceSpec, Subport, Trunk, TrunkFilter, TrunkResourceSpec,
};
pub use client::{NetworkClient, NetworkScope};
pub use fake::FakeNetworkClient;
pub use scope::FakeScopeFactory;

/// Register the project, port and trunk controllers on `manager`.
pub async fn setup_controllers<S>(
    manager: &mut Manager,
    ctx: &ControllerContext,
    scopes: &S,
) -> Result<()>
where
    S: ScopeFactory<Scope = NetworkScope> + Clone + 'static,
{
    project::setup(manager, ctx.clone(), scopes.clone()).await?;
    port::setup(manager, ctx.clone(), scopes.clone()).await?;
    trunk::setup(manager, ctx.clone(), scopes.clone()).await
}
