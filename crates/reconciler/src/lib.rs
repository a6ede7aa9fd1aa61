//! Generic reconciliation engine for cloud resources managed from the cluster.
//!
//! One [`GenericController`] drives every managed kind. A kind plugs in
//! through three seams:
//!
//! - [`ActuatorFactory`]: resolves credentials and builds an [`Actuator`]
//! - [`Actuator`]: remote get/list/create/delete plus ordered convergence steps
//! - [`StatusWriter`]: maps a remote snapshot onto the object's status
//!
//! A pass classifies the object ([`ObjectState`]), binds it to a remote
//! resource (by recorded ID, import, adoption, or creation), runs the
//! kind's steps until one blocks, and publishes `Available` and
//! `Progressing` conditions. Deletion waits for every other controller's
//! guard to release the object, deletes the remote resource if it is
//! managed, and removes the controller finalizer.
//!
//! # Example
//!
//! ```ignore
//! use stratus_reconciler::{ControllerConfig, ControllerContext, GenericController};
//!
//! let ctx = ControllerContext::new(cluster, indexer, registry, ControllerConfig::default());
//! let controller = GenericController::new("port", "stratus.dev/port", ctx, factory, writer);
//! controller.register(&mut manager).await?;
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod context;
pub mod controller;
pub mod convergence;
pub mod credentials;
pub mod error;
pub mod interfaces;
pub mod status;
pub mod types;

pub use context::{with_timeout, ControllerConfig, ControllerContext};
pub use controller::GenericController;
pub use convergence::{apply_diff, keyed_diff, tags_to_set, KeyedDiff};
pub use credentials::{
    credentials_dependency, resolve_scope, resolve_scope_for_deletion, CloudCredentialsRef,
    ScopeFactory, Secret, CLOUDS_YAML_KEY, CREDENTIALS_FIELD,
};
pub use error::SpecError;
pub use interfaces::{Actuator, ActuatorFactory, ManagedObject, RemoteStream, StatusWriter};
pub use status::conditions;
pub use types::ObjectState;
