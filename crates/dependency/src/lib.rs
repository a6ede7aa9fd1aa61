//! Dependencies between cluster objects.
//!
//! A [`Dependency`] declares that an owner kind names objects of a
//! dependency kind through a field. It resolves those objects during a
//! reconcile, enqueues owners when a dependency changes and, as a deletion
//! guard, keeps referenced objects from disappearing while still in use.
//!
//! Guards sharing a finalizer coordinate through the
//! [`DeletionGuardRegistry`], which is built once and passed to every
//! dependency.

pub mod dependency;
pub mod guard;
pub mod registry;

pub use dependency::{Dependency, DependencyRegistration, GuardSpec, RefsFn};
pub use guard::DeletionGuardController;
pub use registry::{DeletionGuardRegistry, GuardChecker};
