//! Core object model for Stratus.
//!
//! Everything the reconciliation engine shares across crates lives here:
//!
//! - [`meta`]: object identity (`ObjectKey`, `ObjectMeta`) and the [`Resource`] trait
//! - [`status`]: the status shape every managed kind publishes, and its conditions
//! - [`error`]: the error taxonomy used by remote clients, the cluster and the engine
//! - [`requeue`]: the scheduling decision a reconcile pass hands back to its queue
//!
//! All errors are explicit and typed - no panics allowed.

pub mod error;
pub mod meta;
pub mod requeue;
pub mod status;

pub use error::{Error, Result};
pub use meta::{ObjectKey, ObjectMeta, Resource};
pub use requeue::Requeue;
pub use status::{
    Condition, ConditionReason, ConditionStatus, ConditionType, HasStatus, ImportSpec,
    ManagedStatus,
};
