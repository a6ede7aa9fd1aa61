//! Step helpers shared by the networking kinds.

use std::time::Duration;

use stratus_core::{ConditionReason, ConditionStatus, Error, HasStatus, Result};
use stratus_progress::ReconcileStatus;
use stratus_reconciler::{tags_to_set, with_timeout};
use tracing::{debug, info};

use crate::api::FilterByTags;
use crate::client::{NetworkClient, TagCollection, TagFilter, UpdateOpts};

/// A dependency is usable once it is available and bound to a remote ID.
pub fn is_ready<D: HasStatus>(dependency: &D) -> bool {
    dependency.is_available() && dependency.status_id().is_some()
}

/// Remote ID of a resolved dependency. Only called on ready dependencies.
pub fn dependency_id<D: HasStatus>(dependency: &D) -> String {
    dependency.status_id().unwrap_or_default().to_string()
}

pub fn tag_filter(filter: &FilterByTags) -> TagFilter {
    TagFilter {
        tags: filter.tags.clone(),
        tags_any: filter.tags_any.clone(),
        not_tags: filter.not_tags.clone(),
        not_tags_any: filter.not_tags_any.clone(),
    }
}

/// Availability from the remote status string.
///
/// With no snapshot the answer is `False` before an ID is recorded and
/// `Unknown` afterwards.
pub fn available_when<O: HasStatus>(
    obj: &O,
    remote_status: Option<&str>,
    healthy: &[&str],
) -> ConditionStatus {
    match remote_status {
        None if obj.status_id().is_none() => ConditionStatus::False,
        None => ConditionStatus::Unknown,
        Some(status) if healthy.contains(&status) => ConditionStatus::True,
        Some(_) => ConditionStatus::False,
    }
}

/// Replace the remote tag set when it differs from the desired one.
pub async fn reconcile_tags(
    client: &dyn NetworkClient,
    timeout: Duration,
    collection: TagCollection,
    id: &str,
    desired: &[String],
    observed: &[String],
) -> ReconcileStatus {
    let Some(tags) = tags_to_set(desired, observed) else {
        return ReconcileStatus::ok();
    };
    info!(%collection, id, ?tags, "Replacing tags");
    match with_timeout(
        timeout,
        "replace tags",
        client.replace_all_tags(collection, id, tags),
    )
    .await
    {
        Ok(_) => ReconcileStatus::refresh(),
        Err(e) => ReconcileStatus::wrap_error(e),
    }
}

/// Desired values of the updatable attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes<'a> {
    pub name: String,
    pub description: &'a str,
    /// An unset value means `true`.
    pub admin_state_up: Option<bool>,
}

/// Changes needed to bring `(name, description, admin_state_up)` on the
/// remote to the desired attributes.
pub fn update_opts(
    desired: &Attributes<'_>,
    name: &str,
    description: &str,
    admin_state_up: bool,
) -> UpdateOpts {
    let wanted_admin_state = desired.admin_state_up.unwrap_or(true);
    UpdateOpts {
        name: (desired.name != name).then(|| desired.name.clone()),
        description: (desired.description != description).then(|| desired.description.to_string()),
        admin_state_up: (wanted_admin_state != admin_state_up).then_some(wanted_admin_state),
    }
}

/// Status of an attribute update: a conflict is a configuration problem,
/// success makes the snapshot stale.
pub fn update_status<T>(result: Result<T>) -> ReconcileStatus {
    match result {
        Ok(_) => ReconcileStatus::refresh(),
        Err(e) if e.is_conflict() => ReconcileStatus::wrap_error(Error::terminal_from(
            ConditionReason::InvalidConfiguration,
            format!("invalid configuration updating resource: {e}"),
            e,
        )),
        Err(e) => ReconcileStatus::wrap_error(e),
    }
}

/// Creation failures the remote rejected outright need a spec change.
pub fn create_error(err: Error) -> Error {
    if err.is_retryable() || err.is_terminal() {
        err
    } else {
        Error::terminal_from(
            ConditionReason::InvalidConfiguration,
            format!("invalid configuration creating resource: {err}"),
            err,
        )
    }
}

/// Status of a remote delete. A resource already gone counts as deleted.
pub fn delete_status(result: Result<()>) -> ReconcileStatus {
    match result {
        Ok(()) => ReconcileStatus::ok(),
        Err(e) if e.is_not_found() => {
            debug!("Resource already deleted");
            ReconcileStatus::ok()
        }
        Err(e) => ReconcileStatus::wrap_error(e),
    }
}
