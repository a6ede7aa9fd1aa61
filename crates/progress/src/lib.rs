//! Composable result of a reconcile pass.
//!
//! A [`ReconcileStatus`] collects three independent signals while a pass runs:
//!
//! - **waits**: the pass is blocked on something that is not an error (a
//!   dependency object not yet created or ready, a remote resource still
//!   provisioning)
//! - **error**: either *terminal* (the user must edit the spec) or *transient*
//!   (retry with backoff)
//! - **refresh**: the in-memory snapshot of the remote resource is stale
//!
//! Statuses merge with [`ReconcileStatus::merge`]. Severity is ordered
//! Terminal > Transient > Waiting > OK, the first terminal error wins, and
//! the default (OK) status is the identity.
//!
//! # Example
//!
//! ```
//! use stratus_progress::{ReconcileStatus, WaitingReason};
//!
//! let status = ReconcileStatus::ok()
//!     .merge(ReconcileStatus::waiting_on_object("Port", "parent", WaitingReason::Creation))
//!     .merge(ReconcileStatus::refresh());
//!
//! let (blocked, error) = status.needs_reschedule();
//! assert!(blocked);
//! assert!(error.is_none());
//! assert!(status.needs_refresh());
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use itertools::Itertools;
use stratus_core::{Error, Requeue};

/// `Ok` carries the produced value, `Err` a status that halts the caller.
pub type Outcome<T> = std::result::Result<T, ReconcileStatus>;

/// Why a pass is waiting on another cluster object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WaitingReason {
    /// The object does not exist yet.
    Creation,
    /// The object exists but is not ready (or is being deleted).
    Ready,
    /// Other objects still hold references guarding it from deletion.
    Released,
}

/// A single blocking, non-error wait.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Wait {
    Object {
        kind: String,
        name: String,
        reason: WaitingReason,
    },
    Remote {
        message: String,
        poll: Duration,
    },
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object {
                kind,
                name,
                reason: WaitingReason::Creation,
            } => write!(f, "Waiting for {kind}/{name} to be created"),
            Self::Object {
                kind,
                name,
                reason: WaitingReason::Ready,
            } => write!(f, "Waiting for {kind}/{name} to be ready"),
            Self::Object {
                kind,
                name,
                reason: WaitingReason::Released,
            } => write!(f, "Waiting for {kind}/{name} to be released by referencing objects"),
            Self::Remote { message, .. } => f.write_str(message),
        }
    }
}

/// Classified error carried by a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Cannot succeed without a spec change. Never retried automatically.
    Terminal(Error),
    /// Retried with backoff. Merged transient errors accumulate in order.
    Transient(Vec<Error>),
}

impl ReconcileError {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    /// The errors in the order they were recorded.
    pub fn errors(&self) -> &[Error] {
        match self {
            Self::Terminal(err) => std::slice::from_ref(err),
            Self::Transient(errs) => errs,
        }
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.errors().iter().join("; "))
    }
}

impl std::error::Error for ReconcileError {}

/// Severity of a status, in merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Ok,
    Waiting,
    Transient,
    Terminal,
}

/// Accumulated outcome of a reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStatus {
    waits: BTreeSet<Wait>,
    error: Option<ReconcileError>,
    refresh: bool,
}

impl ReconcileStatus {
    /// The identity status: nothing to wait for, no error.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Block on another cluster object.
    pub fn waiting_on_object(
        kind: impl Into<String>,
        name: impl Into<String>,
        reason: WaitingReason,
    ) -> Self {
        Self::from_wait(Wait::Object {
            kind: kind.into(),
            name: name.into(),
            reason,
        })
    }

    /// Block on the remote system, polling again after `poll`.
    pub fn waiting_on_remote(message: impl Into<String>, poll: Duration) -> Self {
        Self::from_wait(Wait::Remote {
            message: message.into(),
            poll,
        })
    }

    /// The remote snapshot is stale and must be re-fetched before later steps run.
    pub fn refresh() -> Self {
        Self {
            refresh: true,
            ..Self::default()
        }
    }

    /// Classify an error: terminal errors stay terminal, everything else is transient.
    pub fn wrap_error(err: Error) -> Self {
        let error = if err.is_terminal() {
            ReconcileError::Terminal(err)
        } else {
            ReconcileError::Transient(vec![err])
        };
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// OK for `Ok(())`, otherwise [`Self::wrap_error`].
    pub fn from_result(result: stratus_core::Result<()>) -> Self {
        result.map_or_else(Self::wrap_error, |()| Self::ok())
    }

    fn from_wait(wait: Wait) -> Self {
        Self {
            waits: BTreeSet::from([wait]),
            ..Self::default()
        }
    }

    /// Combine two statuses.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.waits.extend(other.waits);
        self.refresh |= other.refresh;
        self.error = match (self.error.take(), other.error) {
            (Some(first @ ReconcileError::Terminal(_)), _) => Some(first),
            (_, Some(second @ ReconcileError::Terminal(_))) => Some(second),
            (Some(ReconcileError::Transient(mut first)), Some(ReconcileError::Transient(second))) => {
                first.extend(second);
                Some(ReconcileError::Transient(first))
            }
            (first, None) => first,
            (None, second) => second,
        };
        self
    }

    /// Drop the refresh signal once the snapshot has been re-fetched.
    #[must_use]
    pub fn without_refresh(mut self) -> Self {
        self.refresh = false;
        self
    }

    pub fn severity(&self) -> Severity {
        match &self.error {
            Some(ReconcileError::Terminal(_)) => Severity::Terminal,
            Some(ReconcileError::Transient(_)) => Severity::Transient,
            None if !self.waits.is_empty() => Severity::Waiting,
            None => Severity::Ok,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.severity() == Severity::Ok
    }

    /// Whether the caller must stop and come back later.
    ///
    /// `(true, None)` means poll later, `(true, Some(_))` means retry (or, for
    /// a terminal error, record it and stop), `(false, None)` means proceed.
    pub fn needs_reschedule(&self) -> (bool, Option<&ReconcileError>) {
        let blocked = self.error.is_some() || !self.waits.is_empty();
        (blocked, self.error.as_ref())
    }

    pub const fn needs_refresh(&self) -> bool {
        self.refresh
    }

    pub const fn error(&self) -> Option<&ReconcileError> {
        self.error.as_ref()
    }

    pub fn terminal_error(&self) -> Option<&Error> {
        match &self.error {
            Some(ReconcileError::Terminal(err)) => Some(err),
            _ => None,
        }
    }

    pub fn waits(&self) -> impl Iterator<Item = &Wait> {
        self.waits.iter()
    }

    /// Map the status onto a queue decision.
    ///
    /// Object waits poll at `default_poll`; remote waits carry their own
    /// period and the shortest one wins.
    pub fn requeue(&self, default_poll: Duration) -> Requeue {
        match self.severity() {
            Severity::Terminal => Requeue::Done,
            Severity::Transient => Requeue::Backoff,
            Severity::Waiting => {
                let poll = self
                    .waits
                    .iter()
                    .map(|wait| match wait {
                        Wait::Object { .. } => default_poll,
                        Wait::Remote { poll, .. } => *poll,
                    })
                    .min()
                    .unwrap_or(default_poll);
                Requeue::After(poll)
            }
            Severity::Ok if self.refresh => Requeue::After(Duration::ZERO),
            Severity::Ok => Requeue::Done,
        }
    }

    /// Human-readable summary of waits and errors, for status conditions.
    pub fn progress_message(&self) -> Option<String> {
        let messages = self
            .waits
            .iter()
            .map(ToString::to_string)
            .chain(self.error.iter().map(ToString::to_string))
            .collect::<Vec<_>>();
        if messages.is_empty() {
            None
        } else {
            Some(messages.join("; "))
        }
    }
}

impl FromIterator<ReconcileStatus> for ReconcileStatus {
    fn from_iter<I: IntoIterator<Item = ReconcileStatus>>(iter: I) -> Self {
        iter.into_iter().fold(Self::ok(), Self::merge)
    }
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.progress_message() {
            Some(message) => f.write_str(&message),
            None if self.refresh => f.write_str("needs refresh"),
            None => f.write_str("ok"),
        }
    }
}

#[cfg(test)]
mod tests {
    use stratus_core::ConditionReason;

    use super::*;

    fn terminal(message: &str) -> ReconcileStatus {
        ReconcileStatus::wrap_error(Error::terminal(
            ConditionReason::InvalidConfiguration,
            message,
        ))
    }

    fn transient(message: &str) -> ReconcileStatus {
        ReconcileStatus::wrap_error(Error::remote("get", message))
    }

    #[test]
    fn test_ok_does_not_reschedule() {
        let status = ReconcileStatus::ok();
        let (blocked, error) = status.needs_reschedule();
        assert!(!blocked);
        assert!(error.is_none());
        assert_eq!(ReconcileStatus::ok().requeue(Duration::from_secs(10)), Requeue::Done);
    }

    #[test]
    fn test_wrap_error_classifies() {
        assert_eq!(terminal("bad").severity(), Severity::Terminal);
        assert_eq!(transient("timeout").severity(), Severity::Transient);
        assert_eq!(
            ReconcileStatus::wrap_error(Error::conflict("duplicate")).severity(),
            Severity::Transient
        );
    }

    #[test]
    fn test_first_terminal_wins() {
        let merged = transient("a").merge(terminal("first")).merge(terminal("second"));
        assert_eq!(
            merged.terminal_error().map(ToString::to_string).as_deref(),
            Some("first")
        );
    }

    #[test]
    fn test_transient_errors_accumulate() {
        let merged = transient("a").merge(transient("b"));
        let count = merged.error().map(|e| e.errors().len());
        assert_eq!(count, Some(2));
        assert_eq!(merged.requeue(Duration::from_secs(10)), Requeue::Backoff);
    }

    #[test]
    fn test_waits_union() {
        let port = || ReconcileStatus::waiting_on_object("Port", "p", WaitingReason::Creation);
        let merged = port().merge(port()).merge(ReconcileStatus::waiting_on_object(
            "Project",
            "q",
            WaitingReason::Ready,
        ));
        assert_eq!(merged.waits().count(), 2);
        assert_eq!(
            merged.progress_message().as_deref(),
            Some("Waiting for Port/p to be created; Waiting for Project/q to be ready")
        );
    }

    #[test]
    fn test_requeue_uses_shortest_remote_poll() {
        let status = ReconcileStatus::waiting_on_remote("building", Duration::from_secs(3))
            .merge(ReconcileStatus::waiting_on_object(
                "Port",
                "p",
                WaitingReason::Ready,
            ));
        assert_eq!(
            status.requeue(Duration::from_secs(10)),
            Requeue::After(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_terminal_is_not_requeued() {
        assert_eq!(terminal("bad").requeue(Duration::from_secs(10)), Requeue::Done);
        let status = terminal("bad");
        let (blocked, error) = status.needs_reschedule();
        assert!(blocked);
        assert!(error.is_some_and(ReconcileError::is_terminal));
    }

    #[test]
    fn test_refresh_only_requeues_immediately() {
        let status = ReconcileStatus::refresh();
        assert!(!status.needs_reschedule().0);
        assert_eq!(
            status.requeue(Duration::from_secs(10)),
            Requeue::After(Duration::ZERO)
        );
        assert!(!status.without_refresh().needs_refresh());
    }

    #[test]
    fn test_from_iterator_folds_merge() {
        let status: ReconcileStatus = vec![
            ReconcileStatus::ok(),
            ReconcileStatus::refresh(),
            transient("x"),
        ]
        .into_iter()
        .collect();
        assert_eq!(status.severity(), Severity::Transient);
        assert!(status.needs_refresh());
    }
}
