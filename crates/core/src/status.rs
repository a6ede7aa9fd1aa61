//! Status shape shared by every managed kind.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::meta::Resource;

/// Condition types published on managed objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// The remote resource exists and is usable.
    Available,
    /// The controller still has work to do for the current generation.
    Progressing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Machine-readable reason attached to a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionReason {
    Success,
    Progressing,
    TransientError,
    /// The spec cannot be satisfied as written.
    InvalidConfiguration,
    /// The remote resource is in a state the controller cannot repair.
    UnrecoverableError,
}

impl ConditionReason {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::InvalidConfiguration | Self::UnrecoverableError)
    }
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "Success",
            Self::Progressing => "Progressing",
            Self::TransientError => "TransientError",
            Self::InvalidConfiguration => "InvalidConfiguration",
            Self::UnrecoverableError => "UnrecoverableError",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub observed_generation: i64,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            type_,
            status,
            reason,
            message: message.into(),
            observed_generation,
            last_transition_time: Utc::now(),
        }
    }
}

/// Import a pre-existing remote resource, either by ID or by a kind-specific filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSpec<F> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<F>,
}

/// Observed state of a managed object.
///
/// `id` is set once, when the remote resource is created, adopted or
/// imported, and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedStatus<R> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<R>,
}

impl<R> Default for ManagedStatus<R> {
    fn default() -> Self {
        Self {
            id: None,
            conditions: Vec::new(),
            resource: None,
        }
    }
}

impl<R> ManagedStatus<R> {
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_available(&self) -> bool {
        self.condition(ConditionType::Available)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Insert or replace a condition. The transition time is kept when the
    /// status value does not change.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Whether a terminal failure has already been recorded for `generation`.
    pub fn terminal_for_generation(&self, generation: i64) -> bool {
        self.condition(ConditionType::Progressing).is_some_and(|c| {
            c.status == ConditionStatus::False
                && c.reason.is_terminal()
                && c.observed_generation == generation
        })
    }
}

/// A resource publishing a [`ManagedStatus`].
pub trait HasStatus: Resource {
    type ResourceStatus: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned;

    fn status(&self) -> &ManagedStatus<Self::ResourceStatus>;

    fn status_id(&self) -> Option<&str> {
        self.status().id.as_deref()
    }

    fn is_available(&self) -> bool {
        self.status().is_available()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn available(status: ConditionStatus) -> Condition {
        Condition::new(
            ConditionType::Available,
            status,
            ConditionReason::Success,
            "",
            1,
        )
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_unchanged() {
        let mut status: ManagedStatus<()> = ManagedStatus::default();
        let mut first = available(ConditionStatus::False);
        first.last_transition_time = Utc::now() - Duration::hours(1);
        let original_time = first.last_transition_time;
        status.set_condition(first);

        status.set_condition(available(ConditionStatus::False));
        assert_eq!(
            status
                .condition(ConditionType::Available)
                .map(|c| c.last_transition_time),
            Some(original_time)
        );

        status.set_condition(available(ConditionStatus::True));
        assert!(status.is_available());
        assert_ne!(
            status
                .condition(ConditionType::Available)
                .map(|c| c.last_transition_time),
            Some(original_time)
        );
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn test_terminal_for_generation() {
        let mut status: ManagedStatus<()> = ManagedStatus::default();
        status.set_condition(Condition::new(
            ConditionType::Progressing,
            ConditionStatus::False,
            ConditionReason::InvalidConfiguration,
            "duplicate name",
            3,
        ));
        assert!(status.terminal_for_generation(3));
        assert!(!status.terminal_for_generation(4));
    }

    #[test]
    fn test_condition_type_serializes_as_type() {
        let value = serde_json::to_value(available(ConditionStatus::True)).ok();
        let type_field = value
            .as_ref()
            .and_then(|v| v.get("type"))
            .and_then(|v| v.as_str())
            .map(ToString::to_string);
        assert_eq!(type_field.as_deref(), Some("Available"));
    }
}
