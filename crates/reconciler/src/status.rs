//! Condition computation from the outcome of a pass.

use stratus_core::{Condition, ConditionReason, ConditionStatus, ConditionType};
use stratus_progress::{ReconcileError, ReconcileStatus};

/// Available and Progressing conditions for a pass.
pub fn conditions(
    status: &ReconcileStatus,
    available: ConditionStatus,
    generation: i64,
) -> [Condition; 2] {
    let message = status.progress_message();

    let progressing = match status.error() {
        Some(ReconcileError::Terminal(err)) => Condition::new(
            ConditionType::Progressing,
            ConditionStatus::False,
            err.terminal_reason().unwrap_or(ConditionReason::UnrecoverableError),
            err.to_string(),
            generation,
        ),
        Some(ReconcileError::Transient(_)) => Condition::new(
            ConditionType::Progressing,
            ConditionStatus::True,
            ConditionReason::TransientError,
            message.clone().unwrap_or_default(),
            generation,
        ),
        None if status.needs_reschedule().0 => Condition::new(
            ConditionType::Progressing,
            ConditionStatus::True,
            ConditionReason::Progressing,
            message.clone().unwrap_or_default(),
            generation,
        ),
        None => Condition::new(
            ConditionType::Progressing,
            ConditionStatus::False,
            ConditionReason::Success,
            "Resource is up to date",
            generation,
        ),
    };

    let available = if available == ConditionStatus::True {
        Condition::new(
            ConditionType::Available,
            ConditionStatus::True,
            ConditionReason::Success,
            "Resource is available",
            generation,
        )
    } else {
        let reason = match status.error() {
            Some(ReconcileError::Terminal(err)) => {
                err.terminal_reason().unwrap_or(ConditionReason::UnrecoverableError)
            }
            Some(ReconcileError::Transient(_)) => ConditionReason::TransientError,
            None => ConditionReason::Progressing,
        };
        Condition::new(
            ConditionType::Available,
            available,
            reason,
            message.unwrap_or_else(|| "Resource is not yet available".to_string()),
            generation,
        )
    };

    [available, progressing]
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stratus_core::Error;

    use super::*;

    #[test]
    fn test_ok_and_available_is_up_to_date() {
        let [available, progressing] =
            conditions(&ReconcileStatus::ok(), ConditionStatus::True, 2);
        assert_eq!(available.status, ConditionStatus::True);
        assert_eq!(progressing.status, ConditionStatus::False);
        assert_eq!(progressing.reason, ConditionReason::Success);
        assert_eq!(progressing.observed_generation, 2);
    }

    #[test]
    fn test_waiting_is_progressing() {
        let status = ReconcileStatus::waiting_on_remote("Trunk is BUILD", Duration::from_secs(5));
        let [available, progressing] = conditions(&status, ConditionStatus::False, 1);
        assert_eq!(progressing.status, ConditionStatus::True);
        assert_eq!(progressing.reason, ConditionReason::Progressing);
        assert_eq!(available.message, "Trunk is BUILD");
    }

    #[test]
    fn test_terminal_stops_progressing() {
        let status = ReconcileStatus::wrap_error(Error::terminal(
            ConditionReason::InvalidConfiguration,
            "name already in use",
        ));
        let [available, progressing] = conditions(&status, ConditionStatus::False, 4);
        assert_eq!(progressing.status, ConditionStatus::False);
        assert_eq!(progressing.reason, ConditionReason::InvalidConfiguration);
        assert_eq!(available.reason, ConditionReason::InvalidConfiguration);
        assert_eq!(progressing.message, "name already in use");
    }

    #[test]
    fn test_transient_error_keeps_progressing() {
        let status = ReconcileStatus::wrap_error(Error::remote("get", "timeout"));
        let [_, progressing] = conditions(&status, ConditionStatus::Unknown, 1);
        assert_eq!(progressing.status, ConditionStatus::True);
        assert_eq!(progressing.reason, ConditionReason::TransientError);
    }
}
