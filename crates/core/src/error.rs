//! Error taxonomy shared by remote clients, the cluster API and the engine.
//!
//! Low-level operations return these errors unclassified. Only the status
//! aggregator decides whether an error is terminal or transient, using the
//! predicates defined here.

use thiserror::Error;

use crate::status::ConditionReason;

/// Result type alias for Stratus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Stratus operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Remote system errors
    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error("remote operation '{operation}' failed: {reason}")]
    Remote {
        operation: String,
        reason: String,
        retryable: bool,
    },

    // Cluster API errors
    #[error("cluster operation '{operation}' failed: {reason}")]
    Cluster { operation: String, reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    // Engine errors
    #[error("{message}")]
    Terminal {
        reason: ConditionReason,
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    #[error("operation cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("deletion guard check failed: {source}")]
    GuardCheck {
        #[source]
        source: Box<Error>,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Create a retryable remote failure.
    pub fn remote(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            reason: reason.into(),
            retryable: true,
        }
    }

    /// Create a remote failure which will not succeed on retry (a rejected request).
    pub fn remote_rejected(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            reason: reason.into(),
            retryable: false,
        }
    }

    /// Create a cluster API error.
    pub fn cluster(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cluster {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create a terminal error: the spec cannot be satisfied without a user edit.
    pub fn terminal(reason: ConditionReason, message: impl Into<String>) -> Self {
        Self::Terminal {
            reason,
            message: message.into(),
            source: None,
        }
    }

    /// Mark an existing error as terminal, keeping it as the source.
    pub fn terminal_from(reason: ConditionReason, message: impl Into<String>, source: Self) -> Self {
        Self::Terminal {
            reason,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Wrap an error raised while evaluating a deletion guard.
    pub fn guard_check(source: Self) -> Self {
        Self::GuardCheck {
            source: Box::new(source),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }

    /// Whether repeating the same request unchanged could succeed.
    ///
    /// Conflicts and rejected requests are not retryable: the remote system
    /// answered definitively and only a spec change alters the outcome.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } | Self::Terminal { .. } | Self::InvalidConfig { .. } => false,
            Self::Remote { retryable, .. } => *retryable,
            Self::NotFound { .. }
            | Self::Cluster { .. }
            | Self::Serialization { .. }
            | Self::Cancelled { .. }
            | Self::GuardCheck { .. } => true,
        }
    }

    /// The condition reason recorded for a terminal error.
    pub const fn terminal_reason(&self) -> Option<ConditionReason> {
        match self {
            Self::Terminal { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
