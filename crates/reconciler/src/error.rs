//! Errors in the shape of a managed object's spec.

use std::fmt;

use stratus_core::ConditionReason;

/// A spec the engine cannot act on. Always terminal: only an edit fixes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    /// Both `resource` and `import` are set.
    ResourceAndImport,
    /// `import` is set with neither an ID nor a filter.
    EmptyImport,
    /// `import` is set with both an ID and a filter.
    AmbiguousImport,
    /// The credentials reference names no secret.
    MissingCredentials,
    /// The credentials secret has no usable entry.
    InvalidCredentials { secret: String, reason: String },
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceAndImport => {
                write!(f, "spec.resource and spec.import are mutually exclusive")
            }
            Self::EmptyImport => {
                write!(f, "spec.import must set either id or filter")
            }
            Self::AmbiguousImport => {
                write!(f, "spec.import must not set both id and filter")
            }
            Self::MissingCredentials => {
                write!(f, "spec.cloudCredentialsRef.secretName is not set")
            }
            Self::InvalidCredentials { secret, reason } => {
                write!(f, "credentials secret '{secret}' is invalid: {reason}")
            }
        }
    }
}

impl std::error::Error for SpecError {}

impl From<SpecError> for stratus_core::Error {
    fn from(err: SpecError) -> Self {
        Self::terminal(ConditionReason::InvalidConfiguration, err.to_string())
    }
}
