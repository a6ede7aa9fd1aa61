//! Lifecycle state of a managed object.

use std::fmt;

use stratus_core::ImportSpec;

use crate::error::SpecError;
use crate::interfaces::ManagedObject;

/// Where an object stands, derived from its spec, status and metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Neither `resource` nor `import` is set: nothing to do.
    Unmanaged,
    /// `import` is set and no remote resource is bound yet.
    Importing,
    /// Bound to an imported resource; read-only.
    Imported,
    /// `resource` is set and no remote resource is bound yet.
    Pending,
    /// Bound to a resource this controller manages.
    Created,
    /// Deletion was requested.
    Deleting,
}

impl ObjectState {
    /// Classify `obj`, rejecting specs that name both modes.
    pub fn of<O: ManagedObject>(obj: &O) -> Result<Self, SpecError> {
        if obj.is_deleting() {
            return Ok(Self::Deleting);
        }
        let bound = obj.status_id().is_some();
        match (obj.resource_spec(), obj.import_spec()) {
            (Some(_), Some(_)) => Err(SpecError::ResourceAndImport),
            (None, None) => Ok(Self::Unmanaged),
            (None, Some(import)) => {
                validate_import(import)?;
                Ok(if bound { Self::Imported } else { Self::Importing })
            }
            (Some(_), None) => Ok(if bound { Self::Created } else { Self::Pending }),
        }
    }

    pub const fn is_imported(self) -> bool {
        matches!(self, Self::Importing | Self::Imported)
    }
}

fn validate_import<F>(import: &ImportSpec<F>) -> Result<(), SpecError> {
    match (&import.id, &import.filter) {
        (None, None) => Err(SpecError::EmptyImport),
        (Some(_), Some(_)) => Err(SpecError::AmbiguousImport),
        _ => Ok(()),
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unmanaged => "unmanaged",
            Self::Importing => "importing",
            Self::Imported => "imported",
            Self::Pending => "pending",
            Self::Created => "created",
            Self::Deleting => "deleting",
        };
        f.write_str(s)
    }
}
