//! Error types for value projection.

use std::fmt;

use retrace_module::TypeId;

/// Errors raised by the value projector.
///
/// Unsupported constructs (bit-fields, types the projector cannot
/// interpret) are not errors — they surface as absent values or
/// placeholder strings at the query surface and never abort replay.
#[derive(Debug)]
pub enum ProjectError {
    /// The store's access token was invalidated by movement.
    StaleToken,
    /// A type id does not exist in the module's type table.
    UnknownType {
        /// The unresolvable id.
        ty: TypeId,
    },
}

impl fmt::Display for ProjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleToken => write!(f, "value store outlived its state view"),
            Self::UnknownType { ty } => write!(f, "unknown type id {}", ty.0),
        }
    }
}

impl std::error::Error for ProjectError {}
