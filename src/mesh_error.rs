//! MeshStoreError: Unified error type for mesh-store public APIs
//!
//! Every fallible operation in the crate returns this error type. Each
//! variant carries the context of the failure; [`MeshStoreError::code`]
//! projects it onto the closed, wire-stable [`ErrorCode`] taxonomy that
//! external collaborators (readers, writers, exchange layers) consume.

use crate::handle::{EntityType, RawHandle};
use crate::tag::TagHandle;
use thiserror::Error;

/// Unified error type for mesh-store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshStoreError {
    /// Attempted to construct an entity handle from raw value 0 (reserved sentinel).
    #[error("entity handle must be non-zero (0 is reserved as invalid/sentinel)")]
    InvalidHandle,
    /// The per-type id space is exhausted or the requested id does not fit.
    #[error("id {id} out of range for entity type {ty:?}")]
    IdOverflow { ty: EntityType, id: RawHandle },
    /// An entity type code outside the closed type enumeration.
    #[error("entity type code {0} out of range")]
    TypeOutOfRange(u8),
    /// No live entity for this handle.
    #[error("entity {0:#x} not found")]
    EntityNotFound(RawHandle),
    /// More than one entity matched where exactly one was required.
    #[error("multiple entities found: {0}")]
    MultipleEntitiesFound(String),
    /// Lookup of an unregistered tag.
    #[error("tag not found: {0}")]
    TagNotFound(String),
    /// Tag name already registered; the existing handle is returned to the caller.
    #[error("tag `{name}` already allocated")]
    TagAlreadyAllocated { name: String, existing: TagHandle },
    /// A size argument (tag bytes, connectivity length, value length) did not match.
    #[error("invalid size: expected {expected}, found {found}")]
    InvalidSize { expected: usize, found: usize },
    /// A handle span with `first > last`.
    #[error("invalid span: first {first:#x} > last {last:#x}")]
    InvalidSpan { first: RawHandle, last: RawHandle },
    /// The operation is not defined for this entity or tag kind.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
    /// I/O failure surfaced by a reader/writer collaborator.
    #[error("i/o error: {0}")]
    Io(String),
    /// Catch-all internal failure.
    #[error("failure: {0}")]
    Failure(String),
}

/// Wire-stable status codes shared with external collaborators.
///
/// The integer values are persistent and append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    IndexOutOfRange = 1,
    TypeOutOfRange = 2,
    MemoryAllocationFailed = 3,
    EntityNotFound = 4,
    MultipleEntitiesFound = 5,
    TagNotFound = 6,
    TagAlreadyAllocated = 7,
    InvalidSize = 8,
    UnsupportedOperation = 9,
    IoError = 10,
    Failure = 11,
}

impl MeshStoreError {
    /// Project the error onto the closed wire taxonomy.
    pub fn code(&self) -> ErrorCode {
        use MeshStoreError::*;
        match self {
            InvalidHandle | EntityNotFound(_) => ErrorCode::EntityNotFound,
            IdOverflow { .. } => ErrorCode::IndexOutOfRange,
            TypeOutOfRange(_) => ErrorCode::TypeOutOfRange,
            MultipleEntitiesFound(_) => ErrorCode::MultipleEntitiesFound,
            TagNotFound(_) => ErrorCode::TagNotFound,
            TagAlreadyAllocated { .. } => ErrorCode::TagAlreadyAllocated,
            InvalidSize { .. } | InvalidSpan { .. } => ErrorCode::InvalidSize,
            UnsupportedOperation(_) => ErrorCode::UnsupportedOperation,
            Io(_) => ErrorCode::IoError,
            Failure(_) => ErrorCode::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_wire_stable() {
        assert_eq!(ErrorCode::Success as u32, 0);
        assert_eq!(ErrorCode::IndexOutOfRange as u32, 1);
        assert_eq!(ErrorCode::TypeOutOfRange as u32, 2);
        assert_eq!(ErrorCode::MemoryAllocationFailed as u32, 3);
        assert_eq!(ErrorCode::EntityNotFound as u32, 4);
        assert_eq!(ErrorCode::MultipleEntitiesFound as u32, 5);
        assert_eq!(ErrorCode::TagNotFound as u32, 6);
        assert_eq!(ErrorCode::TagAlreadyAllocated as u32, 7);
        assert_eq!(ErrorCode::InvalidSize as u32, 8);
        assert_eq!(ErrorCode::UnsupportedOperation as u32, 9);
        assert_eq!(ErrorCode::IoError as u32, 10);
        assert_eq!(ErrorCode::Failure as u32, 11);
    }

    #[test]
    fn variant_projection() {
        assert_eq!(
            MeshStoreError::EntityNotFound(7).code(),
            ErrorCode::EntityNotFound
        );
        assert_eq!(
            MeshStoreError::InvalidSize {
                expected: 4,
                found: 3
            }
            .code(),
            ErrorCode::InvalidSize
        );
        assert_eq!(
            MeshStoreError::UnsupportedOperation("x").code(),
            ErrorCode::UnsupportedOperation
        );
    }
}
