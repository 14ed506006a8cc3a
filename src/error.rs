//! Error taxonomy and status-code mapping for the write path.
//!
//! All validation errors are explicit values; the registry never panics on
//! misuse of the public API and a failed call leaves it untouched.

use crate::entity::EntityKind;
use thiserror::Error;

/// Result alias for write-path operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Coarse status vocabulary shared with the middleware's callers. Every
/// `ApiError` maps onto exactly one of these via [`ApiError::ret_code`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RetCode {
    Ok,
    BadParameter,
    IllegalOperation,
    AlreadyDeleted,
}

/// Validation failures of the write path.
///
/// `AlreadyDeleted` and `StaleWriter` both mean "the writer is gone" but are
/// kept as distinct variants: the deletion is observed directly on the entity
/// handle in the first case and only indirectly, through a previously
/// captured instance handle, in the second. Callers see them as
/// `AlreadyDeleted` and `BadParameter` respectively.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// A required sample argument was not supplied.
    #[error("sample argument is required")]
    NullSample,
    /// The entity handle does not resolve to any known entity.
    #[error("entity handle does not resolve")]
    UnknownEntity,
    /// The operation is not defined for this kind of entity.
    #[error("operation not permitted on a {actual:?} entity")]
    WrongEntityKind {
        /// Kind the handle actually resolved to.
        actual: EntityKind,
    },
    /// The target entity was deleted before the call.
    #[error("entity already deleted")]
    AlreadyDeleted,
    /// A deleted writer was reached through a previously obtained instance
    /// handle rather than directly.
    #[error("writer deleted; instance handle is stale")]
    StaleWriter,
    /// The instance handle is NIL or not present in the registry.
    #[error("unknown instance handle")]
    BadHandle,
    /// The instance handle resolves to an instance whose key does not match
    /// the supplied sample.
    #[error("instance handle does not match the sample's key")]
    WrongInstance,
    /// Explicit timestamps must be non-negative.
    #[error("negative timestamp")]
    InvalidTimestamp,
}

impl ApiError {
    /// Map onto the caller-visible status code.
    pub fn ret_code(&self) -> RetCode {
        match self {
            ApiError::WrongEntityKind { .. } => RetCode::IllegalOperation,
            ApiError::AlreadyDeleted => RetCode::AlreadyDeleted,
            ApiError::NullSample
            | ApiError::UnknownEntity
            | ApiError::StaleWriter
            | ApiError::BadHandle
            | ApiError::WrongInstance
            | ApiError::InvalidTimestamp => RetCode::BadParameter,
        }
    }
}
