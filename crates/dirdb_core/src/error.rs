//! Error types for dirdb core.

use dirdb_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type DirResult<T> = Result<T, DirError>;

/// Coarse classification of a failure.
///
/// Every [`DirError`] maps onto exactly one kind; callers that only need to
/// branch on the category (retry loops, CLI exit paths) match on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An allocation or size limit was exceeded.
    OutOfMemory,
    /// Malformed DN, filter, value or control-record body.
    Syntax,
    /// A required record does not exist.
    NotFound,
    /// Duplicate record or duplicate attribute value.
    Conflict,
    /// A policy module rejected the operation.
    ConstraintViolation,
    /// A delete-delta named an attribute or value that is not present.
    NoSuchAttribute,
    /// Generic backend or chain failure.
    Operations,
    /// A stored record could not be unpacked.
    Corruption,
}

/// Errors that can occur in dirdb core operations.
#[derive(Debug, Error)]
pub enum DirError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Resource exhaustion.
    #[error("out of memory: {message}")]
    OutOfMemory {
        /// Description of the exhausted resource.
        message: String,
    },

    /// Malformed input.
    #[error("{message}")]
    Syntax {
        /// Description of the syntax problem.
        message: String,
    },

    /// Missing record.
    #[error("{message}")]
    NotFound {
        /// Description of what was not found.
        message: String,
    },

    /// Duplicate record or value.
    #[error("{message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// Policy rejection.
    #[error("{message}")]
    ConstraintViolation {
        /// Description of the violated constraint.
        message: String,
    },

    /// Attribute or value named by a delete-delta is absent.
    #[error("{message}")]
    NoSuchAttribute {
        /// Description of the missing attribute.
        message: String,
    },

    /// Generic operations failure.
    #[error("{message}")]
    Operations {
        /// Description of the failure.
        message: String,
    },

    /// A record could not be unpacked.
    #[error("record corrupted: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },
}

impl DirError {
    /// Creates an out-of-memory error.
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::OutOfMemory {
            message: message.into(),
        }
    }

    /// Creates a syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a constraint-violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates a no-such-attribute error.
    pub fn no_such_attribute(message: impl Into<String>) -> Self {
        Self::NoSuchAttribute {
            message: message.into(),
        }
    }

    /// Creates an operations error.
    pub fn operations(message: impl Into<String>) -> Self {
        Self::Operations {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Returns the taxonomy entry for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(StorageError::KeyExists) => ErrorKind::Conflict,
            Self::Storage(StorageError::KeyNotFound) => ErrorKind::NotFound,
            Self::Storage(StorageError::Corrupted(_)) => ErrorKind::Corruption,
            Self::Storage(_) => ErrorKind::Operations,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::Syntax { .. } => ErrorKind::Syntax,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            Self::NoSuchAttribute { .. } => ErrorKind::NoSuchAttribute,
            Self::Operations { .. } => ErrorKind::Operations,
            Self::Corruption { .. } => ErrorKind::Corruption,
        }
    }

    /// Prefixes the detail message with `context`, keeping the kind.
    #[must_use]
    pub fn context(self, context: &str) -> Self {
        match self {
            Self::Storage(err) => Self::operations(format!("{context}: {err}")),
            Self::OutOfMemory { message } => Self::out_of_memory(format!("{context}: {message}")),
            Self::Syntax { message } => Self::syntax(format!("{context}: {message}")),
            Self::NotFound { message } => Self::not_found(format!("{context}: {message}")),
            Self::Conflict { message } => Self::conflict(format!("{context}: {message}")),
            Self::ConstraintViolation { message } => {
                Self::constraint(format!("{context}: {message}"))
            }
            Self::NoSuchAttribute { message } => {
                Self::no_such_attribute(format!("{context}: {message}"))
            }
            Self::Operations { message } => Self::operations(format!("{context}: {message}")),
            Self::Corruption { message } => Self::corruption(format!("{context}: {message}")),
        }
    }
}
