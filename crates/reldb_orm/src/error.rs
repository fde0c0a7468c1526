//! Error types for the entity mapper.

use reldb_core::{CoreError, ErrorKind};
use thiserror::Error;

/// Result type for mapper operations.
pub type OrmResult<T> = Result<T, OrmError>;

/// Errors raised by mappings, sessions and queries.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Error from the store or statement executor.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An entity attribute has no column in its table.
    #[error("{entity} attribute {attribute:?} is not mapped to a column")]
    UnmappedAttribute {
        /// Entity kind.
        entity: String,
        /// Attribute name.
        attribute: String,
    },

    /// The row behind a loaded entity no longer exists.
    #[error("{entity} with key {key} no longer exists in table {table}")]
    StaleEntity {
        /// Entity kind.
        entity: String,
        /// Table the row was loaded from.
        table: String,
        /// Primary key of the missing row.
        key: String,
    },

    /// No mapping was registered for the entity kind.
    #[error("no mapping registered for {entity}")]
    UnmappedEntity {
        /// Entity kind.
        entity: String,
    },

    /// The mapping has no relationship of that name.
    #[error("{entity} has no relationship named {name:?}")]
    UnknownRelationship {
        /// Entity kind.
        entity: String,
        /// Relationship name.
        name: String,
    },

    /// Attributes could not be turned back into an entity.
    #[error("cannot build entity: {message}")]
    Decode {
        /// What was wrong.
        message: String,
    },

    /// A query expected at most one result but found more.
    #[error("query returned more than one result")]
    MultipleResults,

    /// A query expected a result but found none.
    #[error("query returned no results")]
    NoResult,
}

impl OrmError {
    /// Kind of the underlying store error, if any.
    #[must_use]
    pub fn core_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Core(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Returns true if retrying the unit of work may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_retryable())
    }

    /// Creates an unmapped attribute error.
    pub fn unmapped_attribute(entity: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::UnmappedAttribute {
            entity: entity.into(),
            attribute: attribute.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::Core(CoreError::invalid_operation(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_core_errors() {
        let err = OrmError::from(CoreError::connection("refused"));
        assert_eq!(err.core_kind(), Some(ErrorKind::Connection));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), CoreError::connection("refused").to_string());
    }

    #[test]
    fn mapper_errors_are_not_retryable() {
        let err = OrmError::unmapped_attribute("User", "nickname");
        assert_eq!(err.core_kind(), None);
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "User attribute \"nickname\" is not mapped to a column"
        );
    }
}
