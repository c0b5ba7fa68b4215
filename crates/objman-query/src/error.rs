//! Error types for query building.

use thiserror::Error;

/// Errors raised while assembling or compiling a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The query was compiled before a FROM clause was set.
    #[error("query has no FROM clause")]
    MissingFrom,

    /// A placeholder in the query text has no bound value.
    #[error("missing value for parameter `:{0}`")]
    MissingParameter(String),

    /// A join path refers to an alias that is not part of the query.
    #[error("unknown alias `{0}`")]
    UnknownAlias(String),

    /// A join path names an association the entity does not declare.
    #[error("entity `{entity}` has no association `{field}`")]
    UnknownAssociation {
        /// Entity the association was looked up on.
        entity: String,
        /// The association field.
        field: String,
    },

    /// A join could not be rendered or its kind is unknown.
    #[error("invalid join: {0}")]
    InvalidJoin(String),

    /// An ordering direction other than ASC or DESC.
    #[error("invalid order direction: {0}")]
    InvalidDirection(String),
}

/// Result type alias for query building.
pub type Result<T> = std::result::Result<T, QueryError>;
