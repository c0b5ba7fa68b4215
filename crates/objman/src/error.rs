//! Error types for the finder and the object manager.

use objman_query::QueryError;
use thiserror::Error;

/// An error that carries an HTTP status hint for an outer transport layer.
pub trait HttpStatus {
    /// Returns the HTTP status code.
    fn status_code(&self) -> u16;
}

/// A query expected at least one row and found none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("no result was found for query although at least one row was expected")]
pub struct NoResultError;

impl HttpStatus for NoResultError {
    fn status_code(&self) -> u16 {
        404
    }
}

/// A filter handler rejected the shape or content of its value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("wrong value of filter parameter `{field}`")]
pub struct WrongFilterValueError {
    field: String,
    reason: Option<String>,
}

impl WrongFilterValueError {
    /// Creates the error for `field`.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: None,
        }
    }

    /// Attaches the underlying reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Returns the offending filter name.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the underlying reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl HttpStatus for WrongFilterValueError {
    fn status_code(&self) -> u16 {
        422
    }
}

/// Finder and manager errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid caller input, e.g. a scalar id for a composite identifier.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A `where` placeholder has neither a positional nor a bound value.
    #[error("missing argument parameters with name :{0}")]
    MissingParameter(String),

    /// A filter handler rejected its value.
    #[error(transparent)]
    WrongFilterValue(#[from] WrongFilterValueError),

    /// Raised by filter handlers when a value cannot be used.
    ///
    /// The finder reports it as [`Error::WrongFilterValue`] for the filter
    /// being applied.
    #[error("filter argument rejected: {0}")]
    FilterArgument(String),

    /// A `find_or_die` style lookup found nothing.
    #[error(transparent)]
    NoResult(#[from] NoResultError),

    /// A single-result query matched more than one row.
    #[error("more than one result was found for query although one row or none was expected")]
    NonUniqueResult,

    /// A defect in the calling code. Not meant to be handled.
    #[error("logic error: {0}")]
    Logic(String),

    /// A record could not be converted into an entity.
    #[error("hydration error: {0}")]
    Hydration(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// Query building error.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Returns the HTTP status hint, if the error carries one.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::WrongFilterValue(err) => Some(err.status_code()),
            Self::NoResult(err) => Some(err.status_code()),
            _ => None,
        }
    }

    /// Returns whether the error signals a defect in the calling code.
    #[must_use]
    pub const fn is_logic_error(&self) -> bool {
        matches!(self, Self::Logic(_))
    }
}

/// Result type alias for finder and manager operations.
pub type Result<T> = std::result::Result<T, Error>;
