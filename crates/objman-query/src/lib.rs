//! # objman-query
//!
//! Entity metadata and a mutable, alias-based SELECT builder.
//!
//! This crate provides:
//! - `EntityDescriptor` and `Association` describing tables, identifiers,
//!   fields and associations
//! - `QueryBuilder`, a mutable builder resolving association joins through
//!   the metadata
//! - `Query`, the compiled SQL text with positional parameters
//! - Named `:param` placeholder scanning and binding
//!
//! ## Example
//!
//! ```
//! use std::sync::OnceLock;
//! use objman_query::{Association, EntityDescriptor, ParameterValue, QueryBuilder};
//!
//! fn authors() -> &'static EntityDescriptor {
//!     static D: OnceLock<EntityDescriptor> = OnceLock::new();
//!     D.get_or_init(|| EntityDescriptor::new("Author", "authors").identifier(&["id"]))
//! }
//!
//! fn books() -> &'static EntityDescriptor {
//!     static D: OnceLock<EntityDescriptor> = OnceLock::new();
//!     D.get_or_init(|| {
//!         EntityDescriptor::new("Book", "books")
//!             .identifier(&["id"])
//!             .field("title")
//!             .association(Association::new("author", authors, "author_id", "id"))
//!     })
//! }
//!
//! let mut qb = QueryBuilder::new();
//! qb.select(["b"])
//!     .from(books(), "b", None)
//!     .join("b.author", "a", None, None, None)
//!     .and_where("a.id IN (:ids)")
//!     .set_parameter("ids", ParameterValue::list([1, 2]));
//!
//! let query = qb.get_query().unwrap();
//! assert_eq!(
//!     query.sql(),
//!     "SELECT b.* FROM books b INNER JOIN authors a ON a.id = b.author_id WHERE a.id IN (?, ?)"
//! );
//! assert_eq!(query.params().len(), 2);
//! ```

pub mod builder;
pub mod error;
pub mod metadata;
pub mod query;
pub mod value;

pub use builder::{ConditionType, JoinKind, OrderDirection, QueryBuilder};
pub use error::{QueryError, Result};
pub use metadata::{Association, EntityDescriptor};
pub use query::{bind_placeholders, placeholder_names, Query};
pub use value::{ParameterValue, SqlValue, ToSqlValue};
