//! # objman
//!
//! A fluent finder and object manager over a relational persistence engine.
//!
//! This crate provides:
//! - `Finder`, a reusable query session: filters, joins, grouping, ordering
//!   and pagination, cleared after every terminal operation
//! - Named filter handlers dispatched by the shape of the filter value
//! - `Detached`, a paged cursor that detaches entities as it hands them out
//! - `ObjectManager`, a facade adding finders and batch operations to any
//!   `EntityManager`
//! - `SqliteEntityManager`, an sqlx-backed engine with a unit of work
//! - Errors carrying HTTP status hints (`NoResultError`: 404,
//!   `WrongFilterValueError`: 422)
//!
//! ## Quick Start
//!
//! ```ignore
//! use objman::{ObjectManager, Search, SqliteEntityManager};
//!
//! async fn example(manager: &ObjectManager<SqliteEntityManager>) -> objman::Result<()> {
//!     let mut finder = manager.get_finder::<Book>(Some("b"));
//!
//!     // Filter by registered handlers or plain fields
//!     let books = finder
//!         .join("b.author", "a", None, None, None)
//!         .offset_page_result(2, Some(20))
//!         .find_all(manager, Search::new().with("status", "published"))
//!         .await?;
//!
//!     // The finder is clean again
//!     let total = finder.count(manager, "id", true, Search::new()).await?;
//!
//!     // Fails with a 404 hint when nothing matches
//!     let book = manager.find_or_die::<Book>(42).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! ```ignore
//! use futures::TryStreamExt;
//!
//! let mut finder = manager.get_finder::<Book>(None);
//! let mut stream = finder
//!     .find_all_detached(&manager, Search::new())?
//!     .into_stream();
//! while let Some(book) = stream.try_next().await? {
//!     // each book is already detached from the manager
//! }
//! ```

pub mod config;
pub mod detached;
pub mod entity;
pub mod error;
pub mod filter;
pub mod finder;
pub mod manager;
pub mod sqlite;

pub use config::FinderConfig;
pub use detached::Detached;
pub use entity::{Entity, Identifier, Record};
pub use error::{Error, HttpStatus, NoResultError, Result, WrongFilterValueError};
pub use filter::{FilterArgs, FilterHandler, FilterValue, Search};
pub use finder::Finder;
pub use manager::{EntityManager, ObjectManager, Repository};
pub use sqlite::SqliteEntityManager;

pub use objman_query::{
    Association, ConditionType, EntityDescriptor, JoinKind, OrderDirection, ParameterValue,
    Query, QueryBuilder, SqlValue, ToSqlValue,
};
