//! Compiled queries and named placeholder handling.
//!
//! Query text uses named placeholders (`:name`). Compilation rewrites them
//! into positional `?` markers and collects the bound values in order.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{QueryError, Result};
use crate::value::{ParameterValue, SqlValue};

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(":[A-Za-z0-9]+").expect("placeholder pattern is valid"))
}

/// Calls `visit` for every span between single quotes, with its position.
///
/// Even positions lie outside literals. `''` escapes inside a literal split
/// it into two literal spans around an empty outside span, which never
/// contains a placeholder.
fn for_each_span<'a>(text: &'a str, mut visit: impl FnMut(usize, &'a str)) {
    for (index, segment) in text.split('\'').enumerate() {
        visit(index, segment);
    }
}

/// Returns the distinct placeholder names in `text`, in first-seen order.
///
/// # Example
///
/// ```
/// use objman_query::placeholder_names;
///
/// let names = placeholder_names("a = :x OR b = :y OR c = :x");
/// assert_eq!(names, ["x", "y"]);
/// ```
#[must_use]
pub fn placeholder_names(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for_each_span(text, |index, segment| {
        if index % 2 == 1 {
            return;
        }
        for found in placeholder_pattern().find_iter(segment) {
            let name = &found.as_str()[1..];
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    });
    names
}

/// Rewrites named placeholders into positional ones.
///
/// Returns the rewritten text and the values in placeholder order. A list
/// value expands to one marker per element; an empty list renders `NULL`
/// so that `IN (NULL)` matches nothing.
pub fn bind_placeholders(
    text: &str,
    parameters: &[(String, ParameterValue)],
) -> Result<(String, Vec<SqlValue>)> {
    let mut sql = String::with_capacity(text.len());
    let mut values = Vec::new();
    let mut missing = None;

    for_each_span(text, |index, segment| {
        if missing.is_some() {
            return;
        }
        if index > 0 {
            sql.push('\'');
        }
        if index % 2 == 1 {
            sql.push_str(segment);
            return;
        }

        let mut last = 0;
        for found in placeholder_pattern().find_iter(segment) {
            sql.push_str(&segment[last..found.start()]);
            let name = &found.as_str()[1..];
            match parameters.iter().find(|(n, _)| n == name) {
                Some((_, ParameterValue::Value(value))) => {
                    sql.push('?');
                    values.push(value.clone());
                }
                Some((_, ParameterValue::List(list))) if list.is_empty() => sql.push_str("NULL"),
                Some((_, ParameterValue::List(list))) => {
                    sql.push_str(&vec!["?"; list.len()].join(", "));
                    values.extend(list.iter().cloned());
                }
                None => {
                    missing = Some(name.to_string());
                    return;
                }
            }
            last = found.end();
        }
        sql.push_str(&segment[last..]);
    });

    match missing {
        Some(name) => Err(QueryError::MissingParameter(name)),
        None => Ok((sql, values)),
    }
}

/// An executable query: SQL text with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    sql: String,
    params: Vec<SqlValue>,
    first_result: Option<u64>,
    max_results: Option<u64>,
    index_by: Vec<(String, String)>,
}

impl Query {
    pub(crate) fn new(
        sql: String,
        params: Vec<SqlValue>,
        first_result: Option<u64>,
        max_results: Option<u64>,
        index_by: Vec<(String, String)>,
    ) -> Self {
        Self {
            sql,
            params,
            first_result,
            max_results,
            index_by,
        }
    }

    /// Returns the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the positional parameters.
    #[must_use]
    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// Returns the row offset the query was compiled with.
    #[must_use]
    pub const fn first_result(&self) -> Option<u64> {
        self.first_result
    }

    /// Returns the row limit the query was compiled with.
    #[must_use]
    pub const fn max_results(&self) -> Option<u64> {
        self.max_results
    }

    /// Returns the field results of `alias` should be keyed by, if any.
    #[must_use]
    pub fn index_by(&self, alias: &str) -> Option<&str> {
        self.index_by
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, field)| field.as_str())
    }

    /// Consumes the query, returning its SQL and parameters.
    #[must_use]
    pub fn into_parts(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.params)
    }
}
