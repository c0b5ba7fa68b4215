//! Filter values and named filter handlers.
//!
//! A filter is a name and a value. The finder first looks the name up in the
//! entity's handler table; the value's shape ([`FilterArgs`]) then decides
//! how the handler is called. Names without a handler fall back to plain
//! field comparison.

use std::fmt;

use objman_query::{SqlValue, ToSqlValue};

use crate::entity::Entity;
use crate::error::{Error, Result, WrongFilterValueError};
use crate::finder::Finder;

/// A filter value as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// A single value.
    Scalar(SqlValue),
    /// An ordered list of values.
    List(Vec<SqlValue>),
    /// A keyed structure.
    Map(Vec<(String, FilterValue)>),
}

impl FilterValue {
    /// Creates a list value.
    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToSqlValue,
    {
        Self::List(values.into_iter().map(ToSqlValue::to_sql_value).collect())
    }

    /// Creates a keyed value.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Self>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Converts a decoded JSON value.
    ///
    /// Arrays become lists and objects become keyed structures.
    ///
    /// # Errors
    ///
    /// Arrays may only hold scalars; nested arrays or objects inside an array
    /// are rejected with [`Error::InvalidArgument`].
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        match value {
            Value::Array(items) => items
                .into_iter()
                .map(json_scalar)
                .collect::<Result<Vec<_>>>()
                .map(Self::List),
            Value::Object(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((k, Self::from_json(v)?)))
                .collect::<Result<Vec<_>>>()
                .map(Self::Map),
            scalar => json_scalar(scalar).map(Self::Scalar),
        }
    }

    /// Classifies the value into the call shape of a filter handler.
    ///
    /// Empty scalars (NULL or the empty string) resolve to no argument.
    #[must_use]
    pub fn resolve(self) -> FilterArgs {
        match self {
            Self::Scalar(value) if value.is_empty() => FilterArgs::None,
            Self::Scalar(value) => FilterArgs::Single(value),
            Self::List(values) => FilterArgs::Spread(values),
            Self::Map(entries) => FilterArgs::Structured(entries),
        }
    }

    /// Returns the scalar value, if this is one.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<&SqlValue> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }
}

fn json_scalar(value: serde_json::Value) -> Result<SqlValue> {
    use serde_json::Value;

    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Bool(b)),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Int)
            .or_else(|| n.as_f64().map(SqlValue::Float))
            .ok_or_else(|| Error::InvalidArgument(format!("unsupported number {n}"))),
        Value::String(s) => Ok(SqlValue::Text(s)),
        Value::Array(_) | Value::Object(_) => Err(Error::InvalidArgument(String::from(
            "filter lists may only contain scalar values",
        ))),
    }
}

impl<T: ToSqlValue> From<T> for FilterValue {
    fn from(value: T) -> Self {
        Self::Scalar(value.to_sql_value())
    }
}

/// The call shape a filter value resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterArgs {
    /// Call without arguments.
    None,
    /// Call with one value.
    Single(SqlValue),
    /// Call with each element as a positional argument.
    Spread(Vec<SqlValue>),
    /// Call with the whole structure as one argument.
    Structured(Vec<(String, FilterValue)>),
}

impl FilterArgs {
    fn shape(&self) -> &'static str {
        match self {
            Self::None => "no value",
            Self::Single(_) => "a single value",
            Self::Spread(_) => "a list",
            Self::Structured(_) => "a keyed structure",
        }
    }
}

/// An insertion-ordered set of named filters.
///
/// # Example
///
/// ```
/// use objman::{FilterValue, Search};
///
/// let search = Search::new()
///     .with("status", "active")
///     .with("ids", FilterValue::list([1, 2, 3]));
///
/// assert_eq!(search.len(), 2);
/// assert_eq!(search.get("status"), Some(&FilterValue::from("active")));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Search {
    entries: Vec<(String, FilterValue)>,
}

impl Search {
    /// Creates an empty search.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a filter, builder style.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<FilterValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds or replaces a filter.
    pub fn insert(&mut self, name: &str, value: impl Into<FilterValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Returns the value of a filter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FilterValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Returns the number of filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether there are no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the filters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Builds a search from a JSON object, e.g. a decoded request payload.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidArgument`] if `value` is not an object or
    /// holds an unsupported nested value.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match FilterValue::from_json(value)? {
            FilterValue::Map(entries) => Ok(Self { entries }),
            _ => Err(Error::InvalidArgument(String::from(
                "a search must be a JSON object",
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<FilterValue>> FromIterator<(K, V)> for Search {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut search = Self::new();
        for (name, value) in iter {
            search.insert(&name.into(), value);
        }
        search
    }
}

impl IntoIterator for Search {
    type Item = (String, FilterValue);
    type IntoIter = std::vec::IntoIter<(String, FilterValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A named filter operation registered for an entity.
///
/// The variant fixes the argument shape the handler accepts:
///
/// | handler      | accepts                                        |
/// |--------------|------------------------------------------------|
/// | `NoArg`      | no value, or a single value that is ignored    |
/// | `Optional`   | no value or a single value                     |
/// | `Single`     | a single value, or a list of exactly one       |
/// | `Variadic`   | no value, a single value or a list             |
/// | `Structured` | a keyed structure                              |
///
/// Any other shape is reported as [`Error::WrongFilterValue`].
pub enum FilterHandler<E: Entity> {
    /// Takes no argument.
    NoArg(fn(&mut Finder<E>) -> Result<()>),
    /// Takes an optional value; an empty value passes `None`.
    Optional(fn(&mut Finder<E>, Option<SqlValue>) -> Result<()>),
    /// Takes exactly one value.
    Single(fn(&mut Finder<E>, SqlValue) -> Result<()>),
    /// Takes any number of values.
    Variadic(fn(&mut Finder<E>, Vec<SqlValue>) -> Result<()>),
    /// Takes a keyed structure.
    Structured(fn(&mut Finder<E>, &[(String, FilterValue)]) -> Result<()>),
}

// Manual impls to avoid E: Clone / E: Debug bounds
impl<E: Entity> Clone for FilterHandler<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: Entity> Copy for FilterHandler<E> {}

impl<E: Entity> fmt::Debug for FilterHandler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::NoArg(_) => "NoArg",
            Self::Optional(_) => "Optional",
            Self::Single(_) => "Single",
            Self::Variadic(_) => "Variadic",
            Self::Structured(_) => "Structured",
        };
        write!(f, "FilterHandler::{kind}")
    }
}

impl<E: Entity> FilterHandler<E> {
    /// Calls the handler registered as `field` with `args`.
    ///
    /// # Errors
    ///
    /// Shape mismatches and [`Error::FilterArgument`] raised by the handler
    /// become [`Error::WrongFilterValue`] naming `field`. Other handler
    /// errors are returned unchanged.
    pub fn invoke(self, finder: &mut Finder<E>, field: &str, args: FilterArgs) -> Result<()> {
        let outcome = match (self, args) {
            (Self::NoArg(handler), FilterArgs::None | FilterArgs::Single(_)) => handler(finder),
            (Self::Optional(handler), FilterArgs::None) => handler(finder, None),
            (Self::Optional(handler), FilterArgs::Single(value)) => handler(finder, Some(value)),
            (Self::Single(handler), FilterArgs::Single(value)) => handler(finder, value),
            (Self::Single(handler), FilterArgs::Spread(mut values)) if values.len() == 1 => {
                handler(finder, values.remove(0))
            }
            (Self::Variadic(handler), FilterArgs::None) => handler(finder, Vec::new()),
            (Self::Variadic(handler), FilterArgs::Single(value)) => handler(finder, vec![value]),
            (Self::Variadic(handler), FilterArgs::Spread(values)) => handler(finder, values),
            (Self::Structured(handler), FilterArgs::Structured(entries)) => handler(finder, &entries),
            (handler, args) => {
                return Err(WrongFilterValueError::new(field)
                    .with_reason(format!("{handler:?} does not accept {}", args.shape()))
                    .into())
            }
        };

        outcome.map_err(|err| match err {
            Error::FilterArgument(reason) => {
                WrongFilterValueError::new(field).with_reason(reason).into()
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_shapes() {
        assert_eq!(FilterValue::from("").resolve(), FilterArgs::None);
        assert_eq!(
            FilterValue::from(Option::<i64>::None).resolve(),
            FilterArgs::None
        );
        assert_eq!(
            FilterValue::from(0).resolve(),
            FilterArgs::Single(SqlValue::Int(0))
        );
        assert_eq!(
            FilterValue::list([1, 2]).resolve(),
            FilterArgs::Spread(vec![SqlValue::Int(1), SqlValue::Int(2)])
        );
        assert!(matches!(
            FilterValue::map([("min", 1)]).resolve(),
            FilterArgs::Structured(_)
        ));
    }

    #[test]
    fn test_from_json() {
        let value = FilterValue::from_json(json!({
            "status": "active",
            "ids": [1, 2],
            "pages": { "min": 10 },
        }))
        .unwrap();
        let FilterValue::Map(entries) = value else {
            panic!("expected a keyed structure");
        };
        assert_eq!(entries.len(), 3);
        assert!(FilterValue::from_json(json!([[1]])).is_err());
        assert_eq!(
            FilterValue::from_json(json!(2.5)).unwrap(),
            FilterValue::Scalar(SqlValue::Float(2.5))
        );
    }

    #[test]
    fn test_search_from_json_requires_object() {
        let search = Search::from_json(json!({ "a": 1, "b": "" })).unwrap();
        assert_eq!(search.len(), 2);
        assert!(Search::from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_search_insert_replaces() {
        let mut search = Search::new().with("a", 1);
        search.insert("a", 2);
        assert_eq!(search.len(), 1);
        assert_eq!(search.get("a"), Some(&FilterValue::from(2)));

        let collected: Search = [("x", 1), ("y", 2)].into_iter().collect();
        let names: Vec<&str> = collected.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["x", "y"]);
    }
}
