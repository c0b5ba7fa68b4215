//! Entities, plain records and identifiers.

use chrono::{DateTime, NaiveDateTime, Utc};
use objman_query::{EntityDescriptor, SqlValue, ToSqlValue};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::filter::FilterHandler;
use crate::finder::Finder;

/// A row as plain structured data: ordered column/value pairs.
///
/// This is the array hydration mode. It serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: Vec<(String, SqlValue)>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a column, builder style.
    #[must_use]
    pub fn with(mut self, column: &str, value: impl ToSqlValue) -> Self {
        self.insert(column, value);
        self
    }

    /// Adds or replaces a column.
    pub fn insert(&mut self, column: &str, value: impl ToSqlValue) {
        let value = value.to_sql_value();
        match self.columns.iter_mut().find(|(c, _)| c == column) {
            Some(entry) => entry.1 = value,
            None => self.columns.push((column.to_string(), value)),
        }
    }

    /// Appends a column without checking for duplicates.
    pub fn push(&mut self, column: String, value: SqlValue) {
        self.columns.push((column, value));
    }

    /// Returns the value of a column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, value)| value)
    }

    /// Returns the value of the first column.
    #[must_use]
    pub fn first(&self) -> Option<&SqlValue> {
        self.columns.first().map(|(_, value)| value)
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns whether the record has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterates over the columns in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(c, v)| (c.as_str(), v))
    }

    fn value(&self, column: &str) -> Result<&SqlValue> {
        self.get(column)
            .ok_or_else(|| Error::Hydration(format!("missing column `{column}`")))
    }

    fn mismatch(column: &str, expected: &str, value: &SqlValue) -> Error {
        Error::Hydration(format!(
            "column `{column}` holds {}, expected {expected}",
            value.to_sql_inline()
        ))
    }

    /// Reads an integer column.
    ///
    /// # Errors
    ///
    /// Fails if the column is missing or not an integer.
    pub fn get_int(&self, column: &str) -> Result<i64> {
        let value = self.value(column)?;
        value
            .as_int()
            .ok_or_else(|| Self::mismatch(column, "an integer", value))
    }

    /// Reads a nullable integer column.
    ///
    /// # Errors
    ///
    /// Fails if the column is missing or holds a non-integer.
    pub fn get_opt_int(&self, column: &str) -> Result<Option<i64>> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            _ => self.get_int(column).map(Some),
        }
    }

    /// Reads a float column.
    ///
    /// # Errors
    ///
    /// Fails if the column is missing or not numeric.
    pub fn get_float(&self, column: &str) -> Result<f64> {
        let value = self.value(column)?;
        value
            .as_float()
            .ok_or_else(|| Self::mismatch(column, "a number", value))
    }

    /// Reads a boolean column.
    ///
    /// # Errors
    ///
    /// Fails if the column is missing or not a boolean.
    pub fn get_bool(&self, column: &str) -> Result<bool> {
        let value = self.value(column)?;
        value
            .as_bool()
            .ok_or_else(|| Self::mismatch(column, "a boolean", value))
    }

    /// Reads a text column.
    ///
    /// # Errors
    ///
    /// Fails if the column is missing or not text.
    pub fn get_text(&self, column: &str) -> Result<String> {
        let value = self.value(column)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Self::mismatch(column, "text", value))
    }

    /// Reads a nullable text column.
    ///
    /// # Errors
    ///
    /// Fails if the column is missing or holds something other than text.
    pub fn get_opt_text(&self, column: &str) -> Result<Option<String>> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            _ => self.get_text(column).map(Some),
        }
    }

    /// Reads a UUID stored as text.
    ///
    /// # Errors
    ///
    /// Fails if the column is missing or not a valid UUID.
    pub fn get_uuid(&self, column: &str) -> Result<Uuid> {
        let text = self.get_text(column)?;
        Uuid::parse_str(&text)
            .map_err(|err| Error::Hydration(format!("column `{column}`: {err}")))
    }

    /// Reads a timestamp stored as RFC 3339 or `YYYY-MM-DD HH:MM:SS` text.
    ///
    /// # Errors
    ///
    /// Fails if the column is missing or not a timestamp.
    pub fn get_datetime(&self, column: &str) -> Result<DateTime<Utc>> {
        let text = self.get_text(column)?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S")
            .map(|naive| naive.and_utc())
            .map_err(|err| Error::Hydration(format!("column `{column}`: {err}")))
    }
}

impl IntoIterator for Record {
    type Item = (String, SqlValue);
    type IntoIter = std::vec::IntoIter<(String, SqlValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl FromIterator<(String, SqlValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (column, value) in iter {
            record.insert(&column, value);
        }
        record
    }
}

struct JsonValue<'a>(&'a SqlValue);

impl Serialize for JsonValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0 {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Bool(b) => serializer.serialize_bool(*b),
            SqlValue::Int(n) => serializer.serialize_i64(*n),
            SqlValue::Float(f) => serializer.serialize_f64(*f),
            SqlValue::Text(s) => serializer.serialize_str(s),
            SqlValue::Blob(b) => serializer.serialize_bytes(b),
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in &self.columns {
            map.serialize_entry(column, &JsonValue(value))?;
        }
        map.end()
    }
}

/// A type persisted through the object manager.
///
/// # Example
///
/// ```
/// use std::sync::OnceLock;
/// use objman::{Entity, EntityDescriptor, Record, Result};
///
/// struct Tag {
///     id: i64,
///     label: String,
/// }
///
/// impl Entity for Tag {
///     fn descriptor() -> &'static EntityDescriptor {
///         static D: OnceLock<EntityDescriptor> = OnceLock::new();
///         D.get_or_init(|| EntityDescriptor::new("Tag", "tags").identifier(&["id"]).field("label"))
///     }
///
///     fn from_record(record: &Record) -> Result<Self> {
///         Ok(Self {
///             id: record.get_int("id")?,
///             label: record.get_text("label")?,
///         })
///     }
///
///     fn to_record(&self) -> Record {
///         Record::new().with("id", self.id).with("label", &self.label)
///     }
/// }
///
/// let tag = Tag { id: 3, label: String::from("rust") };
/// assert_eq!(tag.identity_key(), "tags(3)");
/// ```
pub trait Entity: Sized {
    /// Returns the metadata of this entity type.
    fn descriptor() -> &'static EntityDescriptor;

    /// Builds an entity from a fetched record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hydration`] when a column is missing or mistyped.
    fn from_record(record: &Record) -> Result<Self>;

    /// Returns the persisted columns of the entity.
    fn to_record(&self) -> Record;

    /// Looks up the filter handler registered under `name`.
    fn filter_handler(_name: &str) -> Option<FilterHandler<Self>> {
        None
    }

    /// Scopes a finder to the caller's context.
    ///
    /// # Errors
    ///
    /// Implementations may fail like any other finder mutation.
    fn limit_context(_finder: &mut Finder<Self>) -> Result<()> {
        Ok(())
    }

    /// Returns the identifier columns and their values.
    fn identity(&self) -> Vec<(String, SqlValue)> {
        let record = self.to_record();
        Self::descriptor()
            .identifier_fields()
            .iter()
            .map(|field| {
                let value = record.get(field).cloned().unwrap_or(SqlValue::Null);
                (field.clone(), value)
            })
            .collect()
    }

    /// Returns a key identifying the entity within its table.
    fn identity_key(&self) -> String {
        identity_key(Self::descriptor(), &self.identity())
    }
}

pub(crate) fn identity_key(descriptor: &EntityDescriptor, identity: &[(String, SqlValue)]) -> String {
    let values: Vec<String> = identity.iter().map(|(_, v)| v.to_sql_inline()).collect();
    format!("{}({})", descriptor.table(), values.join(", "))
}

/// The argument of `find`: a UUID, a single identifier value or a keyed
/// set of identifier values.
#[derive(Debug, Clone, PartialEq)]
pub enum Identifier {
    /// A UUID, looked up through the entity's `uuid` field.
    Uuid(Uuid),
    /// A single identifier value.
    Value(SqlValue),
    /// Identifier values keyed by field name.
    Fields(Vec<(String, SqlValue)>),
}

impl Identifier {
    /// Creates a keyed identifier.
    pub fn fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToSqlValue,
    {
        Self::Fields(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.to_sql_value()))
                .collect(),
        )
    }

    /// Returns the UUID if the identifier is one, or is text in canonical
    /// hyphenated UUID form.
    #[must_use]
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(uuid) => Some(*uuid),
            Self::Value(SqlValue::Text(text)) if text.len() == 36 => Uuid::parse_str(text).ok(),
            _ => None,
        }
    }

    /// Maps the identifier onto the identifier fields of `descriptor`, in
    /// declaration order.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for a single value on a composite
    ///   identifier, or when an identifier field is NULL or empty.
    /// - [`Error::Logic`] when keys name fields that are not identifiers.
    pub fn normalize(self, descriptor: &EntityDescriptor) -> Result<Vec<(String, SqlValue)>> {
        let identifier = descriptor.identifier_fields();
        let mut given = match self {
            Self::Fields(fields) => fields,
            Self::Uuid(uuid) => return Self::Value(uuid.to_sql_value()).normalize(descriptor),
            Self::Value(value) => {
                if descriptor.is_identifier_composite() {
                    return Err(Error::InvalidArgument(format!(
                        "binding an entity with a composite primary key to a query \
                         requires all identifier fields of `{}`",
                        descriptor.name()
                    )));
                }
                let Some(field) = identifier.first() else {
                    return Err(Error::Logic(format!(
                        "{} does not declare an identifier",
                        descriptor.name()
                    )));
                };
                vec![(field.clone(), value)]
            }
        };

        let mut sorted = Vec::with_capacity(identifier.len());
        for field in identifier {
            let position = given
                .iter()
                .position(|(name, value)| name == field && !value.is_empty());
            match position {
                Some(index) => sorted.push(given.remove(index)),
                None => {
                    return Err(Error::InvalidArgument(format!(
                        "the identifier {field} is missing for a query of {}",
                        descriptor.name()
                    )))
                }
            }
        }

        if !given.is_empty() {
            let names: Vec<&str> = given.iter().map(|(name, _)| name.as_str()).collect();
            return Err(Error::Logic(format!(
                "Unrecognized identifier fields: '{}' are not present on class '{}'.",
                names.join("', '"),
                descriptor.name()
            )));
        }

        Ok(sorted)
    }
}

impl<T: ToSqlValue> From<T> for Identifier {
    fn from(value: T) -> Self {
        Self::Value(value.to_sql_value())
    }
}
