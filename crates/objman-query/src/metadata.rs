//! Entity metadata consumed by the query builder and the finder.
//!
//! A descriptor is immutable once built and is usually kept in a `static`
//! so that associations can point at their targets by function pointer.

use std::fmt;

/// A single-valued association to another entity.
///
/// The owning side stores `join_column`, which references
/// `referenced_column` on the target entity's table.
#[derive(Clone)]
pub struct Association {
    field: String,
    target: fn() -> &'static EntityDescriptor,
    join_column: String,
    referenced_column: String,
}

impl Association {
    /// Creates an association.
    pub fn new(
        field: impl Into<String>,
        target: fn() -> &'static EntityDescriptor,
        join_column: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            target,
            join_column: join_column.into(),
            referenced_column: referenced_column.into(),
        }
    }

    /// Returns the association field name.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the descriptor of the associated entity.
    #[must_use]
    pub fn target(&self) -> &'static EntityDescriptor {
        (self.target)()
    }

    /// Returns the column on the owning table.
    #[must_use]
    pub fn join_column(&self) -> &str {
        &self.join_column
    }

    /// Returns the column on the target table.
    #[must_use]
    pub fn referenced_column(&self) -> &str {
        &self.referenced_column
    }
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("field", &self.field)
            .field("join_column", &self.join_column)
            .field("referenced_column", &self.referenced_column)
            .finish_non_exhaustive()
    }
}

/// Describes how an entity type maps onto a table.
///
/// # Example
///
/// ```
/// use objman_query::EntityDescriptor;
///
/// let users = EntityDescriptor::new("User", "users")
///     .identifier(&["id"])
///     .fields(&["uuid", "email", "status"]);
///
/// assert!(users.has_field("id"));
/// assert!(users.has_uuid());
/// assert!(!users.is_identifier_composite());
/// ```
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    identifier: Vec<String>,
    fields: Vec<String>,
    associations: Vec<Association>,
}

impl EntityDescriptor {
    /// Creates a descriptor for an entity stored in `table`.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            identifier: Vec::new(),
            fields: Vec::new(),
            associations: Vec::new(),
        }
    }

    /// Sets the identifier fields. They are registered as fields too.
    #[must_use]
    pub fn identifier(mut self, fields: &[&str]) -> Self {
        self.identifier = fields.iter().map(|f| (*f).to_string()).collect();
        for field in fields {
            self = self.field(field);
        }
        self
    }

    /// Adds a simple field.
    #[must_use]
    pub fn field(mut self, field: &str) -> Self {
        if !self.has_field(field) {
            self.fields.push(field.to_string());
        }
        self
    }

    /// Adds several simple fields.
    #[must_use]
    pub fn fields(mut self, fields: &[&str]) -> Self {
        for field in fields {
            self = self.field(field);
        }
        self
    }

    /// Adds an association.
    #[must_use]
    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    /// Returns the entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the alias used when none is given explicitly.
    #[must_use]
    pub fn default_alias(&self) -> &str {
        &self.table
    }

    /// Returns the identifier fields in declaration order.
    #[must_use]
    pub fn identifier_fields(&self) -> &[String] {
        &self.identifier
    }

    /// Returns whether the identifier spans more than one field.
    #[must_use]
    pub fn is_identifier_composite(&self) -> bool {
        self.identifier.len() > 1
    }

    /// Returns the simple fields.
    #[must_use]
    pub fn field_names(&self) -> &[String] {
        &self.fields
    }

    /// Returns whether `field` is a simple field.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Returns the associations.
    #[must_use]
    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    /// Looks up an association by field name.
    #[must_use]
    pub fn association_for(&self, field: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.field == field)
    }

    /// Returns whether `field` is an association.
    #[must_use]
    pub fn has_association(&self, field: &str) -> bool {
        self.association_for(field).is_some()
    }

    /// Returns whether the entity declares a `uuid` field.
    #[must_use]
    pub fn has_uuid(&self) -> bool {
        self.has_field("uuid")
    }

    /// Returns all stored columns: simple fields, then association join
    /// columns.
    #[must_use]
    pub fn columns(&self) -> Vec<&str> {
        self.fields
            .iter()
            .map(String::as_str)
            .chain(self.associations.iter().map(|a| a.join_column.as_str()))
            .collect()
    }
}
