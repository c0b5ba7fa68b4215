//! Mutable query builder over entity aliases.
//!
//! Items, conditions and orderings are written against aliases
//! (`u.email = :email`). Joins over associations are resolved through the
//! entity metadata when the query is compiled.

use std::fmt;
use std::str::FromStr;

use crate::error::{QueryError, Result};
use crate::metadata::EntityDescriptor;
use crate::query::{bind_placeholders, Query};
use crate::value::ParameterValue;

/// The kind of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// INNER JOIN
    Inner,
    /// LEFT JOIN
    Left,
}

impl JoinKind {
    /// Returns the SQL keyword.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
        }
    }
}

impl FromStr for JoinKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INNER" | "INNER JOIN" | "JOIN" => Ok(Self::Inner),
            "LEFT" | "LEFT JOIN" => Ok(Self::Left),
            _ => Err(QueryError::InvalidJoin(format!("unknown join type `{s}`"))),
        }
    }
}

/// How a join condition combines with the association condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionType {
    /// Replaces the association condition.
    On,
    /// Is added to the association condition.
    With,
}

impl FromStr for ConditionType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ON" => Ok(Self::On),
            "WITH" => Ok(Self::With),
            _ => Err(QueryError::InvalidJoin(format!("unknown condition type `{s}`"))),
        }
    }
}

/// Order direction for sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (ASC)
    Asc,
    /// Descending order (DESC)
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "ASC"),
            Self::Desc => write!(f, "DESC"),
        }
    }
}

impl FromStr for OrderDirection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            _ => Err(QueryError::InvalidDirection(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
struct FromClause {
    descriptor: &'static EntityDescriptor,
    alias: String,
    index_by: Option<String>,
}

#[derive(Debug, Clone)]
struct JoinClause {
    kind: JoinKind,
    path: String,
    alias: String,
    condition_type: Option<ConditionType>,
    condition: Option<String>,
    index_by: Option<String>,
}

/// A mutable SELECT builder.
///
/// # Example
///
/// ```
/// use std::sync::OnceLock;
/// use objman_query::{EntityDescriptor, QueryBuilder};
///
/// fn users() -> &'static EntityDescriptor {
///     static D: OnceLock<EntityDescriptor> = OnceLock::new();
///     D.get_or_init(|| EntityDescriptor::new("User", "users").identifier(&["id"]))
/// }
///
/// let mut qb = QueryBuilder::new();
/// qb.select(["u"])
///     .from(users(), "u", None)
///     .and_where("u.id = :id")
///     .set_parameter("id", 7);
///
/// let query = qb.get_query().unwrap();
/// assert_eq!(query.sql(), "SELECT u.* FROM users u WHERE u.id = ?");
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    select: Vec<String>,
    from: Option<FromClause>,
    joins: Vec<JoinClause>,
    conditions: Vec<String>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    parameters: Vec<(String, ParameterValue)>,
    first_result: Option<u64>,
    max_results: Option<u64>,
}

impl QueryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the selected items.
    pub fn select<I, S>(&mut self, items: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = items.into_iter().map(Into::into).collect();
        self
    }

    /// Appends selected items.
    pub fn add_select<I, S>(&mut self, items: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select.extend(items.into_iter().map(Into::into));
        self
    }

    /// Returns the selected items.
    #[must_use]
    pub fn selected(&self) -> &[String] {
        &self.select
    }

    /// Sets the root entity and its alias.
    pub fn from(
        &mut self,
        descriptor: &'static EntityDescriptor,
        alias: &str,
        index_by: Option<&str>,
    ) -> &mut Self {
        self.from = Some(FromClause {
            descriptor,
            alias: alias.to_string(),
            index_by: index_by.map(str::to_string),
        });
        self
    }

    /// Adds a join of the given kind.
    ///
    /// `path` is either `parent_alias.association` or a table name. A table
    /// join needs an explicit condition.
    pub fn add_join(
        &mut self,
        kind: JoinKind,
        path: &str,
        alias: &str,
        condition_type: Option<ConditionType>,
        condition: Option<&str>,
        index_by: Option<&str>,
    ) -> &mut Self {
        self.joins.push(JoinClause {
            kind,
            path: path.to_string(),
            alias: alias.to_string(),
            condition_type,
            condition: condition.map(str::to_string),
            index_by: index_by.map(str::to_string),
        });
        self
    }

    /// Adds an INNER JOIN.
    pub fn join(
        &mut self,
        path: &str,
        alias: &str,
        condition_type: Option<ConditionType>,
        condition: Option<&str>,
        index_by: Option<&str>,
    ) -> &mut Self {
        self.add_join(JoinKind::Inner, path, alias, condition_type, condition, index_by)
    }

    /// Adds a LEFT JOIN.
    pub fn left_join(
        &mut self,
        path: &str,
        alias: &str,
        condition_type: Option<ConditionType>,
        condition: Option<&str>,
        index_by: Option<&str>,
    ) -> &mut Self {
        self.add_join(JoinKind::Left, path, alias, condition_type, condition, index_by)
    }

    /// Replaces all conditions with `condition`.
    pub fn where_clause(&mut self, condition: impl Into<String>) -> &mut Self {
        self.conditions = vec![condition.into()];
        self
    }

    /// Adds a condition combined with AND.
    pub fn and_where(&mut self, condition: impl Into<String>) -> &mut Self {
        self.conditions.push(condition.into());
        self
    }

    /// Returns the conditions combined with AND.
    #[must_use]
    pub fn conditions(&self) -> &[String] {
        &self.conditions
    }

    /// Adds a GROUP BY expression.
    pub fn add_group_by(&mut self, expr: impl Into<String>) -> &mut Self {
        self.group_by.push(expr.into());
        self
    }

    /// Removes every GROUP BY expression.
    pub fn reset_group_by(&mut self) -> &mut Self {
        self.group_by.clear();
        self
    }

    /// Returns the GROUP BY expressions.
    #[must_use]
    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    /// Replaces the ordering.
    pub fn order_by(&mut self, sort: &str, direction: Option<OrderDirection>) -> &mut Self {
        self.order_by.clear();
        self.add_order_by(sort, direction)
    }

    /// Appends an ordering.
    pub fn add_order_by(&mut self, sort: &str, direction: Option<OrderDirection>) -> &mut Self {
        self.order_by.push(match direction {
            Some(direction) => format!("{sort} {direction}"),
            None => sort.to_string(),
        });
        self
    }

    /// Binds a value to a named parameter. A leading `:` is ignored.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<ParameterValue>) -> &mut Self {
        let name = name.trim_matches(':');
        let value = value.into();
        match self.parameters.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.parameters.push((name.to_string(), value)),
        }
        self
    }

    /// Returns the value bound to a named parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        let name = name.trim_matches(':');
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Sets the row offset.
    pub fn set_first_result(&mut self, first_result: Option<u64>) -> &mut Self {
        self.first_result = first_result;
        self
    }

    /// Sets the row limit.
    pub fn set_max_results(&mut self, max_results: Option<u64>) -> &mut Self {
        self.max_results = max_results;
        self
    }

    /// Returns the number of joins.
    #[must_use]
    pub fn join_count(&self) -> usize {
        self.joins.len()
    }

    /// Compiles the builder into an executable query.
    ///
    /// # Errors
    ///
    /// Fails without a FROM clause, with an unbound placeholder, or with a
    /// join that cannot be resolved.
    pub fn get_query(&self) -> Result<Query> {
        let from = self.from.as_ref().ok_or(QueryError::MissingFrom)?;
        let mut aliases: Vec<(&str, &'static EntityDescriptor)> =
            vec![(from.alias.as_str(), from.descriptor)];
        let mut index_by = Vec::new();
        if let Some(field) = &from.index_by {
            index_by.push((from.alias.clone(), field.clone()));
        }

        let mut joins = Vec::with_capacity(self.joins.len());
        for join in &self.joins {
            joins.push(render_join(join, &mut aliases)?);
            if let Some(field) = &join.index_by {
                index_by.push((join.alias.clone(), field.clone()));
            }
        }

        let items: Vec<String> = if self.select.is_empty() {
            vec![format!("{}.*", from.alias)]
        } else {
            self.select
                .iter()
                .map(|item| {
                    if aliases.iter().any(|(alias, _)| alias == item) {
                        format!("{item}.*")
                    } else {
                        item.clone()
                    }
                })
                .collect()
        };

        let mut sql = format!(
            "SELECT {} FROM {} {}",
            items.join(", "),
            from.descriptor.table(),
            from.alias
        );

        for join in &joins {
            sql.push(' ');
            sql.push_str(join);
        }

        match self.conditions.len() {
            0 => {}
            1 => {
                sql.push_str(" WHERE ");
                sql.push_str(&self.conditions[0]);
            }
            _ => {
                let parts: Vec<String> = self.conditions.iter().map(|c| format!("({c})")).collect();
                sql.push_str(" WHERE ");
                sql.push_str(&parts.join(" AND "));
            }
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        match (self.max_results, self.first_result) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        let (sql, params) = bind_placeholders(&sql, &self.parameters)?;
        Ok(Query::new(
            sql,
            params,
            self.first_result,
            self.max_results,
            index_by,
        ))
    }
}

fn render_join<'a>(
    join: &'a JoinClause,
    aliases: &mut Vec<(&'a str, &'static EntityDescriptor)>,
) -> Result<String> {
    let (table, association_condition) = match join.path.split_once('.') {
        Some((parent, field)) => {
            let descriptor = aliases
                .iter()
                .find(|(alias, _)| *alias == parent)
                .map(|(_, descriptor)| *descriptor)
                .ok_or_else(|| QueryError::UnknownAlias(parent.to_string()))?;
            let association =
                descriptor
                    .association_for(field)
                    .ok_or_else(|| QueryError::UnknownAssociation {
                        entity: descriptor.name().to_string(),
                        field: field.to_string(),
                    })?;
            let target = association.target();
            aliases.push((join.alias.as_str(), target));
            (
                target.table(),
                Some(format!(
                    "{}.{} = {}.{}",
                    join.alias,
                    association.referenced_column(),
                    parent,
                    association.join_column()
                )),
            )
        }
        None => (join.path.as_str(), None),
    };

    let condition = match (association_condition, join.condition_type, &join.condition) {
        (Some(_), Some(ConditionType::On), Some(condition)) | (None, _, Some(condition)) => {
            condition.clone()
        }
        (Some(base), _, Some(condition)) => format!("{base} AND ({condition})"),
        (Some(base), _, None) => base,
        (None, _, None) => {
            return Err(QueryError::InvalidJoin(format!(
                "join `{}` as `{}` needs a condition",
                join.path, join.alias
            )))
        }
    };

    Ok(format!(
        "{} {} {} ON {}",
        join.kind.keyword(),
        table,
        join.alias,
        condition
    ))
}
