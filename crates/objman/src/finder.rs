//! The finder: a reusable query session bound to one entity type.
//!
//! Mutators accumulate filters, joins, grouping, ordering and pagination.
//! Every terminal operation compiles the pending query, runs it through an
//! [`EntityManager`] and clears the session, so the same finder can start an
//! unrelated query right away. Only the alias survives a clear.

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

use objman_query::{
    placeholder_names, ConditionType, EntityDescriptor, JoinKind, OrderDirection,
    ParameterValue, Query, QueryBuilder, SqlValue, ToSqlValue,
};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::FinderConfig;
use crate::detached::Detached;
use crate::entity::{Entity, Identifier, Record};
use crate::error::{Error, NoResultError, Result, WrongFilterValueError};
use crate::filter::{FilterValue, Search};
use crate::manager::EntityManager;

/// A query session over entities of type `E`.
///
/// # Example
///
/// ```
/// # use std::sync::OnceLock;
/// # use objman::{Entity, EntityDescriptor, Record, Result};
/// # struct User;
/// # impl Entity for User {
/// #     fn descriptor() -> &'static EntityDescriptor {
/// #         static D: OnceLock<EntityDescriptor> = OnceLock::new();
/// #         D.get_or_init(|| EntityDescriptor::new("User", "users").identifier(&["id"]).fields(&["email", "status"]))
/// #     }
/// #     fn from_record(_: &Record) -> Result<Self> { Ok(User) }
/// #     fn to_record(&self) -> Record { Record::new() }
/// # }
/// use objman::{Finder, OrderDirection, Search};
///
/// let mut finder = Finder::<User>::with_alias("u");
/// finder
///     .filter(Search::new().with("status", "active"))?
///     .order("u.email", Some(OrderDirection::Asc))
///     .offset_page_result(2, Some(10));
///
/// let query = finder.query()?;
/// assert_eq!(
///     query.sql(),
///     "SELECT u.* FROM users u WHERE u.status = ? ORDER BY u.email ASC LIMIT 10 OFFSET 10"
/// );
/// # Ok::<(), objman::Error>(())
/// ```
pub struct Finder<E: Entity> {
    descriptor: &'static EntityDescriptor,
    config: FinderConfig,
    alias: String,
    query_builder: Option<QueryBuilder>,
    select: Vec<String>,
    joined: HashSet<String>,
    grouped: HashSet<String>,
    parameter_index: usize,
    offset: Option<u64>,
    limit: Option<u64>,
    _marker: PhantomData<fn() -> E>,
}

// Manual Clone implementation to avoid E: Clone bound
impl<E: Entity> Clone for Finder<E> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor,
            config: self.config.clone(),
            alias: self.alias.clone(),
            query_builder: self.query_builder.clone(),
            select: self.select.clone(),
            joined: self.joined.clone(),
            grouped: self.grouped.clone(),
            parameter_index: self.parameter_index,
            offset: self.offset,
            limit: self.limit,
            _marker: PhantomData,
        }
    }
}

impl<E: Entity> fmt::Debug for Finder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finder")
            .field("entity", &self.descriptor.name())
            .field("alias", &self.alias)
            .field("query_builder", &self.query_builder)
            .field("select", &self.select)
            .field("joined", &self.joined)
            .field("grouped", &self.grouped)
            .field("parameter_index", &self.parameter_index)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl<E: Entity> Default for Finder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Finder<E> {
    /// Creates a finder aliased by the entity's table name.
    #[must_use]
    pub fn new() -> Self {
        let descriptor = E::descriptor();
        Self::with_alias(descriptor.default_alias())
    }

    /// Creates a finder with an explicit alias.
    #[must_use]
    pub fn with_alias(alias: &str) -> Self {
        Self {
            descriptor: E::descriptor(),
            config: FinderConfig::default(),
            alias: alias.to_string(),
            query_builder: None,
            select: Vec::new(),
            joined: HashSet::new(),
            grouped: HashSet::new(),
            parameter_index: 0,
            offset: None,
            limit: None,
            _marker: PhantomData,
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: FinderConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the alias of the root entity.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &FinderConfig {
        &self.config
    }

    /// Returns the metadata of the root entity.
    #[must_use]
    pub const fn descriptor(&self) -> &'static EntityDescriptor {
        self.descriptor
    }

    /// Returns the row offset of the pending query.
    #[must_use]
    pub const fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Returns the row limit of the pending query.
    #[must_use]
    pub const fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Returns the pending query builder, creating it on first use.
    pub fn query_builder(&mut self) -> &mut QueryBuilder {
        let descriptor = self.descriptor;
        let alias = &self.alias;
        self.query_builder.get_or_insert_with(|| {
            let mut qb = QueryBuilder::new();
            qb.from(descriptor, alias, None).select([alias.as_str()]);
            qb
        })
    }

    /// Applies every filter of `search`, in order.
    ///
    /// # Errors
    ///
    /// See [`Finder::filter_field`].
    pub fn filter(&mut self, search: Search) -> Result<&mut Self> {
        for (name, value) in search {
            self.filter_field(&name, value)?;
        }
        Ok(self)
    }

    /// Applies a single filter.
    ///
    /// A handler registered under `name` is called with the value's resolved
    /// shape. Otherwise an entity field named `name` is compared with the
    /// value. Unknown names are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongFilterValue`] when the handler rejects the value,
    /// or when a keyed structure is given for an entity field.
    pub fn filter_field(&mut self, name: &str, value: impl Into<FilterValue>) -> Result<&mut Self> {
        let value = value.into();
        match E::filter_handler(name) {
            Some(handler) => handler.invoke(self, name, value.resolve())?,
            None => self.filter_entity_field(name, value)?,
        }
        Ok(self)
    }

    fn filter_entity_field(&mut self, field: &str, value: FilterValue) -> Result<()> {
        let column = if self.descriptor.has_field(field) {
            field.to_string()
        } else if let Some(association) = self.descriptor.association_for(field) {
            association.join_column().to_string()
        } else {
            trace!(entity = %self.descriptor.name(), field, "Ignoring unknown filter");
            return Ok(());
        };

        match value {
            FilterValue::List(values) => {
                let parameter = self.next_parameter_name();
                let condition = format!("{}.{column} IN (:{parameter})", self.alias);
                self.query_builder()
                    .and_where(condition)
                    .set_parameter(&parameter, ParameterValue::List(values));
            }
            FilterValue::Scalar(value) if value.is_empty() => {}
            FilterValue::Scalar(value) => {
                let parameter = self.next_parameter_name();
                let condition = format!("{}.{column} = :{parameter}", self.alias);
                self.query_builder()
                    .and_where(condition)
                    .set_parameter(&parameter, value);
            }
            FilterValue::Map(_) => {
                return Err(WrongFilterValueError::new(field)
                    .with_reason("entity fields cannot be compared with a keyed structure")
                    .into())
            }
        }
        Ok(())
    }

    /// Sets the row offset.
    pub fn offset_result(&mut self, offset: Option<u64>) -> &mut Self {
        self.offset = offset;
        self
    }

    /// Sets the row limit.
    pub fn max_result(&mut self, limit: Option<u64>) -> &mut Self {
        self.limit = limit;
        self
    }

    /// Paginates by page number.
    ///
    /// Without a limit, the limit becomes `page_size` or the configured
    /// default page size. The offset is `|page - 1| * limit`, so pages 0 and
    /// 1 both start at the first row. The offset saturates at `u64::MAX`.
    pub fn offset_page_result(&mut self, page: i64, page_size: Option<u64>) -> &mut Self {
        let default = page_size.unwrap_or(self.config.default_page_size);
        let limit = *self.limit.get_or_insert(default);
        self.offset = Some(page.abs_diff(1).saturating_mul(limit));
        self
    }

    /// Replaces the projection. Known fields are qualified with the alias.
    pub fn select(&mut self, fields: &[&str]) -> &mut Self {
        self.select = fields.iter().map(|f| self.get_field_name(f)).collect();
        let select = self.select.clone();
        self.query_builder().select(select);
        self
    }

    /// Appends to the projection. Known fields are qualified with the alias.
    pub fn add_select(&mut self, fields: &[&str]) -> &mut Self {
        let added: Vec<String> = fields.iter().map(|f| self.get_field_name(f)).collect();
        self.select.extend(added.iter().cloned());
        self.query_builder().add_select(added);
        self
    }

    /// Groups by each field once, no matter how often it is requested.
    pub fn group_by(&mut self, fields: &[&str]) -> &mut Self {
        for field in fields {
            let field = self.get_field_name(field);
            if self.grouped.insert(field.clone()) {
                self.query_builder().add_group_by(field);
            }
        }
        self
    }

    /// Replaces the ordering.
    pub fn order(&mut self, sort: &str, direction: Option<OrderDirection>) -> &mut Self {
        self.query_builder().order_by(sort, direction);
        self
    }

    /// Appends an ordering.
    pub fn add_order(&mut self, sort: &str, direction: Option<OrderDirection>) -> &mut Self {
        self.query_builder().add_order_by(sort, direction);
        self
    }

    /// Adds an INNER JOIN unless `alias` is already joined.
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

    /// Adds a LEFT JOIN unless `alias` is already joined.
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

    fn add_join(
        &mut self,
        kind: JoinKind,
        path: &str,
        alias: &str,
        condition_type: Option<ConditionType>,
        condition: Option<&str>,
        index_by: Option<&str>,
    ) -> &mut Self {
        if self.joined.insert(alias.to_string()) {
            self.query_builder()
                .add_join(kind, path, alias, condition_type, condition, index_by);
        }
        self
    }

    /// Adds a raw condition, binding `parameters` positionally.
    ///
    /// The i-th distinct placeholder of `condition` receives the i-th value.
    /// Placeholders beyond the given values must already be bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingParameter`] naming the first placeholder with
    /// neither a positional nor a bound value.
    pub fn where_clause<I>(&mut self, condition: &str, parameters: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<ParameterValue>,
    {
        let mut parameters = parameters.into_iter();
        for name in placeholder_names(condition) {
            match parameters.next() {
                Some(value) => {
                    self.set_parameter(&name, value);
                }
                None if self.parameter(&name).is_some() => {}
                None => return Err(Error::MissingParameter(name)),
            }
        }

        let condition = self.rewrite_legacy_alias(condition);
        self.query_builder().and_where(condition);
        Ok(self)
    }

    /// Adds a raw condition whose placeholders are already bound.
    ///
    /// # Errors
    ///
    /// See [`Finder::where_clause`].
    pub fn and_where(&mut self, condition: &str) -> Result<&mut Self> {
        self.where_clause(condition, std::iter::empty::<SqlValue>())
    }

    fn rewrite_legacy_alias(&self, condition: &str) -> String {
        match &self.config.legacy_alias_prefix {
            Some(prefix) if !prefix.is_empty() && condition.contains(prefix.as_str()) => {
                warn!(
                    prefix = %prefix,
                    alias = %self.alias,
                    "Rewriting deprecated alias prefix in condition"
                );
                condition.replace(prefix.as_str(), &format!("{}.", self.alias))
            }
            _ => condition.to_string(),
        }
    }

    /// Binds a value to a named parameter. A leading `:` is ignored.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<ParameterValue>) -> &mut Self {
        self.query_builder().set_parameter(name, value);
        self
    }

    /// Returns the value bound to a named parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        self.query_builder.as_ref()?.parameter(name)
    }

    /// Scopes the query to the caller's context.
    ///
    /// # Errors
    ///
    /// Propagates the entity's [`Entity::limit_context`] failure.
    pub fn context_limitation(&mut self) -> Result<&mut Self> {
        E::limit_context(self)?;
        Ok(self)
    }

    /// Compiles the pending query and clears the session.
    ///
    /// # Errors
    ///
    /// Fails when the query cannot be compiled, e.g. on an unbound
    /// placeholder. The session is cleared either way.
    pub fn query(&mut self) -> Result<Query> {
        let compiled = self.compile();
        self.clear();
        compiled
    }

    fn compile(&mut self) -> Result<Query> {
        let (offset, limit) = (self.offset, self.limit);
        let qb = self.query_builder();
        qb.set_max_results(limit);
        if offset.is_some() {
            qb.set_first_result(offset);
        }
        let query = qb.get_query()?;
        debug!(sql = %query.sql(), params = query.params().len(), "Compiled finder query");
        Ok(query)
    }

    /// Resets the session. The alias and configuration are kept.
    pub fn clear(&mut self) {
        self.query_builder = None;
        self.select.clear();
        self.joined.clear();
        self.grouped.clear();
        self.parameter_index = 0;
        self.offset = None;
        self.limit = None;
    }

    /// Qualifies a known, unqualified field with the alias.
    #[must_use]
    pub fn get_field_name(&self, field: &str) -> String {
        if !field.contains('.') && self.descriptor.has_field(field) {
            format!("{}.{field}", self.alias)
        } else {
            field.to_string()
        }
    }

    fn next_parameter_name(&mut self) -> String {
        let name = format!("p{}", self.parameter_index);
        self.parameter_index += 1;
        name
    }

    /// Applies `search`, optionally limits to one row, then compiles.
    fn prepare(&mut self, search: Search, single: bool) -> Result<Query> {
        if let Err(err) = self.filter(search) {
            self.clear();
            return Err(err);
        }
        if single {
            self.max_result(Some(1));
        }
        self.query()
    }

    fn prepare_find(&mut self, id: Identifier) -> Result<Query> {
        let prepared = match id.as_uuid() {
            Some(uuid) => self.uuid_search(uuid).map(|search| (search, true)),
            None => id
                .normalize(self.descriptor)
                .map(|fields| (fields.into_iter().collect::<Search>(), false)),
        };
        match prepared {
            Ok((search, single)) => self.prepare(search, single),
            Err(err) => {
                self.clear();
                Err(err)
            }
        }
    }

    fn uuid_search(&self, uuid: Uuid) -> Result<Search> {
        if !self.descriptor.has_uuid() {
            return Err(Error::Logic(format!(
                "{} does not have uuid field",
                self.descriptor.name()
            )));
        }
        Ok(Search::new().with("uuid", uuid.to_sql_value()))
    }

    fn prepare_count(&mut self, field: &str, distinct: bool, search: Search) -> Result<Query> {
        if let Err(err) = self.filter(search) {
            self.clear();
            return Err(err);
        }
        let previous = std::mem::take(&mut self.select);
        let field = self.get_field_name(field);
        let aggregate = if distinct {
            format!("COUNT(DISTINCT {field})")
        } else {
            format!("COUNT({field})")
        };
        self.select(&[aggregate.as_str()]);
        let previous: Vec<&str> = previous.iter().map(String::as_str).collect();
        if !previous.is_empty() {
            self.add_select(&previous);
        }
        self.query_builder().reset_group_by();
        self.offset = None;
        self.limit = None;
        self.query()
    }

    /// Finds an entity by identifier.
    ///
    /// A UUID, or text in UUID form, is looked up through
    /// [`Finder::find_by_uuid`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for a malformed identifier.
    /// - [`Error::Logic`] for unrecognized identifier keys, or a UUID on an
    ///   entity without a `uuid` field.
    /// - [`Error::NonUniqueResult`] when several rows match.
    pub async fn find<M: EntityManager>(
        &mut self,
        manager: &M,
        id: impl Into<Identifier>,
    ) -> Result<Option<E>> {
        let query = self.prepare_find(id.into())?;
        one_or_none(manager.fetch_entities::<E>(&query).await?)
    }

    /// [`Finder::find`] returning a plain record.
    ///
    /// # Errors
    ///
    /// See [`Finder::find`].
    pub async fn find_as_array<M: EntityManager>(
        &mut self,
        manager: &M,
        id: impl Into<Identifier>,
    ) -> Result<Option<Record>> {
        let query = self.prepare_find(id.into())?;
        one_or_none(manager.fetch_records(&query).await?)
    }

    /// Finds an entity through its `uuid` field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Logic`] if the entity has no `uuid` field.
    pub async fn find_by_uuid<M: EntityManager>(
        &mut self,
        manager: &M,
        uuid: Uuid,
    ) -> Result<Option<E>> {
        let query = self.prepare_find(Identifier::Uuid(uuid))?;
        one_or_none(manager.fetch_entities::<E>(&query).await?)
    }

    /// Finds at most one entity matching `search`.
    ///
    /// The query is limited to one row, so several matches yield the first
    /// one in query order.
    ///
    /// # Errors
    ///
    /// Filter errors, and errors of the [`EntityManager`].
    pub async fn find_by<M: EntityManager>(
        &mut self,
        manager: &M,
        search: Search,
    ) -> Result<Option<E>> {
        let query = self.prepare(search, true)?;
        one_or_none(manager.fetch_entities::<E>(&query).await?)
    }

    /// [`Finder::find_by`] returning a plain record.
    ///
    /// # Errors
    ///
    /// See [`Finder::find_by`].
    pub async fn find_by_as_array<M: EntityManager>(
        &mut self,
        manager: &M,
        search: Search,
    ) -> Result<Option<Record>> {
        let query = self.prepare(search, true)?;
        one_or_none(manager.fetch_records(&query).await?)
    }

    /// [`Finder::find`], failing when nothing is found.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoResult`] when nothing matches, otherwise see
    /// [`Finder::find`].
    pub async fn find_or_die<M: EntityManager>(
        &mut self,
        manager: &M,
        id: impl Into<Identifier>,
    ) -> Result<E> {
        self.find(manager, id)
            .await?
            .ok_or_else(|| NoResultError.into())
    }

    /// [`Finder::find_or_die`] returning a plain record.
    ///
    /// # Errors
    ///
    /// See [`Finder::find_or_die`].
    pub async fn find_or_die_as_array<M: EntityManager>(
        &mut self,
        manager: &M,
        id: impl Into<Identifier>,
    ) -> Result<Record> {
        self.find_as_array(manager, id)
            .await?
            .ok_or_else(|| NoResultError.into())
    }

    /// Finds every entity matching `search`.
    ///
    /// # Errors
    ///
    /// Filter, compilation or database errors.
    pub async fn find_all<M: EntityManager>(
        &mut self,
        manager: &M,
        search: Search,
    ) -> Result<Vec<E>> {
        let query = self.prepare(search, false)?;
        manager.fetch_entities::<E>(&query).await
    }

    /// [`Finder::find_all`] returning plain records.
    ///
    /// # Errors
    ///
    /// See [`Finder::find_all`].
    pub async fn find_all_as_array<M: EntityManager>(
        &mut self,
        manager: &M,
        search: Search,
    ) -> Result<Vec<Record>> {
        let query = self.prepare(search, false)?;
        manager.fetch_records(&query).await
    }

    /// Counts the rows matching `search`.
    ///
    /// Grouping, offset and limit are dropped for the count query.
    ///
    /// # Errors
    ///
    /// Filter, compilation or database errors.
    pub async fn count<M: EntityManager>(
        &mut self,
        manager: &M,
        field: &str,
        distinct: bool,
        search: Search,
    ) -> Result<u64> {
        let query = self.prepare_count(field, distinct, search)?;
        let records = manager.fetch_records(&query).await?;
        let count = records
            .first()
            .and_then(Record::first)
            .and_then(SqlValue::as_int)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Streams the entities matching `search` page by page, detaching each
    /// one from the manager as it is handed out.
    ///
    /// The session is cleared when the cursor is exhausted, fails or is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns filter errors immediately; query errors surface from the
    /// cursor.
    pub fn find_all_detached<'a, M: EntityManager>(
        &'a mut self,
        manager: &'a M,
        search: Search,
    ) -> Result<Detached<'a, E, M>> {
        if let Err(err) = self.filter(search) {
            self.clear();
            return Err(err);
        }
        Ok(Detached::new(self, manager))
    }

    pub(crate) fn pending_page(&mut self, offset: u64, size: u64) -> Result<Query> {
        let query = self
            .query_builder()
            .set_first_result(Some(offset))
            .set_max_results(Some(size))
            .get_query()?;
        debug!(sql = %query.sql(), offset, size, "Fetching detached page");
        Ok(query)
    }
}

fn one_or_none<T>(rows: Vec<T>) -> Result<Option<T>> {
    if rows.len() > 1 {
        return Err(Error::NonUniqueResult);
    }
    Ok(rows.into_iter().next())
}
