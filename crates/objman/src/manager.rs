//! The persistence engine seam and the object manager facade.

use std::marker::PhantomData;

use objman_query::{EntityDescriptor, Query, QueryBuilder};

use crate::config::FinderConfig;
use crate::entity::{Entity, Identifier, Record};
use crate::error::{NoResultError, Result};
use crate::filter::Search;
use crate::finder::Finder;

/// A persistence engine: runs queries and tracks managed entities.
///
/// Query execution is async. Unit-of-work bookkeeping (`persist`, `remove`,
/// `detach`, `clear`) only touches in-memory state and is written out by
/// [`EntityManager::flush`].
#[allow(async_fn_in_trait)]
pub trait EntityManager {
    /// Runs a query and returns the rows as plain records.
    async fn fetch_records(&self, query: &Query) -> Result<Vec<Record>>;

    /// Runs a query and hydrates the rows into entities.
    async fn fetch_entities<E: Entity>(&self, query: &Query) -> Result<Vec<E>> {
        let records = self.fetch_records(query).await?;
        records.iter().map(E::from_record).collect()
    }

    /// Finds an entity by identifier.
    async fn find<E: Entity>(&self, id: Identifier) -> Result<Option<E>>
    where
        Self: Sized,
    {
        Finder::<E>::new().find(self, id).await
    }

    /// Schedules an entity for insertion or update.
    fn persist<E: Entity>(&self, entity: &E) -> Result<()>;

    /// Schedules an entity for removal.
    fn remove<E: Entity>(&self, entity: &E) -> Result<()>;

    /// Detaches every managed entity and drops scheduled writes.
    fn clear(&self) -> Result<()>;

    /// Stops tracking an entity and drops its scheduled writes.
    fn detach<E: Entity>(&self, entity: &E) -> Result<()>;

    /// Reloads an entity's state from the database.
    async fn refresh<E: Entity>(&self, entity: &mut E) -> Result<()>;

    /// Writes every scheduled change.
    async fn flush(&self) -> Result<()>;

    /// Returns whether an entity is managed.
    fn contains<E: Entity>(&self, entity: &E) -> bool;

    /// Loads lazily initialized state of an entity.
    async fn initialize_object<E: Entity>(&self, _entity: &mut E) -> Result<()> {
        Ok(())
    }

    /// Returns the metadata of an entity type.
    fn class_metadata<E: Entity>(&self) -> &'static EntityDescriptor {
        E::descriptor()
    }

    /// Creates an empty query builder.
    fn create_query_builder(&self) -> QueryBuilder {
        QueryBuilder::new()
    }
}

/// A facade over a persistence engine adding finders and batch operations.
///
/// It is itself an [`EntityManager`], delegating every call to the engine.
#[derive(Debug, Clone)]
pub struct ObjectManager<M> {
    inner: M,
    config: FinderConfig,
}

impl<M: EntityManager> ObjectManager<M> {
    /// Wraps an engine with the default finder configuration.
    pub fn new(inner: M) -> Self {
        Self::with_config(inner, FinderConfig::default())
    }

    /// Wraps an engine; every finder created gets `config`.
    pub const fn with_config(inner: M, config: FinderConfig) -> Self {
        Self { inner, config }
    }

    /// Returns the wrapped engine.
    pub const fn inner(&self) -> &M {
        &self.inner
    }

    /// Returns the finder configuration.
    pub const fn config(&self) -> &FinderConfig {
        &self.config
    }

    /// Unwraps the engine.
    pub fn into_inner(self) -> M {
        self.inner
    }

    /// Creates a finder for `E`, aliased by `alias` or the table name.
    pub fn get_finder<E: Entity>(&self, alias: Option<&str>) -> Finder<E> {
        let finder = match alias {
            Some(alias) => Finder::with_alias(alias),
            None => Finder::new(),
        };
        finder.with_config(self.config.clone())
    }

    /// Finds an entity by identifier, failing when nothing is found.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NoResult`] when nothing matches.
    pub async fn find_or_die<E: Entity>(&self, id: impl Into<Identifier>) -> Result<E> {
        self.find::<E>(id.into())
            .await?
            .ok_or_else(|| NoResultError.into())
    }

    /// Schedules every entity for insertion or update.
    ///
    /// # Errors
    ///
    /// Stops at the first engine error.
    pub fn persist_all<'e, E, I>(&self, entities: I) -> Result<()>
    where
        E: Entity + 'e,
        I: IntoIterator<Item = &'e E>,
    {
        entities.into_iter().try_for_each(|entity| self.persist(entity))
    }

    /// Schedules every entity for removal.
    ///
    /// # Errors
    ///
    /// Stops at the first engine error.
    pub fn remove_all<'e, E, I>(&self, entities: I) -> Result<()>
    where
        E: Entity + 'e,
        I: IntoIterator<Item = &'e E>,
    {
        entities.into_iter().try_for_each(|entity| self.remove(entity))
    }

    /// Creates a query builder selecting `E` under `alias`.
    pub fn create_query_builder_for<E: Entity>(
        &self,
        alias: &str,
        index_by: Option<&str>,
    ) -> QueryBuilder {
        let mut qb = self.create_query_builder();
        qb.select([alias]).from(E::descriptor(), alias, index_by);
        qb
    }

    /// Returns a repository for `E`.
    pub const fn get_repository<E: Entity>(&self) -> Repository<'_, E, M> {
        Repository {
            manager: self,
            _marker: PhantomData,
        }
    }
}

impl<M: EntityManager> EntityManager for ObjectManager<M> {
    async fn fetch_records(&self, query: &Query) -> Result<Vec<Record>> {
        self.inner.fetch_records(query).await
    }

    async fn fetch_entities<E: Entity>(&self, query: &Query) -> Result<Vec<E>> {
        self.inner.fetch_entities(query).await
    }

    async fn find<E: Entity>(&self, id: Identifier) -> Result<Option<E>> {
        self.get_finder::<E>(None).find(self, id).await
    }

    fn persist<E: Entity>(&self, entity: &E) -> Result<()> {
        self.inner.persist(entity)
    }

    fn remove<E: Entity>(&self, entity: &E) -> Result<()> {
        self.inner.remove(entity)
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }

    fn detach<E: Entity>(&self, entity: &E) -> Result<()> {
        self.inner.detach(entity)
    }

    async fn refresh<E: Entity>(&self, entity: &mut E) -> Result<()> {
        self.inner.refresh(entity).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    fn contains<E: Entity>(&self, entity: &E) -> bool {
        self.inner.contains(entity)
    }

    async fn initialize_object<E: Entity>(&self, entity: &mut E) -> Result<()> {
        self.inner.initialize_object(entity).await
    }

    fn class_metadata<E: Entity>(&self) -> &'static EntityDescriptor {
        self.inner.class_metadata::<E>()
    }

    fn create_query_builder(&self) -> QueryBuilder {
        self.inner.create_query_builder()
    }
}

/// Lookups for one entity type through an [`ObjectManager`].
pub struct Repository<'m, E: Entity, M: EntityManager> {
    manager: &'m ObjectManager<M>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity, M: EntityManager> Repository<'_, E, M> {
    /// Finds an entity by identifier.
    ///
    /// # Errors
    ///
    /// See [`Finder::find`].
    pub async fn find(&self, id: impl Into<Identifier>) -> Result<Option<E>> {
        self.manager.get_finder::<E>(None).find(self.manager, id).await
    }

    /// Returns every entity.
    ///
    /// # Errors
    ///
    /// Database or hydration errors.
    pub async fn find_all(&self) -> Result<Vec<E>> {
        self.find_by(Search::new()).await
    }

    /// Returns every entity matching `search`.
    ///
    /// # Errors
    ///
    /// See [`Finder::find_all`].
    pub async fn find_by(&self, search: Search) -> Result<Vec<E>> {
        self.manager
            .get_finder::<E>(None)
            .find_all(self.manager, search)
            .await
    }

    /// Returns the single entity matching `search`, if any.
    ///
    /// # Errors
    ///
    /// See [`Finder::find_by`].
    pub async fn find_one_by(&self, search: Search) -> Result<Option<E>> {
        self.manager
            .get_finder::<E>(None)
            .find_by(self.manager, search)
            .await
    }
}
