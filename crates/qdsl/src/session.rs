//! A catalog, a store, and a query factory bundled together.

use std::sync::Arc;

use qdsl_core::catalog::{Catalog, SchemaBundle, SharedCatalog};
use qdsl_core::config::ExecutorConfig;
use qdsl_core::query::{EntityPath, ExecutionAdapter, Expression, Query, QueryFactory};
use qdsl_core::storage::{MemoryStore, NewRecord};
use qdsl_core::Result;

/// An in-memory database session.
///
/// Queries built from a session run against its own [`MemoryStore`].
/// Sessions are cheap to clone; clones share the store.
#[derive(Clone)]
pub struct Session {
    store: Arc<MemoryStore>,
    factory: QueryFactory,
}

impl Session {
    /// Open a session over `catalog` with the default executor configuration.
    pub fn open(catalog: Catalog) -> Self {
        Self::with_config(catalog, ExecutorConfig::default())
    }

    /// Open a session with an explicit executor configuration.
    pub fn with_config(catalog: Catalog, config: ExecutorConfig) -> Self {
        let catalog = catalog.freeze();
        let store = Arc::new(MemoryStore::with_config(Arc::clone(&catalog), config));
        let adapter: Arc<dyn ExecutionAdapter> = store.clone();
        tracing::debug!(
            entities = catalog.entities().count(),
            relations = catalog.relations().len(),
            "opened session"
        );
        Self {
            store,
            factory: QueryFactory::new(catalog, adapter),
        }
    }

    /// Open a session from a schema bundle.
    pub fn from_bundle(bundle: SchemaBundle) -> Result<Self> {
        Ok(Self::open(Catalog::from_bundle(bundle)?))
    }

    /// Open a session from a JSON schema bundle.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_bundle(SchemaBundle::from_json(json)?)
    }

    /// Frozen catalog the session was opened with.
    pub fn catalog(&self) -> &SharedCatalog {
        self.factory.catalog()
    }

    /// Backing in-memory store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Query factory bound to the store.
    pub fn factory(&self) -> &QueryFactory {
        &self.factory
    }

    /// Path over an entity under its default alias.
    pub fn path(&self, entity: &str) -> Result<EntityPath> {
        self.catalog().path(entity)
    }

    /// Path over an entity under an explicit alias.
    pub fn path_as(&self, entity: &str, alias: &str) -> Result<EntityPath> {
        self.catalog().path_as(entity, alias)
    }

    /// Insert a record into the session's store.
    pub fn insert(&self, record: NewRecord) -> Result<i64> {
        self.store.insert(record)
    }

    /// An empty query.
    pub fn query(&self) -> Query {
        self.factory.query()
    }

    /// A query projecting `targets`.
    pub fn select<I>(&self, targets: I) -> Query
    where
        I: IntoIterator,
        I::Item: Into<Expression>,
    {
        self.factory.select(targets)
    }

    /// `select path from path`.
    pub fn select_from(&self, path: &EntityPath) -> Query {
        self.factory.select_from(path)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", self.store.config())
            .finish_non_exhaustive()
    }
}
