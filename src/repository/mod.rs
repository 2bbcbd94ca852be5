//! Repositories map one entity type to one table.
//!
//! Reads go through the principal's read restriction and, when allowed, the
//! session's result cache; every row is mapped onto the session graph through
//! the identity map, so one row is one instance per session. Writes live in
//! [`write`], row mapping in [`mapping`].

pub mod cache;
pub mod mapping;
pub mod write;

use tracing::debug;

use crate::config::PersistenceConfig;
use crate::engine::{Row, TableSchema};
use crate::error::Result;
use crate::graph::Handle;
use crate::model::{FieldType, TypeModel, ID_COLUMN};
use crate::query::{Predicate, QueryBuilder};
use crate::registry::Registry;
use crate::session::Session;
use crate::value::{Id, ScalarKind};

use self::cache::{CacheKey, Cached, Shape};

#[derive(Clone, Debug)]
pub struct Repository {
    pub name: String,
    pub entity_type: String,
    pub set_type: String,
    pub table: String,
    pub alias: String,
    pub created_column: Option<String>,
    pub modified_column: Option<String>,
}

impl Repository {
    pub fn new(name: &str, entity_type: &str, set_type: &str, table: &str) -> Self {
        Self {
            name: name.to_owned(),
            entity_type: entity_type.to_owned(),
            set_type: set_type.to_owned(),
            table: table.to_owned(),
            alias: table.to_owned(),
            created_column: None,
            modified_column: None,
        }
    }
    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = alias.to_owned();
        self
    }
    pub fn stamps(mut self, created: &str, modified: &str) -> Self {
        self.created_column = Some(created.to_owned());
        self.modified_column = Some(modified.to_owned());
        self
    }

    /// A column of this repository's table, qualified with its alias.
    pub fn column(&self, column: &str) -> String {
        format!("{}.{}", self.alias, column)
    }

    /// Created/modified columns, falling back to the configured defaults.
    pub fn stamp_columns(&self, defaults: &PersistenceConfig) -> (Option<String>, Option<String>) {
        (
            self.created_column
                .clone()
                .or_else(|| defaults.created_column.clone()),
            self.modified_column
                .clone()
                .or_else(|| defaults.modified_column.clone()),
        )
    }

    pub fn schema(&self, registry: &Registry, defaults: &PersistenceConfig) -> Result<TableSchema> {
        let model = registry.model(&self.entity_type)?;
        let mut schema = TableSchema::new(&self.table, model.id_kind);
        schema = columns_of(registry, &model, None, schema)?;
        let (created, modified) = self.stamp_columns(defaults);
        for stamp in [created, modified].into_iter().flatten() {
            schema = schema.column(&stamp, ScalarKind::DateTime);
        }
        Ok(schema)
    }

    /// Base query: every column of the table plus the translation overlay.
    pub fn query(&self, session: &Session) -> QueryBuilder {
        let mut query = session
            .engine()
            .create_query()
            .from(&self.table, &self.alias)
            .select([format!("{}.*", self.alias)]);
        if let Some(overlay) = session.registry().translation(&self.entity_type) {
            overlay.apply_join(&mut query, &self.alias);
        }
        query
    }

    fn restricted(&self, session: &Session, mut query: QueryBuilder) -> Option<QueryBuilder> {
        if session
            .rights()
            .apply_read_restriction(&mut query, &self.table)
        {
            Some(query)
        } else {
            debug!(repository = %self.name, "read refused by rights");
            None
        }
    }

    pub fn new_set(&self, session: &mut Session) -> Result<Handle> {
        let model = session.registry().model(&self.set_type)?;
        Ok(session.graph_mut().create(model))
    }

    // ------------- Reads -------------
    /// At most one entity for `query`.
    pub fn find(&self, session: &mut Session, query: QueryBuilder, use_cache: bool) -> Result<Option<Handle>> {
        let Some(query) = self.restricted(session, query) else {
            return Ok(None);
        };
        let query = query.limit(1);
        let use_cache = use_cache && session.config().cache.enabled;
        let key = CacheKey::new(&self.name, &query, Shape::One);
        if use_cache {
            if let Some(Cached::One(hit)) = session.cache_mut().get(&key) {
                if hit.is_none_or(|h| !session.graph().is_deleted(h)) {
                    debug!(repository = %self.name, "result cache hit");
                    return Ok(hit);
                }
            }
        }
        session.cache_mut().begin();
        let result = self.load_one(session, &query);
        if let (true, Ok(found)) = (use_cache, &result) {
            session.cache_mut().stage(key, Cached::One(*found));
        }
        session.finish_load();
        result
    }

    fn load_one(&self, session: &mut Session, query: &QueryBuilder) -> Result<Option<Handle>> {
        match session.engine_mut().execute_one(query)? {
            Some(row) => self.map_to_entity(session, row).map(Some),
            None => Ok(None),
        }
    }

    /// Every entity for `query`, as a new set of this repository's set type.
    /// Each call gets its own set, cached or not.
    pub fn find_many(&self, session: &mut Session, query: QueryBuilder, use_cache: bool) -> Result<Handle> {
        let Some(query) = self.restricted(session, query) else {
            return self.new_set(session);
        };
        let use_cache = use_cache && session.config().cache.enabled;
        let key = CacheKey::new(&self.name, &query, Shape::Many);
        if use_cache {
            if let Some(Cached::Many(members)) = session.cache_mut().get(&key) {
                if !members.iter().any(|h| session.graph().is_deleted(*h)) {
                    debug!(repository = %self.name, size = members.len(), "result cache hit");
                    let set = self.new_set(session)?;
                    session.graph_mut().object_set(set)?.add(&members)?;
                    return Ok(set);
                }
            }
        }
        session.cache_mut().begin();
        let result = self.load_many(session, &query);
        if let (true, Ok(set)) = (use_cache, &result) {
            let members = session.graph().elements(*set);
            session.cache_mut().stage(key, Cached::Many(members));
        }
        session.finish_load();
        result
    }

    fn load_many(&self, session: &mut Session, query: &QueryBuilder) -> Result<Handle> {
        let rows = session.engine_mut().execute(query)?;
        let set = self.new_set(session)?;
        for row in rows {
            let entity = self.map_to_entity(session, row)?;
            session.graph_mut().object_set(set)?.add(&[entity])?;
        }
        debug!(repository = %self.name, size = session.graph().elements(set).len(), "loaded set");
        Ok(set)
    }

    /// An instance already mapped in this session is returned without a query
    /// when caching is allowed.
    pub fn find_by_id(&self, session: &mut Session, id: &Id, use_cache: bool) -> Result<Option<Handle>> {
        if use_cache && session.config().cache.enabled {
            if let Some(known) = session.graph().lookup(&self.entity_type, id) {
                return Ok(Some(known));
            }
        }
        let query = self
            .query(session)
            .filter(Predicate::eq(self.column(ID_COLUMN), id.to_value()));
        self.find(session, query, use_cache)
    }

    pub fn find_by(&self, session: &mut Session, predicate: Predicate, use_cache: bool) -> Result<Handle> {
        let query = self.query(session).filter(predicate);
        self.find_many(session, query, use_cache)
    }

    pub fn find_one_by(&self, session: &mut Session, predicate: Predicate, use_cache: bool) -> Result<Option<Handle>> {
        let query = self.query(session).filter(predicate);
        self.find(session, query, use_cache)
    }

    pub fn find_all(&self, session: &mut Session) -> Result<Handle> {
        let query = self.query(session);
        self.find_many(session, query, true)
    }

    /// Raw rows of the table, read-restricted but neither mapped nor cached.
    pub fn rows(&self, session: &mut Session, predicate: Predicate) -> Result<Vec<Row>> {
        let query = session
            .engine()
            .create_query()
            .from(&self.table, &self.alias)
            .filter(predicate);
        match self.restricted(session, query) {
            Some(query) => session.engine_mut().execute(&query),
            None => Ok(Vec::new()),
        }
    }
}

pub(crate) fn prefixed(prefix: Option<&str>, column: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}_{column}"),
        None => column.to_owned(),
    }
}

fn columns_of(
    registry: &Registry,
    model: &TypeModel,
    prefix: Option<&str>,
    mut schema: TableSchema,
) -> Result<TableSchema> {
    for field in &model.fields {
        let Some(column) = &field.column else {
            continue;
        };
        let column = prefixed(prefix, column);
        match &field.field_type {
            FieldType::Scalar(kind) => {
                // ciphertext is hex text whatever the plaintext kind
                let kind = if field.encrypted.is_some() { ScalarKind::Text } else { *kind };
                schema = schema.column(&column, kind);
            }
            FieldType::Object(type_name) => {
                let target = registry.model(type_name)?;
                if target.is_value_object() {
                    schema = columns_of(registry, &target, Some(&column), schema)?;
                }
            }
            FieldType::Set(_) => {}
        }
    }
    Ok(schema)
}
