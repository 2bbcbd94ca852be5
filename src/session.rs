//! A session is one logical request: it owns the object graph (with its
//! identity map), the relational engine, the result cache and the mapping
//! guard, and shares the process-wide [`Registry`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as Json;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::crypto::{Blake3Cipher, Cipher, Vault};
use crate::engine::RelationalEngine;
use crate::error::{EntigraphError, Result};
use crate::graph::{EntityKey, Graph, Handle};
use crate::registry::Registry;
use crate::repository::cache::{MemoryProbe, MemoryValve, ResultCache, StatmProbe};
use crate::repository::Repository;
use crate::rights::{AllowAll, Rights};
use crate::serialize;
use crate::validate::{self, ValidationErrors};
use crate::value::{Id, Value};

pub struct Session {
    graph: Graph,
    registry: Arc<Registry>,
    engine: Box<dyn RelationalEngine>,
    rights: Arc<dyn Rights>,
    vault: Vault,
    config: EngineConfig,
    cache: ResultCache,
    mapping: HashSet<EntityKey>,
    valve: MemoryValve,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("objects", &self.graph.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl Session {
    pub fn builder(registry: Arc<Registry>) -> SessionBuilder {
        SessionBuilder::new(registry)
    }
    /// In-memory engine, default configuration, no rights restrictions.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        SessionBuilder::new(registry).build()
    }

    // ------------- Accessors -------------
    pub fn graph(&self) -> &Graph {
        &self.graph
    }
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
    pub fn engine(&self) -> &dyn RelationalEngine {
        self.engine.as_ref()
    }
    pub fn engine_mut(&mut self) -> &mut dyn RelationalEngine {
        self.engine.as_mut()
    }
    pub fn rights(&self) -> &dyn Rights {
        self.rights.as_ref()
    }
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
    pub fn vault(&self) -> &Vault {
        &self.vault
    }
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }
    pub fn cache_mut(&mut self) -> &mut ResultCache {
        &mut self.cache
    }
    pub fn valve(&self) -> &MemoryValve {
        &self.valve
    }

    /// False when the row is already being mapped further up the stack.
    pub(crate) fn enter_mapping(&mut self, key: &EntityKey) -> bool {
        self.mapping.insert(key.clone())
    }
    pub(crate) fn leave_mapping(&mut self, key: &EntityKey) {
        self.mapping.remove(key);
    }

    /// Ends a repository load: commits staged cache entries once the
    /// outermost load is done, then lets the memory valve release caches.
    pub(crate) fn finish_load(&mut self) {
        self.cache.end();
        if !self.cache.is_loading() && self.valve.should_release() {
            self.engine.clear();
            self.cache.clear();
        }
    }

    // ------------- Objects -------------
    pub fn create(&mut self, type_name: &str) -> Result<Handle> {
        let model = self.registry.model(type_name)?;
        Ok(self.graph.create(model))
    }
    pub fn set(&mut self, handle: Handle, property: &str, value: impl Into<Value>) -> Result<()> {
        self.graph.set_property(handle, property, value)
    }
    pub fn clone_object(&mut self, handle: Handle) -> Handle {
        self.graph.clone_object(handle)
    }
    pub fn validate(&self, handle: Handle) -> ValidationErrors {
        validate::validate(&self.graph, &self.registry, handle)
    }
    pub fn to_structure(&self, handle: Handle) -> Json {
        serialize::to_structure(&self.graph, handle)
    }
    pub fn from_structure(&mut self, type_name: &str, json: &Json) -> Result<Handle> {
        let registry = Arc::clone(&self.registry);
        serialize::from_structure(&mut self.graph, &registry, type_name, json)
    }

    // ------------- Repository shortcuts -------------
    pub fn repository(&self, name: &str) -> Result<Arc<Repository>> {
        self.registry.repository(name)
    }
    fn repository_for(&self, handle: Handle) -> Result<Arc<Repository>> {
        self.registry
            .default_repository(self.graph.type_name(handle))
    }
    pub fn find_by_id(&mut self, type_name: &str, id: impl Into<Id>) -> Result<Option<Handle>> {
        let repository = self.registry.default_repository(type_name)?;
        repository.find_by_id(self, &id.into(), true)
    }
    pub fn update(&mut self, handle: Handle, depth: u32) -> Result<()> {
        self.repository_for(handle)?.update(self, handle, depth)
    }
    /// Updates with the configured default depth.
    pub fn save(&mut self, handle: Handle) -> Result<()> {
        let depth = self.config.persistence.default_depth;
        self.update(handle, depth)
    }
    pub fn delete(&mut self, handle: Handle) -> Result<()> {
        self.repository_for(handle)?.delete(self, handle)
    }

    /// Drops cached results of one repository, or of all of them.
    pub fn bust_cache(&mut self, repository: Option<&str>) {
        match repository {
            Some(name) => self.cache.invalidate(name),
            None => {
                self.cache.clear();
                self.engine.clear();
            }
        }
        debug!(repository = repository.unwrap_or("*"), "cache busted");
    }

    /// Starts a new request on the same engine: empty graph, empty caches.
    pub fn reset(&mut self) {
        self.graph = Graph::new();
        self.cache.clear();
        self.mapping.clear();
        self.engine.clear();
        debug!("session reset");
    }
}

// ------------- Builder -------------
pub struct SessionBuilder {
    registry: Arc<Registry>,
    engine: Option<Box<dyn RelationalEngine>>,
    rights: Arc<dyn Rights>,
    cipher: Arc<dyn Cipher>,
    config: EngineConfig,
    probe: Option<Box<dyn MemoryProbe>>,
}

impl SessionBuilder {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            engine: None,
            rights: Arc::new(AllowAll),
            cipher: Arc::new(Blake3Cipher),
            config: EngineConfig::default(),
            probe: None,
        }
    }
    pub fn engine(mut self, engine: impl RelationalEngine + 'static) -> Self {
        self.engine = Some(Box::new(engine));
        self
    }
    pub fn boxed_engine(mut self, engine: Box<dyn RelationalEngine>) -> Self {
        self.engine = Some(engine);
        self
    }
    pub fn rights(mut self, rights: impl Rights + 'static) -> Self {
        self.rights = Arc::new(rights);
        self
    }
    pub fn shared_rights(mut self, rights: Arc<dyn Rights>) -> Self {
        self.rights = rights;
        self
    }
    pub fn cipher(mut self, cipher: impl Cipher + 'static) -> Self {
        self.cipher = Arc::new(cipher);
        self
    }
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }
    pub fn probe(mut self, probe: impl MemoryProbe + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Opens the engine (the configured store unless one was given) and
    /// creates the tables of every registered repository and overlay.
    pub fn build(self) -> Result<Session> {
        let mut engine = match self.engine {
            Some(engine) => engine,
            None => self.config.open_engine()?,
        };
        for repository in self.registry.repositories() {
            let schema = repository.schema(&self.registry, &self.config.persistence)?;
            engine.ensure_table(&schema)?;
        }
        for overlay in self.registry.translations() {
            if let Some(schema) = overlay.schema() {
                engine.ensure_table(&schema)?;
            }
        }
        if !(0.0..=1.0).contains(&self.config.cache.pressure_ratio) {
            return Err(EntigraphError::Config(format!(
                "cache.pressure_ratio must lie in 0..=1, got {}",
                self.config.cache.pressure_ratio
            )));
        }
        if self.config.cache.page_size_bytes == 0 {
            return Err(EntigraphError::Config("cache.page_size_bytes must be positive".into()));
        }
        let probe = self
            .probe
            .unwrap_or_else(|| Box::new(StatmProbe::new(self.config.cache.page_size_bytes)));
        let valve = MemoryValve::new(
            self.config.cache.memory_limit_bytes,
            self.config.cache.pressure_ratio,
            probe,
        );
        let vault = Vault::new(self.cipher, self.config.encryption.scopes.clone());
        info!(store = ?self.config.store.mode, "session opened");
        Ok(Session {
            graph: Graph::new(),
            registry: self.registry,
            engine,
            rights: self.rights,
            vault,
            config: self.config,
            cache: ResultCache::new(),
            mapping: HashSet::new(),
            valve,
        })
    }
}
