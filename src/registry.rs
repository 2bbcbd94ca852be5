//! Process-wide metadata: registered types, repositories, loaders, validators
//! and translation overlays.
//!
//! A [`Registry`] is assembled once through [`RegistryBuilder`], checked for
//! dangling references, and then shared read-only between sessions. Derived
//! tables (the resolved lazy-load sources per type) are computed on first use
//! and kept until [`Registry::reset_caches`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{EntigraphError, Result};
use crate::graph::{Graph, Handle, KeyHasher};
use crate::lazy::LoadRequest;
use crate::model::{FieldType, LazyInstance, LazyLoad, LoadMethod, TypeModel};
use crate::repository::Repository;
use crate::session::Session;
use crate::translation::TranslationOverlay;
use crate::validate::ValidationError;
use crate::value::Value;

pub type Loader = Arc<dyn Fn(&mut Session, Handle, &LoadRequest) -> Result<Option<Value>> + Send + Sync>;
pub type Validator = Arc<dyn Fn(&Graph, Handle) -> Vec<ValidationError> + Send + Sync>;

// ------------- Lazy tables -------------
/// Lazy-load sources of one property, each paired with its repository.
#[derive(Debug)]
pub struct LazyEntry {
    pub sources: Vec<(LazyLoad, Arc<Repository>)>,
    pub instance: Option<(LazyInstance, Arc<TypeModel>)>,
}

/// Resolved lazy-load metadata of one type, indexed by field position.
#[derive(Debug, Default)]
pub struct LazyTable {
    entries: HashMap<usize, LazyEntry>,
}

impl LazyTable {
    pub fn entry(&self, field: usize) -> Option<&LazyEntry> {
        self.entries.get(&field)
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ------------- Registry -------------
pub struct Registry {
    types: HashMap<String, Arc<TypeModel>, KeyHasher>,
    repositories: HashMap<String, Arc<Repository>, KeyHasher>,
    defaults: HashMap<String, String, KeyHasher>,
    loaders: HashMap<String, Loader>,
    validators: HashMap<String, Vec<Validator>>,
    translations: HashMap<String, Arc<dyn TranslationOverlay>>,
    lazy_tables: RwLock<HashMap<String, Arc<LazyTable>, KeyHasher>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.types.len())
            .field("repositories", &self.repositories.len())
            .field("loaders", &self.loaders.len())
            .finish()
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }
    pub fn model(&self, type_name: &str) -> Result<Arc<TypeModel>> {
        self.types
            .get(type_name)
            .cloned()
            .ok_or_else(|| EntigraphError::Internal(format!("type {type_name} is not registered")))
    }
    pub fn repository(&self, name: &str) -> Result<Arc<Repository>> {
        self.repositories
            .get(name)
            .cloned()
            .ok_or_else(|| EntigraphError::Internal(format!("repository {name} is not registered")))
    }
    /// The repository registered first for an entity type.
    pub fn default_repository(&self, type_name: &str) -> Result<Arc<Repository>> {
        let name = self.defaults.get(type_name).ok_or_else(|| {
            EntigraphError::Internal(format!("no repository persists {type_name}"))
        })?;
        self.repository(name)
    }
    pub fn repositories(&self) -> impl Iterator<Item = &Arc<Repository>> {
        self.repositories.values()
    }
    pub fn types(&self) -> impl Iterator<Item = &Arc<TypeModel>> {
        self.types.values()
    }
    pub fn loader(&self, name: &str) -> Result<Loader> {
        self.loaders
            .get(name)
            .cloned()
            .ok_or_else(|| EntigraphError::Internal(format!("loader {name} is not registered")))
    }
    pub fn validators(&self, type_name: &str) -> &[Validator] {
        self.validators.get(type_name).map_or(&[], Vec::as_slice)
    }
    pub fn translation(&self, type_name: &str) -> Option<Arc<dyn TranslationOverlay>> {
        self.translations.get(type_name).cloned()
    }
    pub fn translations(&self) -> impl Iterator<Item = &Arc<dyn TranslationOverlay>> {
        self.translations.values()
    }

    /// The lazy-load table of a type, computed once and then shared.
    pub fn lazy_table(&self, type_name: &str) -> Result<Arc<LazyTable>> {
        if let Some(table) = self.lazy_tables.read()?.get(type_name) {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(self.build_lazy_table(type_name)?);
        let mut tables = self.lazy_tables.write()?;
        let table = tables
            .entry(type_name.to_owned())
            .or_insert(table);
        Ok(Arc::clone(table))
    }

    fn build_lazy_table(&self, type_name: &str) -> Result<LazyTable> {
        let model = self.model(type_name)?;
        let mut entries = HashMap::new();
        for (index, field) in model.fields.iter().enumerate() {
            if !field.is_lazy() {
                continue;
            }
            let mut sources = Vec::with_capacity(field.lazy.len());
            for source in &field.lazy {
                sources.push((source.clone(), self.repository(&source.repository)?));
            }
            let instance = match &field.lazy_instance {
                Some(instance) => Some((instance.clone(), self.model(&instance.type_name)?)),
                None => None,
            };
            entries.insert(index, LazyEntry { sources, instance });
        }
        debug!(type_name, properties = entries.len(), "computed lazy table");
        Ok(LazyTable { entries })
    }

    /// Drops derived tables so they are recomputed on next use.
    pub fn reset_caches(&self) -> Result<()> {
        self.lazy_tables.write()?.clear();
        Ok(())
    }

    /// Dangling type, repository, join and loader references.
    fn check(&self) -> Result<()> {
        let mut problems = Vec::new();
        for model in self.types.values() {
            if let Some(element) = model.element_type() {
                if !self.types.contains_key(element) {
                    problems.push(format!("set {} holds unknown type {}", model.name, element));
                }
            }
            for variant in &model.variants {
                if !self.types.contains_key(variant) {
                    problems.push(format!("{} lists unknown variant {}", model.name, variant));
                }
            }
            for field in &model.fields {
                if let Some(target) = field.target_type() {
                    if !self.types.contains_key(target) {
                        problems.push(format!("{}.{} refers to unknown type {}", model.name, field.name, target));
                    }
                }
                if let FieldType::Set(target) = &field.field_type {
                    if self.types.get(target).is_some_and(|t| !t.is_set()) {
                        problems.push(format!("{}.{} expects a set but {} is not one", model.name, field.name, target));
                    }
                }
                if let Some(instance) = &field.lazy_instance {
                    if !self.types.contains_key(&instance.type_name) {
                        problems.push(format!("{}.{} instantiates unknown type {}", model.name, field.name, instance.type_name));
                    }
                }
                for source in &field.lazy {
                    if !self.repositories.contains_key(&source.repository) {
                        problems.push(format!("{}.{} loads from unknown repository {}", model.name, field.name, source.repository));
                    }
                    match &source.method {
                        LoadMethod::Through { join, .. } if !self.repositories.contains_key(join) => {
                            problems.push(format!("{}.{} joins through unknown repository {}", model.name, field.name, join));
                        }
                        LoadMethod::Custom(loader) if !self.loaders.contains_key(loader) => {
                            problems.push(format!("{}.{} uses unknown loader {}", model.name, field.name, loader));
                        }
                        LoadMethod::ById { property } if model.get_field(property).is_none() => {
                            problems.push(format!("{}.{} reads its key from unknown property {}", model.name, field.name, property));
                        }
                        _ => {}
                    }
                }
            }
        }
        for repository in self.repositories.values() {
            match self.types.get(&repository.entity_type) {
                Some(model) if model.is_entity() => {}
                _ => problems.push(format!("repository {} persists {}, which is not a registered entity", repository.name, repository.entity_type)),
            }
            match self.types.get(&repository.set_type).and_then(|m| m.element_type()) {
                Some(element) if element == repository.entity_type => {}
                _ => problems.push(format!("repository {} returns {}, which is not a set of {}", repository.name, repository.set_type, repository.entity_type)),
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(EntigraphError::Internal(problems.join("; ")))
        }
    }
}

// ------------- Builder -------------
#[derive(Default)]
pub struct RegistryBuilder {
    types: Vec<TypeModel>,
    repositories: Vec<Repository>,
    loaders: HashMap<String, Loader>,
    validators: HashMap<String, Vec<Validator>>,
    translations: HashMap<String, Arc<dyn TranslationOverlay>>,
}

impl RegistryBuilder {
    pub fn register(mut self, model: TypeModel) -> Self {
        self.types.push(model);
        self
    }
    pub fn repository(mut self, repository: Repository) -> Self {
        self.repositories.push(repository);
        self
    }
    pub fn loader<F>(mut self, name: &str, loader: F) -> Self
    where
        F: Fn(&mut Session, Handle, &LoadRequest) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.loaders.insert(name.to_owned(), Arc::new(loader));
        self
    }
    pub fn validator<F>(mut self, type_name: &str, validator: F) -> Self
    where
        F: Fn(&Graph, Handle) -> Vec<ValidationError> + Send + Sync + 'static,
    {
        self.validators
            .entry(type_name.to_owned())
            .or_default()
            .push(Arc::new(validator));
        self
    }
    pub fn translation(mut self, type_name: &str, overlay: impl TranslationOverlay + 'static) -> Self {
        self.translations
            .insert(type_name.to_owned(), Arc::new(overlay));
        self
    }

    pub fn build(self) -> Result<Arc<Registry>> {
        let mut types = HashMap::default();
        for model in self.types {
            if types.contains_key(&model.name) {
                return Err(EntigraphError::Internal(format!("type {} registered twice", model.name)));
            }
            types.insert(model.name.clone(), Arc::new(model));
        }
        let mut repositories = HashMap::default();
        let mut defaults = HashMap::default();
        for repository in self.repositories {
            if repositories.contains_key(&repository.name) {
                return Err(EntigraphError::Internal(format!(
                    "repository {} registered twice",
                    repository.name
                )));
            }
            defaults
                .entry(repository.entity_type.clone())
                .or_insert_with(|| repository.name.clone());
            repositories.insert(repository.name.clone(), Arc::new(repository));
        }
        let registry = Registry {
            types,
            repositories,
            defaults,
            loaders: self.loaders,
            validators: self.validators,
            translations: self.translations,
            lazy_tables: RwLock::new(HashMap::default()),
        };
        registry.check()?;
        debug!(types = registry.types.len(), repositories = registry.repositories.len(), "registry built");
        Ok(Arc::new(registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldModel;
    use crate::value::ScalarKind;

    fn account_types() -> RegistryBuilder {
        Registry::builder()
            .register(TypeModel::entity("Account").field(FieldModel::scalar("name", ScalarKind::Text)))
            .register(TypeModel::set("Accounts", "Account"))
    }

    #[test]
    fn dangling_repositories_are_reported() {
        let result = account_types()
            .repository(Repository::new("accounts", "Account", "Missing", "account"))
            .build();
        assert!(matches!(result, Err(EntigraphError::Internal(_))));
    }

    #[test]
    fn lazy_tables_are_shared_until_reset() {
        let registry = account_types()
            .register(
                TypeModel::entity("Profile")
                    .field(FieldModel::scalar("account_id", ScalarKind::Int))
                    .field(FieldModel::object("account", "Account").lazy(LazyLoad::by_id("accounts", "account_id"))),
            )
            .register(TypeModel::set("Profiles", "Profile"))
            .repository(Repository::new("accounts", "Account", "Accounts", "account"))
            .repository(Repository::new("profiles", "Profile", "Profiles", "profile"))
            .build()
            .unwrap();
        let first = registry.lazy_table("Profile").unwrap();
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first, &registry.lazy_table("Profile").unwrap()));
        registry.reset_caches().unwrap();
        assert!(!Arc::ptr_eq(&first, &registry.lazy_table("Profile").unwrap()));
    }
}
