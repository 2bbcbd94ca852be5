//! Lazy properties.
//!
//! Every property slot is a [`Lazy`]: unloaded slots of lazy-declared fields
//! resolve on first read through [`Session::get`], consulting each declared
//! source in order, combining what they return, and wiring the result into
//! the ownership graph.

use std::sync::Arc;

use tracing::debug;

use crate::error::{EntigraphError, Result};
use crate::graph::Handle;
use crate::model::{FieldType, LazyLoad, LoadMethod, Relation, TypeModel, ID_COLUMN};
use crate::query::Predicate;
use crate::repository::Repository;
use crate::session::Session;
use crate::value::{Id, Value};

// ------------- Lazy -------------
/// State of a property slot. A slot that failed to load remembers the failure
/// until it is explicitly unloaded.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Lazy<T> {
    #[default]
    Unloaded,
    Loaded(T),
    Failed(String),
}

impl<T> Lazy<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Lazy::Loaded(_))
    }
    pub fn loaded(&self) -> Option<&T> {
        match self {
            Lazy::Loaded(value) => Some(value),
            _ => None,
        }
    }
}

/// Context handed to a custom loader.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub property: String,
    pub source: LazyLoad,
    pub repository: Arc<Repository>,
    /// Whether the caller may answer from the result cache.
    pub use_cache: bool,
}

// ------------- Resolution -------------
impl Session {
    /// Reads a property, resolving it first when it is lazy and unloaded.
    /// Non-lazy properties that were never set read as null.
    pub fn get(&mut self, handle: Handle, property: &str) -> Result<Value> {
        let model = Arc::clone(self.graph().model(handle));
        let index = model.field_index(property).ok_or_else(|| {
            EntigraphError::bad_request(format!("{} has no property '{}'", model.name, property))
        })?;
        match self.graph().slot_at(handle, index) {
            Lazy::Loaded(value) => return Ok(value.clone()),
            Lazy::Failed(message) => {
                return Err(EntigraphError::Internal(format!(
                    "earlier load of {}.{} failed: {}",
                    model.name, property, message
                )));
            }
            Lazy::Unloaded => {}
        }
        if !model.fields[index].is_lazy() {
            return Ok(Value::Null);
        }
        match self.resolve(handle, &model, index) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.graph_mut()
                    .set_slot(handle, index, Lazy::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Convenience for object-valued properties.
    pub fn get_object(&mut self, handle: Handle, property: &str) -> Result<Option<Handle>> {
        Ok(self.get(handle, property)?.as_handle())
    }

    fn resolve(&mut self, handle: Handle, model: &Arc<TypeModel>, index: usize) -> Result<Value> {
        let registry = Arc::clone(self.registry());
        let table = registry.lazy_table(&model.name)?;
        let field = &model.fields[index];
        let entry = table.entry(index).ok_or_else(|| {
            EntigraphError::Internal(format!("{}.{} has no lazy descriptor", model.name, field.name))
        })?;

        if let Some((instance, instance_model)) = &entry.instance {
            let created = self.graph_mut().create(Arc::clone(instance_model));
            self.graph_mut()
                .set_slot(handle, index, Lazy::Loaded(Value::Object(created)));
            self.wire(handle, created, instance.relation, &field.name);
            debug!(owner = %model.name, property = %field.name, "instantiated lazy property");
            return Ok(Value::Object(created));
        }

        let mut results: Vec<(Value, Relation)> = Vec::new();
        for (source, repository) in &entry.sources {
            if let Some(required) = &source.required_property {
                let present = self
                    .graph()
                    .property(handle, required)
                    .is_some_and(|v| !v.is_null());
                if !present {
                    debug!(owner = %model.name, property = %field.name, required = %required, "required property unset, skipping source");
                    continue;
                }
            }
            let use_cache = self.config().cache.enabled
                && source.cacheable
                && source
                    .cache_scopes
                    .iter()
                    .all(|scope| scope.allows(self.graph(), handle));
            let request = LoadRequest {
                property: field.name.clone(),
                source: source.clone(),
                repository: Arc::clone(repository),
                use_cache,
            };
            if let Some(value) = self.load_from_source(handle, &request)? {
                if !value.is_null() {
                    results.push((value, source.relation));
                }
            }
        }

        let resolved = self.combine(&model.name, &field.name, results)?;
        let value = resolved.as_ref().map_or(Value::Null, |(v, _)| v.clone());
        self.graph_mut()
            .set_slot(handle, index, Lazy::Loaded(value.clone()));
        if let Some((Value::Object(target), relation)) = resolved {
            self.wire(handle, target, relation, &field.name);
        }
        Ok(value)
    }

    fn load_from_source(&mut self, handle: Handle, request: &LoadRequest) -> Result<Option<Value>> {
        let repository = Arc::clone(&request.repository);
        match &request.source.method {
            LoadMethod::ById { property } => {
                let Some(id) = self.graph().property(handle, property).and_then(Id::from_value) else {
                    return Ok(None);
                };
                let found = repository.find_by_id(self, &id, request.use_cache)?;
                Ok(found.map(Value::Object))
            }
            LoadMethod::ByReference { column } => {
                // nothing can reference an owner that was never stored
                let Some(id) = self.graph().id(handle).cloned() else {
                    return repository.new_set(self).map(|set| Some(Value::Object(set)));
                };
                let predicate = Predicate::eq(repository.column(column), id.to_value());
                let set = repository.find_by(self, predicate, request.use_cache)?;
                Ok(Some(Value::Object(set)))
            }
            LoadMethod::Through {
                join,
                source_column,
                target_column,
            } => {
                let Some(id) = self.graph().id(handle).cloned() else {
                    return repository.new_set(self).map(|set| Some(Value::Object(set)));
                };
                let join_repository = self.registry().repository(join)?;
                let links = join_repository.rows(
                    self,
                    Predicate::eq(join_repository.column(source_column), id.to_value()),
                )?;
                let targets: Vec<Value> = links
                    .into_iter()
                    .filter_map(|mut row| row.remove(target_column.as_str()))
                    .filter(|v| !v.is_null())
                    .collect();
                if targets.is_empty() {
                    return repository.new_set(self).map(|set| Some(Value::Object(set)));
                }
                let predicate = Predicate::is_in(repository.column(ID_COLUMN), targets);
                let set = repository.find_by(self, predicate, request.use_cache)?;
                Ok(Some(Value::Object(set)))
            }
            LoadMethod::Custom(name) => {
                let loader = self.registry().loader(name)?;
                loader(self, handle, request)
            }
        }
    }

    /// Collections from several sources are merged into the first; for
    /// singular results the first source in declaration order wins.
    fn combine(
        &mut self,
        owner: &str,
        property: &str,
        mut results: Vec<(Value, Relation)>,
    ) -> Result<Option<(Value, Relation)>> {
        if results.len() < 2 {
            return Ok(results.pop());
        }
        let all_sets = results.iter().all(|(value, _)| {
            value
                .as_handle()
                .is_some_and(|h| self.graph().is_collection(h))
        });
        let first = results.remove(0);
        if all_sets {
            if let Value::Object(target) = first.0 {
                for (other, _) in &results {
                    if let Value::Object(other) = other {
                        self.graph_mut()
                            .object_set(target)?
                            .merge_from_other_set(*other)?;
                    }
                }
            }
        } else {
            debug!(owner = %owner, property = %property, dropped = results.len(), "several sources resolved a singular property, keeping the first");
        }
        Ok(Some(first))
    }

    fn wire(&mut self, current: Handle, target: Handle, relation: Relation, property: &str) {
        match relation {
            Relation::None => {}
            Relation::Child => self.graph_mut().adopt(current, target),
            Relation::Parent => {
                self.graph_mut().adopt(target, current);
                // the parent gets its unset back-reference to us filled in
                let current_type = self.graph().type_name(current).to_owned();
                let parent_model = Arc::clone(self.graph().model(target));
                for (i, field) in parent_model.fields.iter().enumerate() {
                    if field.name == property {
                        continue;
                    }
                    let points_back = matches!(&field.field_type, FieldType::Object(t) if *t == current_type);
                    if points_back && matches!(self.graph().slot_at(target, i), Lazy::Unloaded) {
                        self.graph_mut()
                            .set_slot(target, i, Lazy::Loaded(Value::Object(current)));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_loaded_slots_expose_a_value() {
        assert_eq!(Lazy::Loaded(5).loaded(), Some(&5));
        assert!(Lazy::<i32>::Unloaded.loaded().is_none());
        let failed: Lazy<i32> = Lazy::Failed("row".into());
        assert!(!failed.is_loaded());
        assert!(failed.loaded().is_none());
    }
}
