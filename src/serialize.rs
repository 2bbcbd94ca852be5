//! Structural (de)serialization of object graphs as JSON.
//!
//! Objects become ordered maps of their visible, loaded properties with `id`
//! first for entities; sets become arrays. A reference back into the part of
//! the graph being written is emitted as the target's uniqueKey. Elements of
//! polymorphic sets carry their concrete type under [`DISCRIMINANT`].

use std::sync::Arc;

use serde_json::{Map, Value as Json};

use crate::clone::CallPath;
use crate::error::{EntigraphError, Result};
use crate::graph::{Graph, Handle};
use crate::lazy::Lazy;
use crate::model::{FieldType, TypeModel, ID_COLUMN};
use crate::registry::Registry;
use crate::validate::{join, ValidationError, ValidationErrors};
use crate::value::{Id, Value};

pub const DISCRIMINANT: &str = "type";

pub fn to_structure(graph: &Graph, handle: Handle) -> Json {
    write_node(graph, handle, &mut CallPath::new())
}

fn write_node(graph: &Graph, handle: Handle, path: &mut CallPath) -> Json {
    if !path.enter(handle) {
        return Json::String(graph.unique_key(handle));
    }
    if let Some(members) = graph.members(handle) {
        let polymorphic = !graph.model(handle).variants.is_empty();
        return Json::Array(
            members
                .handles()
                .iter()
                .map(|element| {
                    let mut json = write_node(graph, *element, path);
                    if let (true, Json::Object(map)) = (polymorphic, &mut json) {
                        map.insert(
                            DISCRIMINANT.to_owned(),
                            Json::String(graph.type_name(*element).to_owned()),
                        );
                    }
                    json
                })
                .collect(),
        );
    }
    let model = graph.model(handle);
    let mut map = Map::new();
    if model.is_entity() {
        map.insert(
            ID_COLUMN.to_owned(),
            graph.id(handle).map_or(Json::Null, |id| id.to_value().to_json()),
        );
    }
    for (field, value) in graph.loaded_properties(handle) {
        if !field.visible {
            continue;
        }
        let json = match value {
            Value::Object(target) => write_node(graph, *target, path),
            scalar => scalar.to_json(),
        };
        map.insert(field.name.clone(), json);
    }
    Json::Object(map)
}

/// Builds a new object of `type_name` from its structural form. Every shape
/// or type mismatch is collected; if any occurred nothing is returned.
///
/// Input naming an entity the graph already holds is merged into that
/// instance, which is returned instead of a second one.
pub fn from_structure(graph: &mut Graph, registry: &Registry, type_name: &str, json: &Json) -> Result<Handle> {
    let model = registry.model(type_name)?;
    let mut errors = ValidationErrors::new();
    let handle = read_node(graph, registry, model, json, "", &mut errors)?;
    let handle = match handle {
        Some(handle) if errors.is_empty() => handle,
        _ => return Err(EntigraphError::invalid(errors)),
    };
    let live = graph
        .id(handle)
        .and_then(|id| graph.lookup(graph.type_name(handle), id))
        .filter(|live| *live != handle);
    match live {
        Some(live) => {
            graph.overwrite_properties_from_other_object(live, handle, &mut CallPath::new(), false)?;
            Ok(live)
        }
        None => Ok(handle),
    }
}

fn mismatch(path: &str, expected: &str, json: &Json, owner: &str) -> ValidationError {
    ValidationError::new(path, format!("expected {expected}"), json.clone(), owner)
}

fn read_node(
    graph: &mut Graph,
    registry: &Registry,
    model: Arc<TypeModel>,
    json: &Json,
    path: &str,
    errors: &mut ValidationErrors,
) -> Result<Option<Handle>> {
    if model.is_set() {
        let Json::Array(items) = json else {
            errors.push(mismatch(path, "an array", json, &model.name));
            return Ok(None);
        };
        let element_type = model.element_type().unwrap_or_default().to_owned();
        let set = graph.create(Arc::clone(&model));
        for (i, item) in items.iter().enumerate() {
            let at = join(path, &format!("[{i}]"));
            let concrete = if model.variants.is_empty() {
                element_type.clone()
            } else {
                match item.get(DISCRIMINANT).and_then(Json::as_str) {
                    Some(t) if model.variants.iter().any(|v| v == t) => t.to_owned(),
                    Some(t) => {
                        errors.push(ValidationError::new(
                            &at,
                            format!("'{t}' is not a variant of {}", model.name),
                            item.clone(),
                            &model.name,
                        ));
                        continue;
                    }
                    None => {
                        errors.push(ValidationError::new(
                            &at,
                            format!("missing '{DISCRIMINANT}' discriminant"),
                            item.clone(),
                            &model.name,
                        ));
                        continue;
                    }
                }
            };
            let element_model = registry.model(&concrete)?;
            if let Some(element) = read_node(graph, registry, element_model, item, &at, errors)? {
                graph.object_set(set)?.add(&[element])?;
            }
        }
        return Ok(Some(set));
    }

    let Json::Object(map) = json else {
        errors.push(mismatch(path, "an object", json, &model.name));
        return Ok(None);
    };
    let handle = graph.create(Arc::clone(&model));
    let discriminated = path.ends_with(']');
    for (key, item) in map {
        let at = join(path, key);
        if key == ID_COLUMN && model.is_entity() {
            match model.id_kind.from_json(item) {
                Ok(Value::Null) => {}
                Ok(value) => graph.set_id(handle, Id::from_value(&value)),
                Err(message) => errors.push(ValidationError::new(&at, message, item.clone(), &model.name)),
            }
            continue;
        }
        if key == DISCRIMINANT && discriminated && model.field_index(key).is_none() {
            continue;
        }
        let Some(index) = model.field_index(key) else {
            errors.push(ValidationError::new(&at, "unknown property", item.clone(), &model.name));
            continue;
        };
        let field = &model.fields[index];
        let value = match (&field.field_type, item) {
            (_, Json::Null) => Value::Null,
            (FieldType::Scalar(kind), _) => match kind.from_json(item) {
                Ok(value) => value,
                Err(message) => {
                    errors.push(ValidationError::new(&at, message, item.clone(), &model.name));
                    continue;
                }
            },
            (FieldType::Object(target) | FieldType::Set(target), _) => {
                let target_model = registry.model(target)?;
                match read_node(graph, registry, target_model, item, &at, errors)? {
                    Some(child) => {
                        graph.adopt(handle, child);
                        Value::Object(child)
                    }
                    None => continue,
                }
            }
        };
        graph.set_slot(handle, index, Lazy::Loaded(value));
    }
    Ok(Some(handle))
}
