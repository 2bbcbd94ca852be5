//! Structured validation of object graphs.

use std::fmt;

use serde::Serialize;
use serde_json::Value as Json;

use crate::clone::CallPath;
use crate::graph::{Graph, Handle, PersistenceState};
use crate::lazy::Lazy;
use crate::model::FieldType;
use crate::registry::Registry;
use crate::value::Value;

// ------------- Errors -------------
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationError {
    /// Dotted path to the offending property, e.g. `executions[0].status`.
    pub path: String,
    pub message: String,
    pub invalid_value: Json,
    pub offending_type: String,
}

impl ValidationError {
    pub fn new(path: &str, message: impl Into<String>, invalid_value: Json, offending_type: &str) -> Self {
        Self {
            path: path.to_owned(),
            message: message.into(),
            invalid_value,
            offending_type: offending_type.to_owned(),
        }
    }
    fn under(mut self, prefix: &str) -> Self {
        self.path = join(prefix, &self.path);
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }
    pub fn extend(&mut self, errors: impl IntoIterator<Item = ValidationError>) {
        self.0.extend(errors);
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.0.iter()
    }
    pub fn into_vec(self) -> Vec<ValidationError> {
        self.0
    }
    /// First error reported for `path`.
    pub fn at(&self, path: &str) -> Option<&ValidationError> {
        self.0.iter().find(|e| e.path == path)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let lines: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", lines.join("; "))
    }
}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a ValidationError;
    type IntoIter = std::slice::Iter<'a, ValidationError>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

pub(crate) fn join(prefix: &str, path: &str) -> String {
    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => path.to_owned(),
        (false, true) => prefix.to_owned(),
        // indexes attach directly to the collection name
        (false, false) if path.starts_with('[') => format!("{prefix}{path}"),
        (false, false) => format!("{prefix}.{path}"),
    }
}

// ------------- Validation -------------
/// Validates everything reachable through loaded properties and set members.
pub fn validate(graph: &Graph, registry: &Registry, handle: Handle) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    let mut path = CallPath::new();
    validate_node(graph, registry, handle, "", &mut path, &mut errors);
    errors
}

fn validate_node(
    graph: &Graph,
    registry: &Registry,
    handle: Handle,
    prefix: &str,
    path: &mut CallPath,
    errors: &mut ValidationErrors,
) {
    if !path.enter(handle) || graph.is_deleted(handle) {
        return;
    }
    let model = graph.model(handle);
    let transient = graph.persistence_state(handle) == PersistenceState::Transient;

    for (index, field) in model.fields.iter().enumerate() {
        let at = join(prefix, &field.name);
        let value = match graph.slot_at(handle, index) {
            Lazy::Loaded(value) => value,
            _ => {
                let required = !field.nullable && !field.is_lazy() && field.column.is_some();
                if required && transient {
                    errors.push(ValidationError::new(&at, "is required", Json::Null, &model.name));
                }
                continue;
            }
        };
        if value.is_null() {
            if !field.nullable {
                errors.push(ValidationError::new(&at, "must not be null", Json::Null, &model.name));
            }
            continue;
        }
        match &field.field_type {
            FieldType::Scalar(kind) => {
                if !kind.accepts(value) {
                    errors.push(ValidationError::new(
                        &at,
                        format!("expected {}, found {}", kind.name(), value.kind_name()),
                        value.to_json(),
                        &model.name,
                    ));
                    continue;
                }
                if !field.choices.is_empty() && !field.choices.iter().any(|c| c.loosely_equals(value)) {
                    let allowed: Vec<String> = field.choices.iter().map(ToString::to_string).collect();
                    errors.push(ValidationError::new(
                        &at,
                        format!("must be one of {}", allowed.join(", ")),
                        value.to_json(),
                        &model.name,
                    ));
                }
                if let (Some(pattern), Value::Text(text)) = (&field.pattern, value) {
                    if !pattern.is_match(text) {
                        errors.push(ValidationError::new(
                            &at,
                            format!("does not match {}", pattern.as_str()),
                            value.to_json(),
                            &model.name,
                        ));
                    }
                }
            }
            FieldType::Object(type_name) | FieldType::Set(type_name) => {
                let Value::Object(target) = value else {
                    errors.push(ValidationError::new(
                        &at,
                        format!("expected {}, found {}", type_name, value.kind_name()),
                        value.to_json(),
                        &model.name,
                    ));
                    continue;
                };
                let actual = graph.type_name(*target);
                let variant = registry
                    .model(type_name)
                    .is_ok_and(|m| m.variants.iter().any(|v| v == actual));
                if actual != type_name && !variant {
                    errors.push(ValidationError::new(
                        &at,
                        format!("expected {type_name}, found {actual}"),
                        Json::Null,
                        &model.name,
                    ));
                    continue;
                }
                validate_node(graph, registry, *target, &at, path, errors);
            }
        }
    }

    if let Some(members) = graph.members(handle) {
        for (i, element) in members.handles().iter().enumerate() {
            let at = join(prefix, &format!("[{i}]"));
            validate_node(graph, registry, *element, &at, path, errors);
        }
    }

    for validator in registry.validators(&model.name) {
        errors.extend(validator(graph, handle).into_iter().map(|e| e.under(prefix)));
    }
}
