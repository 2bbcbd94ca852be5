//! Row to entity and entity to row.

use std::collections::HashSet;
use std::sync::Arc;

use crate::engine::Row;
use crate::error::{EntigraphError, Result};
use crate::graph::Handle;
use crate::lazy::Lazy;
use crate::model::{FieldModel, FieldType, LoadMethod, TypeModel, ID_COLUMN};
use crate::registry::Registry;
use crate::session::Session;
use crate::value::{Id, ScalarKind, Value};

use super::{prefixed, Repository};

/// Which properties a row may write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fill {
    All,
    /// Leave properties that are already loaded alone.
    UnsetOnly,
}

impl Repository {
    /// Maps a row onto the session graph. A row whose entity is already known
    /// to the session fills in only what that instance has not loaded yet.
    pub fn map_to_entity(&self, session: &mut Session, mut row: Row) -> Result<Handle> {
        let registry = Arc::clone(session.registry());
        let model = registry.model(&self.entity_type)?;
        if let Some(overlay) = registry.translation(&model.name) {
            overlay.apply_to_row(&mut row);
        }
        let id = match row.get(ID_COLUMN) {
            Some(raw) => model
                .id_kind
                .coerce(raw.clone())
                .map_err(|m| EntigraphError::Persistence(format!("{}.{}: {}", self.table, ID_COLUMN, m)))
                .map(|v| Id::from_value(&v))?,
            None => None,
        };

        let known = id
            .as_ref()
            .and_then(|id| session.graph().lookup(&model.name, id));
        let (handle, fill) = match known {
            Some(handle) => (handle, Fill::UnsetOnly),
            None => {
                let handle = session.graph_mut().create(Arc::clone(&model));
                if id.is_some() {
                    session.graph_mut().set_id(handle, id.clone());
                }
                (handle, Fill::All)
            }
        };

        // a row met again while it is being mapped is already on its way
        let key = id.map(|id| (model.name.clone(), id));
        if let Some(key) = &key {
            if !session.enter_mapping(key) {
                return Ok(handle);
            }
        }
        let result = self
            .read_columns(session, handle, &model, &row, None, fill, &HashSet::new())
            .and_then(|_| self.resolve_eager(session, handle, &model));
        if let Some(key) = &key {
            session.leave_mapping(key);
        }
        result.map(|_| handle)
    }

    fn resolve_eager(&self, session: &mut Session, handle: Handle, model: &TypeModel) -> Result<()> {
        for field in model.fields.iter().filter(|f| f.eager && f.is_lazy()) {
            session.get(handle, &field.name)?;
        }
        Ok(())
    }

    pub(crate) fn read_columns(
        &self,
        session: &mut Session,
        handle: Handle,
        model: &TypeModel,
        row: &Row,
        prefix: Option<&str>,
        fill: Fill,
        skip: &HashSet<String>,
    ) -> Result<()> {
        let registry = Arc::clone(session.registry());
        for (index, field) in model.fields.iter().enumerate() {
            let Some(column) = &field.column else {
                continue;
            };
            if skip.contains(&field.name) {
                continue;
            }
            if fill == Fill::UnsetOnly && session.graph().slot_at(handle, index).is_loaded() {
                continue;
            }
            let column = prefixed(prefix, column);
            let value = match &field.field_type {
                FieldType::Scalar(kind) => {
                    let Some(raw) = row.get(&column) else {
                        continue;
                    };
                    self.decode(session, field, *kind, raw.clone(), &column)?
                }
                FieldType::Object(type_name) => {
                    let target = registry.model(type_name)?;
                    if !target.is_value_object() {
                        continue;
                    }
                    let inline = format!("{column}_");
                    let mut present = row.iter().filter(|(c, _)| c.starts_with(&inline)).peekable();
                    if present.peek().is_none() {
                        continue;
                    }
                    if present.all(|(_, v)| v.is_null()) {
                        Value::Null
                    } else {
                        let existing = match session.graph().slot_at(handle, index) {
                            Lazy::Loaded(Value::Object(h)) if session.graph().type_name(*h) == target.name => Some(*h),
                            _ => None,
                        };
                        let embedded = match existing {
                            Some(embedded) => embedded,
                            None => session.graph_mut().create(Arc::clone(&target)),
                        };
                        self.read_columns(session, embedded, &target, row, Some(&column), Fill::All, &HashSet::new())?;
                        if existing.is_none() {
                            session.graph_mut().adopt(handle, embedded);
                        }
                        Value::Object(embedded)
                    }
                }
                FieldType::Set(_) => continue,
            };
            session
                .graph_mut()
                .set_slot(handle, index, Lazy::Loaded(value));
        }
        Ok(())
    }

    fn decode(&self, session: &Session, field: &FieldModel, kind: ScalarKind, raw: Value, column: &str) -> Result<Value> {
        let raw = match (&field.encrypted, raw) {
            (Some(scope), Value::Text(sealed)) => Value::Text(session.vault().decrypt(scope, &sealed)?),
            (_, raw) => raw,
        };
        kind.coerce(raw)
            .map_err(|m| EntigraphError::Persistence(format!("{}.{}: {}", self.table, column, m)))
    }

    /// The row an entity persists as. Unloaded properties are left out so a
    /// partially loaded entity never blanks columns it did not read.
    pub fn map_to_repository(&self, session: &Session, handle: Handle) -> Result<Row> {
        let graph = session.graph();
        let model = Arc::clone(graph.model(handle));
        let mut row = Row::new();
        if let Some(id) = graph.id(handle) {
            row.insert(ID_COLUMN.to_owned(), id.to_value());
        }
        self.write_columns(session, handle, &model, None, &mut row)?;

        // foreign keys follow the loaded related object
        for field in &model.fields {
            let Some(Value::Object(target)) = graph.property(handle, &field.name) else {
                continue;
            };
            let Some(target_id) = graph.id(*target) else {
                continue;
            };
            for source in &field.lazy {
                if let LoadMethod::ById { property } = &source.method {
                    if let Some(column) = model.get_field(property).and_then(|f| f.column.as_ref()) {
                        row.insert(column.clone(), target_id.to_value());
                    }
                    break;
                }
            }
        }
        Ok(row)
    }

    fn write_columns(
        &self,
        session: &Session,
        handle: Handle,
        model: &TypeModel,
        prefix: Option<&str>,
        row: &mut Row,
    ) -> Result<()> {
        let registry = session.registry();
        for (index, field) in model.fields.iter().enumerate() {
            let Some(column) = &field.column else {
                continue;
            };
            let Lazy::Loaded(value) = session.graph().slot_at(handle, index) else {
                continue;
            };
            let column = prefixed(prefix, column);
            match &field.field_type {
                FieldType::Scalar(_) => {
                    row.insert(column, self.encode(session, field, value)?);
                }
                FieldType::Object(type_name) => {
                    let target = registry.model(type_name)?;
                    if !target.is_value_object() {
                        continue;
                    }
                    match value {
                        Value::Object(embedded) => {
                            self.write_columns(session, *embedded, &target, Some(&column), row)?
                        }
                        _ => null_columns(registry, &target, &column, row)?,
                    }
                }
                FieldType::Set(_) => {}
            }
        }
        Ok(())
    }

    fn encode(&self, session: &Session, field: &FieldModel, value: &Value) -> Result<Value> {
        match (&field.encrypted, value) {
            (_, Value::Null) => Ok(Value::Null),
            (Some(scope), value) => Ok(Value::Text(session.vault().encrypt(scope, &value.to_string())?)),
            (None, value) => Ok(value.clone()),
        }
    }
}

fn null_columns(registry: &Registry, model: &TypeModel, prefix: &str, row: &mut Row) -> Result<()> {
    for field in &model.fields {
        let Some(column) = &field.column else {
            continue;
        };
        let column = prefixed(Some(prefix), column);
        match &field.field_type {
            FieldType::Scalar(_) => {
                row.insert(column, Value::Null);
            }
            FieldType::Object(type_name) => {
                let target = registry.model(type_name)?;
                if target.is_value_object() {
                    null_columns(registry, &target, &column, row)?;
                }
            }
            FieldType::Set(_) => {}
        }
    }
    Ok(())
}
