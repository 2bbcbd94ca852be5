//! Depth-bounded persistence and deletion.
//!
//! `update` writes the entity's own row, and for a depth above zero also the
//! entities it references (first, so their identifiers can be stored) and the
//! entities that reference it (afterwards, with the new identifier filled
//! into their foreign keys). Each level down costs one unit of depth.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::clone::CallPath;
use crate::engine::{Row, UpsertOptions};
use crate::error::{EntigraphError, Result};
use crate::graph::{Graph, Handle};
use crate::model::{LoadMethod, TypeModel, ID_COLUMN};
use crate::query::Predicate;
use crate::session::Session;
use crate::validate::validate;
use crate::value::{Id, Value};

use super::mapping::Fill;
use super::Repository;

impl Repository {
    /// Validates the graph reachable from `handle` and persists it down to `depth`.
    pub fn update(&self, session: &mut Session, handle: Handle, depth: u32) -> Result<()> {
        self.check_update_rights(session)?;
        let errors = validate(session.graph(), session.registry(), handle);
        if !errors.is_empty() {
            return Err(EntigraphError::invalid(errors));
        }
        self.persist(session, handle, depth, &mut CallPath::new())
    }

    fn check_update_rights(&self, session: &Session) -> Result<Option<Predicate>> {
        let mut restricted = session
            .engine()
            .create_query()
            .from(&self.table, &self.alias);
        if !session
            .rights()
            .apply_update_restriction(&mut restricted, &self.table)
        {
            return Err(EntigraphError::Unauthorized(format!(
                "updates to {} are not permitted",
                self.table
            )));
        }
        Ok(restricted.predicate().cloned())
    }

    pub(crate) fn persist(
        &self,
        session: &mut Session,
        handle: Handle,
        depth: u32,
        path: &mut CallPath,
    ) -> Result<()> {
        if !path.enter(handle) {
            return Ok(());
        }
        if session.graph().type_name(handle) != self.entity_type {
            return Err(EntigraphError::Internal(format!(
                "repository {} cannot persist {}",
                self.name,
                session.graph().type_name(handle)
            )));
        }
        if session.graph().is_deleted(handle) {
            return Err(EntigraphError::NotFound(format!(
                "{} was deleted",
                session.graph().unique_key(handle)
            )));
        }
        let restriction = self.check_update_rights(session)?;
        let registry = Arc::clone(session.registry());
        let model = Arc::clone(session.graph().model(handle));
        let was_persisted = session.graph().id(handle).is_some();

        // referenced entities first, so their identifiers land in our row
        for field in &model.fields {
            let Some(Value::Object(target)) = session.graph().property(handle, &field.name).cloned() else {
                continue;
            };
            let Some((repository, property)) = field.lazy.iter().find_map(|source| match &source.method {
                LoadMethod::ById { property } => Some((&source.repository, property)),
                _ => None,
            }) else {
                continue;
            };
            if depth > 0 && !session.graph().is_deleted(target) {
                let repository = registry.repository(repository)?;
                repository.persist(session, target, depth - 1, path)?;
            }
            if let Some(id) = session.graph().id(target).cloned() {
                session.graph_mut().set_property(handle, property, id.to_value())?;
            }
        }

        let mut row = self.map_to_repository(session, handle)?;
        // loaded values of translated columns are the overlay's; an existing
        // base row keeps its own text
        let overlay = registry.translation(&self.entity_type);
        let mut translated = overlay.as_ref().map(|_| row.clone());
        if let (Some(overlay), true) = (&overlay, was_persisted) {
            for column in overlay.columns() {
                row.remove(column.as_str());
            }
        }
        let (created, modified) = self.stamp_columns(&session.config().persistence);
        let options = UpsertOptions {
            restriction: restriction.as_ref(),
            created_column: created.as_deref(),
            modified_column: modified.as_deref(),
        };
        let id = session
            .engine_mut()
            .upsert(&self.table, &row, &options)?
            .ok_or_else(|| {
                EntigraphError::Unauthorized(format!(
                    "row of {} is outside the principal's update rights",
                    self.table
                ))
            })?;
        if session.graph().id(handle) != Some(&id) {
            session.graph_mut().set_id(handle, Some(id.clone()));
        }
        info!(table = %self.table, id = %id, depth, "persisted entity");

        if let (Some(overlay), Some(translated)) = (overlay, translated.as_mut()) {
            translated.insert(ID_COLUMN.to_owned(), id.to_value());
            overlay.upsert_translation(session.engine_mut(), self, translated)?;
        }

        let mut written = HashSet::new();
        if depth > 0 {
            self.persist_dependents(session, handle, &model, &id, depth, path, &mut written)?;
        }
        if was_persisted {
            self.reload(session, handle, &model, &id, &written)?;
        }
        session.cache_mut().invalidate(&self.name);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn persist_dependents(
        &self,
        session: &mut Session,
        handle: Handle,
        model: &TypeModel,
        id: &Id,
        depth: u32,
        path: &mut CallPath,
        written: &mut HashSet<String>,
    ) -> Result<()> {
        let registry = Arc::clone(session.registry());
        for field in &model.fields {
            let Some(Value::Object(target)) = session.graph().property(handle, &field.name).cloned() else {
                continue;
            };
            for source in &field.lazy {
                match &source.method {
                    LoadMethod::ByReference { column } => {
                        let repository = registry.repository(&source.repository)?;
                        for element in members_or_self(session.graph(), target) {
                            let foreign_key = session
                                .graph()
                                .model(element)
                                .field_by_column(column)
                                .map(|f| f.name.clone());
                            if let Some(foreign_key) = foreign_key {
                                session
                                    .graph_mut()
                                    .set_property(element, &foreign_key, id.to_value())?;
                            }
                            let element_type = session.graph().type_name(element).to_owned();
                            if element_type == repository.entity_type {
                                repository.persist(session, element, depth - 1, path)?;
                            } else {
                                registry
                                    .default_repository(&element_type)?
                                    .persist(session, element, depth - 1, path)?;
                            }
                        }
                        written.insert(field.name.clone());
                        break;
                    }
                    LoadMethod::Through {
                        join,
                        source_column,
                        target_column,
                    } => {
                        let repository = registry.repository(&source.repository)?;
                        let join_repository = registry.repository(join)?;
                        for element in members_or_self(session.graph(), target) {
                            repository.persist(session, element, depth - 1, path)?;
                            let Some(target_id) = session.graph().id(element).cloned() else {
                                continue;
                            };
                            let link = Predicate::eq(join_repository.column(source_column), id.to_value()).and(
                                Predicate::eq(join_repository.column(target_column), target_id.to_value()),
                            );
                            if join_repository.rows(session, link)?.is_empty() {
                                let mut row = Row::new();
                                row.insert(source_column.clone(), id.to_value());
                                row.insert(target_column.clone(), target_id.to_value());
                                session.engine_mut().upsert(
                                    &join_repository.table,
                                    &row,
                                    &UpsertOptions::default(),
                                )?;
                            }
                        }
                        session.cache_mut().invalidate(&join_repository.name);
                        written.insert(field.name.clone());
                        break;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Copies back what the store holds now, e.g. stamps and defaults,
    /// except for properties just written as dependents.
    fn reload(
        &self,
        session: &mut Session,
        handle: Handle,
        model: &TypeModel,
        id: &Id,
        written: &HashSet<String>,
    ) -> Result<()> {
        let query = self
            .query(session)
            .filter(Predicate::eq(self.column(ID_COLUMN), id.to_value()));
        let Some(mut row) = session.engine_mut().execute_one(&query)? else {
            return Ok(());
        };
        if let Some(overlay) = session.registry().translation(&self.entity_type) {
            overlay.apply_to_row(&mut row);
        }
        self.read_columns(session, handle, model, &row, None, Fill::All, written)
    }

    /// Deletes the entity's row and its translations. The instance stays in
    /// the graph, marked deleted.
    pub fn delete(&self, session: &mut Session, handle: Handle) -> Result<()> {
        let id = session.graph().id(handle).cloned().ok_or_else(|| {
            EntigraphError::bad_request(format!(
                "{} has no identifier to delete by",
                session.graph().type_name(handle)
            ))
        })?;
        let mut query = self
            .query(session)
            .filter(Predicate::eq(self.column(ID_COLUMN), id.to_value()));
        if !session
            .rights()
            .apply_delete_restriction(&mut query, &self.table)
        {
            return Err(EntigraphError::Unauthorized(format!(
                "deletes from {} are not permitted",
                self.table
            )));
        }
        if session.engine_mut().execute_one(&query)?.is_none() {
            return Err(EntigraphError::NotFound(format!(
                "{} {} is not visible for deletion",
                self.entity_type, id
            )));
        }
        if let Some(overlay) = session.registry().translation(&self.entity_type) {
            overlay.delete_translation(session.engine_mut(), self, &id)?;
        }
        let mut key = Row::new();
        key.insert(ID_COLUMN.to_owned(), id.to_value());
        if !session.engine_mut().remove(&self.table, &key)? {
            return Err(EntigraphError::NotFound(format!(
                "{} {} could not be located",
                self.entity_type, id
            )));
        }
        session.graph_mut().mark_deleted(handle);
        session.cache_mut().invalidate(&self.name);
        info!(table = %self.table, id = %id, "deleted entity");
        Ok(())
    }
}

fn members_or_self(graph: &Graph, handle: Handle) -> Vec<Handle> {
    if graph.is_collection(handle) {
        graph.elements(handle)
    } else {
        vec![handle]
    }
}
