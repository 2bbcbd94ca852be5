//! Per-language overlays of translatable columns.
//!
//! An overlay joins a translation table into a repository's reads, lays the
//! translated values over the base columns of each row, and keeps the
//! translation rows in step on writes and deletes.

use crate::engine::{RelationalEngine, Row, TableSchema, UpsertOptions};
use crate::error::Result;
use crate::model::ID_COLUMN;
use crate::query::{JoinKind, Predicate, QueryBuilder};
use crate::repository::Repository;
use crate::value::{Id, ScalarKind, Value};

pub trait TranslationOverlay: Send + Sync {
    fn apply_join(&self, query: &mut QueryBuilder, alias: &str);
    /// Base columns the overlay translates.
    fn columns(&self) -> &[String];
    /// Replaces base columns with non-null translated values, dropping the joined columns.
    fn apply_to_row(&self, row: &mut Row);
    fn upsert_translation(
        &self,
        engine: &mut dyn RelationalEngine,
        repository: &Repository,
        row: &Row,
    ) -> Result<()>;
    fn delete_translation(
        &self,
        engine: &mut dyn RelationalEngine,
        repository: &Repository,
        id: &Id,
    ) -> Result<bool>;
    fn schema(&self) -> Option<TableSchema> {
        None
    }
}

/// Translations kept in a side table with one row per entity and language.
#[derive(Clone, Debug)]
pub struct TranslationTable {
    table: String,
    alias: String,
    language: String,
    columns: Vec<String>,
}

const ENTITY_COLUMN: &str = "entity_id";
const LANGUAGE_COLUMN: &str = "language";

impl TranslationTable {
    pub fn new(table: &str, language: &str, columns: &[&str]) -> Self {
        Self {
            table: table.to_owned(),
            alias: "tr".to_owned(),
            language: language.to_owned(),
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
        }
    }
    pub fn language(&self) -> &str {
        &self.language
    }
    fn joined(&self, column: &str) -> String {
        format!("{}.{}", self.alias, column)
    }
    fn rows_for(&self, engine: &mut dyn RelationalEngine, id: &Id) -> Result<Vec<Row>> {
        let query = engine
            .create_query()
            .from(&self.table, &self.alias)
            .filter(Predicate::eq(self.joined(ENTITY_COLUMN), id.to_value()));
        engine.execute(&query)
    }
}

impl TranslationOverlay for TranslationTable {
    fn apply_join(&self, query: &mut QueryBuilder, alias: &str) {
        let on = Predicate::columns_eq(self.joined(ENTITY_COLUMN), format!("{alias}.{ID_COLUMN}"))
            .and(Predicate::eq(self.joined(LANGUAGE_COLUMN), self.language.as_str()));
        query.add_join(JoinKind::Left, &self.table, &self.alias, on);
        for column in &self.columns {
            query.add_select(&self.joined(column));
        }
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn apply_to_row(&self, row: &mut Row) {
        for column in &self.columns {
            if let Some(value) = row.remove(&self.joined(column)) {
                if !value.is_null() {
                    row.insert(column.clone(), value);
                }
            }
        }
    }

    fn upsert_translation(
        &self,
        engine: &mut dyn RelationalEngine,
        _repository: &Repository,
        row: &Row,
    ) -> Result<()> {
        let Some(id) = row.get(ID_COLUMN).and_then(Id::from_value) else {
            return Ok(());
        };
        let existing = self
            .rows_for(engine, &id)?
            .into_iter()
            .find(|r| r.get(LANGUAGE_COLUMN).and_then(Value::as_str) == Some(self.language.as_str()));
        let mut translated = Row::new();
        if let Some(existing_id) = existing.as_ref().and_then(|r| r.get(ID_COLUMN)) {
            translated.insert(ID_COLUMN.to_owned(), existing_id.clone());
        }
        translated.insert(ENTITY_COLUMN.to_owned(), id.to_value());
        translated.insert(LANGUAGE_COLUMN.to_owned(), Value::from(self.language.as_str()));
        for column in &self.columns {
            if let Some(value) = row.get(column) {
                translated.insert(column.clone(), value.clone());
            }
        }
        engine.upsert(&self.table, &translated, &UpsertOptions::default())?;
        Ok(())
    }

    fn delete_translation(
        &self,
        engine: &mut dyn RelationalEngine,
        _repository: &Repository,
        id: &Id,
    ) -> Result<bool> {
        let mut deleted = false;
        for row in self.rows_for(engine, id)? {
            deleted |= engine.remove(&self.table, &row)?;
        }
        Ok(deleted)
    }

    fn schema(&self) -> Option<TableSchema> {
        let mut schema = TableSchema::new(&self.table, ScalarKind::Int)
            .column(ENTITY_COLUMN, ScalarKind::Text)
            .column(LANGUAGE_COLUMN, ScalarKind::Text);
        for column in &self.columns {
            schema = schema.column(column, ScalarKind::Text);
        }
        Some(schema)
    }
}
