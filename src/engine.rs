//! The relational engine contract repositories run against, and an engine
//! that keeps its tables in process memory.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::trace;

use crate::error::{EntigraphError, Result};
use crate::model::ID_COLUMN;
use crate::query::{Direction, JoinKind, Predicate, QueryBuilder};
use crate::value::{Id, ScalarKind, Value};

/// A result or write row: column name to value. Base-table columns are bare,
/// joined columns are `alias.column`.
pub type Row = BTreeMap<String, Value>;

/// Columns a repository needs in its table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub id_kind: ScalarKind,
    pub columns: Vec<(String, ScalarKind)>,
}

impl TableSchema {
    pub fn new(name: &str, id_kind: ScalarKind) -> Self {
        Self {
            name: name.to_owned(),
            id_kind,
            columns: Vec::new(),
        }
    }
    pub fn column(mut self, name: &str, kind: ScalarKind) -> Self {
        if name != ID_COLUMN && !self.columns.iter().any(|(c, _)| c == name) {
            self.columns.push((name.to_owned(), kind));
        }
        self
    }
}

/// Write options for [`RelationalEngine::upsert`].
#[derive(Clone, Copy, Debug, Default)]
pub struct UpsertOptions<'a> {
    /// An update only touches a row matching this predicate.
    pub restriction: Option<&'a Predicate>,
    /// Stamped with the current time when a row is inserted.
    pub created_column: Option<&'a str>,
    /// Stamped with the current time on every write.
    pub modified_column: Option<&'a str>,
}

pub trait RelationalEngine: Send {
    fn create_query(&self) -> QueryBuilder {
        QueryBuilder::new()
    }
    fn ensure_table(&mut self, schema: &TableSchema) -> Result<()>;
    fn execute(&mut self, query: &QueryBuilder) -> Result<Vec<Row>>;
    fn execute_one(&mut self, query: &QueryBuilder) -> Result<Option<Row>> {
        Ok(self.execute(&query.clone().limit(1))?.into_iter().next())
    }
    /// Inserts or updates by the row's `id`. Returns the row's identifier, or
    /// `None` when an existing row falls outside the restriction.
    fn upsert(&mut self, table: &str, row: &Row, options: &UpsertOptions) -> Result<Option<Id>>;
    /// Deletes by the row's `id`; false when no row matched.
    fn remove(&mut self, table: &str, row: &Row) -> Result<bool>;
    /// Drops whatever the engine caches, e.g. prepared statements.
    fn clear(&mut self);
}

// ------------- In-memory engine -------------
#[derive(Debug, Default)]
struct MemoryTable {
    id_kind: Option<ScalarKind>,
    rows: Vec<Row>,
    next_id: i64,
}

impl MemoryTable {
    fn position(&self, id: &Id) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| r.get(ID_COLUMN).and_then(Id::from_value).as_ref() == Some(id))
    }
}

/// Tables in memory. Unknown tables read as empty and are created on first write.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    tables: HashMap<String, MemoryTable>,
    executed: usize,
    clears: usize,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
    /// Number of queries executed so far.
    pub fn executed(&self) -> usize {
        self.executed
    }
    pub fn clears(&self) -> usize {
        self.clears
    }
    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map_or(&[], |t| t.rows.as_slice())
    }

    fn scoped(row: &Row, alias: &str) -> Row {
        let mut scope = Row::new();
        for (column, value) in row {
            scope.insert(format!("{alias}.{column}"), value.clone());
            scope.insert(column.clone(), value.clone());
        }
        scope
    }

    fn qualified(row: &Row, alias: &str) -> Row {
        row.iter()
            .map(|(c, v)| (format!("{alias}.{c}"), v.clone()))
            .collect()
    }

    fn project(scope: &Row, query: &QueryBuilder, base: &str) -> Row {
        let selected = query.selected();
        if selected.is_empty() {
            return Self::strip(scope, base);
        }
        let mut row = Row::new();
        for item in selected {
            match item.split_once('.') {
                Some((alias, "*")) if alias == base => row.extend(Self::strip(scope, base)),
                Some((alias, "*")) => {
                    let prefix = format!("{alias}.");
                    row.extend(
                        scope
                            .iter()
                            .filter(|(c, _)| c.starts_with(&prefix))
                            .map(|(c, v)| (c.clone(), v.clone())),
                    );
                }
                Some((alias, column)) => {
                    let name = if alias == base { column.to_owned() } else { item.clone() };
                    row.insert(name, scope.get(item).cloned().unwrap_or(Value::Null));
                }
                None => {
                    row.insert(item.clone(), scope.get(item).cloned().unwrap_or(Value::Null));
                }
            }
        }
        row
    }

    /// Base-table columns of a scope, under their bare names.
    fn strip(scope: &Row, base: &str) -> Row {
        let prefix = format!("{base}.");
        scope
            .iter()
            .filter_map(|(c, v)| c.strip_prefix(&prefix).map(|bare| (bare.to_owned(), v.clone())))
            .collect()
    }
}

impl RelationalEngine for MemoryEngine {
    fn ensure_table(&mut self, schema: &TableSchema) -> Result<()> {
        let table = self.tables.entry(schema.name.clone()).or_default();
        table.id_kind = Some(schema.id_kind);
        Ok(())
    }

    fn execute(&mut self, query: &QueryBuilder) -> Result<Vec<Row>> {
        self.executed += 1;
        let (Some(table), Some(base)) = (query.table(), query.base_alias()) else {
            return Err(EntigraphError::Internal("query has no FROM clause".into()));
        };
        trace!(query = %query, "memory engine executing");
        let mut scopes: Vec<Row> = self
            .rows(table)
            .iter()
            .map(|r| Self::scoped(r, base))
            .collect();

        for join in query.joins() {
            let joined = self.rows(&join.table);
            let mut next = Vec::with_capacity(scopes.len());
            for scope in scopes {
                let mut matched = false;
                for candidate in joined {
                    let mut combined = scope.clone();
                    combined.extend(Self::qualified(candidate, &join.alias));
                    if join.on.evaluate(&|c| combined.get(c).cloned()) {
                        matched = true;
                        next.push(combined);
                    }
                }
                if !matched && join.kind == JoinKind::Left {
                    next.push(scope);
                }
            }
            scopes = next;
        }

        if let Some(filter) = query.predicate() {
            scopes.retain(|scope| filter.evaluate(&|c| scope.get(c).cloned()));
        }
        for (column, direction) in query.ordering().iter().rev() {
            scopes.sort_by(|a, b| {
                let a = a.get(column).unwrap_or(&Value::Null);
                let b = b.get(column).unwrap_or(&Value::Null);
                let ordering = match (a.is_null(), b.is_null()) {
                    (true, true) => std::cmp::Ordering::Equal,
                    (true, false) => std::cmp::Ordering::Less,
                    (false, true) => std::cmp::Ordering::Greater,
                    _ => a.compare(b).unwrap_or(std::cmp::Ordering::Equal),
                };
                if *direction == Direction::Desc { ordering.reverse() } else { ordering }
            });
        }
        let offset = query.offset_value().unwrap_or(0);
        let limit = query.limit_value().unwrap_or(usize::MAX);
        Ok(scopes
            .iter()
            .skip(offset)
            .take(limit)
            .map(|scope| Self::project(scope, query, base))
            .collect())
    }

    fn upsert(&mut self, table: &str, row: &Row, options: &UpsertOptions) -> Result<Option<Id>> {
        let now = Value::DateTime(Utc::now());
        let table_name = table;
        let table = self.tables.entry(table_name.to_owned()).or_default();
        let id = row.get(ID_COLUMN).and_then(Id::from_value);

        if let Some(id) = &id {
            if let Some(pos) = table.position(id) {
                let existing = &mut table.rows[pos];
                if let Some(restriction) = options.restriction {
                    let bare = restriction.unqualified();
                    if !bare.evaluate(&|c| existing.get(c).cloned()) {
                        return Ok(None);
                    }
                }
                for (column, value) in row {
                    if Some(column.as_str()) != options.created_column {
                        existing.insert(column.clone(), value.clone());
                    }
                }
                if let Some(modified) = options.modified_column {
                    existing.insert(modified.to_owned(), now);
                }
                trace!(table = %table_name, id = %id, "memory engine updated row");
                return Ok(Some(id.clone()));
            }
        }

        let id = match id {
            Some(id) => id,
            None if table.id_kind == Some(ScalarKind::Text) => {
                return Err(EntigraphError::Persistence(format!(
                    "{table_name} requires explicit text identifiers"
                )));
            }
            None => {
                let next = table.next_id.max(
                    table
                        .rows
                        .iter()
                        .filter_map(|r| r.get(ID_COLUMN).and_then(Value::as_i64))
                        .max()
                        .unwrap_or(0),
                ) + 1;
                Id::Int(next)
            }
        };
        if let Id::Int(i) = id {
            table.next_id = table.next_id.max(i);
        }
        let mut stored = row.clone();
        stored.insert(ID_COLUMN.to_owned(), id.to_value());
        if let Some(created) = options.created_column {
            stored.insert(created.to_owned(), now.clone());
        }
        if let Some(modified) = options.modified_column {
            stored.insert(modified.to_owned(), now);
        }
        table.rows.push(stored);
        trace!(table = %table_name, id = %id, "memory engine inserted row");
        Ok(Some(id))
    }

    fn remove(&mut self, table: &str, row: &Row) -> Result<bool> {
        let Some(id) = row.get(ID_COLUMN).and_then(Id::from_value) else {
            return Ok(false);
        };
        let Some(table) = self.tables.get_mut(table) else {
            return Ok(false);
        };
        match table.position(&id) {
            Some(pos) => {
                table.rows.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear(&mut self) {
        self.clears += 1;
    }
}
