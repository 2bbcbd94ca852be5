// used for persistence
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
// used to vet identifiers before they are spliced into SQL
use lazy_static::lazy_static;
use regex::Regex;
use chrono::{SecondsFormat, Utc};
use tracing::{debug, trace};

use crate::engine::{RelationalEngine, Row, TableSchema, UpsertOptions};
use crate::error::{EntigraphError, Result};
use crate::model::ID_COLUMN;
use crate::query::{Direction, JoinKind, Predicate, QueryBuilder};
use crate::value::{Id, ScalarKind, Value};

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

fn quote(identifier: &str) -> Result<String> {
    let mut parts = Vec::with_capacity(2);
    for part in identifier.split('.') {
        if part == "*" {
            parts.push(part.to_owned());
        } else if IDENTIFIER.is_match(part) {
            parts.push(format!("\"{part}\""));
        } else {
            return Err(EntigraphError::Persistence(format!(
                "'{identifier}' is not a valid identifier"
            )));
        }
    }
    Ok(parts.join("."))
}

fn sql_type(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Bool | ScalarKind::Int => "integer",
        ScalarKind::Float => "real",
        _ => "text",
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null | Value::Object(_) => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Decimal(_) | Value::Date(_) | Value::DateTime(_) | Value::Json(_) => {
            SqlValue::Text(value.to_string())
        }
    }
}

fn from_sql(value: ValueRef) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Text(hex::encode(b)),
    }
}

// ------------- Rendering -------------
fn compare(column: &str, op: &str, value: &Value, params: &mut Vec<SqlValue>) -> Result<String> {
    params.push(to_sql(value));
    Ok(format!("{} {} ?", quote(column)?, op))
}

fn render_predicate(predicate: &Predicate, params: &mut Vec<SqlValue>) -> Result<String> {
    Ok(match predicate {
        Predicate::Eq(c, v) => compare(c, "=", v, params)?,
        Predicate::Ne(c, v) => compare(c, "<>", v, params)?,
        Predicate::Lt(c, v) => compare(c, "<", v, params)?,
        Predicate::Le(c, v) => compare(c, "<=", v, params)?,
        Predicate::Gt(c, v) => compare(c, ">", v, params)?,
        Predicate::Ge(c, v) => compare(c, ">=", v, params)?,
        Predicate::In(c, values) => {
            if values.is_empty() {
                "0".to_owned()
            } else {
                params.extend(values.iter().map(to_sql));
                let marks = vec!["?"; values.len()].join(", ");
                format!("{} in ({})", quote(c)?, marks)
            }
        }
        Predicate::IsNull(c) => format!("{} is null", quote(c)?),
        Predicate::NotNull(c) => format!("{} is not null", quote(c)?),
        Predicate::ColumnEq(a, b) => format!("{} = {}", quote(a)?, quote(b)?),
        Predicate::And(parts) | Predicate::Or(parts) => {
            if parts.is_empty() {
                return Ok(if matches!(predicate, Predicate::And(_)) { "1" } else { "0" }.to_owned());
            }
            let glue = if matches!(predicate, Predicate::And(_)) { " and " } else { " or " };
            let mut rendered = Vec::with_capacity(parts.len());
            for part in parts {
                rendered.push(format!("({})", render_predicate(part, params)?));
            }
            rendered.join(glue)
        }
        Predicate::Not(inner) => format!("not ({})", render_predicate(inner, params)?),
    })
}

fn render_select(query: &QueryBuilder) -> Result<(String, Vec<SqlValue>)> {
    let (Some(table), Some(base)) = (query.table(), query.base_alias()) else {
        return Err(EntigraphError::Internal("query has no FROM clause".into()));
    };
    let mut columns = Vec::new();
    for item in query.selected() {
        match item.split_once('.') {
            Some((alias, "*")) if alias == base => columns.push(quote(item)?),
            Some((_, "*")) => {
                return Err(EntigraphError::Persistence(format!(
                    "joined columns must be selected by name, not '{item}'"
                )));
            }
            Some((alias, column)) if alias == base => {
                columns.push(format!("{} as {}", quote(item)?, quote(column)?))
            }
            // joined columns keep their alias in the result row
            Some(_) => columns.push(format!("{} as \"{}\"", quote(item)?, item)),
            None => columns.push(quote(item)?),
        }
    }
    if columns.is_empty() {
        columns.push(format!("{}.*", quote(base)?));
    }
    let mut params = Vec::new();
    let mut sql = format!(
        "select {} from {} as {}",
        columns.join(", "),
        quote(table)?,
        quote(base)?
    );
    for join in query.joins() {
        let kind = match join.kind {
            JoinKind::Inner => "join",
            JoinKind::Left => "left join",
        };
        let on = render_predicate(&join.on, &mut params)?;
        sql.push_str(&format!(
            " {} {} as {} on {}",
            kind,
            quote(&join.table)?,
            quote(&join.alias)?,
            on
        ));
    }
    if let Some(filter) = query.predicate() {
        sql.push_str(&format!(" where {}", render_predicate(filter, &mut params)?));
    }
    if !query.ordering().is_empty() {
        let mut order = Vec::new();
        for (column, direction) in query.ordering() {
            let direction = if *direction == Direction::Asc { "asc" } else { "desc" };
            order.push(format!("{} {}", quote(column)?, direction));
        }
        sql.push_str(&format!(" order by {}", order.join(", ")));
    }
    match (query.limit_value(), query.offset_value()) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" limit {limit} offset {offset}")),
        (Some(limit), None) => sql.push_str(&format!(" limit {limit}")),
        (None, Some(offset)) => sql.push_str(&format!(" limit -1 offset {offset}")),
        (None, None) => {}
    }
    Ok((sql, params))
}

// ------------- Persistence -------------
/// A [`RelationalEngine`] over SQLite.
pub struct Persistor {
    db: Connection,
    seen_tables: Vec<String>,
}

impl Persistor {
    pub fn new(mode: PersistenceMode) -> Result<Persistor> {
        let db = match &mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        debug!(?mode, "opened sqlite persistor");
        Ok(Persistor {
            db,
            seen_tables: Vec::new(),
        })
    }
    pub fn connection(&self) -> &Connection {
        &self.db
    }
    fn now() -> SqlValue {
        SqlValue::Text(Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
    fn exists(&self, table: &str, id: &Id) -> Result<bool> {
        let sql = format!("select 1 from {} where \"id\" = ?", quote(table)?);
        let mut statement = self.db.prepare_cached(&sql)?;
        let found = statement
            .query_row([to_sql(&id.to_value())], |r| r.get::<_, i64>(0))
            .optional()?;
        Ok(found.is_some())
    }
}

impl RelationalEngine for Persistor {
    fn ensure_table(&mut self, schema: &TableSchema) -> Result<()> {
        if self.seen_tables.contains(&schema.name) {
            return Ok(());
        }
        let id = match schema.id_kind {
            ScalarKind::Text => "\"id\" text not null primary key".to_owned(),
            _ => "\"id\" integer primary key autoincrement".to_owned(),
        };
        let mut columns = vec![id];
        for (column, kind) in &schema.columns {
            columns.push(format!("{} {} null", quote(column)?, sql_type(*kind)));
        }
        let sql = format!(
            "create table if not exists {} (\n    {}\n)",
            quote(&schema.name)?,
            columns.join(",\n    ")
        );
        self.db.execute_batch(&sql)?;
        self.seen_tables.push(schema.name.clone());
        debug!(table = %schema.name, "ensured table");
        Ok(())
    }

    fn execute(&mut self, query: &QueryBuilder) -> Result<Vec<Row>> {
        let (sql, params) = render_select(query)?;
        trace!(%sql, "sqlite executing");
        let mut statement = self.db.prepare_cached(&sql)?;
        let names: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let mut rows = statement.query(params_from_iter(params))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut mapped = Row::new();
            for (i, name) in names.iter().enumerate() {
                mapped.insert(name.clone(), from_sql(row.get_ref(i)?));
            }
            result.push(mapped);
        }
        Ok(result)
    }

    fn upsert(&mut self, table: &str, row: &Row, options: &UpsertOptions) -> Result<Option<Id>> {
        let id = row.get(ID_COLUMN).and_then(Id::from_value);
        let quoted_table = quote(table)?;

        if let Some(id) = &id {
            if self.exists(table, id)? {
                let mut assignments = Vec::new();
                let mut params = Vec::new();
                for (column, value) in row {
                    let stamped = Some(column.as_str()) == options.created_column
                        || Some(column.as_str()) == options.modified_column;
                    if column == ID_COLUMN || stamped {
                        continue;
                    }
                    assignments.push(format!("{} = ?", quote(column)?));
                    params.push(to_sql(value));
                }
                if let Some(modified) = options.modified_column {
                    assignments.push(format!("{} = ?", quote(modified)?));
                    params.push(Self::now());
                }
                // an update without columns still has to pass the restriction
                if assignments.is_empty() {
                    assignments.push("\"id\" = \"id\"".to_owned());
                }
                params.push(to_sql(&id.to_value()));
                let mut sql = format!(
                    "update {} set {} where \"id\" = ?",
                    quoted_table,
                    assignments.join(", ")
                );
                if let Some(restriction) = options.restriction {
                    let clause = render_predicate(&restriction.unqualified(), &mut params)?;
                    sql.push_str(&format!(" and ({clause})"));
                }
                let changed = self.db.prepare_cached(&sql)?.execute(params_from_iter(params))?;
                trace!(%sql, changed, "sqlite update");
                return Ok((changed > 0).then(|| id.clone()));
            }
        }

        let mut columns = Vec::new();
        let mut params = Vec::new();
        for (column, value) in row {
            columns.push(quote(column)?);
            params.push(to_sql(value));
        }
        for stamp in [options.created_column, options.modified_column].into_iter().flatten() {
            let quoted = quote(stamp)?;
            match columns.iter().position(|c| *c == quoted) {
                Some(pos) => params[pos] = Self::now(),
                None => {
                    columns.push(quoted);
                    params.push(Self::now());
                }
            }
        }
        let sql = if columns.is_empty() {
            format!("insert into {quoted_table} default values")
        } else {
            format!(
                "insert into {} ({}) values ({})",
                quoted_table,
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };
        self.db.prepare_cached(&sql)?.execute(params_from_iter(params))?;
        trace!(%sql, "sqlite insert");
        Ok(Some(match id {
            Some(id) => id,
            None => Id::Int(self.db.last_insert_rowid()),
        }))
    }

    fn remove(&mut self, table: &str, row: &Row) -> Result<bool> {
        let Some(id) = row.get(ID_COLUMN).and_then(Id::from_value) else {
            return Ok(false);
        };
        let sql = format!("delete from {} where \"id\" = ?", quote(table)?);
        let changed = self.db.prepare_cached(&sql)?.execute([to_sql(&id.to_value())])?;
        Ok(changed > 0)
    }

    fn clear(&mut self) {
        self.db.flush_prepared_statement_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_vetted() {
        assert_eq!(quote("c.name").unwrap(), "\"c\".\"name\"");
        assert!(quote("name; drop table x").is_err());
    }

    #[test]
    fn selects_render_joins_and_paging() {
        let query = QueryBuilder::new()
            .from("cron", "c")
            .select(["c.*", "tr.name"])
            .join(JoinKind::Left, "cron_tr", "tr", Predicate::columns_eq("tr.entity_id", "c.id"))
            .filter(Predicate::eq("c.status", "active"))
            .offset(5);
        let (sql, params) = render_select(&query).unwrap();
        assert_eq!(
            sql,
            "select \"c\".*, \"tr\".\"name\" as \"tr.name\" from \"cron\" as \"c\" \
             left join \"cron_tr\" as \"tr\" on \"tr\".\"entity_id\" = \"c\".\"id\" \
             where \"c\".\"status\" = ? limit -1 offset 5"
        );
        assert_eq!(params, vec![SqlValue::Text("active".into())]);
    }
}
