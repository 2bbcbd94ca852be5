//! Query construction handed to a [`crate::engine::RelationalEngine`].
//!
//! Column references are either bare (`name`, meaning the base table) or
//! qualified with a table alias (`c.name`). Result rows use bare names for
//! base-table columns and `alias.column` for columns of joined tables.

use std::fmt;

use crate::value::Value;

// ------------- Predicate -------------
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    NotNull(String),
    /// Column-to-column equality, used for join conditions.
    ColumnEq(String, String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(column.into(), value.into())
    }
    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::In(column.into(), values)
    }
    pub fn columns_eq(left: impl Into<String>, right: impl Into<String>) -> Self {
        Predicate::ColumnEq(left.into(), right.into())
    }
    /// Conjunction, flattening nested ANDs.
    pub fn and(self, other: Predicate) -> Self {
        let mut parts = match self {
            Predicate::And(parts) => parts,
            single => vec![single],
        };
        match other {
            Predicate::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        Predicate::And(parts)
    }

    /// Evaluates against a row; missing columns read as null and null never
    /// compares equal to anything.
    pub fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> bool {
        let read = |column: &str| lookup(column).unwrap_or(Value::Null);
        let compare = |column: &str, value: &Value| {
            let actual = read(column);
            if actual.is_null() || value.is_null() {
                None
            } else {
                actual.compare(value)
            }
        };
        match self {
            Predicate::Eq(c, v) => compare(c, v).is_some_and(|o| o.is_eq()),
            Predicate::Ne(c, v) => compare(c, v).is_some_and(|o| o.is_ne()),
            Predicate::Lt(c, v) => compare(c, v).is_some_and(|o| o.is_lt()),
            Predicate::Le(c, v) => compare(c, v).is_some_and(|o| o.is_le()),
            Predicate::Gt(c, v) => compare(c, v).is_some_and(|o| o.is_gt()),
            Predicate::Ge(c, v) => compare(c, v).is_some_and(|o| o.is_ge()),
            Predicate::In(c, values) => values.iter().any(|v| compare(c, v).is_some_and(|o| o.is_eq())),
            Predicate::IsNull(c) => read(c).is_null(),
            Predicate::NotNull(c) => !read(c).is_null(),
            Predicate::ColumnEq(a, b) => {
                let (a, b) = (read(a), read(b));
                !a.is_null() && !b.is_null() && a.loosely_equals(&b)
            }
            Predicate::And(parts) => parts.iter().all(|p| p.evaluate(lookup)),
            Predicate::Or(parts) => parts.iter().any(|p| p.evaluate(lookup)),
            Predicate::Not(inner) => !inner.evaluate(lookup),
        }
    }

    /// Same predicate with alias qualifiers stripped, for statements that
    /// address a single table without an alias.
    pub fn unqualified(&self) -> Predicate {
        fn strip(column: &str) -> String {
            column.rsplit_once('.').map_or(column, |(_, c)| c).to_owned()
        }
        match self {
            Predicate::Eq(c, v) => Predicate::Eq(strip(c), v.clone()),
            Predicate::Ne(c, v) => Predicate::Ne(strip(c), v.clone()),
            Predicate::Lt(c, v) => Predicate::Lt(strip(c), v.clone()),
            Predicate::Le(c, v) => Predicate::Le(strip(c), v.clone()),
            Predicate::Gt(c, v) => Predicate::Gt(strip(c), v.clone()),
            Predicate::Ge(c, v) => Predicate::Ge(strip(c), v.clone()),
            Predicate::In(c, vs) => Predicate::In(strip(c), vs.clone()),
            Predicate::IsNull(c) => Predicate::IsNull(strip(c)),
            Predicate::NotNull(c) => Predicate::NotNull(strip(c)),
            Predicate::ColumnEq(a, b) => Predicate::ColumnEq(strip(a), strip(b)),
            Predicate::And(ps) => Predicate::And(ps.iter().map(Predicate::unqualified).collect()),
            Predicate::Or(ps) => Predicate::Or(ps.iter().map(Predicate::unqualified).collect()),
            Predicate::Not(p) => Predicate::Not(Box::new(p.unqualified())),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // values carry their kind so 1 and '1' never share a signature
        let lit = |v: &Value| format!("{}'{}'", v.kind_name(), v);
        match self {
            Predicate::Eq(c, v) => write!(f, "{c} = {}", lit(v)),
            Predicate::Ne(c, v) => write!(f, "{c} <> {}", lit(v)),
            Predicate::Lt(c, v) => write!(f, "{c} < {}", lit(v)),
            Predicate::Le(c, v) => write!(f, "{c} <= {}", lit(v)),
            Predicate::Gt(c, v) => write!(f, "{c} > {}", lit(v)),
            Predicate::Ge(c, v) => write!(f, "{c} >= {}", lit(v)),
            Predicate::In(c, vs) => {
                let vs: Vec<String> = vs.iter().map(lit).collect();
                write!(f, "{c} IN ({})", vs.join(", "))
            }
            Predicate::IsNull(c) => write!(f, "{c} IS NULL"),
            Predicate::NotNull(c) => write!(f, "{c} IS NOT NULL"),
            Predicate::ColumnEq(a, b) => write!(f, "{a} = {b}"),
            Predicate::And(ps) | Predicate::Or(ps) => {
                let glue = if matches!(self, Predicate::And(_)) { " AND " } else { " OR " };
                let ps: Vec<String> = ps.iter().map(|p| format!("({p})")).collect();
                write!(f, "{}", ps.join(glue))
            }
            Predicate::Not(p) => write!(f, "NOT ({p})"),
        }
    }
}

// ------------- Query -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub on: Predicate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuilder {
    select: Vec<String>,
    from: Option<(String, String)>,
    joins: Vec<Join>,
    filter: Option<Predicate>,
    order: Vec<(String, Direction)>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select.extend(columns.into_iter().map(Into::into));
        self
    }
    pub fn from(mut self, table: &str, alias: &str) -> Self {
        self.from = Some((table.to_owned(), alias.to_owned()));
        self
    }
    pub fn join(mut self, kind: JoinKind, table: &str, alias: &str, on: Predicate) -> Self {
        self.add_join(kind, table, alias, on);
        self
    }
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.restrict(predicate);
        self
    }
    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order.push((column.to_owned(), direction));
        self
    }
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    // in-place mutators for hooks that receive `&mut QueryBuilder`
    pub fn restrict(&mut self, predicate: Predicate) {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
    }
    pub fn add_join(&mut self, kind: JoinKind, table: &str, alias: &str, on: Predicate) {
        self.joins.push(Join {
            kind,
            table: table.to_owned(),
            alias: alias.to_owned(),
            on,
        });
    }
    pub fn add_select(&mut self, column: &str) {
        self.select.push(column.to_owned());
    }

    pub fn selected(&self) -> &[String] {
        &self.select
    }
    pub fn table(&self) -> Option<&str> {
        self.from.as_ref().map(|(t, _)| t.as_str())
    }
    pub fn base_alias(&self) -> Option<&str> {
        self.from.as_ref().map(|(_, a)| a.as_str())
    }
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }
    pub fn predicate(&self) -> Option<&Predicate> {
        self.filter.as_ref()
    }
    pub fn ordering(&self) -> &[(String, Direction)] {
        &self.order
    }
    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }
    pub fn offset_value(&self) -> Option<usize> {
        self.offset
    }

    /// Deterministic text form of the query, the basis of result caching.
    pub fn signature(&self) -> String {
        self.to_string()
    }
    pub fn fingerprint(&self) -> u64 {
        seahash::hash(self.signature().as_bytes())
    }
}

impl fmt::Display for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let select = if self.select.is_empty() {
            "*".to_owned()
        } else {
            self.select.join(", ")
        };
        write!(f, "SELECT {select}")?;
        if let Some((table, alias)) = &self.from {
            write!(f, " FROM {table} AS {alias}")?;
        }
        for join in &self.joins {
            let kind = match join.kind {
                JoinKind::Inner => "JOIN",
                JoinKind::Left => "LEFT JOIN",
            };
            write!(f, " {kind} {} AS {} ON {}", join.table, join.alias, join.on)?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {filter}")?;
        }
        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|(c, d)| format!("{c} {}", if *d == Direction::Asc { "ASC" } else { "DESC" }))
                .collect();
            write!(f, " ORDER BY {}", order.join(", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " OFFSET {offset}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_queries_share_a_fingerprint() {
        let a = QueryBuilder::new()
            .from("cron", "c")
            .filter(Predicate::eq("c.name", "daily-sync"))
            .limit(1);
        let b = QueryBuilder::new()
            .from("cron", "c")
            .filter(Predicate::eq("c.name", "daily-sync"))
            .limit(1);
        assert_eq!(a.fingerprint(), b.fingerprint());
        let c = a.clone().offset(1);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn int_and_text_literals_differ() {
        let a = QueryBuilder::new().from("t", "t").filter(Predicate::eq("id", 1));
        let b = QueryBuilder::new().from("t", "t").filter(Predicate::eq("id", "1"));
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn null_never_matches_equality() {
        let p = Predicate::eq("a", 1);
        assert!(!p.evaluate(&|_| None));
        assert!(Predicate::IsNull("a".into()).evaluate(&|_| None));
    }

    #[test]
    fn unqualified_strips_aliases() {
        let p = Predicate::eq("c.owner", 3).and(Predicate::IsNull("c.deleted".into()));
        assert_eq!(p.unqualified().to_string(), "(owner = int'3') AND (deleted IS NULL)");
    }
}
