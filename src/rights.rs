//! Row-level access control. Each hook narrows a query in place and answers
//! whether the operation may proceed at all.

use std::collections::{HashMap, HashSet};

use crate::query::{Predicate, QueryBuilder};
use crate::value::Value;

pub trait Rights: Send + Sync {
    fn apply_read_restriction(&self, query: &mut QueryBuilder, table: &str) -> bool;
    fn apply_update_restriction(&self, query: &mut QueryBuilder, table: &str) -> bool;
    fn apply_delete_restriction(&self, query: &mut QueryBuilder, table: &str) -> bool;
    fn current_principal_has_roles(&self, roles: &[&str]) -> bool;
}

/// Grants everything; the default when a session is built without rights.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Rights for AllowAll {
    fn apply_read_restriction(&self, _query: &mut QueryBuilder, _table: &str) -> bool {
        true
    }
    fn apply_update_restriction(&self, _query: &mut QueryBuilder, _table: &str) -> bool {
        true
    }
    fn apply_delete_restriction(&self, _query: &mut QueryBuilder, _table: &str) -> bool {
        true
    }
    fn current_principal_has_roles(&self, _roles: &[&str]) -> bool {
        true
    }
}

/// Rights of one principal: its roles, per-table ownership filters, and
/// roles required before a table may be written.
#[derive(Clone, Debug, Default)]
pub struct PrincipalRights {
    roles: HashSet<String>,
    // table -> (column, value) every visible row must carry
    owned: HashMap<String, (String, Value)>,
    write_roles: HashMap<String, Vec<String>>,
    read_only: bool,
}

impl PrincipalRights {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
    /// Rows of `table` are visible and writable only where `column` equals `value`.
    pub fn owns(mut self, table: &str, column: &str, value: impl Into<Value>) -> Self {
        self.owned
            .insert(table.to_owned(), (column.to_owned(), value.into()));
        self
    }
    pub fn requires_for_write(mut self, table: &str, roles: &[&str]) -> Self {
        self.write_roles.insert(
            table.to_owned(),
            roles.iter().map(|r| (*r).to_owned()).collect(),
        );
        self
    }
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    fn restrict(&self, query: &mut QueryBuilder, table: &str) {
        if let Some((column, value)) = self.owned.get(table) {
            let column = match query.base_alias() {
                Some(alias) => format!("{alias}.{column}"),
                None => column.clone(),
            };
            query.restrict(Predicate::Eq(column, value.clone()));
        }
    }

    fn may_write(&self, table: &str) -> bool {
        if self.read_only {
            return false;
        }
        self.write_roles
            .get(table)
            .is_none_or(|required| required.iter().all(|r| self.roles.contains(r)))
    }
}

impl Rights for PrincipalRights {
    fn apply_read_restriction(&self, query: &mut QueryBuilder, table: &str) -> bool {
        self.restrict(query, table);
        true
    }
    fn apply_update_restriction(&self, query: &mut QueryBuilder, table: &str) -> bool {
        if !self.may_write(table) {
            return false;
        }
        self.restrict(query, table);
        true
    }
    fn apply_delete_restriction(&self, query: &mut QueryBuilder, table: &str) -> bool {
        self.apply_update_restriction(query, table)
    }
    fn current_principal_has_roles(&self, roles: &[&str]) -> bool {
        roles.iter().all(|r| self.roles.contains(*r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_tables_are_filtered_on_the_base_alias() {
        let rights = PrincipalRights::new(["editor"]).owns("doc", "tenant", 4);
        let mut query = QueryBuilder::new().from("doc", "d");
        assert!(rights.apply_read_restriction(&mut query, "doc"));
        assert_eq!(query.predicate(), Some(&Predicate::eq("d.tenant", 4)));
    }

    #[test]
    fn writes_need_the_required_roles() {
        let rights = PrincipalRights::new(["viewer"]).requires_for_write("doc", &["editor"]);
        let mut query = QueryBuilder::new().from("doc", "d");
        assert!(!rights.apply_update_restriction(&mut query, "doc"));
        assert!(rights.apply_update_restriction(&mut query, "other"));
        assert!(rights.current_principal_has_roles(&["viewer"]));
        assert!(!rights.current_principal_has_roles(&["viewer", "editor"]));
    }
}
