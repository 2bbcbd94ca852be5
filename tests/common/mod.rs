#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use entigraph::engine::{MemoryEngine, RelationalEngine, Row, TableSchema, UpsertOptions};
use entigraph::query::QueryBuilder;
use entigraph::value::Id;
use entigraph::{
    FieldModel, LazyLoad, Registry, Repository, Result, ScalarKind, Session, TypeModel,
};
use regex::Regex;

/// Memory engine that counts the queries it executes, readable from outside
/// the session that owns it.
#[derive(Debug, Default)]
pub struct CountingEngine {
    inner: MemoryEngine,
    executed: Arc<AtomicUsize>,
}

impl CountingEngine {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let executed = Arc::new(AtomicUsize::new(0));
        let engine = Self {
            inner: MemoryEngine::new(),
            executed: Arc::clone(&executed),
        };
        (engine, executed)
    }
}

impl RelationalEngine for CountingEngine {
    fn ensure_table(&mut self, schema: &TableSchema) -> Result<()> {
        self.inner.ensure_table(schema)
    }
    fn execute(&mut self, query: &QueryBuilder) -> Result<Vec<Row>> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(query)
    }
    fn upsert(&mut self, table: &str, row: &Row, options: &UpsertOptions) -> Result<Option<Id>> {
        self.inner.upsert(table, row, options)
    }
    fn remove(&mut self, table: &str, row: &Row) -> Result<bool> {
        self.inner.remove(table, row)
    }
    fn clear(&mut self) {
        self.inner.clear()
    }
}

pub fn queries(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Accounts own crons; crons own executions, reference an account, and carry
/// tags through a join table and an inline schedule window.
pub fn cron_types() -> entigraph::registry::RegistryBuilder {
    Registry::builder()
        .register(
            TypeModel::entity("Account")
                .field(FieldModel::scalar("name", ScalarKind::Text).not_null())
                .field(FieldModel::scalar("secret", ScalarKind::Text).encrypted("accounts").hidden())
                .field(FieldModel::object("primary_cron", "Cron"))
                .field(
                    FieldModel::set("crons", "Crons")
                        .lazy(LazyLoad::by_reference("crons", "account_id").as_child()),
                ),
        )
        .register(TypeModel::set("Accounts", "Account"))
        .register(
            TypeModel::entity("Cron")
                .field(FieldModel::scalar("name", ScalarKind::Text).not_null())
                .field(
                    FieldModel::scalar("schedule", ScalarKind::Text)
                        .pattern(Regex::new(r"^(\S+\s+){4}\S+$").unwrap()),
                )
                .field(FieldModel::scalar("status", ScalarKind::Text).choices(["active", "paused"]))
                .field(FieldModel::scalar("account_id", ScalarKind::Int))
                .field(FieldModel::embedded("window", "Window"))
                .field(
                    FieldModel::object("account", "Account")
                        .lazy(LazyLoad::by_id("accounts", "account_id").as_parent()),
                )
                .field(
                    FieldModel::set("executions", "CronExecutions")
                        .lazy(LazyLoad::by_reference("executions", "cron_id").as_child()),
                )
                .field(
                    FieldModel::set("tags", "Tags")
                        .lazy(LazyLoad::through("tags", "cron_tags", "cron_id", "tag_id")),
                ),
        )
        .register(TypeModel::set("Crons", "Cron"))
        .register(
            TypeModel::value_object("Window")
                .field(FieldModel::scalar("from_hour", ScalarKind::Int))
                .field(FieldModel::scalar("to_hour", ScalarKind::Int))
                .key_fields(&["from_hour", "to_hour"]),
        )
        .register(
            TypeModel::entity("CronExecution")
                .field(FieldModel::scalar("cron_id", ScalarKind::Int))
                .field(FieldModel::scalar("status", ScalarKind::Text).choices(["ok", "failed"]))
                .field(
                    FieldModel::object("cron", "Cron")
                        .lazy(LazyLoad::by_id("crons", "cron_id").as_parent()),
                ),
        )
        .register(TypeModel::set("CronExecutions", "CronExecution"))
        .register(TypeModel::entity("Tag").field(FieldModel::scalar("label", ScalarKind::Text)))
        .register(TypeModel::set("Tags", "Tag"))
        .register(
            TypeModel::entity("CronTag")
                .field(FieldModel::scalar("cron_id", ScalarKind::Int))
                .field(FieldModel::scalar("tag_id", ScalarKind::Int)),
        )
        .register(TypeModel::set("CronTags", "CronTag"))
        .repository(Repository::new("accounts", "Account", "Accounts", "account"))
        .repository(Repository::new("crons", "Cron", "Crons", "cron"))
        .repository(Repository::new("executions", "CronExecution", "CronExecutions", "cron_execution"))
        .repository(Repository::new("tags", "Tag", "Tags", "tag"))
        .repository(Repository::new("cron_tags", "CronTag", "CronTags", "cron_tag"))
}

pub fn registry() -> Arc<Registry> {
    cron_types().build().expect("registry")
}

pub fn session() -> (Session, Arc<AtomicUsize>) {
    let (engine, counter) = CountingEngine::new();
    let session = Session::builder(registry())
        .engine(engine)
        .build()
        .expect("session");
    (session, counter)
}

/// One account with one cron and two executions, all persisted.
pub struct Seeded {
    pub account: Id,
    pub cron: Id,
    pub executions: Vec<Id>,
}

pub fn seed(session: &mut Session) -> Seeded {
    let account = session.create("Account").unwrap();
    session.set(account, "name", "ops").unwrap();
    session.update(account, 0).unwrap();
    let account_id = session.graph().id(account).cloned().unwrap();

    let cron = session.create("Cron").unwrap();
    session.set(cron, "name", "nightly").unwrap();
    session.set(cron, "schedule", "0 3 * * *").unwrap();
    session.set(cron, "status", "active").unwrap();
    session.set(cron, "account_id", account_id.to_value()).unwrap();
    session.update(cron, 0).unwrap();
    let cron_id = session.graph().id(cron).cloned().unwrap();

    let mut executions = Vec::new();
    for status in ["ok", "failed"] {
        let execution = session.create("CronExecution").unwrap();
        session.set(execution, "cron_id", cron_id.to_value()).unwrap();
        session.set(execution, "status", status).unwrap();
        session.update(execution, 0).unwrap();
        executions.push(session.graph().id(execution).cloned().unwrap());
    }
    session.reset();
    Seeded {
        account: account_id,
        cron: cron_id,
        executions,
    }
}

pub fn init_logging() {
    let _ = entigraph::telemetry::init(Some("entigraph=debug"));
}
