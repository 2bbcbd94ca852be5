mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{queries, seed, session};
use entigraph::engine::{Row, UpsertOptions};
use entigraph::model::Relation;
use entigraph::{
    EntigraphError, FieldModel, Handle, Lazy, LazyLoad, Registry, Repository, ScalarKind, Session,
    TypeModel, Value,
};

#[test]
fn executions_load_once_and_are_owned_by_the_cron() {
    common::init_logging();
    let (mut s, counter) = session();
    let seeded = seed(&mut s);
    let cron = s.find_by_id("Cron", seeded.cron.clone()).expect("find").expect("cron");

    let before = queries(&counter);
    let executions = s.get_object(cron, "executions").unwrap().expect("set");
    assert_eq!(queries(&counter), before + 1);
    assert_eq!(s.graph().elements(executions).len(), 2);
    assert!(s.graph().is_child_of(executions, cron));

    // memoized: no further query
    let again = s.get_object(cron, "executions").unwrap();
    assert_eq!(again, Some(executions));
    assert_eq!(queries(&counter), before + 1);
}

#[test]
fn a_transient_owner_gets_an_empty_set_without_a_query() {
    let (mut s, counter) = session();
    let cron = s.create("Cron").unwrap();
    let before = queries(&counter);
    let executions = s.get_object(cron, "executions").unwrap().expect("set");
    assert!(s.graph().elements(executions).is_empty());
    assert_eq!(s.graph().type_name(executions), "CronExecutions");
    assert_eq!(queries(&counter), before);
}

#[test]
fn a_persisted_cron_without_executions_gets_an_empty_set() {
    let (mut s, counter) = session();
    let cron = s.create("Cron").unwrap();
    s.set(cron, "name", "daily-sync").unwrap();
    s.update(cron, 0).unwrap();

    let before = queries(&counter);
    let executions = s.get_object(cron, "executions").unwrap().expect("set");
    assert!(s.graph().elements(executions).is_empty());
    assert!(s.graph().is_set(cron, "executions"));
    s.get(cron, "executions").unwrap();
    assert_eq!(queries(&counter), before + 1);
}

#[test]
fn an_unset_foreign_key_resolves_to_null() {
    let (mut s, counter) = session();
    let execution = s.create("CronExecution").unwrap();
    let before = queries(&counter);
    assert_eq!(s.get(execution, "cron").unwrap(), Value::Null);
    assert_eq!(queries(&counter), before);
    assert!(s.graph().is_set(execution, "cron"));
}

#[test]
fn parent_relation_fills_the_back_reference() {
    let (mut s, _) = session();
    let seeded = seed(&mut s);
    let cron = s.find_by_id("Cron", seeded.cron.clone()).unwrap().unwrap();
    let account = s.get_object(cron, "account").unwrap().expect("account");

    assert_eq!(s.graph().id(account), Some(&seeded.account));
    assert_eq!(s.graph().parent(cron), Some(account));
    assert_eq!(s.graph().property(account, "primary_cron"), Some(&Value::Object(cron)));
}

#[test]
fn identity_map_answers_known_entities_without_a_query() {
    let (mut s, counter) = session();
    let seeded = seed(&mut s);
    let cron = s.find_by_id("Cron", seeded.cron.clone()).unwrap().unwrap();
    let executions = s.get_object(cron, "executions").unwrap().unwrap();
    let first = s.graph().elements(executions)[0];

    let before = queries(&counter);
    let owner = s.get_object(first, "cron").unwrap();
    assert_eq!(owner, Some(cron));
    assert_eq!(queries(&counter), before);
}

// ------------- Multiple sources -------------
fn team_registry() -> Arc<Registry> {
    Registry::builder()
        .register(
            TypeModel::entity("Team")
                .field(FieldModel::scalar("name", ScalarKind::Text))
                .field(
                    FieldModel::set("members", "People")
                        .lazy(LazyLoad::by_reference("people", "team_id"))
                        .lazy(LazyLoad::by_reference("contractors", "team_id")),
                ),
        )
        .register(TypeModel::set("Teams", "Team"))
        .register(
            TypeModel::entity("Person")
                .field(FieldModel::scalar("name", ScalarKind::Text))
                .field(FieldModel::scalar("team_id", ScalarKind::Int)),
        )
        .register(TypeModel::set("People", "Person"))
        .repository(Repository::new("teams", "Team", "Teams", "team"))
        .repository(Repository::new("people", "Person", "People", "person"))
        .repository(Repository::new("contractors", "Person", "People", "contractor"))
        .build()
        .expect("registry")
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(c, v)| ((*c).to_owned(), v.clone())).collect()
}

#[test]
fn sets_from_several_sources_are_merged() {
    let mut s = Session::new(team_registry()).unwrap();
    let options = UpsertOptions::default();
    let engine = s.engine_mut();
    engine.upsert("team", &row(&[("name", "core".into())]), &options).unwrap();
    engine.upsert("person", &row(&[("name", "ann".into()), ("team_id", 1.into())]), &options).unwrap();
    engine.upsert("person", &row(&[("name", "bo".into()), ("team_id", 1.into())]), &options).unwrap();
    engine
        .upsert(
            "contractor",
            &row(&[("id", 10.into()), ("name", "cy".into()), ("team_id", 1.into())]),
            &options,
        )
        .unwrap();

    let team = s.find_by_id("Team", 1i64).unwrap().unwrap();
    let members = s.get_object(team, "members").unwrap().unwrap();
    let names: Vec<Value> = s
        .graph()
        .elements(members)
        .into_iter()
        .map(|h| s.graph().property(h, "name").cloned().unwrap())
        .collect();
    assert_eq!(names, vec![Value::from("ann"), Value::from("bo"), Value::from("cy")]);
}

// ------------- Custom loaders and lazy instances -------------
fn report_registry(calls: Arc<AtomicUsize>, failures: usize) -> Arc<Registry> {
    Registry::builder()
        .register(
            TypeModel::entity("Report")
                .field(FieldModel::scalar("title", ScalarKind::Text))
                .field(
                    FieldModel::scalar("summary", ScalarKind::Text)
                        .transient()
                        .lazy(LazyLoad::custom("reports", "summarize")),
                )
                .field(FieldModel::object("settings", "Settings").lazy_instance("Settings", Relation::Child)),
        )
        .register(TypeModel::set("Reports", "Report"))
        .register(TypeModel::value_object("Settings").field(FieldModel::scalar("theme", ScalarKind::Text)))
        .repository(Repository::new("reports", "Report", "Reports", "report"))
        .loader("summarize", move |session: &mut Session, handle: Handle, _request| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            if call < failures {
                return Err(EntigraphError::NotFound("summary source offline".into()));
            }
            let title = session.get(handle, "title")?;
            Ok(Some(Value::from(format!("about {title}"))))
        })
        .build()
        .expect("registry")
}

#[test]
fn custom_loaders_compute_the_value() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut s = Session::new(report_registry(Arc::clone(&calls), 0)).unwrap();
    let report = s.create("Report").unwrap();
    s.set(report, "title", "uptime").unwrap();
    assert_eq!(s.get(report, "summary").unwrap(), Value::from("about uptime"));
    s.get(report, "summary").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn a_failed_load_is_remembered_until_unloaded() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut s = Session::new(report_registry(Arc::clone(&calls), 1)).unwrap();
    let report = s.create("Report").unwrap();
    s.set(report, "title", "latency").unwrap();

    assert!(matches!(s.get(report, "summary"), Err(EntigraphError::NotFound(_))));
    assert!(matches!(s.graph().slot(report, "summary"), Some(Lazy::Failed(_))));
    let remembered = s.get(report, "summary").unwrap_err();
    assert!(matches!(remembered, EntigraphError::Internal(ref m) if m.contains("earlier load")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    s.graph_mut().unload(report, "summary").unwrap();
    assert_eq!(s.get(report, "summary").unwrap(), Value::from("about latency"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn lazy_instances_are_created_empty_and_owned() {
    let mut s = Session::new(report_registry(Arc::new(AtomicUsize::new(0)), 0)).unwrap();
    let report = s.create("Report").unwrap();
    let settings = s.get_object(report, "settings").unwrap().expect("settings");
    assert_eq!(s.graph().type_name(settings), "Settings");
    assert_eq!(s.graph().parent(settings), Some(report));
    assert!(s.graph().loaded_properties(settings).is_empty());
    assert_eq!(s.get_object(report, "settings").unwrap(), Some(settings));
}
