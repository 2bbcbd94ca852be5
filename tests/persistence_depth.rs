mod common;

use common::{seed, session};
use entigraph::{EntigraphError, Handle, PersistenceState, Session, Value};

fn account_with_cron(s: &mut Session) -> (Handle, Handle, Handle) {
    let account = s.create("Account").unwrap();
    s.set(account, "name", "ops").unwrap();
    let crons = s.create("Crons").unwrap();
    let cron = s.create("Cron").unwrap();
    s.set(cron, "name", "hourly").unwrap();
    s.graph_mut().object_set(crons).unwrap().add(&[cron]).unwrap();
    s.set(account, "crons", crons).unwrap();
    (account, crons, cron)
}

#[test]
fn depth_zero_writes_only_the_root() {
    let (mut s, _) = session();
    let (account, _, cron) = account_with_cron(&mut s);
    s.update(account, 0).expect("update");
    assert_eq!(s.graph().persistence_state(account), PersistenceState::Persisted);
    assert_eq!(s.graph().persistence_state(cron), PersistenceState::Transient);
}

#[test]
fn depth_one_writes_dependents_with_the_new_foreign_key() {
    let (mut s, _) = session();
    let (account, crons, cron) = account_with_cron(&mut s);
    s.update(account, 1).expect("update");

    let account_id = s.graph().id(account).cloned().expect("account id");
    let cron_id = s.graph().id(cron).cloned().expect("cron id");
    assert_eq!(s.graph().property(cron, "account_id"), Some(&account_id.to_value()));
    // the set's index follows the new uniqueKey
    let key = format!("Cron_{cron_id}");
    assert_eq!(s.graph().members(crons).unwrap().get(&key), Some(cron));
    assert!(s.graph().members(crons).unwrap().is_consistent());

    s.reset();
    let account = s.find_by_id("Account", account_id).unwrap().unwrap();
    let crons = s.get_object(account, "crons").unwrap().unwrap();
    assert_eq!(s.graph().elements(crons).len(), 1);
}

#[test]
fn depth_one_stops_after_one_level() {
    let (mut s, _) = session();
    let (account, _, cron) = account_with_cron(&mut s);
    let executions = s.create("CronExecutions").unwrap();
    let execution = s.create("CronExecution").unwrap();
    s.set(execution, "status", "ok").unwrap();
    s.graph_mut().object_set(executions).unwrap().add(&[execution]).unwrap();
    s.set(cron, "executions", executions).unwrap();

    s.update(account, 1).expect("update");
    assert_eq!(s.graph().persistence_state(account), PersistenceState::Persisted);
    assert_eq!(s.graph().persistence_state(cron), PersistenceState::Persisted);
    assert_eq!(s.graph().persistence_state(execution), PersistenceState::Transient);
}

#[test]
fn every_set_holding_an_entity_follows_its_new_key() {
    let (mut s, _) = session();
    let cron = s.create("Cron").unwrap();
    s.set(cron, "name", "shared").unwrap();
    let first = s.create("Crons").unwrap();
    let second = s.create("Crons").unwrap();
    s.graph_mut().object_set(first).unwrap().add(&[cron]).unwrap();
    s.graph_mut().object_set(second).unwrap().add(&[cron]).unwrap();

    s.update(cron, 0).unwrap();
    let key = s.graph().unique_key(cron);
    for set in [first, second] {
        let mut crons = s.graph_mut().object_set(set).unwrap();
        assert_eq!(crons.get_by_unique_key(&key), Some(cron));
        assert!(crons.contains(&[cron]));
        assert_eq!(crons.add(&[cron]).unwrap(), 0);
        assert_eq!(crons.handles(), vec![cron]);
    }
}

#[test]
fn referenced_entities_are_written_first() {
    let (mut s, _) = session();
    let account = s.create("Account").unwrap();
    s.set(account, "name", "billing").unwrap();
    let cron = s.create("Cron").unwrap();
    s.set(cron, "name", "invoices").unwrap();
    s.set(cron, "account", account).unwrap();

    s.update(cron, 1).expect("update");
    let account_id = s.graph().id(account).cloned().expect("account persisted");
    assert_eq!(s.graph().property(cron, "account_id"), Some(&account_id.to_value()));
}

#[test]
fn referenced_entities_stay_transient_at_depth_zero() {
    let (mut s, _) = session();
    let account = s.create("Account").unwrap();
    s.set(account, "name", "billing").unwrap();
    let cron = s.create("Cron").unwrap();
    s.set(cron, "name", "invoices").unwrap();
    s.set(cron, "account", account).unwrap();

    s.update(cron, 0).expect("update");
    assert!(s.graph().id(cron).is_some());
    assert!(s.graph().id(account).is_none());
    assert!(!s.graph().is_set(cron, "account_id"));
}

#[test]
fn join_rows_are_written_for_many_to_many() {
    let (mut s, _) = session();
    let cron = s.create("Cron").unwrap();
    s.set(cron, "name", "backup").unwrap();
    let tags = s.create("Tags").unwrap();
    for label in ["db", "weekly"] {
        let tag = s.create("Tag").unwrap();
        s.set(tag, "label", label).unwrap();
        s.graph_mut().object_set(tags).unwrap().add(&[tag]).unwrap();
    }
    s.set(cron, "tags", tags).unwrap();
    s.update(cron, 1).expect("update");
    // writing again does not duplicate the links
    s.update(cron, 1).expect("second update");
    let cron_id = s.graph().id(cron).cloned().unwrap();

    s.reset();
    let links = s.repository("cron_tags").unwrap().find_all(&mut s).unwrap();
    assert_eq!(s.graph().elements(links).len(), 2);
    let cron = s.find_by_id("Cron", cron_id).unwrap().unwrap();
    let tags = s.get_object(cron, "tags").unwrap().unwrap();
    let mut labels: Vec<String> = s
        .graph()
        .elements(tags)
        .into_iter()
        .filter_map(|t| s.graph().property(t, "label").and_then(Value::as_str).map(str::to_owned))
        .collect();
    labels.sort();
    assert_eq!(labels, ["db", "weekly"]);
}

#[test]
fn scalar_entities_read_back_as_written() {
    let (mut s, _) = session();
    let cron = s.create("Cron").unwrap();
    s.set(cron, "name", "daily-sync").unwrap();
    s.set(cron, "schedule", "0 3 * * *").unwrap();
    s.set(cron, "status", "paused").unwrap();
    s.update(cron, 0).unwrap();
    let written = s.to_structure(cron);
    let id = s.graph().id(cron).cloned().unwrap();

    s.reset();
    let cron = s.find_by_id("Cron", id).unwrap().unwrap();
    let read = s.to_structure(cron);
    for (property, value) in written.as_object().unwrap() {
        assert_eq!(&read[property], value, "{property} differs");
    }
}

#[test]
fn value_objects_persist_inline() {
    let (mut s, _) = session();
    let cron = s.create("Cron").unwrap();
    s.set(cron, "name", "window").unwrap();
    let window = s.create("Window").unwrap();
    s.set(window, "from_hour", 1).unwrap();
    s.set(window, "to_hour", 5).unwrap();
    s.set(cron, "window", window).unwrap();
    s.update(cron, 0).unwrap();
    let id = s.graph().id(cron).cloned().unwrap();

    s.reset();
    let cron = s.find_by_id("Cron", id).unwrap().unwrap();
    let window = s.graph().property(cron, "window").and_then(Value::as_handle).expect("window");
    assert_eq!(s.graph().unique_key(window), "Window:1|5");
    assert_eq!(s.graph().parent(window), Some(cron));
}

#[test]
fn rewriting_keeps_the_embedded_value_object() {
    let (mut s, _) = session();
    let cron = s.create("Cron").unwrap();
    s.set(cron, "name", "window").unwrap();
    let window = s.create("Window").unwrap();
    s.set(window, "from_hour", 1).unwrap();
    s.set(window, "to_hour", 5).unwrap();
    s.set(cron, "window", window).unwrap();
    s.graph_mut().adopt(cron, window);
    s.update(cron, 0).unwrap();

    // rewriting an existing row reads the stored columns back in
    for _ in 0..2 {
        s.update(cron, 0).unwrap();
        assert_eq!(s.graph().property(cron, "window"), Some(&Value::Object(window)));
    }
    assert_eq!(s.graph().children(cron).get("Window:1|5"), Some(window));
    assert_eq!(s.graph().children(cron).len(), 1);
    assert_eq!(s.graph().parent(window), Some(cron));
}

#[test]
fn invalid_graphs_are_rejected_with_paths() {
    let (mut s, _) = session();
    let (account, _, cron) = account_with_cron(&mut s);
    s.graph_mut().unload(cron, "name").unwrap();
    s.set(cron, "status", "sleeping").unwrap();
    s.set(cron, "schedule", "whenever").unwrap();

    let error = s.update(account, 1).unwrap_err();
    let errors = error.validation_errors().expect("validation errors");
    assert!(errors.at("crons[0].name").is_some());
    assert!(errors.at("crons[0].status").is_some());
    assert!(errors.at("crons[0].schedule").is_some());
    assert!(s.graph().id(account).is_none());
}

#[test]
fn delete_removes_the_row_and_marks_the_instance() {
    let (mut s, _) = session();
    let seeded = seed(&mut s);
    let execution = s
        .find_by_id("CronExecution", seeded.executions[0].clone())
        .unwrap()
        .unwrap();
    s.delete(execution).expect("delete");
    assert_eq!(s.graph().persistence_state(execution), PersistenceState::Deleted);
    assert!(s.find_by_id("CronExecution", seeded.executions[0].clone()).unwrap().is_none());

    assert!(matches!(s.delete(execution), Err(EntigraphError::NotFound(_))));
    assert!(matches!(s.update(execution, 0), Err(EntigraphError::NotFound(_))));
}

#[test]
fn deleting_a_transient_entity_is_a_bad_request() {
    let (mut s, _) = session();
    let cron = s.create("Cron").unwrap();
    assert!(matches!(s.delete(cron), Err(EntigraphError::BadRequest { .. })));
}
