mod common;

use common::{seed, session};
use entigraph::value::Id;
use entigraph::{CallPath, EntigraphError, Handle, Lazy, Session, Value};

fn execution(s: &mut Session, id: i64, status: &str) -> Handle {
    let execution = s.create("CronExecution").unwrap();
    s.graph_mut().set_id(execution, Some(Id::Int(id)));
    s.set(execution, "status", status).unwrap();
    execution
}

fn cron_with_executions(s: &mut Session, name: &str, executions: &[(i64, &str)]) -> (Handle, Handle) {
    let cron = s.create("Cron").unwrap();
    s.set(cron, "name", name).unwrap();
    let set = s.create("CronExecutions").unwrap();
    for (id, status) in executions {
        let e = execution(s, *id, status);
        s.graph_mut().object_set(set).unwrap().add(&[e]).unwrap();
    }
    s.set(cron, "executions", set).unwrap();
    s.graph_mut().adopt(cron, set);
    (cron, set)
}

#[test]
fn clones_are_deep_and_keep_identity_out_of_the_identity_map() {
    let (mut s, _) = session();
    let seeded = seed(&mut s);
    let cron = s.find_by_id("Cron", seeded.cron.clone()).unwrap().unwrap();
    let executions = s.get_object(cron, "executions").unwrap().unwrap();

    let copy = s.clone_object(cron);
    assert_ne!(copy, cron);
    assert_eq!(s.graph().id(copy), Some(&seeded.cron));
    assert!(s.graph().equals(copy, cron));
    assert_eq!(s.graph().lookup("Cron", &seeded.cron), Some(cron));

    let copied = s.graph().property(copy, "executions").and_then(Value::as_handle).unwrap();
    assert_ne!(copied, executions);
    assert!(s.graph().is_child_of(copied, copy));
    let originals = s.graph().elements(executions);
    let copies = s.graph().elements(copied);
    assert_eq!(copies.len(), 2);
    assert!(copies.iter().all(|c| !originals.contains(c)));
    assert!(copies.iter().all(|c| s.graph().parent(*c) == Some(copied)));
}

#[test]
fn unloaded_properties_stay_unloaded_in_the_clone() {
    let (mut s, _) = session();
    let seeded = seed(&mut s);
    let cron = s.find_by_id("Cron", seeded.cron.clone()).unwrap().unwrap();
    let copy = s.clone_object(cron);
    assert!(matches!(s.graph().slot(copy, "executions"), Some(Lazy::Unloaded)));
    // the copy resolves on its own
    let executions = s.get_object(copy, "executions").unwrap().unwrap();
    assert_eq!(s.graph().elements(executions).len(), 2);
}

#[test]
fn merge_takes_values_but_never_nulls() {
    let (mut s, _) = session();
    let (target, _) = cron_with_executions(&mut s, "old", &[]);
    s.set(target, "schedule", "0 * * * *").unwrap();
    let (other, _) = cron_with_executions(&mut s, "new", &[]);
    s.set(other, "schedule", Value::Null).unwrap();
    s.set(other, "status", "paused").unwrap();

    s.graph_mut()
        .overwrite_properties_from_other_object(target, other, &mut CallPath::new(), false)
        .unwrap();
    let g = s.graph();
    assert_eq!(g.property(target, "name"), Some(&Value::from("new")));
    assert_eq!(g.property(target, "schedule"), Some(&Value::from("0 * * * *")));
    assert_eq!(g.property(target, "status"), Some(&Value::from("paused")));
}

#[test]
fn merge_combines_set_members_by_key() {
    let (mut s, _) = session();
    let (target, target_set) = cron_with_executions(&mut s, "a", &[(1, "ok")]);
    let (other, _) = cron_with_executions(&mut s, "b", &[(1, "failed"), (2, "ok")]);
    let first = s.graph().elements(target_set)[0];

    s.graph_mut()
        .overwrite_properties_from_other_object(target, other, &mut CallPath::new(), true)
        .unwrap();
    let members = s.graph().elements(target_set);
    assert_eq!(members.len(), 2);
    assert_eq!(members[0], first);
    assert_eq!(s.graph().property(first, "status"), Some(&Value::from("failed")));
    assert_eq!(s.graph().parent(members[1]), Some(target_set));
}

#[test]
fn cloned_takeovers_are_copies_owned_by_the_target() {
    let (mut s, _) = session();
    let target = s.create("Cron").unwrap();
    let other = s.create("Cron").unwrap();
    let window = s.create("Window").unwrap();
    s.set(window, "from_hour", 2).unwrap();
    s.set(window, "to_hour", 4).unwrap();
    s.set(other, "window", window).unwrap();
    s.graph_mut().adopt(other, window);

    s.graph_mut()
        .overwrite_properties_from_other_object(target, other, &mut CallPath::new(), true)
        .unwrap();
    let taken = s.graph().property(target, "window").and_then(Value::as_handle).unwrap();
    assert_ne!(taken, window);
    assert_eq!(s.graph().unique_key(taken), "Window:2|4");
    assert_eq!(s.graph().parent(taken), Some(target));
    assert_eq!(s.graph().parent(window), Some(other));
}

#[test]
fn merging_different_types_is_an_internal_error() {
    let (mut s, _) = session();
    let cron = s.create("Cron").unwrap();
    let tag = s.create("Tag").unwrap();
    let result = s
        .graph_mut()
        .overwrite_properties_from_other_object(cron, tag, &mut CallPath::new(), false);
    assert!(matches!(result, Err(EntigraphError::Internal(_))));
}
