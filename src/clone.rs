//! Recursive copy and merge of object graphs.
//!
//! Both walks carry a [`CallPath`] of the instances already entered, so a
//! cyclic graph terminates: an instance met a second time is not walked
//! again.

use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::error::{EntigraphError, Result};
use crate::graph::{Graph, Handle};
use crate::lazy::Lazy;
use crate::value::Value;

// ------------- CallPath -------------
/// Instances visited by one recursive operation.
#[derive(Clone, Debug, Default)]
pub struct CallPath {
    visited: RoaringBitmap,
}

impl CallPath {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn contains(&self, handle: Handle) -> bool {
        self.visited.contains(handle.index())
    }
    /// Marks the instance visited; false when it already was.
    pub fn enter(&mut self, handle: Handle) -> bool {
        self.visited.insert(handle.index())
    }
    pub fn len(&self) -> u64 {
        self.visited.len()
    }
    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }
}

// ------------- Clone -------------
impl Graph {
    pub fn clone_object(&mut self, handle: Handle) -> Handle {
        self.clone_with_path(handle, &mut CallPath::new())
    }

    /// Copies an instance and everything it references. An instance already
    /// on the path is returned as is, so cycles end in shared references.
    /// Unloaded properties stay unloaded in the copy.
    pub fn clone_with_path(&mut self, handle: Handle, path: &mut CallPath) -> Handle {
        if !path.enter(handle) {
            return handle;
        }
        let model = Arc::clone(self.model(handle));
        let copy = self.create(Arc::clone(&model));
        // identity is carried over without claiming the identity map
        self.copy_identity(handle, copy);
        let parent = self.parent(handle);
        self.set_parent(copy, parent);

        for index in 0..model.fields.len() {
            let value = match self.slot_at(handle, index) {
                Lazy::Loaded(value) => value.clone(),
                _ => continue,
            };
            let value = match value {
                Value::Object(target) => {
                    let owned = self.is_child_of(target, handle);
                    let cloned = self.clone_with_path(target, path);
                    if owned && cloned != target {
                        self.adopt(copy, cloned);
                    }
                    Value::Object(cloned)
                }
                other => other,
            };
            self.set_slot(copy, index, Lazy::Loaded(value));
        }

        for element in self.elements(handle) {
            let cloned = self.clone_with_path(element, path);
            // an element met again stays with its original owner
            self.insert_member(copy, cloned, cloned != element);
        }
        copy
    }

    // ------------- Merge -------------
    /// Overwrites `target` with what `other` has: unset properties are taken
    /// over, nested objects of the same type are merged recursively, set
    /// elements are merged by uniqueKey, and a null on the other side never
    /// clears a value. With `clone_properties`, taken-over objects are copies.
    pub fn overwrite_properties_from_other_object(
        &mut self,
        target: Handle,
        other: Handle,
        path: &mut CallPath,
        clone_properties: bool,
    ) -> Result<()> {
        if target == other || !path.enter(target) {
            return Ok(());
        }
        if self.type_name(target) != self.type_name(other) {
            return Err(EntigraphError::Internal(format!(
                "cannot merge {} into {}",
                self.type_name(other),
                self.type_name(target)
            )));
        }
        if self.id(target).is_none() {
            if let Some(id) = self.id(other).cloned() {
                self.set_id(target, Some(id));
            }
        }

        let field_count = self.model(target).fields.len();
        for index in 0..field_count {
            let theirs = match self.slot_at(other, index) {
                Lazy::Loaded(value) => value.clone(),
                _ => continue,
            };
            let mine = self.slot_at(target, index).loaded().cloned();
            match (mine, theirs) {
                (Some(_), Value::Null) => {}
                (Some(Value::Object(mine)), Value::Object(theirs)) if mine == theirs => {}
                (Some(Value::Object(mine)), Value::Object(theirs))
                    if self.type_name(mine) == self.type_name(theirs) =>
                {
                    self.overwrite_properties_from_other_object(mine, theirs, path, clone_properties)?;
                }
                (_, theirs) => {
                    let value = self.take_over(target, other, theirs, clone_properties);
                    self.set_slot(target, index, Lazy::Loaded(value));
                }
            }
        }

        if self.is_collection(target) && self.is_collection(other) {
            self.merge_members(target, other, path, clone_properties)?;
        }
        Ok(())
    }

    fn merge_members(
        &mut self,
        target: Handle,
        other: Handle,
        path: &mut CallPath,
        clone_properties: bool,
    ) -> Result<()> {
        for element in self.elements(other) {
            let key = self.unique_key(element);
            let existing = self.members(target).and_then(|m| m.get(&key));
            match existing {
                Some(mine) if mine == element => {}
                Some(mine) if self.type_name(mine) == self.type_name(element) => {
                    self.overwrite_properties_from_other_object(mine, element, path, clone_properties)?;
                }
                Some(_) => {
                    let incoming = self.maybe_clone(element, clone_properties);
                    self.object_set(target)?.replace(&[incoming])?;
                }
                None => {
                    let incoming = self.maybe_clone(element, clone_properties);
                    self.object_set(target)?.add(&[incoming])?;
                }
            }
        }
        Ok(())
    }

    fn take_over(&mut self, target: Handle, donor: Handle, value: Value, clone: bool) -> Value {
        match value {
            Value::Object(source) => {
                let owned = self.is_child_of(source, donor);
                let taken = self.maybe_clone(source, clone);
                if owned || taken != source {
                    self.adopt(target, taken);
                }
                Value::Object(taken)
            }
            scalar => scalar,
        }
    }

    fn maybe_clone(&mut self, handle: Handle, clone: bool) -> Handle {
        if clone {
            self.clone_object(handle)
        } else {
            handle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldModel, TypeModel};
    use crate::value::ScalarKind;

    fn node_model() -> Arc<TypeModel> {
        Arc::new(
            TypeModel::entity("Node")
                .field(FieldModel::scalar("label", ScalarKind::Text))
                .field(FieldModel::object("next", "Node")),
        )
    }

    #[test]
    fn cycles_terminate_in_shared_references() {
        let mut graph = Graph::new();
        let model = node_model();
        let a = graph.create(Arc::clone(&model));
        let b = graph.create(model);
        graph.set_property(a, "next", b).unwrap();
        graph.set_property(b, "next", a).unwrap();
        let copy = graph.clone_object(a);
        assert_ne!(copy, a);
        let next = graph.property(copy, "next").and_then(Value::as_handle).unwrap();
        assert_ne!(next, b);
        // b's copy points back at the original a, which was already on the path
        assert_eq!(graph.property(next, "next"), Some(&Value::Object(a)));
    }

    #[test]
    fn merge_keeps_values_against_nulls() {
        let mut graph = Graph::new();
        let model = node_model();
        let mine = graph.create(Arc::clone(&model));
        let theirs = graph.create(model);
        graph.set_property(mine, "label", "kept").unwrap();
        graph.set_property(theirs, "label", Value::Null).unwrap();
        graph
            .overwrite_properties_from_other_object(mine, theirs, &mut CallPath::new(), false)
            .unwrap();
        assert_eq!(graph.property(mine, "label"), Some(&Value::from("kept")));
    }
}
