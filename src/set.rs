//! Typed, uniqueKey-indexed collections.
//!
//! A set is a graph node whose model is a [`crate::model::TypeKind::Set`]. Its
//! members are kept in insertion order next to an index by uniqueKey, so adding
//! an element equal to one already present is a no-op. Sets own their members
//! as children unless their model is detached.

use std::cmp::Ordering;
use std::sync::LazyLock;

use crate::error::{EntigraphError, Result};
use crate::graph::{Graph, Handle, HandleIndex};

static NO_MEMBERS: LazyLock<HandleIndex> = LazyLock::new(HandleIndex::new);

/// Mutable view over one set node.
pub struct ObjectSet<'g> {
    graph: &'g mut Graph,
    handle: Handle,
}

impl Graph {
    /// Mutable set operations; fails when `handle` is not a collection.
    pub fn object_set(&mut self, handle: Handle) -> Result<ObjectSet<'_>> {
        if !self.is_collection(handle) {
            return Err(EntigraphError::Internal(format!(
                "{} is not a collection",
                self.type_name(handle)
            )));
        }
        Ok(ObjectSet {
            graph: self,
            handle,
        })
    }

    /// Read access to the members of a set, empty for anything else.
    pub fn elements(&self, handle: Handle) -> Vec<Handle> {
        self.members(handle)
            .map(|m| m.handles().to_vec())
            .unwrap_or_default()
    }

    /// Adds a member, registering it as a child when the set owns its members.
    /// A member that is already present under its key is left untouched.
    pub(crate) fn insert_member(&mut self, set: Handle, element: Handle, own: bool) -> bool {
        let key = self.unique_key(element);
        let added = match self.members_mut(set) {
            Some(members) => members.push(key, element),
            None => false,
        };
        if added {
            self.hold(set, element);
        }
        if added && own && self.model(set).owns_children {
            self.adopt(set, element);
        }
        added
    }

    /// Element type check against the set's element type and its variants.
    pub(crate) fn accepts_member(&self, set: Handle, element: Handle) -> bool {
        let model = self.model(set);
        let element_type = self.type_name(element);
        model.element_type() == Some(element_type) || model.variants.iter().any(|v| v == element_type)
    }
}

impl ObjectSet<'_> {
    pub fn handle(&self) -> Handle {
        self.handle
    }
    fn members(&self) -> &HandleIndex {
        self.graph.members(self.handle).unwrap_or(&NO_MEMBERS)
    }
    pub fn len(&self) -> usize {
        self.members().len()
    }
    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }
    pub fn handles(&self) -> Vec<Handle> {
        self.members().handles().to_vec()
    }

    fn check(&self, elements: &[Handle]) -> Result<()> {
        for element in elements {
            if !self.graph.accepts_member(self.handle, *element) {
                return Err(EntigraphError::Internal(format!(
                    "{} does not accept elements of type {}",
                    self.graph.type_name(self.handle),
                    self.graph.type_name(*element)
                )));
            }
        }
        Ok(())
    }

    /// Adds every element not yet present; all elements are checked before
    /// any is added. Returns how many were added.
    pub fn add(&mut self, elements: &[Handle]) -> Result<usize> {
        self.check(elements)?;
        let mut added = 0;
        for element in elements {
            if self.graph.insert_member(self.handle, *element, true) {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Removes elements by uniqueKey, releasing ownership of the stored instance.
    pub fn remove(&mut self, elements: &[Handle]) -> usize {
        let mut removed = 0;
        for element in elements {
            let key = self.graph.unique_key(*element);
            let stored = self
                .graph
                .members_mut(self.handle)
                .and_then(|m| m.remove_key(&key));
            if let Some(stored) = stored {
                self.release(stored);
                removed += 1;
            }
        }
        removed
    }

    fn release(&mut self, element: Handle) {
        if self.graph.parent(element) == Some(self.handle) {
            self.graph.remove_child(self.handle, element);
            self.graph.set_parent(element, None);
        }
    }

    /// True when every element is present by uniqueKey.
    pub fn contains(&self, elements: &[Handle]) -> bool {
        elements
            .iter()
            .all(|e| self.members().contains_key(&self.graph.unique_key(*e)))
    }

    /// Upserts by uniqueKey: an element replacing an equal one takes its
    /// position, anything else is appended.
    pub fn replace(&mut self, elements: &[Handle]) -> Result<()> {
        self.check(elements)?;
        for element in elements {
            let key = self.graph.unique_key(*element);
            let displaced = self.members().get(&key);
            if displaced == Some(*element) {
                continue;
            }
            if let Some(old) = displaced {
                self.release(old);
            }
            if let Some(members) = self.graph.members_mut(self.handle) {
                members.replace(key, *element);
            }
            self.graph.hold(self.handle, *element);
            if self.graph.model(self.handle).owns_children {
                self.graph.adopt(self.handle, *element);
            }
        }
        Ok(())
    }

    pub fn get_by_unique_key(&self, key: &str) -> Option<Handle> {
        self.members().get(key)
    }
    pub fn first(&self) -> Option<Handle> {
        self.members().handles().first().copied()
    }
    pub fn last(&self) -> Option<Handle> {
        self.members().handles().last().copied()
    }
    /// Up to `count` elements starting at `start`, in order.
    pub fn slice(&self, start: usize, count: usize) -> Vec<Handle> {
        self.members()
            .handles()
            .iter()
            .skip(start)
            .take(count)
            .copied()
            .collect()
    }

    /// Stable sort of the member order; the key index is unaffected.
    pub fn sort_by<F>(&mut self, mut compare: F)
    where
        F: FnMut(&Graph, Handle, Handle) -> Ordering,
    {
        let mut order = self.handles();
        let graph: &Graph = &*self.graph;
        order.sort_by(|a, b| compare(graph, *a, *b));
        if let Some(members) = self.graph.members_mut(self.handle) {
            members.reorder(order);
        }
    }

    /// Copies the other set's properties where this set has none loaded,
    /// then adds every element not yet present.
    pub fn merge_from_other_set(&mut self, other: Handle) -> Result<()> {
        if other == self.handle {
            return Ok(());
        }
        if !self.graph.is_collection(other) {
            return Err(EntigraphError::Internal(format!(
                "cannot merge {} into a set",
                self.graph.type_name(other)
            )));
        }
        let field_count = self.graph.model(self.handle).fields.len();
        if self.graph.model(other).fields.len() == field_count {
            for index in 0..field_count {
                if !self.graph.slot_at(self.handle, index).is_loaded() {
                    let theirs = self.graph.slot_at(other, index).clone();
                    if theirs.is_loaded() {
                        self.graph.set_slot(self.handle, index, theirs);
                    }
                }
            }
        }
        let elements = self.graph.elements(other);
        self.add(&elements)?;
        Ok(())
    }
}
