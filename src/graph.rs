//! The object arena. Every entity, value object and set of a session lives here
//! and is addressed by a [`Handle`]. Parents are handle back-references, child
//! collections are ordered, uniqueKey-indexed handle lists owned by the node.
//!
//! The graph is deliberately not kept doubly consistent: a node's parent can
//! be repointed without removing it from the previous parent's children, and
//! cycles are allowed. Traversals guard themselves with a
//! [`crate::clone::CallPath`].

use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

// used to keep the one-to-one mapping between persisted rows and their instances
use bimap::BiMap;
use seahash::SeaHasher;

use crate::error::{EntigraphError, Result};
use crate::lazy::Lazy;
use crate::model::{FieldModel, TypeModel};
use crate::value::{Id, Value};

pub type KeyHasher = BuildHasherDefault<SeaHasher>;

// ------------- Handle -------------
/// Stable address of a domain object within one [`Graph`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Handle(u32);

impl Handle {
    pub const fn index(self) -> u32 {
        self.0
    }
}
impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// (type name, identifier) of a persisted entity.
pub type EntityKey = (String, Id);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistenceState {
    Transient,
    Persisted,
    Deleted,
}

// ------------- HandleIndex -------------
/// Insertion-ordered handles with a uniqueKey index. Backs both set members
/// and child collections; the sequence and the index always hold the same
/// handles.
#[derive(Clone, Debug, Default)]
pub struct HandleIndex {
    order: Vec<Handle>,
    keys: HashMap<String, Handle, KeyHasher>,
}

impl HandleIndex {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.order.len()
    }
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
    pub fn handles(&self) -> &[Handle] {
        &self.order
    }
    pub fn get(&self, key: &str) -> Option<Handle> {
        self.keys.get(key).copied()
    }
    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }
    pub fn contains(&self, handle: Handle) -> bool {
        self.order.contains(&handle)
    }
    pub fn position(&self, handle: Handle) -> Option<usize> {
        self.order.iter().position(|h| *h == handle)
    }
    /// Appends unless the key is already present.
    pub(crate) fn push(&mut self, key: String, handle: Handle) -> bool {
        if self.keys.contains_key(&key) {
            return false;
        }
        self.keys.insert(key, handle);
        self.order.push(handle);
        true
    }
    pub(crate) fn remove_key(&mut self, key: &str) -> Option<Handle> {
        let handle = self.keys.remove(key)?;
        if let Some(pos) = self.position(handle) {
            self.order.remove(pos);
        }
        Some(handle)
    }
    /// Upsert by key, keeping the position of an existing key. Returns the displaced handle.
    pub(crate) fn replace(&mut self, key: String, handle: Handle) -> Option<Handle> {
        match self.keys.insert(key, handle) {
            Some(old) => {
                if let Some(pos) = self.position(old) {
                    self.order[pos] = handle;
                }
                Some(old)
            }
            None => {
                self.order.push(handle);
                None
            }
        }
    }
    /// Moves `handle` from `old` to `new`. When `new` already belongs to
    /// another handle, `handle` leaves the index so keys stay unique.
    pub(crate) fn rekey(&mut self, handle: Handle, old: &str, new: String) {
        if old == new || self.keys.get(old) != Some(&handle) {
            return;
        }
        self.keys.remove(old);
        match self.keys.get(&new) {
            Some(other) if *other != handle => {
                if let Some(pos) = self.position(handle) {
                    self.order.remove(pos);
                }
            }
            _ => {
                self.keys.insert(new, handle);
            }
        }
    }
    pub(crate) fn reorder(&mut self, order: Vec<Handle>) {
        debug_assert_eq!(order.len(), self.order.len());
        self.order = order;
    }
    /// Every sequence element appears exactly once in the index and vice versa.
    pub fn is_consistent(&self) -> bool {
        self.order.len() == self.keys.len() && self.keys.values().all(|h| self.order.contains(h))
    }
}

// ------------- Node -------------
#[derive(Debug)]
pub struct Node {
    model: Arc<TypeModel>,
    id: Option<Id>,
    properties: Vec<Lazy<Value>>,
    parent: Option<Handle>,
    children: HandleIndex,
    members: Option<HandleIndex>,
    // nodes whose children or members have held this node
    holders: Vec<Handle>,
    deleted: bool,
}

// ------------- Graph -------------
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    identity: BiMap<EntityKey, Handle>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    fn node(&self, handle: Handle) -> &Node {
        &self.nodes[handle.0 as usize]
    }
    fn node_mut(&mut self, handle: Handle) -> &mut Node {
        &mut self.nodes[handle.0 as usize]
    }

    /// Creates an instance with every property unloaded, so lazy properties
    /// resolve on their first read.
    pub fn create(&mut self, model: Arc<TypeModel>) -> Handle {
        let handle = Handle(self.nodes.len() as u32);
        let properties = vec![Lazy::Unloaded; model.fields.len()];
        let members = model.is_set().then(HandleIndex::new);
        self.nodes.push(Node {
            model,
            id: None,
            properties,
            parent: None,
            children: HandleIndex::new(),
            members,
            holders: Vec::new(),
            deleted: false,
        });
        handle
    }
    pub fn model(&self, handle: Handle) -> &Arc<TypeModel> {
        &self.node(handle).model
    }
    pub fn type_name(&self, handle: Handle) -> &str {
        &self.node(handle).model.name
    }

    // ------------- Identity -------------
    pub fn id(&self, handle: Handle) -> Option<&Id> {
        self.node(handle).id.as_ref()
    }
    /// Assigns (or clears) the identifier, keeping the identity map and every
    /// index that holds the node under its uniqueKey in step.
    pub fn set_id(&mut self, handle: Handle, id: Option<Id>) {
        let old_key = self.unique_key(handle);
        self.identity.remove_by_right(&handle);
        self.node_mut(handle).id = id;
        self.register_identity(handle);
        self.rekey(handle, &old_key);
    }
    /// Gives `copy` the identifier of `original` without touching the identity map.
    pub(crate) fn copy_identity(&mut self, original: Handle, copy: Handle) {
        let id = self.node(original).id.clone();
        self.node_mut(copy).id = id;
    }
    pub fn lookup(&self, type_name: &str, id: &Id) -> Option<Handle> {
        self.identity
            .get_by_left(&(type_name.to_owned(), id.clone()))
            .copied()
    }
    /// Claims the (type, id) slot unless another live instance holds it;
    /// the first instance of a row stays the one the session hands out.
    pub(crate) fn register_identity(&mut self, handle: Handle) -> bool {
        let node = self.node(handle);
        let (true, Some(id), false) = (node.model.is_entity(), node.id.clone(), node.deleted) else {
            return false;
        };
        let key = (node.model.name.clone(), id);
        match self.identity.get_by_left(&key) {
            Some(holder) => *holder == handle,
            None => {
                self.identity.insert(key, handle);
                true
            }
        }
    }

    /// `Type_id` for identified entities, a content key for keyed value
    /// objects, and an instance token `Type#n` otherwise.
    pub fn unique_key(&self, handle: Handle) -> String {
        let node = self.node(handle);
        let model = &node.model;
        if model.is_entity() {
            if let Some(id) = &node.id {
                return format!("{}_{}", model.name, id);
            }
        } else if !model.key_fields.is_empty() {
            let mut parts = Vec::with_capacity(model.key_fields.len());
            for field in &model.key_fields {
                match self.property(handle, field) {
                    Some(value) => parts.push(value.to_string()),
                    None => return format!("{}{}", model.name, handle),
                }
            }
            return format!("{}:{}", model.name, parts.join("|"));
        }
        format!("{}{}", model.name, handle)
    }
    pub fn equals(&self, a: Handle, b: Handle) -> bool {
        a == b || self.unique_key(a) == self.unique_key(b)
    }
    fn rekey(&mut self, handle: Handle, old_key: &str) {
        let new_key = self.unique_key(handle);
        if new_key == old_key {
            return;
        }
        let holders = self.node(handle).holders.clone();
        for holder in holders {
            let holder = self.node_mut(holder);
            holder.children.rekey(handle, old_key, new_key.clone());
            if let Some(members) = holder.members.as_mut() {
                members.rekey(handle, old_key, new_key.clone());
            }
        }
    }
    /// Records that `holder` indexes `held` by its uniqueKey.
    pub(crate) fn hold(&mut self, holder: Handle, held: Handle) {
        let holders = &mut self.node_mut(held).holders;
        if !holders.contains(&holder) {
            holders.push(holder);
        }
    }

    // ------------- Properties -------------
    fn field_index(&self, handle: Handle, name: &str) -> Result<usize> {
        let model = &self.node(handle).model;
        model.field_index(name).ok_or_else(|| {
            EntigraphError::bad_request(format!("{} has no property '{}'", model.name, name))
        })
    }
    pub fn slot(&self, handle: Handle, name: &str) -> Option<&Lazy<Value>> {
        let node = self.node(handle);
        node.model.field_index(name).map(|i| &node.properties[i])
    }
    pub(crate) fn slot_at(&self, handle: Handle, index: usize) -> &Lazy<Value> {
        &self.node(handle).properties[index]
    }
    /// The value of a loaded property; never triggers a load.
    pub fn property(&self, handle: Handle, name: &str) -> Option<&Value> {
        self.slot(handle, name).and_then(Lazy::loaded)
    }
    pub fn is_set(&self, handle: Handle, name: &str) -> bool {
        self.slot(handle, name).is_some_and(Lazy::is_loaded)
    }
    pub fn set_property(&mut self, handle: Handle, name: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.field_index(handle, name)?;
        self.set_slot(handle, index, Lazy::Loaded(value.into()));
        Ok(())
    }
    /// Returns a property to the unloaded state, so a lazy property resolves again.
    pub fn unload(&mut self, handle: Handle, name: &str) -> Result<()> {
        let index = self.field_index(handle, name)?;
        self.set_slot(handle, index, Lazy::Unloaded);
        Ok(())
    }
    pub(crate) fn set_slot(&mut self, handle: Handle, index: usize, slot: Lazy<Value>) {
        let keyed = {
            let model = &self.node(handle).model;
            !model.key_fields.is_empty() && model.key_fields.contains(&model.fields[index].name)
        };
        let old_key = keyed.then(|| self.unique_key(handle));
        self.node_mut(handle).properties[index] = slot;
        if let Some(old_key) = old_key {
            self.rekey(handle, &old_key);
        }
    }
    /// Loaded properties in declaration order.
    pub fn loaded_properties(&self, handle: Handle) -> Vec<(&FieldModel, &Value)> {
        let node = self.node(handle);
        node.model
            .fields
            .iter()
            .zip(node.properties.iter())
            .filter_map(|(field, slot)| slot.loaded().map(|v| (field, v)))
            .collect()
    }

    // ------------- Ownership -------------
    pub fn parent(&self, handle: Handle) -> Option<Handle> {
        self.node(handle).parent
    }
    pub fn set_parent(&mut self, child: Handle, parent: Option<Handle>) {
        self.node_mut(child).parent = parent;
    }
    pub fn children(&self, handle: Handle) -> &HandleIndex {
        &self.node(handle).children
    }
    /// Registers `child` in the child collection of `parent`, keyed by the
    /// child's uniqueKey as it stands now.
    pub fn add_child(&mut self, parent: Handle, child: Handle) -> bool {
        let key = self.unique_key(child);
        self.hold(parent, child);
        self.node_mut(parent).children.push(key, child)
    }
    pub fn remove_child(&mut self, parent: Handle, child: Handle) -> bool {
        let key = self.unique_key(child);
        let children = &mut self.node_mut(parent).children;
        if children.get(&key) == Some(child) {
            children.remove_key(&key);
            true
        } else {
            false
        }
    }
    /// Parent first, then child registration: keys may depend on the parent.
    pub fn adopt(&mut self, parent: Handle, child: Handle) {
        self.set_parent(child, Some(parent));
        self.add_child(parent, child);
    }
    pub fn is_child_of(&self, child: Handle, parent: Handle) -> bool {
        self.node(parent).children.contains(child)
    }

    // ------------- Sets -------------
    pub fn is_collection(&self, handle: Handle) -> bool {
        self.node(handle).members.is_some()
    }
    pub fn members(&self, handle: Handle) -> Option<&HandleIndex> {
        self.node(handle).members.as_ref()
    }
    pub(crate) fn members_mut(&mut self, handle: Handle) -> Option<&mut HandleIndex> {
        self.node_mut(handle).members.as_mut()
    }

    // ------------- Lifecycle -------------
    pub fn persistence_state(&self, handle: Handle) -> PersistenceState {
        let node = self.node(handle);
        if node.deleted {
            PersistenceState::Deleted
        } else if node.id.is_some() {
            PersistenceState::Persisted
        } else {
            PersistenceState::Transient
        }
    }
    pub fn is_deleted(&self, handle: Handle) -> bool {
        self.node(handle).deleted
    }
    /// The instance stays addressable as a dangling reference.
    pub(crate) fn mark_deleted(&mut self, handle: Handle) {
        self.identity.remove_by_right(&handle);
        self.node_mut(handle).deleted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldModel;
    use crate::value::ScalarKind;

    fn tag_model() -> Arc<TypeModel> {
        Arc::new(
            TypeModel::value_object("Tag")
                .field(FieldModel::scalar("label", ScalarKind::Text))
                .key_fields(&["label"]),
        )
    }

    #[test]
    fn entity_keys_follow_identifier_assignment() {
        let mut graph = Graph::new();
        let model = Arc::new(TypeModel::entity("A"));
        let owner = graph.create(Arc::new(TypeModel::entity("Owner")));
        let a = graph.create(model);
        graph.adopt(owner, a);
        assert_eq!(graph.unique_key(a), format!("A{a}"));
        graph.set_id(a, Some(Id::Int(7)));
        assert_eq!(graph.unique_key(a), "A_7");
        assert_eq!(graph.children(owner).get("A_7"), Some(a));
        assert_eq!(graph.lookup("A", &Id::Int(7)), Some(a));
        assert!(graph.children(owner).is_consistent());
    }

    #[test]
    fn a_second_instance_never_takes_over_the_identity_map() {
        let mut graph = Graph::new();
        let model = Arc::new(TypeModel::entity("A"));
        let first = graph.create(Arc::clone(&model));
        graph.set_id(first, Some(Id::Int(1)));
        let second = graph.create(model);
        graph.set_id(second, Some(Id::Int(1)));
        assert_eq!(graph.lookup("A", &Id::Int(1)), Some(first));

        graph.mark_deleted(first);
        assert!(graph.register_identity(second));
        assert_eq!(graph.lookup("A", &Id::Int(1)), Some(second));
    }

    #[test]
    fn keyed_value_objects_rekey_on_content_change() {
        let mut graph = Graph::new();
        let owner = graph.create(Arc::new(TypeModel::entity("Owner")));
        let tag = graph.create(tag_model());
        graph.set_property(tag, "label", "red").unwrap();
        graph.adopt(owner, tag);
        graph.set_property(tag, "label", "blue").unwrap();
        assert_eq!(graph.children(owner).get("Tag:blue"), Some(tag));
        assert!(graph.children(owner).get("Tag:red").is_none());
    }

    #[test]
    fn unknown_properties_are_rejected() {
        let mut graph = Graph::new();
        let tag = graph.create(tag_model());
        assert!(graph.set_property(tag, "colour", "red").is_err());
    }
}
