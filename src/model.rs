//! Per-type metadata: the declared properties of entities, value objects and
//! sets, and the lazy-load descriptors that say how a property is populated on
//! first access.
//!
//! Models are declared once with the builders below and registered in a
//! [`crate::registry::Registry`]. The same metadata drives row mapping,
//! validation, structural (de)serialization and schema generation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

use crate::graph::{Graph, Handle};
use crate::value::{ScalarKind, Value};

/// Name of the identifier column every entity table carries.
pub const ID_COLUMN: &str = "id";

// ------------- Types -------------
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Entity,
    ValueObject,
    Set { element: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    Scalar(ScalarKind),
    /// A single nested domain object (entity or value object).
    Object(String),
    /// A typed collection; the name is the set type, not the element type.
    Set(String),
}

impl FieldType {
    pub fn semantic_name(&self) -> String {
        match self {
            FieldType::Scalar(kind) => kind.name().to_owned(),
            FieldType::Object(name) => name.clone(),
            FieldType::Set(name) => format!("set<{name}>"),
        }
    }
}

/// How a resolved related object is wired into the ownership graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    None,
    /// The resolved value becomes a child of the current object.
    Child,
    /// The current object becomes a child of the resolved value.
    Parent,
}

// ------------- Lazy-load descriptors -------------
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadMethod {
    /// Many-to-one: load the target whose id is stored in `property` of the current object.
    ById { property: String },
    /// One-to-many: load every target row whose `column` holds the current object's id.
    ByReference { column: String },
    /// Many-to-many: read `join` rows where `source_column` is the current id and
    /// load the targets named by `target_column`.
    Through {
        join: String,
        source_column: String,
        target_column: String,
    },
    /// A loader registered under this name in the registry.
    Custom(String),
}

pub type ScopePredicate = Arc<dyn Fn(&Graph, Handle) -> bool + Send + Sync>;

/// Gates result caching for a lazy-load source, evaluated against the current object.
#[derive(Clone)]
pub enum CacheScope {
    /// Only cache once the current entity has an identifier.
    Persisted,
    PropertyEquals(String, Value),
    Predicate(ScopePredicate),
}

impl CacheScope {
    pub fn allows(&self, graph: &Graph, handle: Handle) -> bool {
        match self {
            CacheScope::Persisted => graph.id(handle).is_some(),
            CacheScope::PropertyEquals(property, expected) => graph
                .property(handle, property)
                .is_some_and(|actual| actual.loosely_equals(expected)),
            CacheScope::Predicate(predicate) => predicate(graph, handle),
        }
    }
}

impl fmt::Debug for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CacheScope::Persisted => write!(f, "Persisted"),
            CacheScope::PropertyEquals(p, v) => write!(f, "PropertyEquals({p}, {v})"),
            CacheScope::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LazyLoad {
    pub repository: String,
    pub method: LoadMethod,
    pub relation: Relation,
    pub cacheable: bool,
    pub cache_scopes: Vec<CacheScope>,
    /// Property that must hold a non-null value before the source is consulted.
    pub required_property: Option<String>,
}

impl LazyLoad {
    fn new(repository: &str, method: LoadMethod) -> Self {
        Self {
            repository: repository.to_owned(),
            method,
            relation: Relation::None,
            cacheable: true,
            cache_scopes: Vec::new(),
            required_property: None,
        }
    }
    pub fn by_id(repository: &str, property: &str) -> Self {
        let mut lazy = Self::new(
            repository,
            LoadMethod::ById {
                property: property.to_owned(),
            },
        );
        lazy.required_property = Some(property.to_owned());
        lazy
    }
    pub fn by_reference(repository: &str, column: &str) -> Self {
        Self::new(
            repository,
            LoadMethod::ByReference {
                column: column.to_owned(),
            },
        )
    }
    pub fn through(repository: &str, join: &str, source_column: &str, target_column: &str) -> Self {
        Self::new(
            repository,
            LoadMethod::Through {
                join: join.to_owned(),
                source_column: source_column.to_owned(),
                target_column: target_column.to_owned(),
            },
        )
    }
    pub fn custom(repository: &str, loader: &str) -> Self {
        Self::new(repository, LoadMethod::Custom(loader.to_owned()))
    }
    pub fn as_child(mut self) -> Self {
        self.relation = Relation::Child;
        self
    }
    pub fn as_parent(mut self) -> Self {
        self.relation = Relation::Parent;
        self
    }
    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }
    pub fn cache_scope(mut self, scope: CacheScope) -> Self {
        self.cache_scopes.push(scope);
        self
    }
    pub fn requires(mut self, property: &str) -> Self {
        self.required_property = Some(property.to_owned());
        self
    }
}

/// Instantiates an empty related object on first access; no repository involved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LazyInstance {
    pub type_name: String,
    pub relation: Relation,
}

// ------------- Fields -------------
#[derive(Clone, Debug)]
pub struct FieldModel {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub choices: Vec<Value>,
    /// Column (or inline column prefix for value objects); `None` when not persisted.
    pub column: Option<String>,
    pub visible: bool,
    /// Encryption scope whose password protects this column.
    pub encrypted: Option<String>,
    pub pattern: Option<Regex>,
    pub lazy: Vec<LazyLoad>,
    pub lazy_instance: Option<LazyInstance>,
    /// Resolve during row mapping instead of on first access.
    pub eager: bool,
}

impl FieldModel {
    fn new(name: &str, field_type: FieldType, column: Option<String>) -> Self {
        Self {
            name: name.to_owned(),
            field_type,
            nullable: true,
            choices: Vec::new(),
            column,
            visible: true,
            encrypted: None,
            pattern: None,
            lazy: Vec::new(),
            lazy_instance: None,
            eager: false,
        }
    }
    pub fn scalar(name: &str, kind: ScalarKind) -> Self {
        Self::new(name, FieldType::Scalar(kind), Some(name.to_owned()))
    }
    /// A related domain object that is not stored in the owner's row.
    pub fn object(name: &str, type_name: &str) -> Self {
        Self::new(name, FieldType::Object(type_name.to_owned()), None)
    }
    /// A value object stored inline as `<name>_<column>` columns of the owner's row.
    pub fn embedded(name: &str, type_name: &str) -> Self {
        Self::new(name, FieldType::Object(type_name.to_owned()), Some(name.to_owned()))
    }
    pub fn set(name: &str, set_type: &str) -> Self {
        Self::new(name, FieldType::Set(set_type.to_owned()), None)
    }
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
    pub fn transient(mut self) -> Self {
        self.column = None;
        self
    }
    pub fn column(mut self, column: &str) -> Self {
        self.column = Some(column.to_owned());
        self
    }
    pub fn encrypted(mut self, scope: &str) -> Self {
        self.encrypted = Some(scope.to_owned());
        self
    }
    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }
    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }
    pub fn lazy(mut self, source: LazyLoad) -> Self {
        self.lazy.push(source);
        self
    }
    pub fn lazy_instance(mut self, type_name: &str, relation: Relation) -> Self {
        self.lazy_instance = Some(LazyInstance {
            type_name: type_name.to_owned(),
            relation,
        });
        self
    }
    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }
    pub fn is_lazy(&self) -> bool {
        !self.lazy.is_empty() || self.lazy_instance.is_some()
    }
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.field_type {
            FieldType::Scalar(kind) => Some(kind),
            _ => None,
        }
    }
    /// Target type for object and set fields.
    pub fn target_type(&self) -> Option<&str> {
        match &self.field_type {
            FieldType::Object(name) | FieldType::Set(name) => Some(name),
            FieldType::Scalar(_) => None,
        }
    }
}

// ------------- Type models -------------
#[derive(Clone, Debug)]
pub struct TypeModel {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<FieldModel>,
    pub id_kind: ScalarKind,
    /// Value objects listing key fields get a content-derived unique key.
    pub key_fields: Vec<String>,
    /// Concrete element types a polymorphic set accepts.
    pub variants: Vec<String>,
    /// Sets own their elements as children unless detached.
    pub owns_children: bool,
    index: HashMap<String, usize>,
}

impl TypeModel {
    fn new(name: &str, kind: TypeKind) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            fields: Vec::new(),
            id_kind: ScalarKind::Int,
            key_fields: Vec::new(),
            variants: Vec::new(),
            owns_children: true,
            index: HashMap::new(),
        }
    }
    pub fn entity(name: &str) -> Self {
        Self::new(name, TypeKind::Entity)
    }
    pub fn value_object(name: &str) -> Self {
        Self::new(name, TypeKind::ValueObject)
    }
    pub fn set(name: &str, element: &str) -> Self {
        Self::new(
            name,
            TypeKind::Set {
                element: element.to_owned(),
            },
        )
    }
    pub fn field(mut self, field: FieldModel) -> Self {
        self.index.insert(field.name.clone(), self.fields.len());
        self.fields.push(field);
        self
    }
    pub fn text_ids(mut self) -> Self {
        self.id_kind = ScalarKind::Text;
        self
    }
    pub fn key_fields(mut self, fields: &[&str]) -> Self {
        self.key_fields = fields.iter().map(|f| (*f).to_owned()).collect();
        self
    }
    pub fn variants(mut self, variants: &[&str]) -> Self {
        self.variants = variants.iter().map(|v| (*v).to_owned()).collect();
        self
    }
    pub fn detached(mut self) -> Self {
        self.owns_children = false;
        self
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
    pub fn get_field(&self, name: &str) -> Option<&FieldModel> {
        self.field_index(name).map(|i| &self.fields[i])
    }
    pub fn is_entity(&self) -> bool {
        self.kind == TypeKind::Entity
    }
    pub fn is_value_object(&self) -> bool {
        self.kind == TypeKind::ValueObject
    }
    pub fn is_set(&self) -> bool {
        matches!(self.kind, TypeKind::Set { .. })
    }
    pub fn element_type(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Set { element } => Some(element),
            _ => None,
        }
    }
    /// Field whose persisted column is `column`.
    pub fn field_by_column(&self, column: &str) -> Option<&FieldModel> {
        self.fields.iter().find(|f| f.column.as_deref() == Some(column))
    }

    /// Queryable description of the declared properties.
    pub fn properties(&self) -> Vec<PropertyInfo> {
        let mut properties = Vec::with_capacity(self.fields.len() + 1);
        if self.is_entity() {
            properties.push(PropertyInfo {
                name: ID_COLUMN.to_owned(),
                semantic_type: self.id_kind.name().to_owned(),
                nullable: true,
                choices: Vec::new(),
                lazy: false,
            });
        }
        properties.extend(self.fields.iter().filter(|f| f.visible).map(|f| PropertyInfo {
            name: f.name.clone(),
            semantic_type: f.field_type.semantic_name(),
            nullable: f.nullable,
            choices: f.choices.iter().map(Value::to_json).collect(),
            lazy: f.is_lazy(),
        }));
        properties
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PropertyInfo {
    pub name: String,
    pub semantic_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<serde_json::Value>,
    pub lazy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_expose_type_nullability_and_choices() {
        let model = TypeModel::entity("Cron")
            .field(FieldModel::scalar("name", ScalarKind::Text).not_null())
            .field(FieldModel::scalar("status", ScalarKind::Text).choices(["active", "paused"]))
            .field(FieldModel::scalar("secret", ScalarKind::Text).hidden());
        let props = model.properties();
        assert_eq!(props.len(), 3);
        assert_eq!(props[0].name, "id");
        assert!(!props[1].nullable);
        assert_eq!(props[2].choices.len(), 2);
    }

    #[test]
    fn by_id_sources_require_their_foreign_key() {
        let lazy = LazyLoad::by_id("accounts", "account_id").as_parent();
        assert_eq!(lazy.required_property.as_deref(), Some("account_id"));
        assert_eq!(lazy.relation, Relation::Parent);
    }
}
