//! Entigraph – an entity graph and lazy-load repository engine over a relational store.
//!
//! Domain objects live in a per-request object graph owned by a [`Session`]:
//! * An *entity* is identified by an `id` column in its repository's table.
//! * A *value object* has no identity of its own and is stored inline in its owner's row.
//! * A *set* is an ordered, duplicate-free collection keyed by each element's uniqueKey.
//!
//! Every object is addressed by a [`Handle`] into the [`Graph`] arena. Properties
//! are [`Lazy`] slots: those declared with lazy-load sources are resolved from
//! their repositories on first read, combined when several sources answer, and
//! wired into the parent/child ownership tree.
//!
//! ## Modules
//! * [`model`] and [`registry`] – per-type metadata, declared once and shared.
//! * [`graph`], [`set`] and [`clone`] – the arena, sets, cloning and merging.
//! * [`lazy`] – the lazy-load protocol.
//! * [`repository`] – find with result cache, depth-bounded update, delete.
//! * [`engine`] and [`persist`] – the relational engine contract, an in-memory
//!   engine, and the SQLite engine.
//! * [`rights`], [`translation`] and [`crypto`] – access restrictions,
//!   per-language overlays and column encryption.
//! * [`validate`] and [`serialize`] – structured validation and the structural
//!   (JSON) representation.
//!
//! ## Quick Start
//! ```
//! use entigraph::{FieldModel, Registry, Repository, ScalarKind, Session, TypeModel};
//!
//! let registry = Registry::builder()
//!     .register(TypeModel::entity("Cron").field(FieldModel::scalar("name", ScalarKind::Text).not_null()))
//!     .register(TypeModel::set("Crons", "Cron"))
//!     .repository(Repository::new("crons", "Cron", "Crons", "cron"))
//!     .build()?;
//! let mut session = Session::new(registry)?;
//! let cron = session.create("Cron")?;
//! session.set(cron, "name", "nightly")?;
//! session.save(cron)?;
//! assert_eq!(session.graph().unique_key(cron), "Cron_1");
//! # Ok::<(), entigraph::EntigraphError>(())
//! ```

pub mod clone;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lazy;
pub mod model;
pub mod persist;
pub mod query;
pub mod registry;
pub mod repository;
pub mod rights;
pub mod serialize;
pub mod session;
pub mod set;
pub mod telemetry;
pub mod translation;
pub mod validate;
pub mod value;

pub use clone::CallPath;
pub use config::EngineConfig;
pub use error::{EntigraphError, Result};
pub use graph::{Graph, Handle, PersistenceState};
pub use lazy::{Lazy, LoadRequest};
pub use model::{CacheScope, FieldModel, LazyLoad, Relation, TypeModel};
pub use query::{Predicate, QueryBuilder};
pub use registry::Registry;
pub use repository::Repository;
pub use session::Session;
pub use set::ObjectSet;
pub use validate::{ValidationError, ValidationErrors};
pub use value::{Id, ScalarKind, Value};
