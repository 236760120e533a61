//! Modelplus – declared models, equality indices and lazy queries on top of a
//! minimal key-value blob store.
//!
//! A model is a named set of typed fields. Each saved [`record::Record`] lives
//! in the store as one flat attribute blob under `<Namespace>:<id>`, and every
//! indexed field keeps a set of ids per stored value so that equality filters
//! stay consistent with the data. Everything above the store contract
//! (filtering, ordering, indexing, locking) is built here.
//!
//! ## Modules
//! * [`schema`] – [`schema::Field`] descriptors, [`schema::Schema`] composition
//!   and the frozen [`schema::Registry`].
//! * [`datatype`] – [`datatype::Value`] and the [`datatype::FieldKind`] variants
//!   with their storage typecasts.
//! * [`store`] – the [`store::Store`] contract, scoped [`store::Batch`] writes
//!   and the memory and SQLite backends.
//! * [`record`] – the write path: validate, assign id, persist, index.
//! * [`indexer`] – index entries and per-record index membership.
//! * [`modelset`] – immutable chainable queries resolved lazily and cached.
//! * [`mutex`] – optimistic per-record lock with bounded retries.
//! * [`config`] – backend selection read with the `config` crate.
//!
//! ## Quick Start
//! ```
//! use modelplus::{Database, Field, Registry, Schema, Settings};
//!
//! let person = Schema::builder("Person")
//!     .field(Field::string("name").required())
//!     .field(Field::counter("visits"))
//!     .build()
//!     .unwrap();
//! let registry = Registry::builder().register(person).build().unwrap();
//! let db = Database::open(&Settings::default(), registry).unwrap();
//!
//! let people = db.objects("Person").unwrap();
//! people.create([("name", "Granny")]).unwrap();
//! people.create([("name", "Clark")]).unwrap();
//!
//! let grannies = people.filter("name", "Granny");
//! assert_eq!(grannies.len().unwrap(), 1);
//! assert_eq!(people.all().len().unwrap(), 2);
//!
//! let granny = grannies.first().unwrap().unwrap();
//! granny.incr("visits", 2).unwrap();
//! assert_eq!(granny.counter("visits").unwrap(), 2);
//! ```
//!
//! ## Consistency
//! Blob replacement, list replacement and index maintenance of one save are
//! queued on a single batch. Old index entries are always removed before new
//! ones are added. Nothing spans more than one record, and two unguarded
//! concurrent saves of the same record may interleave; use
//! [`record::Record::mutex`] around such critical sections.

pub mod config;
pub mod database;
pub mod datatype;
pub mod error;
pub mod indexer;
pub mod key;
pub mod modelset;
pub mod mutex;
pub mod record;
pub mod schema;
pub mod store;

pub use config::{BackendSettings, LockSettings, Settings};
pub use database::Database;
pub use datatype::{FieldKind, Value};
pub use error::{ModelplusError, Result};
pub use key::Key;
pub use modelset::ModelSet;
pub use mutex::{Mutex, MutexGuard};
pub use record::Record;
pub use schema::{Field, FieldError, Registry, RegistryBuilder, Schema, SchemaBuilder};
pub use store::{Batch, MemoryStore, SqliteStore, Store};
