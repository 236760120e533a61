//! The minimal key-value contract every backend satisfies.
//!
//! Records live as flat attribute blobs under `<Namespace>:<id>`. Everything
//! else the core needs (index sets, per-record index membership, list fields
//! and lock markers) is addressed by further colon-joined keys. Writes that
//! belong together are queued on a [`Batch`] and handed to the backend in one
//! [`Store::apply`] call, which applies them in queue order.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::Result;
use crate::key::Key;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage text of every attribute of one record, keyed by field name.
pub type Blob = BTreeMap<String, String>;

#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    DeleteBlob(Key),
    SetBlob(Key, Blob),
    DeleteList(Key),
    SetList(Key, Vec<String>),
    AddMember(Key, String),
    RemoveMember(Key, String),
    DeleteSet(Key),
}

pub trait Store: Send + Sync {
    /// Idempotent lazy creation of whatever the backend needs for a namespace.
    fn ensure_namespace(&self, namespace: &str) -> Result<()>;
    /// All ids currently stored under `namespace`, in no particular order.
    fn list_ids(&self, namespace: &str) -> Result<Vec<String>>;
    fn exists(&self, key: &Key) -> Result<bool>;
    fn get_blob(&self, key: &Key) -> Result<Option<Blob>>;
    fn get_list(&self, key: &Key) -> Result<Vec<String>>;
    fn members(&self, key: &Key) -> Result<BTreeSet<String>>;
    /// Reads a counter field out of a blob, 0 when either is absent.
    fn get_counter(&self, key: &Key, field: &str) -> Result<i64>;
    /// Atomically adds `delta` to a counter field and returns the new value.
    fn incr_by(&self, key: &Key, field: &str, delta: i64) -> Result<i64>;
    fn get_marker(&self, key: &Key) -> Result<Option<String>>;
    /// Writes `value` only if the marker still holds `expected`
    /// (`None` meaning absent). Returns whether the write happened.
    fn swap_marker(&self, key: &Key, expected: Option<&str>, value: &str) -> Result<bool>;
    fn delete_marker(&self, key: &Key) -> Result<()>;
    /// Applies the operations in order. A failure means the batch did not succeed.
    fn apply(&self, ops: Vec<WriteOp>) -> Result<()>;
    /// Destroys everything. Test and ops use only.
    fn flush_all(&self) -> Result<()>;
}

// ------------- Batch -------------
/// A scoped write batch. Operations are only queued until [`Batch::execute`];
/// a batch dropped without executing discards them.
pub struct Batch<'s> {
    store: &'s dyn Store,
    ops: Vec<WriteOp>,
    executed: bool,
}

impl<'s> Batch<'s> {
    pub fn open(store: &'s dyn Store) -> Self {
        Self {
            store,
            ops: Vec::new(),
            executed: false,
        }
    }
    pub fn delete_blob(&mut self, key: Key) -> &mut Self {
        self.ops.push(WriteOp::DeleteBlob(key));
        self
    }
    pub fn set_blob(&mut self, key: Key, blob: Blob) -> &mut Self {
        self.ops.push(WriteOp::SetBlob(key, blob));
        self
    }
    pub fn delete_list(&mut self, key: Key) -> &mut Self {
        self.ops.push(WriteOp::DeleteList(key));
        self
    }
    pub fn set_list(&mut self, key: Key, items: Vec<String>) -> &mut Self {
        self.ops.push(WriteOp::SetList(key, items));
        self
    }
    pub fn add_member(&mut self, key: Key, member: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::AddMember(key, member.into()));
        self
    }
    pub fn remove_member(&mut self, key: Key, member: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::RemoveMember(key, member.into()));
        self
    }
    pub fn delete_set(&mut self, key: Key) -> &mut Self {
        self.ops.push(WriteOp::DeleteSet(key));
        self
    }
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
    pub fn len(&self) -> usize {
        self.ops.len()
    }
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
    /// Flushes every queued operation to the store.
    pub fn execute(mut self) -> Result<()> {
        self.executed = true;
        let ops = std::mem::take(&mut self.ops);
        debug!(ops = ops.len(), "executing batch");
        self.store.apply(ops)
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        if !self.executed && !self.ops.is_empty() {
            debug!(ops = self.ops.len(), "discarding unexecuted batch");
        }
    }
}
