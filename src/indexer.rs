//! Equality indices from `(field, value)` to the ids holding that value.
//!
//! An index entry is the set stored under `<Namespace>:<field>:<value>`. Each
//! record also keeps the set `<Namespace>:<id>:_indices` naming every entry it
//! was added to, so stale entries can be removed without knowing which values
//! the record held when it was last saved.

use std::collections::BTreeSet;

use tracing::trace;

use crate::datatype::{FieldKind, Value};
use crate::error::{ModelplusError, Result};
use crate::key::Key;
use crate::record::Record;
use crate::schema::Schema;
use crate::store::{Batch, Store};

pub const MEMBERSHIP: &str = "_indices";

pub struct Indexer<'a> {
    store: &'a dyn Store,
    schema: &'a Schema,
}

impl<'a> Indexer<'a> {
    pub fn new(store: &'a dyn Store, schema: &'a Schema) -> Self {
        Self { store, schema }
    }

    pub fn index_key(&self, field: &str, stored: &str) -> Key {
        self.schema.key().child(field).child(stored)
    }
    pub fn membership_key(record_key: &Key) -> Key {
        record_key.child(MEMBERSHIP)
    }

    // one storage value per element for lists, none for null
    fn stored_values(&self, record: &Record, field: &str) -> Result<Vec<String>> {
        if !self.schema.is_indexed(field) {
            return Err(ModelplusError::AttributeNotIndexed {
                model: self.schema.name().to_string(),
                field: field.to_string(),
            });
        }
        let value = record.value_of(field)?;
        let kind = self.schema.field(field).map(|f| match f.kind() {
            FieldKind::List(element) => element.as_ref(),
            kind => kind,
        });
        let render = |v: &Value| match kind {
            Some(kind) => kind.typecast_for_storage(v),
            None => v.to_storage(),
        };
        Ok(match &value {
            Value::List(items) => items.iter().filter_map(render).collect(),
            other => render(other).into_iter().collect(),
        })
    }

    /// Every index entry the record belongs to given its current values.
    pub fn index_keys(&self, record: &Record) -> Result<Vec<Key>> {
        let mut keys = Vec::new();
        for field in self.schema.indices() {
            for stored in self.stored_values(record, field)? {
                keys.push(self.index_key(field, &stored));
            }
        }
        Ok(keys)
    }

    pub fn add_to_index(&self, batch: &mut Batch, record: &Record, field: &str) -> Result<()> {
        let id = record.id()?;
        let membership = Self::membership_key(&record.key()?);
        for stored in self.stored_values(record, field)? {
            let entry = self.index_key(field, &stored);
            trace!(index = %entry, id, "add to index");
            batch.add_member(membership.clone(), entry.as_str());
            batch.add_member(entry, id);
        }
        Ok(())
    }

    pub fn remove_from_index(&self, batch: &mut Batch, record: &Record, field: &str) -> Result<()> {
        let id = record.id()?;
        let membership = Self::membership_key(&record.key()?);
        for stored in self.stored_values(record, field)? {
            let entry = self.index_key(field, &stored);
            trace!(index = %entry, id, "remove from index");
            batch.remove_member(entry.clone(), id);
            batch.remove_member(membership.clone(), entry.as_str());
        }
        Ok(())
    }

    /// Removes the record from every entry it is recorded in, then adds it to
    /// the entries for its current values. Removal is always queued first.
    pub fn rebuild_indices(&self, batch: &mut Batch, record: &Record) -> Result<()> {
        let key = record.key()?;
        self.purge(batch, &key, record.id()?)?;
        for field in self.schema.indices() {
            self.add_to_index(batch, record, field)?;
        }
        Ok(())
    }

    /// Queues removal of `id` from all the entries its membership set names.
    pub fn purge(&self, batch: &mut Batch, record_key: &Key, id: &str) -> Result<()> {
        let membership = Self::membership_key(record_key);
        let entries = self.store.members(&membership)?;
        trace!(id, entries = entries.len(), "purge indices");
        for entry in entries {
            batch.remove_member(Key::from_raw(entry), id);
        }
        batch.delete_set(membership);
        Ok(())
    }

    /// Ids currently indexed under `field = value`.
    pub fn members(&self, field: &str, value: &Value) -> Result<BTreeSet<String>> {
        if !self.schema.is_indexed(field) {
            return Err(ModelplusError::AttributeNotIndexed {
                model: self.schema.name().to_string(),
                field: field.to_string(),
            });
        }
        let stored = match self.schema.field(field).map(|f| f.kind()) {
            Some(FieldKind::List(element)) => element.typecast_for_storage(value),
            Some(kind) => kind.typecast_for_storage(value),
            None => value.to_storage(),
        };
        match stored {
            Some(stored) => self.store.members(&self.index_key(field, &stored)),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Entries the stored membership set says the record belongs to.
    pub fn memberships(&self, record_key: &Key) -> Result<BTreeSet<String>> {
        self.store.members(&Self::membership_key(record_key))
    }
}
