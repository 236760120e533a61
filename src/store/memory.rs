//! In-process hashed tables, the store used for tests and embedding.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use super::{Blob, Store, WriteOp};
use crate::error::{ModelplusError, Result};
use crate::key::Key;
use crate::schema::NameHasher;

#[derive(Default)]
struct Tables {
    // namespace -> id -> blob
    blobs: HashMap<String, BTreeMap<String, Blob>, NameHasher>,
    sets: HashMap<String, BTreeSet<String>, NameHasher>,
    lists: HashMap<String, Vec<String>, NameHasher>,
    markers: HashMap<String, String, NameHasher>,
}

/// Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|e| ModelplusError::Lock(e.to_string()))
    }
    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|e| ModelplusError::Lock(e.to_string()))
    }
}

impl Store for MemoryStore {
    fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let mut tables = self.write()?;
        tables.blobs.entry(namespace.to_string()).or_default();
        Ok(())
    }

    fn list_ids(&self, namespace: &str) -> Result<Vec<String>> {
        let tables = self.read()?;
        Ok(tables
            .blobs
            .get(namespace)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn exists(&self, key: &Key) -> Result<bool> {
        let (namespace, id) = key.split_record()?;
        let tables = self.read()?;
        Ok(tables
            .blobs
            .get(&namespace)
            .is_some_and(|table| table.contains_key(&id)))
    }

    fn get_blob(&self, key: &Key) -> Result<Option<Blob>> {
        let (namespace, id) = key.split_record()?;
        let tables = self.read()?;
        Ok(tables
            .blobs
            .get(&namespace)
            .and_then(|table| table.get(&id))
            .cloned())
    }

    fn get_list(&self, key: &Key) -> Result<Vec<String>> {
        let tables = self.read()?;
        Ok(tables.lists.get(key.as_str()).cloned().unwrap_or_default())
    }

    fn members(&self, key: &Key) -> Result<BTreeSet<String>> {
        let tables = self.read()?;
        Ok(tables.sets.get(key.as_str()).cloned().unwrap_or_default())
    }

    fn get_counter(&self, key: &Key, field: &str) -> Result<i64> {
        match self.get_blob(key)?.and_then(|blob| blob.get(field).cloned()) {
            Some(stored) => stored.parse().map_err(|_| ModelplusError::DataCorruption {
                message: format!("counter {} of {} holds {:?}", field, key, stored),
            }),
            None => Ok(0),
        }
    }

    fn incr_by(&self, key: &Key, field: &str, delta: i64) -> Result<i64> {
        let (namespace, id) = key.split_record()?;
        let mut tables = self.write()?;
        let blob = tables
            .blobs
            .entry(namespace)
            .or_default()
            .entry(id)
            .or_default();
        let current: i64 = match blob.get(field) {
            Some(stored) => stored.parse().map_err(|_| ModelplusError::DataCorruption {
                message: format!("counter {} of {} holds {:?}", field, key, stored),
            })?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| ModelplusError::DataCorruption {
                message: format!("counter {} of {} overflows adding {}", field, key, delta),
            })?;
        blob.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    fn get_marker(&self, key: &Key) -> Result<Option<String>> {
        let tables = self.read()?;
        Ok(tables.markers.get(key.as_str()).cloned())
    }

    fn swap_marker(&self, key: &Key, expected: Option<&str>, value: &str) -> Result<bool> {
        let mut tables = self.write()?;
        if tables.markers.get(key.as_str()).map(String::as_str) != expected {
            return Ok(false);
        }
        tables
            .markers
            .insert(key.as_str().to_string(), value.to_string());
        Ok(true)
    }

    fn delete_marker(&self, key: &Key) -> Result<()> {
        let mut tables = self.write()?;
        tables.markers.remove(key.as_str());
        Ok(())
    }

    fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
        // resolve every record key first so a bad key leaves the tables untouched
        let mut records = Vec::new();
        for op in &ops {
            if let WriteOp::DeleteBlob(key) | WriteOp::SetBlob(key, _) = op {
                records.push(key.split_record()?);
            }
        }
        let mut records = records.into_iter();
        let mut tables = self.write()?;
        for op in ops {
            trace!(?op, "memory apply");
            match op {
                WriteOp::DeleteBlob(_) => {
                    if let Some((namespace, id)) = records.next() {
                        if let Some(table) = tables.blobs.get_mut(&namespace) {
                            table.remove(&id);
                        }
                    }
                }
                WriteOp::SetBlob(_, blob) => {
                    if let Some((namespace, id)) = records.next() {
                        tables.blobs.entry(namespace).or_default().insert(id, blob);
                    }
                }
                WriteOp::DeleteList(key) => {
                    tables.lists.remove(key.as_str());
                }
                WriteOp::SetList(key, items) => {
                    tables.lists.insert(key.as_str().to_string(), items);
                }
                WriteOp::AddMember(key, member) => {
                    tables
                        .sets
                        .entry(key.as_str().to_string())
                        .or_default()
                        .insert(member);
                }
                WriteOp::RemoveMember(key, member) => {
                    let emptied = match tables.sets.get_mut(key.as_str()) {
                        Some(set) => {
                            set.remove(&member);
                            set.is_empty()
                        }
                        None => false,
                    };
                    if emptied {
                        tables.sets.remove(key.as_str());
                    }
                }
                WriteOp::DeleteSet(key) => {
                    tables.sets.remove(key.as_str());
                }
            }
        }
        Ok(())
    }

    fn flush_all(&self) -> Result<()> {
        let mut tables = self.write()?;
        *tables = Tables::default();
        Ok(())
    }
}
