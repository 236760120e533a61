//! Embedded SQLite used as a blob store.
//!
//! Every namespace gets its own table of `(id, blob)` rows where the blob is
//! the JSON rendering of the attribute map. Index sets, list fields and lock
//! markers share three auxiliary tables keyed by the full colon-joined key.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

// used for persistence
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, trace};

use super::{Blob, Store, WriteOp};
use crate::error::{ModelplusError, Result};
use crate::key::{is_identifier, Key};
use crate::schema::NameHasher;

const AUXILIARY: [&str; 3] = ["_modelplus_sets", "_modelplus_lists", "_modelplus_markers"];

pub struct SqliteStore {
    connection: Mutex<Connection>,
    // namespaces whose table is known to exist
    ready: Mutex<HashSet<String, NameHasher>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let connection = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened sqlite file");
        Self::with_connection(connection)
    }
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }
    fn with_connection(connection: Connection) -> Result<Self> {
        connection.busy_timeout(Duration::from_secs(5))?;
        create_auxiliary(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
            ready: Mutex::new(HashSet::default()),
        })
    }
    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|e| ModelplusError::Lock(e.to_string()))
    }
    fn is_ready(&self, namespace: &str) -> Result<bool> {
        let ready = self.ready.lock().map_err(|e| ModelplusError::Lock(e.to_string()))?;
        Ok(ready.contains(namespace))
    }
    fn table(&self, namespace: &str) -> Result<String> {
        if !is_identifier(namespace) || AUXILIARY.contains(&namespace) {
            return Err(ModelplusError::BadKey(namespace.to_string()));
        }
        self.ensure_namespace(namespace)?;
        Ok(format!("\"{}\"", namespace))
    }
}

fn create_auxiliary(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        create table if not exists _modelplus_sets (
            key text not null,
            member text not null,
            constraint unique_member primary key (key, member)
        );
        create table if not exists _modelplus_lists (
            key text not null,
            position integer not null,
            value text not null,
            constraint unique_position primary key (key, position)
        );
        create table if not exists _modelplus_markers (
            key text not null primary key,
            value text not null
        );
        ",
    )?;
    Ok(())
}

fn read_blob(stored: &str) -> Result<Blob> {
    Ok(serde_json::from_str(stored)?)
}

fn read_counter(blob: &Blob, key: &Key, field: &str) -> Result<i64> {
    match blob.get(field) {
        Some(stored) => stored.parse().map_err(|_| ModelplusError::DataCorruption {
            message: format!("counter {} of {} holds {:?}", field, key, stored),
        }),
        None => Ok(0),
    }
}

impl Store for SqliteStore {
    fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        if self.is_ready(namespace)? {
            return Ok(());
        }
        if !is_identifier(namespace) || AUXILIARY.contains(&namespace) {
            return Err(ModelplusError::Config(format!(
                "{:?} cannot be used as a table name",
                namespace
            )));
        }
        self.connection()?.execute_batch(&format!(
            "create table if not exists \"{}\" (
                id text not null primary key,
                blob text not null
            );",
            namespace
        ))?;
        self.ready
            .lock()
            .map_err(|e| ModelplusError::Lock(e.to_string()))?
            .insert(namespace.to_string());
        debug!(namespace, "namespace table ready");
        Ok(())
    }

    fn list_ids(&self, namespace: &str) -> Result<Vec<String>> {
        let table = self.table(namespace)?;
        let connection = self.connection()?;
        let mut statement = connection.prepare(&format!("select id from {}", table))?;
        let ids = statement
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn exists(&self, key: &Key) -> Result<bool> {
        let (namespace, id) = key.split_record()?;
        let table = self.table(&namespace)?;
        let found = self
            .connection()?
            .query_row(
                &format!("select 1 from {} where id = ?", table),
                params![id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get_blob(&self, key: &Key) -> Result<Option<Blob>> {
        let (namespace, id) = key.split_record()?;
        let table = self.table(&namespace)?;
        let stored = self
            .connection()?
            .query_row(
                &format!("select blob from {} where id = ?", table),
                params![id],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        stored.as_deref().map(read_blob).transpose()
    }

    fn get_list(&self, key: &Key) -> Result<Vec<String>> {
        let connection = self.connection()?;
        let mut statement = connection
            .prepare("select value from _modelplus_lists where key = ? order by position")?;
        let items = statement
            .query_map(params![key.as_str()], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn members(&self, key: &Key) -> Result<BTreeSet<String>> {
        let connection = self.connection()?;
        let mut statement =
            connection.prepare("select member from _modelplus_sets where key = ?")?;
        let members = statement
            .query_map(params![key.as_str()], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(members)
    }

    fn get_counter(&self, key: &Key, field: &str) -> Result<i64> {
        match self.get_blob(key)? {
            Some(blob) => read_counter(&blob, key, field),
            None => Ok(0),
        }
    }

    fn incr_by(&self, key: &Key, field: &str, delta: i64) -> Result<i64> {
        let (namespace, id) = key.split_record()?;
        let table = self.table(&namespace)?;
        let mut connection = self.connection()?;
        let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored = tx
            .query_row(
                &format!("select blob from {} where id = ?", table),
                params![id],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        let mut blob = match stored {
            Some(stored) => read_blob(&stored)?,
            None => Blob::new(),
        };
        let next = read_counter(&blob, key, field)?
            .checked_add(delta)
            .ok_or_else(|| ModelplusError::DataCorruption {
                message: format!("counter {} of {} overflows adding {}", field, key, delta),
            })?;
        blob.insert(field.to_string(), next.to_string());
        tx.execute(
            &format!("insert or replace into {} (id, blob) values (?, ?)", table),
            params![id, serde_json::to_string(&blob)?],
        )?;
        tx.commit()?;
        Ok(next)
    }

    fn get_marker(&self, key: &Key) -> Result<Option<String>> {
        let value = self
            .connection()?
            .query_row(
                "select value from _modelplus_markers where key = ?",
                params![key.as_str()],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn swap_marker(&self, key: &Key, expected: Option<&str>, value: &str) -> Result<bool> {
        let mut connection = self.connection()?;
        let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = tx
            .query_row(
                "select value from _modelplus_markers where key = ?",
                params![key.as_str()],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        tx.execute(
            "insert or replace into _modelplus_markers (key, value) values (?, ?)",
            params![key.as_str(), value],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn delete_marker(&self, key: &Key) -> Result<()> {
        self.connection()?.execute(
            "delete from _modelplus_markers where key = ?",
            params![key.as_str()],
        )?;
        Ok(())
    }

    fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
        // tables are created outside the transaction so the ready cache stays truthful
        let mut records = Vec::new();
        for op in &ops {
            if let WriteOp::DeleteBlob(key) | WriteOp::SetBlob(key, _) = op {
                let (namespace, id) = key.split_record()?;
                records.push((self.table(&namespace)?, id));
            }
        }
        let mut records = records.into_iter();
        let mut connection = self.connection()?;
        let tx = connection.transaction()?;
        for op in ops {
            trace!(?op, "sqlite apply");
            match op {
                WriteOp::DeleteBlob(_) => {
                    if let Some((table, id)) = records.next() {
                        tx.execute(&format!("delete from {} where id = ?", table), params![id])?;
                    }
                }
                WriteOp::SetBlob(_, blob) => {
                    if let Some((table, id)) = records.next() {
                        tx.execute(
                            &format!("insert or replace into {} (id, blob) values (?, ?)", table),
                            params![id, serde_json::to_string(&blob)?],
                        )?;
                    }
                }
                WriteOp::DeleteList(key) => {
                    tx.execute(
                        "delete from _modelplus_lists where key = ?",
                        params![key.as_str()],
                    )?;
                }
                WriteOp::SetList(key, items) => {
                    tx.execute(
                        "delete from _modelplus_lists where key = ?",
                        params![key.as_str()],
                    )?;
                    let mut insert = tx.prepare_cached(
                        "insert into _modelplus_lists (key, position, value) values (?, ?, ?)",
                    )?;
                    for (position, value) in items.iter().enumerate() {
                        insert.execute(params![key.as_str(), position as i64, value])?;
                    }
                }
                WriteOp::AddMember(key, member) => {
                    tx.execute(
                        "insert or ignore into _modelplus_sets (key, member) values (?, ?)",
                        params![key.as_str(), member],
                    )?;
                }
                WriteOp::RemoveMember(key, member) => {
                    tx.execute(
                        "delete from _modelplus_sets where key = ? and member = ?",
                        params![key.as_str(), member],
                    )?;
                }
                WriteOp::DeleteSet(key) => {
                    tx.execute(
                        "delete from _modelplus_sets where key = ?",
                        params![key.as_str()],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn flush_all(&self) -> Result<()> {
        let mut connection = self.connection()?;
        let tables = {
            let mut statement = connection
                .prepare("select name from sqlite_master where type = 'table' and name not like 'sqlite%'")?;
            statement
                .query_map([], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        let tx = connection.transaction()?;
        for table in &tables {
            if AUXILIARY.contains(&table.as_str()) {
                tx.execute(&format!("delete from {}", table), [])?;
            } else {
                tx.execute(&format!("drop table \"{}\"", table), [])?;
            }
        }
        tx.commit()?;
        self.ready
            .lock()
            .map_err(|e| ModelplusError::Lock(e.to_string()))?
            .clear();
        debug!(tables = tables.len(), "flushed sqlite store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blobs_survive_json() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = Key::new("Person").child("a");
        let mut blob = Blob::new();
        blob.insert("first_name".into(), "Granny".into());
        store
            .apply(vec![WriteOp::SetBlob(key.clone(), blob.clone())])
            .unwrap();
        assert_eq!(store.get_blob(&key).unwrap(), Some(blob));
        assert_eq!(store.list_ids("Person").unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn lists_keep_their_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = Key::new("Person").child("a").child("tags");
        let items = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        store
            .apply(vec![WriteOp::SetList(key.clone(), items.clone())])
            .unwrap();
        assert_eq!(store.get_list(&key).unwrap(), items);
    }

    #[test]
    fn flush_drops_namespaces() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = Key::new("Person").child("a");
        store.incr_by(&key, "visits", 1).unwrap();
        store.flush_all().unwrap();
        assert!(store.list_ids("Person").unwrap().is_empty());
        assert_eq!(store.get_counter(&key, "visits").unwrap(), 0);
    }

    #[test]
    fn marker_swap_is_conditional() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = Key::new("Post").child("1").child("_lock");
        assert_eq!(store.get_marker(&key).unwrap(), None);
        assert!(store.swap_marker(&key, None, "10").unwrap());
        assert!(!store.swap_marker(&key, None, "20").unwrap());
        assert!(!store.swap_marker(&key, Some("99"), "20").unwrap());
        assert_eq!(store.get_marker(&key).unwrap().as_deref(), Some("10"), "lost swaps change nothing");
        assert!(store.swap_marker(&key, Some("10"), "20").unwrap());
        assert_eq!(store.get_marker(&key).unwrap().as_deref(), Some("20"));
        store.delete_marker(&key).unwrap();
        assert_eq!(store.get_marker(&key).unwrap(), None);
        assert!(store.swap_marker(&key, None, "30").unwrap(), "a lost swap left no open transaction");
    }

    #[test]
    fn counter_overflow_is_an_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = Key::new("Post").child("1");
        store.incr_by(&key, "likes", i64::MAX).unwrap();
        let err = store.incr_by(&key, "likes", 1).unwrap_err();
        assert!(matches!(err, ModelplusError::DataCorruption { .. }));
        assert_eq!(store.get_counter(&key, "likes").unwrap(), i64::MAX);
    }

    #[test]
    fn auxiliary_names_are_not_namespaces() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.ensure_namespace("_modelplus_sets").is_err());
        assert!(store.ensure_namespace("drop table").is_err());
    }
}
