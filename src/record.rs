//! A live instance of a model and its write path.
//!
//! Saving validates, assigns an id to new records, renders every attribute to
//! its storage text and replaces the stored blob, list fields and index
//! entries in a single [`Batch`]. Counters never go through this path; they
//! are read from and incremented against the store directly.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::database::Database;
use crate::datatype::{FieldKind, Value};
use crate::error::{ModelplusError, Result};
use crate::indexer::Indexer;
use crate::key::Key;
use crate::modelset::ModelSet;
use crate::mutex::Mutex;
use crate::schema::{FieldError, Schema};
use crate::store::{Batch, Blob};

pub struct Record {
    db: Database,
    schema: Arc<Schema>,
    id: Option<String>,
    values: BTreeMap<String, Value>,
    errors: Vec<FieldError>,
}

impl Record {
    pub fn new(db: Database, schema: Arc<Schema>) -> Self {
        let values = schema
            .fields()
            .iter()
            .filter(|f| !f.kind().is_counter() && !f.kind().is_reference())
            .map(|f| (f.name().to_string(), f.default_value()))
            .collect();
        Self {
            db,
            schema,
            id: None,
            values,
            errors: Vec::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        self.schema.name()
    }
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The persisted id. Asking an unsaved record for it is a usage error.
    pub fn id(&self) -> Result<&str> {
        self.id.as_deref().ok_or_else(|| ModelplusError::MissingId {
            model: self.schema.name().to_string(),
        })
    }
    pub fn saved_id(&self) -> Option<&str> {
        self.id.as_deref()
    }
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }
    pub fn key(&self) -> Result<Key> {
        Ok(self.schema.key().child(self.id()?))
    }

    /// Takes on `id` and hydrates every stored attribute and list from the
    /// store. Fields absent from the blob keep their current value.
    pub fn load(&mut self, id: &str) -> Result<()> {
        self.id = Some(id.to_string());
        self.errors.clear();
        let key = self.schema.key().child(id);
        let store = self.db.store();
        let Some(blob) = store.get_blob(&key)? else {
            return Ok(());
        };
        for field in self.schema.attributes() {
            if let Some(stored) = blob.get(field.name()) {
                let value = field.kind().typecast_for_read(stored)?;
                self.values.insert(field.name().to_string(), value);
            }
        }
        for name in self.schema.lists() {
            let Some(field) = self.schema.field(name) else {
                continue;
            };
            let items = store
                .get_list(&key.child(name))?
                .iter()
                .map(|stored| field.kind().typecast_for_read(stored))
                .collect::<Result<Vec<_>>>()?;
            self.values.insert(name.clone(), Value::List(items));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.schema.field(name) {
            Some(field) if field.kind().is_reference() => self.values.get(&field.attname()),
            _ => self.values.get(name),
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let field = self
            .schema
            .field(name)
            .ok_or_else(|| ModelplusError::UnknownField {
                model: self.schema.name().to_string(),
                field: name.to_string(),
            })?;
        if field.kind().is_counter() {
            return Err(ModelplusError::CounterAssignment {
                model: self.schema.name().to_string(),
                field: name.to_string(),
            });
        }
        let slot = if field.kind().is_reference() {
            field.attname()
        } else {
            name.to_string()
        };
        self.values.insert(slot, value.into());
        Ok(())
    }

    /// Sets every known, assignable field in `attrs` and skips the rest.
    pub fn update_attributes<I, K, V>(&mut self, attrs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in attrs {
            let name = name.as_ref();
            let assignable = self
                .schema
                .field(name)
                .is_some_and(|f| !f.kind().is_counter());
            if assignable {
                self.set(name, value)?;
            } else {
                debug!(model = self.schema.name(), field = name, "ignoring attribute");
            }
        }
        Ok(())
    }

    /// Value of a field, computed index or counter as filters and orderings see it.
    pub fn value_of(&self, name: &str) -> Result<Value> {
        if let Some(compute) = self.schema.computed(name) {
            return Ok(compute(self));
        }
        if self.schema.is_counter(name) {
            return self.counter(name).map(Value::Integer);
        }
        match self.get(name) {
            Some(value) => Ok(value.clone()),
            None if self.schema.field(name).is_some() => Ok(Value::Null),
            None => Err(ModelplusError::UnknownField {
                model: self.schema.name().to_string(),
                field: name.to_string(),
            }),
        }
    }

    /// Snapshot of attributes, lists and reference ids, plus `id` once saved.
    pub fn attributes(&self) -> BTreeMap<String, Value> {
        let mut attributes = self.values.clone();
        if let Some(id) = &self.id {
            attributes.insert("id".to_string(), Value::String(id.clone()));
        }
        attributes
    }

    // ------------- References -------------
    fn reference_target(&self, name: &str) -> Result<(String, String)> {
        match self.schema.field(name).map(|f| (f.kind(), f.attname())) {
            Some((FieldKind::Reference { target, .. }, attname)) => Ok((target.clone(), attname)),
            _ => Err(ModelplusError::UnknownField {
                model: self.schema.name().to_string(),
                field: name.to_string(),
            }),
        }
    }

    pub fn set_reference(&mut self, name: &str, target: &Record) -> Result<()> {
        let (model, attname) = self.reference_target(name)?;
        if target.model_name() != model {
            return Err(ModelplusError::Config(format!(
                "{}.{} refers to {}, not {}",
                self.schema.name(),
                name,
                model,
                target.model_name()
            )));
        }
        self.values.insert(attname, Value::String(target.id()?.to_string()));
        Ok(())
    }

    /// Loads the referenced record, `None` when unset or no longer stored.
    pub fn reference(&self, name: &str) -> Result<Option<Record>> {
        let (model, attname) = self.reference_target(name)?;
        let Some(id) = self.values.get(&attname).and_then(Value::as_str) else {
            return Ok(None);
        };
        if !self.db.exists(&model, id)? {
            return Ok(None);
        }
        let mut record = self.db.record(&model)?;
        record.load(id)?;
        Ok(Some(record))
    }

    /// Records of another model that refer to this one through the reverse
    /// accessor `name`.
    pub fn related(&self, name: &str) -> Result<ModelSet> {
        let accessor = self
            .db
            .registry()
            .reverse_accessor(self.schema.name(), name)
            .ok_or_else(|| ModelplusError::UnknownField {
                model: self.schema.name().to_string(),
                field: name.to_string(),
            })?
            .clone();
        Ok(self
            .db
            .objects(&accessor.source)?
            .filter(&accessor.attname, self.id()?))
    }

    fn list_target(&self, name: &str) -> Result<String> {
        self.schema
            .field(name)
            .filter(|f| f.kind().is_list())
            .and_then(|f| f.kind().reference_target())
            .map(str::to_string)
            .ok_or_else(|| ModelplusError::UnknownField {
                model: self.schema.name().to_string(),
                field: name.to_string(),
            })
    }

    pub fn set_list_records(&mut self, name: &str, records: &[&Record]) -> Result<()> {
        let model = self.list_target(name)?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            if record.model_name() != model {
                return Err(ModelplusError::Config(format!(
                    "{}.{} lists {}, not {}",
                    self.schema.name(),
                    name,
                    model,
                    record.model_name()
                )));
            }
            ids.push(Value::String(record.id()?.to_string()));
        }
        self.values.insert(name.to_string(), Value::List(ids));
        Ok(())
    }

    /// The listed records in list order. Ids that are no longer stored are skipped.
    pub fn list_records(&self, name: &str) -> Result<Vec<Record>> {
        let model = self.list_target(name)?;
        let ids = self
            .values
            .get(name)
            .and_then(Value::as_list)
            .unwrap_or(&[]);
        let mut records = Vec::with_capacity(ids.len());
        for id in ids.iter().filter_map(Value::as_str) {
            if self.db.exists(&model, id)? {
                let mut record = self.db.record(&model)?;
                record.load(id)?;
                records.push(record);
            }
        }
        Ok(records)
    }

    // ------------- Counters -------------
    fn counter_field(&self, name: &str) -> Result<()> {
        if self.schema.is_counter(name) {
            Ok(())
        } else {
            Err(ModelplusError::NotACounter {
                model: self.schema.name().to_string(),
                field: name.to_string(),
            })
        }
    }

    /// Authoritative counter value, always read from the store.
    pub fn counter(&self, name: &str) -> Result<i64> {
        self.counter_field(name)?;
        self.db.store().get_counter(&self.key()?, name)
    }
    pub fn incr(&self, name: &str, delta: i64) -> Result<i64> {
        self.counter_field(name)?;
        self.db.store().incr_by(&self.key()?, name, delta)
    }
    pub fn decr(&self, name: &str, delta: i64) -> Result<i64> {
        let negated = delta.checked_neg().ok_or_else(|| ModelplusError::DataCorruption {
            message: format!("cannot decrement {} by {}", name, delta),
        })?;
        self.incr(name, negated)
    }

    // ------------- Validation -------------
    /// Runs every field validator and then the model hook.
    pub fn is_valid(&mut self) -> bool {
        let mut errors = Vec::new();
        let null = Value::Null;
        for field in self.schema.fields() {
            if field.kind().is_counter() || field.kind().is_reference() {
                continue;
            }
            let value = self.values.get(field.name()).unwrap_or(&null);
            errors.extend(field.validate(value));
        }
        if let Some(hook) = self.schema.validate_hook() {
            hook(self, &mut errors);
        }
        self.errors = errors;
        self.errors.is_empty()
    }
    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    // ------------- Write path -------------
    pub fn save(&mut self) -> Result<()> {
        if !self.is_valid() {
            return Err(ModelplusError::ValidationFailed {
                model: self.schema.name().to_string(),
                errors: self.errors.clone(),
            });
        }
        let created = self.id.is_none();
        if created {
            self.id = Some(Uuid::new_v4().to_string());
        }
        let result = self.write(created);
        if result.is_err() && created {
            self.id = None;
        }
        result
    }

    fn touch(&mut self, created: bool) {
        let now = Utc::now();
        let schema = Arc::clone(&self.schema);
        for field in schema.fields() {
            let value = match field.kind() {
                FieldKind::DateTime { auto_now, auto_now_add }
                    if *auto_now || (*auto_now_add && created) =>
                {
                    Value::DateTime(now)
                }
                FieldKind::Date { auto_now, auto_now_add }
                    if *auto_now || (*auto_now_add && created) =>
                {
                    Value::Date(now.date_naive())
                }
                _ => continue,
            };
            self.values.insert(field.name().to_string(), value);
        }
    }

    fn write(&mut self, created: bool) -> Result<()> {
        self.touch(created);
        let key = self.key()?;
        let schema = Arc::clone(&self.schema);
        let store = self.db.store();

        let mut blob = Blob::new();
        for field in schema.attributes() {
            if let Some(value) = self.values.get(field.name()) {
                if let Some(stored) = field.kind().typecast_for_storage(value) {
                    blob.insert(field.name().to_string(), stored);
                }
            }
        }
        // the blob is replaced whole, so counters are carried over
        if !created {
            for name in schema.counters() {
                let current = store.get_counter(&key, name)?;
                blob.insert(name.clone(), current.to_string());
            }
        }
        for (name, compute) in schema.computed_indices() {
            if let Some(stored) = compute(self).to_storage() {
                blob.insert(name.to_string(), stored);
            }
        }

        let indexer = Indexer::new(store, &schema);
        let mut batch = Batch::open(store);
        indexer.rebuild_indices(&mut batch, self)?;
        batch.delete_blob(key.clone()).set_blob(key.clone(), blob);
        for name in schema.lists() {
            let list_key = key.child(name);
            batch.delete_list(list_key.clone());
            let element = match schema.field(name).map(|f| f.kind()) {
                Some(FieldKind::List(element)) => element.as_ref().clone(),
                _ => continue,
            };
            let items: Vec<String> = self
                .values
                .get(name)
                .and_then(Value::as_list)
                .unwrap_or(&[])
                .iter()
                .filter_map(|v| element.typecast_for_storage(v))
                .collect();
            if !items.is_empty() {
                batch.set_list(list_key, items);
            }
        }
        batch.execute()?;
        debug!(model = schema.name(), id = self.id()?, created, "saved record");
        Ok(())
    }

    /// Removes the blob, the lists and every index entry the record was
    /// added to. Deleting twice is harmless.
    pub fn delete(&mut self) -> Result<()> {
        let key = self.key()?;
        let id = self.id()?;
        let store = self.db.store();
        let indexer = Indexer::new(store, &self.schema);
        let mut batch = Batch::open(store);
        indexer.purge(&mut batch, &key, id)?;
        batch.delete_blob(key.clone());
        for name in self.schema.lists() {
            batch.delete_list(key.child(name));
        }
        batch.execute()?;
        debug!(model = self.schema.name(), id, "deleted record");
        Ok(())
    }

    /// The advisory lock guarding this record.
    pub fn mutex(&self) -> Result<Mutex> {
        Ok(Mutex::new(
            self.db.clone(),
            self.key()?,
            self.db.lock_settings().clone(),
        ))
    }
}

// same model and same persisted id
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name()
            && self.id.is_some()
            && self.id == other.id
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.schema.name())
            .field("id", &self.id)
            .field("values", &self.values)
            .finish()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.schema.namespace(), id),
            None => write!(f, "{}:<new>", self.schema.namespace()),
        }
    }
}
