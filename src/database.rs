use std::sync::Arc;

use tracing::info;

use crate::config::{BackendSettings, LockSettings, Settings};
use crate::error::{ModelplusError, Result};
use crate::key::{is_record_id, Key};
use crate::modelset::ModelSet;
use crate::record::Record;
use crate::schema::{Registry, Schema};
use crate::store::Store;

// ------------- Database -------------
/// The explicit handle every record and query works through: one store, the
/// frozen registry of schemas and the lock tuning. Cloning is cheap.
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
    lock: LockSettings,
}

impl Database {
    pub fn new(store: Arc<dyn Store>, registry: Registry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            lock: LockSettings::default(),
        }
    }
    pub fn with_lock_settings(mut self, lock: LockSettings) -> Self {
        self.lock = lock;
        self
    }
    pub fn open(settings: &Settings, registry: Registry) -> Result<Self> {
        let store = settings.open_store()?;
        match &settings.backend {
            BackendSettings::Memory => info!(models = registry.len(), "opened memory store"),
            BackendSettings::Sqlite { file } => {
                info!(models = registry.len(), file = %file.display(), "opened sqlite store")
            }
        }
        Ok(Self::new(store, registry).with_lock_settings(settings.lock.clone()))
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
    pub fn lock_settings(&self) -> &LockSettings {
        &self.lock
    }
    pub fn schema(&self, model: &str) -> Result<Arc<Schema>> {
        self.registry.schema(model)
    }

    /// An unfiltered query over every record of `model`.
    pub fn objects(&self, model: &str) -> Result<ModelSet> {
        ModelSet::new(self.clone(), self.schema(model)?)
    }
    /// A new, unsaved record of `model` holding its defaults.
    pub fn record(&self, model: &str) -> Result<Record> {
        Ok(Record::new(self.clone(), self.schema(model)?))
    }
    pub fn exists(&self, model: &str, id: &str) -> Result<bool> {
        let schema = self.schema(model)?;
        if !is_record_id(id) {
            return Ok(false);
        }
        self.store.exists(&schema.key().child(id))
    }

    /// Loads the record stored under a `<Namespace>:<id>` key.
    pub fn from_key(&self, raw: &str) -> Result<Option<Record>> {
        let (namespace, id) = Key::parse_record(raw)?;
        let model = self
            .registry
            .model_for_namespace(&namespace)
            .ok_or_else(|| ModelplusError::BadKey(raw.to_string()))?
            .to_string();
        if !self.exists(&model, &id)? {
            return Ok(None);
        }
        let mut record = self.record(&model)?;
        record.load(&id)?;
        Ok(Some(record))
    }

    pub fn flush_all(&self) -> Result<()> {
        info!("flushing every namespace");
        self.store.flush_all()
    }
}
