//! Lazy, immutable queries over the records of one model.
//!
//! Every refinement (`filter`, `exclude`, `order`, `limit`) returns a new
//! [`ModelSet`] and leaves the receiver untouched. Nothing is read from the
//! store until the set is materialized by `len`, `get`, `iter` and friends.
//! The resolved id list is then cached for the lifetime of that value; use
//! [`ModelSet::all`] to get a fresh copy that resolves again.
//!
//! Resolution:
//! 1. every filtered, excluded or ordered field must be indexed;
//! 2. all ids of the namespace are listed;
//! 3. candidates are loaded and kept when every filter matches and no
//!    exclusion does (a list field matches when it contains the value);
//! 4. survivors are sorted by the order field, ties broken by id, or by id
//!    alone when no order is given;
//! 5. the `(limit, offset)` window is applied last.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tracing::debug;

use crate::database::Database;
use crate::datatype::Value;
use crate::error::{ModelplusError, Result};
use crate::key::is_record_id;
use crate::record::Record;
use crate::schema::Schema;

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    /// `"name"` sorts ascending, `"-name"` descending.
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(field) => Self {
                field: field.to_string(),
                descending: true,
            },
            None => Self {
                field: spec.to_string(),
                descending: false,
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Query {
    filters: Vec<(String, Value)>,
    exclusions: Vec<(String, Value)>,
    ordering: Option<OrderBy>,
    // (limit, offset)
    window: Option<(usize, usize)>,
}

impl Query {
    fn needs_records(&self) -> bool {
        !self.filters.is_empty() || !self.exclusions.is_empty() || self.ordering.is_some()
    }
}

#[derive(Clone)]
pub struct ModelSet {
    db: Database,
    schema: Arc<Schema>,
    query: Query,
    resolved: OnceLock<Vec<String>>,
}

fn matches(actual: &Value, wanted: &Value) -> bool {
    match (actual, wanted) {
        (Value::List(items), Value::List(_)) => actual == wanted || items.contains(wanted),
        (Value::List(items), _) => items.contains(wanted),
        _ => actual == wanted,
    }
}

fn replace_predicate(predicates: &mut Vec<(String, Value)>, field: &str, value: Value) {
    predicates.retain(|(existing, _)| existing != field);
    predicates.push((field.to_string(), value));
}

impl ModelSet {
    pub fn new(db: Database, schema: Arc<Schema>) -> Result<Self> {
        db.store().ensure_namespace(schema.namespace())?;
        Ok(Self {
            db,
            schema,
            query: Query::default(),
            resolved: OnceLock::new(),
        })
    }

    fn refine(&self, change: impl FnOnce(&mut Query)) -> Self {
        let mut query = self.query.clone();
        change(&mut query);
        Self {
            db: self.db.clone(),
            schema: Arc::clone(&self.schema),
            query,
            resolved: OnceLock::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        self.schema.name()
    }

    /// Same descriptor, nothing resolved yet.
    pub fn all(&self) -> Self {
        self.refine(|_| {})
    }
    /// Filters on different fields are conjunctive; a second filter on the
    /// same field replaces the first.
    pub fn filter(&self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.refine(|q| replace_predicate(&mut q.filters, field, value))
    }
    /// Same replacement rule as [`ModelSet::filter`].
    pub fn exclude(&self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.refine(|q| replace_predicate(&mut q.exclusions, field, value))
    }
    /// Only one ordering is kept; a later call replaces an earlier one.
    pub fn order(&self, spec: &str) -> Self {
        let ordering = OrderBy::parse(spec);
        self.refine(|q| q.ordering = Some(ordering))
    }
    /// Both bounds or neither. `limit(None, None)` removes the window.
    pub fn limit(&self, limit: Option<usize>, offset: Option<usize>) -> Result<Self> {
        let window = match (limit, offset) {
            (Some(limit), Some(offset)) => Some((limit, offset)),
            (None, None) => None,
            (limit, offset) => {
                return Err(ModelplusError::Config(format!(
                    "limit and offset go together, got limit {:?} and offset {:?}",
                    limit, offset
                )));
            }
        };
        Ok(self.refine(|q| q.window = window))
    }

    // references are filtered through their id field
    fn stored_name(&self, field: &str) -> String {
        match self.schema.field(field) {
            Some(f) if f.kind().is_reference() => f.attname(),
            _ => field.to_string(),
        }
    }

    fn check_indexed(&self, field: &str) -> Result<()> {
        if self.schema.is_indexed(field) {
            Ok(())
        } else {
            Err(ModelplusError::AttributeNotIndexed {
                model: self.schema.name().to_string(),
                field: field.to_string(),
            })
        }
    }

    fn load(&self, id: &str) -> Result<Record> {
        let mut record = Record::new(self.db.clone(), Arc::clone(&self.schema));
        record.load(id)?;
        Ok(record)
    }

    fn resolve(&self) -> Result<&[String]> {
        if let Some(ids) = self.resolved.get() {
            return Ok(ids);
        }
        let ids = self.compute()?;
        Ok(self.resolved.get_or_init(|| ids))
    }

    fn compute(&self) -> Result<Vec<String>> {
        let started = Instant::now();
        let filters: Vec<(String, &Value)> = self
            .query
            .filters
            .iter()
            .map(|(f, v)| (self.stored_name(f), v))
            .collect();
        let exclusions: Vec<(String, &Value)> = self
            .query
            .exclusions
            .iter()
            .map(|(f, v)| (self.stored_name(f), v))
            .collect();
        let ordering = self.query.ordering.as_ref().map(|o| OrderBy {
            field: self.stored_name(&o.field),
            descending: o.descending,
        });
        for (field, _) in filters.iter().chain(exclusions.iter()) {
            self.check_indexed(field)?;
        }
        if let Some(order) = &ordering {
            self.check_indexed(&order.field)?;
        }

        let mut ids = self.db.store().list_ids(self.schema.namespace())?;
        let candidates = ids.len();
        if self.query.needs_records() {
            let mut keyed: Vec<(String, Value)> = Vec::with_capacity(ids.len());
            'candidates: for id in ids {
                let record = self.load(&id)?;
                for (field, wanted) in &filters {
                    if !matches(&record.value_of(field)?, wanted) {
                        continue 'candidates;
                    }
                }
                for (field, unwanted) in &exclusions {
                    if matches(&record.value_of(field)?, unwanted) {
                        continue 'candidates;
                    }
                }
                let sort_value = match &ordering {
                    Some(order) => record.value_of(&order.field)?,
                    None => Value::Null,
                };
                keyed.push((id, sort_value));
            }
            let descending = ordering.as_ref().is_some_and(|o| o.descending);
            keyed.sort_by(|(a_id, a), (b_id, b)| {
                let by_value = if descending { b.compare(a) } else { a.compare(b) };
                match by_value {
                    Ordering::Equal => a_id.cmp(b_id),
                    unequal => unequal,
                }
            });
            ids = keyed.into_iter().map(|(id, _)| id).collect();
        } else {
            ids.sort();
        }

        if let Some((limit, offset)) = self.query.window {
            ids = ids.into_iter().skip(offset).take(limit).collect();
        }
        debug!(
            model = self.schema.name(),
            candidates,
            rows = ids.len(),
            ms = started.elapsed().as_millis() as u64,
            "query resolved"
        );
        Ok(ids)
    }

    // ------------- Materialization -------------
    /// The resolved ids in result order.
    pub fn ids(&self) -> Result<Vec<String>> {
        Ok(self.resolve()?.to_vec())
    }
    pub fn len(&self) -> Result<usize> {
        Ok(self.resolve()?.len())
    }
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.resolve()?.is_empty())
    }
    pub fn get(&self, index: usize) -> Result<Option<Record>> {
        match self.resolve()?.get(index) {
            Some(id) => self.load(id).map(Some),
            None => Ok(None),
        }
    }
    pub fn first(&self) -> Result<Option<Record>> {
        self.get(0)
    }
    /// Records at positions `range`, clamped to the result.
    pub fn slice(&self, range: Range<usize>) -> Result<Vec<Record>> {
        let ids = self.resolve()?;
        let end = range.end.min(ids.len());
        let start = range.start.min(end);
        ids[start..end].iter().map(|id| self.load(id)).collect()
    }
    /// Loads records one at a time as the iterator advances.
    pub fn iter(&self) -> Result<impl Iterator<Item = Result<Record>> + '_> {
        let ids = self.resolve()?;
        Ok(ids.iter().map(move |id| self.load(id)))
    }
    pub fn records(&self) -> Result<Vec<Record>> {
        self.iter()?.collect()
    }
    pub fn contains(&self, record: &Record) -> Result<bool> {
        if record.model_name() != self.schema.name() {
            return Ok(false);
        }
        match record.saved_id() {
            Some(id) => self.contains_id(id),
            None => Ok(false),
        }
    }
    pub fn contains_id(&self, id: &str) -> Result<bool> {
        Ok(self.resolve()?.iter().any(|candidate| candidate == id))
    }

    /// `None` when no record with `id` exists, or when it falls outside the
    /// filters of this set.
    pub fn get_by_id(&self, id: &str) -> Result<Option<Record>> {
        if !is_record_id(id) {
            return Ok(None);
        }
        let filtered = !self.query.filters.is_empty() || !self.query.exclusions.is_empty();
        if filtered && !self.contains_id(id)? {
            return Ok(None);
        }
        // the resolved set may predate a delete
        if !self.db.store().exists(&self.schema.key().child(id))? {
            return Ok(None);
        }
        self.load(id).map(Some)
    }

    /// Builds and saves a new record from `attrs`.
    pub fn create<I, K, V>(&self, attrs: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut record = Record::new(self.db.clone(), Arc::clone(&self.schema));
        record.update_attributes(attrs)?;
        record.save()?;
        Ok(record)
    }

    /// Looks up by the indexed subset of `attrs`, creating a record from all of
    /// them when nothing matches.
    pub fn get_or_create(&self, attrs: &[(&str, Value)]) -> Result<Record> {
        let mut lookup = self.all();
        for (field, value) in attrs {
            if self.schema.is_indexed(&self.stored_name(field)) {
                lookup = lookup.filter(field, value.clone());
            }
        }
        match lookup.first()? {
            Some(record) => Ok(record),
            None => self.create(attrs.iter().cloned()),
        }
    }
}

impl fmt::Debug for ModelSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ModelSet")
            .field("model", &self.schema.name())
            .field("query", &self.query)
            .field("resolved", &self.resolved.get().is_some())
            .finish()
    }
}
