//! Model schemas and the registry that holds them.
//!
//! A [`Schema`] is built once per model type with a [`SchemaBuilder`] and is
//! immutable afterwards. Inheritance is explicit composition: a child builder
//! copies the parent's declarations and overrides them by name. All schemas are
//! then handed to a [`RegistryBuilder`], whose `build` step resolves reverse
//! reference accessors in a second pass, so a reference may name a model that
//! is registered later.

use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

// used to keep the one-to-one mapping between model names and key namespaces
use bimap::BiMap;
use seahash::SeaHasher;

use crate::datatype::{FieldKind, Value};
use crate::error::{ModelplusError, Result};
use crate::key::{is_identifier, Key};
use crate::record::Record;

pub type NameHasher = BuildHasherDefault<SeaHasher>;

pub type Validator = Arc<dyn Fn(&str, &Value) -> Option<FieldError> + Send + Sync>;
pub type DefaultFactory = Arc<dyn Fn() -> Value + Send + Sync>;
pub type Computed = Arc<dyn Fn(&Record) -> Value + Send + Sync>;
pub type ValidateHook = Arc<dyn Fn(&Record, &mut Vec<FieldError>) + Send + Sync>;

// ------------- Field Error -------------
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.field, self.message)
    }
}

// ------------- Field -------------
#[derive(Clone, Default)]
pub enum FieldDefault {
    #[default]
    Null,
    Value(Value),
    Factory(DefaultFactory),
}

#[derive(Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    indexed: bool,
    required: bool,
    default: FieldDefault,
    validator: Option<Validator>,
}

impl Field {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        // counters are never indexed, a reference is indexed through its id field
        let indexed = !matches!(kind, FieldKind::Counter | FieldKind::Reference { .. });
        Self {
            name: name.to_string(),
            kind,
            indexed,
            required: false,
            default: FieldDefault::Null,
            validator: None,
        }
    }
    pub fn string(name: &str) -> Self {
        Self::new(name, FieldKind::String { max_length: None })
    }
    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldKind::Integer)
    }
    pub fn float(name: &str) -> Self {
        Self::new(name, FieldKind::Float)
    }
    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }
    pub fn datetime(name: &str) -> Self {
        Self::new(name, FieldKind::DateTime { auto_now: false, auto_now_add: false })
    }
    pub fn date(name: &str) -> Self {
        Self::new(name, FieldKind::Date { auto_now: false, auto_now_add: false })
    }
    pub fn list(name: &str, element: FieldKind) -> Self {
        Self::new(name, FieldKind::List(Box::new(element)))
    }
    /// A list whose elements are records of `target`, stored as their ids.
    pub fn reference_list(name: &str, target: &str) -> Self {
        Self::list(
            name,
            FieldKind::Reference {
                target: target.to_string(),
                related_name: None,
            },
        )
    }
    pub fn reference(name: &str, target: &str) -> Self {
        Self::new(
            name,
            FieldKind::Reference {
                target: target.to_string(),
                related_name: None,
            },
        )
    }
    pub fn counter(name: &str) -> Self {
        Self::new(name, FieldKind::Counter)
    }

    pub fn indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed && !self.kind.is_counter();
        self
    }
    pub fn unindexed(self) -> Self {
        self.indexed(false)
    }
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
    pub fn max_length(mut self, n: usize) -> Self {
        if let FieldKind::String { max_length } = &mut self.kind {
            *max_length = Some(n);
        }
        self
    }
    pub fn auto_now(mut self) -> Self {
        if let FieldKind::DateTime { auto_now, .. } | FieldKind::Date { auto_now, .. } =
            &mut self.kind
        {
            *auto_now = true;
        }
        self
    }
    pub fn auto_now_add(mut self) -> Self {
        if let FieldKind::DateTime { auto_now_add, .. } | FieldKind::Date { auto_now_add, .. } =
            &mut self.kind
        {
            *auto_now_add = true;
        }
        self
    }
    pub fn related_name(mut self, name: &str) -> Self {
        if let FieldKind::Reference { related_name, .. } = &mut self.kind {
            *related_name = Some(name.to_string());
        }
        self
    }
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = FieldDefault::Value(value.into());
        self
    }
    pub fn default_with(mut self, factory: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default = FieldDefault::Factory(Arc::new(factory));
        self
    }
    pub fn validator(
        mut self,
        validator: impl Fn(&str, &Value) -> Option<FieldError> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }
    pub fn is_required(&self) -> bool {
        self.required
    }
    /// Name of the plain field that stores the id of a referenced record.
    pub fn attname(&self) -> String {
        format!("{}_id", self.name)
    }
    pub fn default_value(&self) -> Value {
        match &self.default {
            FieldDefault::Value(v) => v.clone(),
            FieldDefault::Factory(f) => f(),
            FieldDefault::Null if self.kind.is_list() => Value::List(Vec::new()),
            FieldDefault::Null => Value::Null,
        }
    }

    /// Required-ness, type and length checks followed by the custom validator.
    pub fn validate(&self, value: &Value) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let missing = match value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::List(l) => l.is_empty(),
            _ => false,
        };
        if self.required && missing {
            errors.push(FieldError::new(&self.name, "required"));
            return errors;
        }
        if !self.kind.accepts(value) {
            errors.push(FieldError::new(&self.name, "bad type"));
            return errors;
        }
        if let (FieldKind::String { max_length: Some(max) }, Value::String(s)) = (&self.kind, value)
        {
            if s.chars().count() > *max {
                errors.push(FieldError::new(&self.name, "exceeds max length"));
            }
        }
        if let Some(validator) = &self.validator {
            if let Some(error) = validator(&self.name, value) {
                errors.push(error);
            }
        }
        errors
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("indexed", &self.indexed)
            .field("required", &self.required)
            .finish()
    }
}

// ------------- Schema -------------
pub struct Schema {
    name: String,
    namespace: String,
    // as declared, kept so that children can inherit them
    declared: Vec<Field>,
    explicit_indices: Vec<String>,
    // flattened, with the id field of every reference
    fields: Vec<Field>,
    indices: Vec<String>,
    computed: Vec<(String, Computed)>,
    counters: Vec<String>,
    references: Vec<String>,
    lists: Vec<String>,
    hook: Option<ValidateHook>,
}

impl Schema {
    pub fn builder(name: &str) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
    pub fn key(&self) -> Key {
        Key::new(&self.namespace)
    }
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
    pub fn indices(&self) -> &[String] {
        &self.indices
    }
    pub fn is_indexed(&self, name: &str) -> bool {
        self.indices.iter().any(|i| i == name)
    }
    pub fn computed(&self, name: &str) -> Option<&Computed> {
        self.computed.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }
    pub fn computed_indices(&self) -> impl Iterator<Item = (&str, &Computed)> {
        self.computed.iter().map(|(n, f)| (n.as_str(), f))
    }
    pub fn counters(&self) -> &[String] {
        &self.counters
    }
    pub fn is_counter(&self, name: &str) -> bool {
        self.counters.iter().any(|c| c == name)
    }
    pub fn references(&self) -> &[String] {
        &self.references
    }
    pub fn lists(&self) -> &[String] {
        &self.lists
    }
    pub fn validate_hook(&self) -> Option<&ValidateHook> {
        self.hook.as_ref()
    }
    /// Fields whose value goes straight into the attribute blob.
    pub fn attributes(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|f| !f.kind.is_list() && !f.kind.is_reference() && !f.kind.is_counter())
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("fields", &self.fields)
            .field("indices", &self.indices)
            .field("counters", &self.counters)
            .field("references", &self.references)
            .field("lists", &self.lists)
            .finish()
    }
}

pub struct SchemaBuilder {
    name: String,
    namespace: Option<String>,
    fields: Vec<Field>,
    computed: Vec<(String, Computed)>,
    explicit_indices: Vec<String>,
    hook: Option<ValidateHook>,
}

fn put<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T) -> bool) {
    match items.iter().position(same) {
        Some(i) => items[i] = item,
        None => items.push(item),
    }
}

impl SchemaBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: None,
            fields: Vec::new(),
            computed: Vec::new(),
            explicit_indices: Vec::new(),
            hook: None,
        }
    }
    /// Copies the parent's declarations. Anything this builder declares under
    /// the same name wins, whether declared before or after this call.
    pub fn inherit(mut self, parent: &Schema) -> Self {
        let mut fields = parent.declared.clone();
        for field in self.fields.drain(..) {
            let name = field.name.clone();
            put(&mut fields, field, |f| f.name == name);
        }
        self.fields = fields;
        let mut computed = parent.computed.clone();
        for (name, f) in self.computed.drain(..) {
            let n = name.clone();
            put(&mut computed, (name, f), |(c, _)| *c == n);
        }
        self.computed = computed;
        for index in &parent.explicit_indices {
            if !self.explicit_indices.contains(index) {
                self.explicit_indices.push(index.clone());
            }
        }
        if self.hook.is_none() {
            self.hook = parent.hook.clone();
        }
        self
    }
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }
    pub fn field(mut self, field: Field) -> Self {
        let name = field.name.clone();
        put(&mut self.fields, field, |f| f.name == name);
        self
    }
    /// An index over a value computed from the record rather than stored in a field.
    pub fn computed_index(
        mut self,
        name: &str,
        compute: impl Fn(&Record) -> Value + Send + Sync + 'static,
    ) -> Self {
        put(&mut self.computed, (name.to_string(), Arc::new(compute) as Computed), |(n, _)| {
            n == name
        });
        self
    }
    /// Marks an already declared field as indexed.
    pub fn index(mut self, name: &str) -> Self {
        if !self.explicit_indices.iter().any(|i| i == name) {
            self.explicit_indices.push(name.to_string());
        }
        self
    }
    pub fn validate_with(
        mut self,
        hook: impl Fn(&Record, &mut Vec<FieldError>) + Send + Sync + 'static,
    ) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Schema> {
        let namespace = self.namespace.unwrap_or_else(|| self.name.clone());
        if !is_identifier(&namespace) {
            return Err(ModelplusError::Config(format!(
                "namespace {:?} of {} is not a plain identifier",
                namespace, self.name
            )));
        }
        let mut fields: Vec<Field> = Vec::new();
        for field in &self.fields {
            put(&mut fields, field.clone(), |f| f.name == field.name);
            if field.kind.is_reference() {
                let mut id_field = Field::string(&field.attname());
                id_field.required = field.required;
                put(&mut fields, id_field, |f| f.name == field.attname());
            }
        }
        let mut indices: Vec<String> = fields
            .iter()
            .filter(|f| f.indexed && !f.kind.is_reference())
            .map(|f| f.name.clone())
            .collect();
        for name in &self.explicit_indices {
            let field = fields.iter().find(|f| &f.name == name).ok_or_else(|| {
                ModelplusError::Config(format!("{} has no field {} to index", self.name, name))
            })?;
            if field.kind.is_counter() || field.kind.is_reference() {
                return Err(ModelplusError::Config(format!(
                    "{}.{} is a {} and cannot be indexed",
                    self.name,
                    name,
                    field.kind.data_type()
                )));
            }
            if !indices.contains(name) {
                indices.push(name.clone());
            }
        }
        for (name, _) in &self.computed {
            if fields.iter().any(|f| &f.name == name) {
                return Err(ModelplusError::Config(format!(
                    "computed index {} of {} shadows a field",
                    name, self.name
                )));
            }
            indices.push(name.clone());
        }
        let counters = fields
            .iter()
            .filter(|f| f.kind.is_counter())
            .map(|f| f.name.clone())
            .collect();
        let references = fields
            .iter()
            .filter(|f| f.kind.is_reference())
            .map(|f| f.name.clone())
            .collect();
        let lists = fields
            .iter()
            .filter(|f| f.kind.is_list())
            .map(|f| f.name.clone())
            .collect();
        Ok(Schema {
            name: self.name,
            namespace,
            declared: self.fields,
            explicit_indices: self.explicit_indices,
            fields,
            indices,
            computed: self.computed,
            counters,
            references,
            lists,
            hook: self.hook,
        })
    }
}

// ------------- Registry -------------
/// An accessor attached to a referenced model that lists the records pointing at it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReverseAccessor {
    pub name: String,
    pub source: String,
    pub attname: String,
}

#[derive(Default)]
pub struct RegistryBuilder {
    schemas: Vec<Schema>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    /// Registering a model name twice keeps the latest schema.
    pub fn register(mut self, schema: Schema) -> Self {
        let name = schema.name.clone();
        put(&mut self.schemas, schema, |s| s.name == name);
        self
    }
    pub fn build(self) -> Result<Registry> {
        let mut order = Vec::new();
        let mut schemas: HashMap<String, Arc<Schema>, NameHasher> = HashMap::default();
        let mut namespaces = BiMap::new();
        for schema in self.schemas {
            if let Some(other) = namespaces.get_by_right(&schema.namespace) {
                return Err(ModelplusError::Config(format!(
                    "{} and {} share the namespace {}",
                    other, schema.name, schema.namespace
                )));
            }
            namespaces.insert(schema.name.clone(), schema.namespace.clone());
            order.push(schema.name.clone());
            schemas.insert(schema.name.clone(), Arc::new(schema));
        }
        // second pass, every target is known by now
        let mut reverse: HashMap<String, Vec<ReverseAccessor>, NameHasher> = HashMap::default();
        for source in &order {
            let schema = &schemas[source];
            for field in schema.fields.iter() {
                let FieldKind::Reference { target, related_name } = &field.kind else {
                    continue;
                };
                if !schemas.contains_key(target) {
                    return Err(ModelplusError::Config(format!(
                        "{}.{} refers to unknown model {}",
                        source, field.name, target
                    )));
                }
                let name = related_name
                    .clone()
                    .unwrap_or_else(|| format!("{}_set", source.to_lowercase()));
                let accessors = reverse.entry(target.clone()).or_default();
                if accessors.iter().any(|a| a.name == name) {
                    continue;
                }
                accessors.push(ReverseAccessor {
                    name,
                    source: source.clone(),
                    attname: field.attname(),
                });
            }
            for field in schema.fields.iter().filter(|f| f.kind.is_list()) {
                if let Some(target) = field.kind.reference_target() {
                    if !schemas.contains_key(target) {
                        return Err(ModelplusError::Config(format!(
                            "{}.{} lists unknown model {}",
                            source, field.name, target
                        )));
                    }
                }
            }
        }
        Ok(Registry {
            schemas,
            namespaces,
            reverse,
        })
    }
}

pub struct Registry {
    schemas: HashMap<String, Arc<Schema>, NameHasher>,
    namespaces: BiMap<String, String>,
    reverse: HashMap<String, Vec<ReverseAccessor>, NameHasher>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }
    pub fn schema(&self, model: &str) -> Result<Arc<Schema>> {
        self.schemas
            .get(model)
            .cloned()
            .ok_or_else(|| ModelplusError::UnknownModel(model.to_string()))
    }
    pub fn model_for_namespace(&self, namespace: &str) -> Option<&str> {
        self.namespaces.get_by_right(namespace).map(String::as_str)
    }
    pub fn namespace_of(&self, model: &str) -> Option<&str> {
        self.namespaces.get_by_left(model).map(String::as_str)
    }
    pub fn reverse_accessors(&self, model: &str) -> &[ReverseAccessor] {
        self.reverse.get(model).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn reverse_accessor(&self, model: &str, name: &str) -> Option<&ReverseAccessor> {
        self.reverse_accessors(model).iter().find(|a| a.name == name)
    }
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
    pub fn len(&self) -> usize {
        self.schemas.len()
    }
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Registry")
            .field("schemas", &self.schemas)
            .field("reverse", &self.reverse)
            .finish()
    }
}
