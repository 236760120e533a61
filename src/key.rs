use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

use crate::error::{ModelplusError, Result};

lazy_static! {
    // "<Namespace>:<id>" where the id itself holds no further colons
    static ref RECORD_KEY: Regex = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*):([^:]+)$").unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Namespaces double as SQL table names, so they are restricted to plain identifiers.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Ids are one non-empty, colon-free key segment; nothing else can be stored.
pub fn is_record_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(':')
}

// ------------- Key -------------
/// A colon-joined store key. Sub-keys of auxiliary structures are formed by
/// appending further parts, e.g. `Person:<id>:_lock`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(String);

impl Key {
    pub fn new(namespace: &str) -> Self {
        Self(namespace.to_string())
    }
    /// Wraps a key read back from the store.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
    pub fn child(&self, part: impl fmt::Display) -> Key {
        Key(format!("{}:{}", self.0, part))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    /// The first segment, which names the model namespace.
    pub fn namespace(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }
    /// Splits a record key into `(namespace, id)`.
    pub fn parse_record(raw: &str) -> Result<(String, String)> {
        let captures = RECORD_KEY
            .captures(raw)
            .ok_or_else(|| ModelplusError::BadKey(raw.to_string()))?;
        Ok((captures[1].to_string(), captures[2].to_string()))
    }
    /// Splits a record key held by this value into `(namespace, id)`.
    pub fn split_record(&self) -> Result<(String, String)> {
        Self::parse_record(&self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
