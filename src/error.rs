use thiserror::Error;

use crate::schema::FieldError;

#[derive(Error, Debug)]
pub enum ModelplusError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Validation failed for {model}: {}", render(.errors))]
    ValidationFailed { model: String, errors: Vec<FieldError> },
    #[error("Missing id: this {model} has not been saved")]
    MissingId { model: String },
    #[error("Attribute {field} is not indexed in {model}")]
    AttributeNotIndexed { model: String, field: String },
    #[error("{field} is not a counter in {model}")]
    NotACounter { model: String, field: String },
    #[error("{field} is a counter in {model} and only changes through incr/decr")]
    CounterAssignment { model: String, field: String },
    #[error("Unknown field {field} in {model}")]
    UnknownField { model: String, field: String },
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Bad key: {0}")]
    BadKey(String),
    #[error("Lock {key} not acquired after {attempts} attempts")]
    LockTimeout { key: String, attempts: u32 },
    #[error("Backend failure: {0}")]
    Backend(String),
    #[error("Data corruption: {message}")]
    DataCorruption { message: String },
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, ModelplusError>;

impl ModelplusError {
    /// Field errors carried by a failed validation, empty for every other kind.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::ValidationFailed { errors, .. } => errors,
            _ => &[],
        }
    }
}

fn render(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// Helper conversions
impl From<rusqlite::Error> for ModelplusError {
    fn from(e: rusqlite::Error) -> Self { Self::Backend(e.to_string()) }
}
impl From<serde_json::Error> for ModelplusError {
    fn from(e: serde_json::Error) -> Self { Self::DataCorruption { message: e.to_string() } }
}
impl From<config::ConfigError> for ModelplusError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
