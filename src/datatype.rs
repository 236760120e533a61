// used for datetime and date fields
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

// used to order heterogeneous values
use std::cmp::Ordering;
// used to print out readable forms of a value
use std::fmt;

use crate::error::{ModelplusError, Result};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ------------- Value -------------
/// A typed field value as held by a record in memory.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(t) => Some(*t),
            _ => None,
        }
    }
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Canonical storage text for a scalar value. `Null` has no representation
    /// and lists are stored element by element, so both yield `None`.
    pub fn to_storage(&self) -> Option<String> {
        match self {
            Value::Null | Value::List(_) => None,
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Boolean(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Value::DateTime(t) => Some(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
        }
    }

    // Null < Boolean < numbers < String < Date < DateTime < List
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::Date(_) => 4,
            Value::DateTime(_) => 5,
            Value::List(_) => 6,
        }
    }

    /// Total order used when sorting query results. Values of different kinds
    /// fall back to a fixed rank so mixed columns still sort deterministically.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let o = x.compare(y);
                    if o != Ordering::Equal {
                        return o;
                    }
                }
                a.len().cmp(&b.len())
            }
            (
                Value::Integer(_) | Value::Float(_),
                Value::Integer(_) | Value::Float(_),
            ) => {
                let (a, b) = (
                    self.as_f64().unwrap_or_default(),
                    other.as_f64().unwrap_or_default(),
                );
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

// numbers compare across integer and float, everything else by variant
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::List(l) => {
                let items: Vec<String> = l.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
            other => write!(f, "{}", other.to_storage().unwrap_or_default()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}
impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::DateTime(t)
    }
}
impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(l: Vec<T>) -> Self {
        Value::List(l.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        o.map_or(Value::Null, Into::into)
    }
}

// ------------- Field Kinds -------------
/// The semantic type of a field. Each kind knows how to move a value to and
/// from its storage text.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    String { max_length: Option<usize> },
    Integer,
    Float,
    Boolean,
    DateTime { auto_now: bool, auto_now_add: bool },
    Date { auto_now: bool, auto_now_add: bool },
    List(Box<FieldKind>),
    Reference { target: String, related_name: Option<String> },
    Counter,
}

impl FieldKind {
    pub fn data_type(&self) -> &'static str {
        match self {
            FieldKind::String { .. } => "String",
            FieldKind::Integer => "Integer",
            FieldKind::Float => "Float",
            FieldKind::Boolean => "Boolean",
            FieldKind::DateTime { .. } => "DateTime",
            FieldKind::Date { .. } => "Date",
            FieldKind::List(_) => "List",
            FieldKind::Reference { .. } => "Reference",
            FieldKind::Counter => "Counter",
        }
    }
    pub fn is_list(&self) -> bool {
        matches!(self, FieldKind::List(_))
    }
    pub fn is_counter(&self) -> bool {
        matches!(self, FieldKind::Counter)
    }
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldKind::Reference { .. })
    }
    /// Target model of a reference, or of the elements of a reference list.
    pub fn reference_target(&self) -> Option<&str> {
        match self {
            FieldKind::Reference { target, .. } => Some(target),
            FieldKind::List(element) => element.reference_target(),
            _ => None,
        }
    }

    /// True when `value` has the shape this kind stores. `Null` is always
    /// accepted here; required-ness is checked separately.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldKind::String { .. }, Value::String(_)) => true,
            // references are held as the id of the referenced record
            (FieldKind::Reference { .. }, Value::String(_)) => true,
            (FieldKind::Integer | FieldKind::Counter, Value::Integer(_)) => true,
            (FieldKind::Float, Value::Float(_) | Value::Integer(_)) => true,
            (FieldKind::Boolean, Value::Boolean(_)) => true,
            (FieldKind::DateTime { .. }, Value::DateTime(_)) => true,
            (FieldKind::Date { .. }, Value::Date(_)) => true,
            (FieldKind::List(element), Value::List(items)) => {
                items.iter().all(|item| !item.is_null() && element.accepts(item))
            }
            _ => false,
        }
    }

    pub fn typecast_for_storage(&self, value: &Value) -> Option<String> {
        match (self, value) {
            (FieldKind::Float, Value::Integer(i)) => Some((*i as f64).to_string()),
            _ => value.to_storage(),
        }
    }

    pub fn typecast_for_read(&self, stored: &str) -> Result<Value> {
        let corrupt = |what: &str| ModelplusError::DataCorruption {
            message: format!("cannot read {:?} as {}", stored, what),
        };
        match self {
            FieldKind::String { .. } | FieldKind::Reference { .. } => {
                Ok(Value::String(stored.to_string()))
            }
            FieldKind::Integer | FieldKind::Counter => stored
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| corrupt(self.data_type())),
            FieldKind::Float => stored
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| corrupt(self.data_type())),
            FieldKind::Boolean => match stored {
                "1" | "true" | "True" => Ok(Value::Boolean(true)),
                "0" | "false" | "False" | "" => Ok(Value::Boolean(false)),
                _ => Err(corrupt(self.data_type())),
            },
            FieldKind::DateTime { .. } => DateTime::parse_from_rfc3339(stored)
                .map(|t| Value::DateTime(t.with_timezone(&Utc)))
                .map_err(|_| corrupt(self.data_type())),
            FieldKind::Date { .. } => NaiveDate::parse_from_str(stored, DATE_FORMAT)
                .map(Value::Date)
                .map_err(|_| corrupt(self.data_type())),
            FieldKind::List(element) => element.typecast_for_read(stored),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn round_trip(kind: FieldKind, value: Value) {
        let stored = kind.typecast_for_storage(&value).expect("storable");
        let read = kind.typecast_for_read(&stored).expect("readable");
        assert_eq!(read, value, "{} did not survive storage", kind.data_type());
    }

    #[test]
    fn scalar_kinds_survive_storage() {
        round_trip(FieldKind::String { max_length: None }, Value::from("Niña Jose"));
        round_trip(FieldKind::Integer, Value::from(-42));
        round_trip(FieldKind::Float, Value::from(0.1));
        round_trip(FieldKind::Boolean, Value::from(false));
        round_trip(FieldKind::Counter, Value::from(7));
        round_trip(
            FieldKind::DateTime { auto_now: false, auto_now_add: false },
            Value::from(Utc.with_ymd_and_hms(2004, 6, 19, 12, 30, 5).unwrap()),
        );
        round_trip(
            FieldKind::Date { auto_now: false, auto_now_add: false },
            Value::from(NaiveDate::from_ymd_opt(1972, 8, 20).unwrap()),
        );
    }

    #[test]
    fn sub_second_timestamps_are_kept() {
        let kind = FieldKind::DateTime { auto_now: false, auto_now_add: false };
        round_trip(kind, Value::from(Utc::now()));
    }

    #[test]
    fn garbage_is_reported_as_corruption() {
        let err = FieldKind::Integer.typecast_for_read("forty").unwrap_err();
        assert!(matches!(err, ModelplusError::DataCorruption { .. }));
    }

    #[test]
    fn numbers_compare_across_kinds() {
        assert_eq!(Value::from(1), Value::from(1.0));
        assert_eq!(Value::from(2).compare(&Value::from(1.5)), Ordering::Greater);
        assert_eq!(Value::Null.compare(&Value::from("a")), Ordering::Less);
    }

    #[test]
    fn list_kind_checks_every_element() {
        let kind = FieldKind::List(Box::new(FieldKind::Integer));
        assert!(kind.accepts(&Value::from(vec![1, 2, 3])));
        assert!(!kind.accepts(&Value::List(vec![Value::from(1), Value::from("x")])));
    }
}
