// used for timestamps and dates on properties
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
// used for decimal numbers
use bigdecimal::BigDecimal;
// used for JSON
use serde_json::Value as Json;

// used when parsing strings coming back from a store
use std::str::FromStr;
// used to print out readable forms of a value
use std::fmt;
// custom ordering across compatible kinds
use std::cmp::Ordering;

use crate::graph::Handle;

// ------------- Identifier -------------
/// The identifier of a persisted row: numeric or textual.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Id {
    Int(i64),
    Text(String),
}

impl Id {
    pub fn to_value(&self) -> Value {
        match self {
            Id::Int(i) => Value::Int(*i),
            Id::Text(s) => Value::Text(s.clone()),
        }
    }
    pub fn from_value(value: &Value) -> Option<Id> {
        match value {
            Value::Int(i) => Some(Id::Int(*i)),
            Value::Text(s) if !s.is_empty() => Some(Id::Text(s.clone())),
            Value::Float(f) if f.fract() == 0.0 => Some(Id::Int(*f as i64)),
            _ => None,
        }
    }
}
impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Id::Int(i) => write!(f, "{i}"),
            Id::Text(s) => write!(f, "{s}"),
        }
    }
}
impl From<i64> for Id {
    fn from(i: i64) -> Self {
        Id::Int(i)
    }
}
impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::Text(s.to_owned())
    }
}
impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::Text(s)
    }
}

// ------------- Scalar kinds -------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
    Text,
    Decimal,
    Date,
    DateTime,
    Json,
}

impl ScalarKind {
    pub const fn name(&self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Text => "text",
            ScalarKind::Decimal => "decimal",
            ScalarKind::Date => "date",
            ScalarKind::DateTime => "datetime",
            ScalarKind::Json => "json",
        }
    }
    /// Whether a value already has this kind (null is accepted by every kind).
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ScalarKind::Bool, Value::Bool(_))
                | (ScalarKind::Int, Value::Int(_))
                | (ScalarKind::Float, Value::Float(_))
                | (ScalarKind::Text, Value::Text(_))
                | (ScalarKind::Decimal, Value::Decimal(_))
                | (ScalarKind::Date, Value::Date(_))
                | (ScalarKind::DateTime, Value::DateTime(_))
                | (ScalarKind::Json, Value::Json(_))
        )
    }
    /// Lenient conversion used on values coming back from a store, where
    /// dates arrive as text and booleans as integers.
    pub fn coerce(&self, value: Value) -> Result<Value, String> {
        if self.accepts(&value) {
            return Ok(value);
        }
        let converted = match (self, &value) {
            (ScalarKind::Bool, Value::Int(i)) => Some(Value::Bool(*i != 0)),
            (ScalarKind::Bool, Value::Text(s)) => match s.as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            (ScalarKind::Int, Value::Float(f)) if f.fract() == 0.0 => Some(Value::Int(*f as i64)),
            (ScalarKind::Int, Value::Bool(b)) => Some(Value::Int(i64::from(*b))),
            (ScalarKind::Int, Value::Text(s)) => s.trim().parse().ok().map(Value::Int),
            (ScalarKind::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (ScalarKind::Float, Value::Text(s)) => s.trim().parse().ok().map(Value::Float),
            (ScalarKind::Float, Value::Decimal(d)) => d.to_string().parse().ok().map(Value::Float),
            (ScalarKind::Text, Value::Int(_) | Value::Float(_) | Value::Decimal(_)) => {
                Some(Value::Text(value.to_string()))
            }
            (ScalarKind::Decimal, Value::Text(s)) => BigDecimal::from_str(s.trim()).ok().map(Value::Decimal),
            (ScalarKind::Decimal, Value::Int(i)) => Some(Value::Decimal(BigDecimal::from(*i))),
            (ScalarKind::Decimal, Value::Float(f)) => {
                BigDecimal::from_str(&f.to_string()).ok().map(Value::Decimal)
            }
            (ScalarKind::Date, Value::Text(s)) => NaiveDate::from_str(s.trim()).ok().map(Value::Date),
            (ScalarKind::Date, Value::DateTime(dt)) => Some(Value::Date(dt.date_naive())),
            (ScalarKind::DateTime, Value::Text(s)) => parse_datetime(s).map(Value::DateTime),
            (ScalarKind::DateTime, Value::Int(i)) => DateTime::from_timestamp(*i, 0).map(Value::DateTime),
            (ScalarKind::Json, Value::Text(s)) => serde_json::from_str(s).ok().map(Value::Json),
            (ScalarKind::Json, other) => Some(Value::Json(other.to_json())),
            _ => None,
        };
        converted.ok_or_else(|| format!("cannot convert {} to {}", value.kind_name(), self.name()))
    }
    /// Strict conversion used on structural input supplied by callers.
    pub fn from_json(&self, json: &Json) -> Result<Value, String> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let converted = match self {
            ScalarKind::Bool => json.as_bool().map(Value::Bool),
            ScalarKind::Int => json.as_i64().map(Value::Int),
            ScalarKind::Float => json.as_f64().map(Value::Float),
            ScalarKind::Text => json.as_str().map(|s| Value::Text(s.to_owned())),
            ScalarKind::Decimal => match json {
                Json::String(s) => BigDecimal::from_str(s).ok().map(Value::Decimal),
                Json::Number(n) => BigDecimal::from_str(&n.to_string()).ok().map(Value::Decimal),
                _ => None,
            },
            ScalarKind::Date => json.as_str().and_then(|s| NaiveDate::from_str(s).ok()).map(Value::Date),
            ScalarKind::DateTime => json.as_str().and_then(parse_datetime).map(Value::DateTime),
            ScalarKind::Json => Some(Value::Json(json.clone())),
        };
        converted.ok_or_else(|| format!("expected {}", self.name()))
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| NaiveDateTime::from_str(s).ok().map(|ndt| ndt.and_utc()))
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

// ------------- Value -------------
/// A property value. Domain objects are referenced through arena handles.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Decimal(BigDecimal),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Json(Json),
    Object(Handle),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            Value::Object(h) => Some(*h),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Decimal(_) => "decimal",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Json(_) => "json",
            Value::Object(_) => "object",
        }
    }
    /// Ordering between values of compatible kinds; `None` when incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Int(b)) => Some(a.cmp(&BigDecimal::from(*b))),
            (Value::Int(a), Value::Decimal(b)) => Some(BigDecimal::from(*a).cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Object(a), Value::Object(b)) => Some(a.cmp(b)),
            (Value::Json(a), Value::Json(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }
    pub fn loosely_equals(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
    /// Structural JSON form of a scalar. Object handles have no scalar form.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null | Value::Object(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::Text(s) => Json::String(s.clone()),
            // kept as text so no precision is lost
            Value::Decimal(d) => Json::String(d.to_string()),
            Value::Date(_) | Value::DateTime(_) => Json::String(self.to_string()),
            Value::Json(j) => j.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Json(j) => write!(f, "{j}"),
            Value::Object(h) => write!(f, "{h}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}
impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
impl From<BigDecimal> for Value {
    fn from(d: BigDecimal) -> Self {
        Value::Decimal(d)
    }
}
impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}
impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}
impl From<Json> for Value {
    fn from(j: Json) -> Self {
        Value::Json(j)
    }
}
impl From<Handle> for Value {
    fn from(h: Handle) -> Self {
        Value::Object(h)
    }
}
impl From<Id> for Value {
    fn from(id: Id) -> Self {
        id.to_value()
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_values_are_coerced_to_declared_kinds() {
        assert_eq!(ScalarKind::Bool.coerce(Value::Int(1)).unwrap(), Value::Bool(true));
        assert_eq!(
            ScalarKind::Date.coerce(Value::from("2024-02-29")).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert!(ScalarKind::Int.coerce(Value::from("seven")).is_err());
        assert_eq!(ScalarKind::Text.coerce(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn datetime_survives_text_round_trip() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let text = Value::DateTime(now).to_string();
        assert_eq!(ScalarKind::DateTime.coerce(Value::Text(text)).unwrap(), Value::DateTime(now));
    }

    #[test]
    fn json_input_is_strict() {
        assert!(ScalarKind::Int.from_json(&serde_json::json!("12")).is_err());
        assert_eq!(ScalarKind::Int.from_json(&serde_json::json!(12)).unwrap(), Value::Int(12));
    }
}
