//! Field values and their declared types.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Element types a field (or a list field's elements) can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Integer,
    Float,
    Boolean,
    String,
    Binary,
    DateTime,
    Interval,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::Boolean => "boolean",
            ScalarType::String => "string",
            ScalarType::Binary => "binary",
            ScalarType::DateTime => "datetime",
            ScalarType::Interval => "interval",
        };
        f.write_str(name)
    }
}

/// Declared type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Float,
    Boolean,
    String,
    Binary,
    DateTime,
    Interval,
    /// Homogeneous list, merged as a set (booleans excepted)
    List(ScalarType),
}

impl FieldType {
    /// The scalar type, or the element type for lists.
    pub fn scalar(self) -> ScalarType {
        match self {
            FieldType::Integer => ScalarType::Integer,
            FieldType::Float => ScalarType::Float,
            FieldType::Boolean => ScalarType::Boolean,
            FieldType::String => ScalarType::String,
            FieldType::Binary => ScalarType::Binary,
            FieldType::DateTime => ScalarType::DateTime,
            FieldType::Interval => ScalarType::Interval,
            FieldType::List(elem) => elem,
        }
    }

    pub fn is_list(self) -> bool {
        matches!(self, FieldType::List(_))
    }
}

impl From<ScalarType> for FieldType {
    fn from(scalar: ScalarType) -> Self {
        match scalar {
            ScalarType::Integer => FieldType::Integer,
            ScalarType::Float => FieldType::Float,
            ScalarType::Boolean => FieldType::Boolean,
            ScalarType::String => FieldType::String,
            ScalarType::Binary => FieldType::Binary,
            ScalarType::DateTime => FieldType::DateTime,
            ScalarType::Interval => FieldType::Interval,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::List(elem) => write!(f, "list<{}>", elem),
            other => other.scalar().fmt(f),
        }
    }
}

/// A calendar interval with second precision.
///
/// Components compare structurally in declaration order, so a longer
/// interval in a more significant unit always sorts later.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Interval {
    pub years: u32,
    pub months: u32,
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl Interval {
    pub fn new(years: u32, months: u32, days: u32, hours: u32, minutes: u32, seconds: u32) -> Self {
        Self {
            years,
            months,
            days,
            hours,
            minutes,
            seconds,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            self.years, self.months, self.days, self.hours, self.minutes, self.seconds
        )
    }
}

impl FromStr for Interval {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_suffix('Z').ok_or(())?;
        let (date, time) = body.split_once('T').ok_or(())?;

        fn next<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Result<u32, ()> {
            parts.next().ok_or(())?.parse().map_err(|_| ())
        }

        let mut date_parts = date.splitn(3, '-');
        let mut time_parts = time.splitn(3, ':');

        Ok(Self {
            years: next(&mut date_parts)?,
            months: next(&mut date_parts)?,
            days: next(&mut date_parts)?,
            hours: next(&mut time_parts)?,
            minutes: next(&mut time_parts)?,
            seconds: next(&mut time_parts)?,
        })
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Binary(Vec<u8>),
    DateTime(NaiveDateTime),
    Interval(Interval),
    List(Vec<Value>),
}

impl Value {
    /// Name of the value's runtime type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::DateTime(_) => "datetime",
            Value::Interval(_) => "interval",
            Value::List(_) => "list",
        }
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
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Compare two values of compatible types.
    ///
    /// Integers and floats compare numerically; datetimes and intervals
    /// compare component-wise; lists compare element by element. Values of
    /// unrelated types are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Interval(a), Value::Interval(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        unequal => return Some(unequal),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<Interval> for Value {
    fn from(v: Interval) -> Self {
        Value::Interval(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}
