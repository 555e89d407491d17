//! Field definitions and typed values
//!
//! Values travel as JSON scalars and are coerced against the declared
//! datatype on the way in. Dates and times use ISO 8601 text.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{LayerError, LayerResult};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Declared datatype of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    /// 32-bit signed integer
    Integer,
    /// 64-bit signed integer
    BigInt,
    /// Double precision float
    Real,
    String,
    Date,
    Time,
    DateTime,
}

impl FieldType {
    /// Returns the datatype name as used in definitions.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "INTEGER",
            FieldType::BigInt => "BIGINT",
            FieldType::Real => "REAL",
            FieldType::String => "STRING",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::DateTime => "DATETIME",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INTEGER" => Ok(FieldType::Integer),
            "BIGINT" => Ok(FieldType::BigInt),
            "REAL" => Ok(FieldType::Real),
            "STRING" => Ok(FieldType::String),
            "DATE" => Ok(FieldType::Date),
            "TIME" => Ok(FieldType::Time),
            "DATETIME" => Ok(FieldType::DateTime),
            _ => Err(LayerError::UnknownDatatype(s.to_string())),
        }
    }
}

/// A single field of a layer definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub keyname: String,
    pub datatype: FieldType,
}

impl FieldDef {
    /// Creates a field definition.
    pub fn new(keyname: impl Into<String>, datatype: FieldType) -> Self {
        Self {
            keyname: keyname.into(),
            datatype,
        }
    }

    /// Checks the keyname against the identifier pattern.
    pub fn validate(&self) -> LayerResult<()> {
        static KEYNAME: OnceLock<Regex> = OnceLock::new();
        let pattern = KEYNAME
            .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid keyname pattern"));
        if pattern.is_match(&self.keyname) {
            Ok(())
        } else {
            Err(LayerError::InvalidKeyname(self.keyname.clone()))
        }
    }

    /// Coerces a JSON value into this field's datatype.
    pub fn coerce(&self, value: &Value) -> LayerResult<FieldValue> {
        FieldValue::from_json(value, self.datatype).map_err(|reason| LayerError::InvalidValue {
            field: self.keyname.clone(),
            expected: self.datatype.to_string(),
            reason,
        })
    }
}

/// A typed field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl FieldValue {
    /// Returns true for `Null`.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Converts a JSON scalar into a value of `datatype`.
    ///
    /// The error is a bare reason; callers attach the field name.
    pub fn from_json(value: &Value, datatype: FieldType) -> Result<FieldValue, String> {
        if value.is_null() {
            return Ok(FieldValue::Null);
        }
        match datatype {
            FieldType::Integer => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| format!("not an integer: {}", value))?;
                i32::try_from(n).map_err(|_| format!("{} is out of 32-bit range", n))?;
                Ok(FieldValue::Integer(n))
            }
            FieldType::BigInt => value
                .as_i64()
                .map(FieldValue::Integer)
                .ok_or_else(|| format!("not a 64-bit integer: {}", value)),
            FieldType::Real => value
                .as_f64()
                .map(FieldValue::Real)
                .ok_or_else(|| format!("not a number: {}", value)),
            FieldType::String => value
                .as_str()
                .map(|s| FieldValue::String(s.to_string()))
                .ok_or_else(|| format!("not a string: {}", value)),
            FieldType::Date => {
                let text = expect_str(value)?;
                NaiveDate::parse_from_str(text, DATE_FORMAT)
                    .map(FieldValue::Date)
                    .map_err(|e| format!("'{}': {}", text, e))
            }
            FieldType::Time => {
                let text = expect_str(value)?;
                NaiveTime::parse_from_str(text, TIME_FORMAT)
                    .map(FieldValue::Time)
                    .map_err(|e| format!("'{}': {}", text, e))
            }
            FieldType::DateTime => {
                let text = expect_str(value)?;
                NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
                    .map(FieldValue::DateTime)
                    .map_err(|e| format!("'{}': {}", text, e))
            }
        }
    }

    /// Renders the value as the JSON scalar clients send.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Integer(n) => Value::from(*n),
            FieldValue::Real(x) => Value::from(*x),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            FieldValue::Time(t) => Value::String(t.format(TIME_FORMAT).to_string()),
            FieldValue::DateTime(dt) => Value::String(dt.format(DATETIME_FORMAT).to_string()),
        }
    }
}

fn expect_str(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected ISO string, got {}", value))
}
