use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};

use crate::error::ConvertError;

/// Rendering used for timestamp values on the wire.
pub const WIRE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %:z";

/// Declared or requested type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    Long,
    Double,
    String,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Long => "long",
            ColumnType::Double => "double",
            ColumnType::String => "string",
            ColumnType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "long" | "integer64" | "int64" => Ok(ColumnType::Long),
            "double" | "float64" => Ok(ColumnType::Double),
            "string" => Ok(ColumnType::String),
            "timestamp" => Ok(ColumnType::Timestamp),
            _ => Err(ConvertError::UnsupportedType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<FixedOffset>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn timestamp(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t.fixed_offset())
    }

    /// Type the raw JSON value of an input record as `ty`.
    ///
    /// Timestamps are accepted as RFC 3339 strings or epoch seconds.
    pub fn from_json(json: &serde_json::Value, ty: ColumnType) -> Result<Self, ConvertError> {
        use serde_json::Value as Json;

        let value = match (ty, json) {
            (_, Json::Null) => Value::Null,
            (ColumnType::Boolean, Json::Bool(b)) => Value::Boolean(*b),
            (ColumnType::Long, Json::Number(n)) => match n.as_i64() {
                Some(v) => Value::Long(v),
                None => return Err(ConvertError::parse(n, "long", "not an integer")),
            },
            (ColumnType::Double, Json::Number(n)) => match n.as_f64() {
                Some(v) => Value::Double(v),
                None => return Err(ConvertError::parse(n, "double", "not a number")),
            },
            (ColumnType::String, Json::String(s)) => Value::String(s.clone()),
            (ColumnType::Timestamp, Json::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(Value::Timestamp)
                .map_err(|e| ConvertError::parse(s, "timestamp", e))?,
            (ColumnType::Timestamp, Json::Number(n)) => {
                let secs = n
                    .as_i64()
                    .ok_or_else(|| ConvertError::parse(n, "timestamp", "not epoch seconds"))?;
                DateTime::from_timestamp(secs, 0)
                    .map(Value::timestamp)
                    .ok_or_else(|| ConvertError::parse(n, "timestamp", "out of range"))?
            }
            (ty, other) => return Err(ConvertError::parse(other, ty.as_str(), "type mismatch")),
        };

        Ok(value)
    }

    /// Render as a JSON value for the load stream. JSON has no NaN or
    /// infinity, so non-finite doubles are an error rather than null.
    pub fn to_json(&self) -> Result<serde_json::Value, ConvertError> {
        use serde_json::Value as Json;

        let json = match self {
            Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Long(n) => Json::from(*n),
            Value::Double(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .ok_or_else(|| ConvertError::parse(f, "double", "not a finite number"))?,
            Value::String(s) => Json::String(s.clone()),
            Value::Timestamp(t) => Json::String(t.format(WIRE_TIMESTAMP_FORMAT).to_string()),
        };
        Ok(json)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered, immutable column list of a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Result<Self, ConvertError> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(ConvertError::DuplicateColumn(column.name.clone()));
            }
        }

        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// One row, positionally aligned to a [`Schema`].
pub type Record = Vec<Value>;

/// Records routed together to a single worker.
pub type Batch = Vec<Record>;
