use std::collections::HashMap;
use std::fmt::Write as _;
use std::num::IntErrorKind;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use log::warn;
use serde::Deserialize;
use sluice_runtime::DEFAULT_TIMESTAMP_FORMAT;

use crate::error::ConvertError;
use crate::timezone::resolve_timezone;
use crate::types::{ColumnType, Schema, Value, WIRE_TIMESTAMP_FORMAT};

/// Per-column override of the default (identity) conversion.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ColumnOption {
    /// Requested output type; defaults to the declared type.
    #[serde(default)]
    pub value_type: Option<String>,
    /// strftime pattern for string <-> timestamp conversions.
    #[serde(default)]
    pub timestamp_format: Option<String>,
    /// Timezone spec; defaults to the load-wide default timezone.
    #[serde(default)]
    pub timezone: Option<String>,
}

/// The closed set of conversions allowed between a declared and a
/// requested column type.
#[derive(Debug, Clone, PartialEq)]
enum Conversion {
    Identity,
    Truthiness,
    ToLong,
    ToDouble,
    Stringify,
    /// Epoch seconds to a timestamp at the offset.
    FromEpoch(FixedOffset),
    /// Text parsed with the format; wall clocks without an offset are read at the offset.
    ParseTimestamp { format: String, tz: FixedOffset },
    FormatTimestamp { format: String, tz: FixedOffset },
    AtTimezone(FixedOffset),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueConverter {
    declared: ColumnType,
    requested: ColumnType,
    conversion: Conversion,
}

impl ValueConverter {
    /// Identity converter used for columns without options.
    pub fn identity(declared: ColumnType) -> Self {
        Self {
            declared,
            requested: declared,
            conversion: Conversion::Identity,
        }
    }

    /// Build the converter for `column`, failing on any pair outside the
    /// conversion table or on a malformed timezone or format.
    pub fn new(
        column: &str,
        declared: ColumnType,
        option: &ColumnOption,
        default_tz: FixedOffset,
    ) -> Result<Self, ConvertError> {
        use ColumnType::*;

        let requested = match &option.value_type {
            Some(name) => name.parse::<ColumnType>()?,
            None => declared,
        };

        let tz = match &option.timezone {
            Some(spec) => resolve_timezone(spec)?,
            None => default_tz,
        };

        let format = option
            .timestamp_format
            .clone()
            .unwrap_or_else(|| DEFAULT_TIMESTAMP_FORMAT.to_string());
        validate_format(&format)?;

        let conversion = match (declared, requested) {
            (Boolean, Boolean) | (Long, Long) | (Double, Double) | (String, String) => {
                Conversion::Identity
            }
            (Boolean, String) | (Long, String) | (Double, String) => Conversion::Stringify,
            (Long | Double | String | Timestamp, Boolean) => Conversion::Truthiness,
            (Double | String | Timestamp, Long) => Conversion::ToLong,
            (Long | String | Timestamp, Double) => Conversion::ToDouble,
            (Long | Double, Timestamp) => Conversion::FromEpoch(tz),
            (String, Timestamp) => Conversion::ParseTimestamp { format, tz },
            (Timestamp, String) => Conversion::FormatTimestamp { format, tz },
            (Timestamp, Timestamp) => Conversion::AtTimezone(tz),
            (Boolean, Long | Double | Timestamp) => {
                return Err(ConvertError::UnsupportedConversion {
                    column: column.to_string(),
                    declared: declared.to_string(),
                    requested: requested.to_string(),
                });
            }
        };

        Ok(Self {
            declared,
            requested,
            conversion,
        })
    }

    pub fn declared(&self) -> ColumnType {
        self.declared
    }

    pub fn requested(&self) -> ColumnType {
        self.requested
    }

    /// Convert one value. Null is passed through by every converter.
    pub fn convert(&self, value: &Value) -> Result<Value, ConvertError> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match &self.conversion {
            Conversion::Identity => Ok(value.clone()),
            Conversion::Truthiness => Ok(Value::Boolean(truthiness(value))),
            Conversion::ToLong => to_long(value).map(Value::Long),
            Conversion::ToDouble => to_double(value).map(Value::Double),
            Conversion::Stringify => Ok(Value::String(stringify(value))),
            Conversion::FromEpoch(tz) => from_epoch(value, *tz).map(Value::Timestamp),
            Conversion::ParseTimestamp { format, tz } => {
                parse_timestamp(value, format, *tz).map(Value::Timestamp)
            }
            Conversion::FormatTimestamp { format, tz } => match value {
                Value::Timestamp(t) => {
                    let mut out = String::new();
                    write!(out, "{}", t.with_timezone(tz).format(format))
                        .map_err(|e| ConvertError::parse(t, "string", e))?;
                    Ok(Value::String(out))
                }
                other => Err(ConvertError::parse(
                    format!("{other:?}"),
                    "string",
                    "expected a timestamp",
                )),
            },
            Conversion::AtTimezone(tz) => match value {
                Value::Timestamp(t) => Ok(Value::Timestamp(t.with_timezone(tz))),
                other => Err(ConvertError::parse(
                    format!("{other:?}"),
                    "timestamp",
                    "expected a timestamp",
                )),
            },
        }
    }
}

fn validate_format(format: &str) -> Result<(), ConvertError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ConvertError::InvalidFormat(format.to_string()));
    }
    Ok(())
}

/// Everything non-null except `false` is true.
fn truthiness(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Boolean(false))
}

fn to_long(value: &Value) -> Result<i64, ConvertError> {
    match value {
        Value::Boolean(b) => Ok(i64::from(*b)),
        Value::Long(n) => Ok(*n),
        // Saturating truncation; NaN becomes 0.
        Value::Double(f) => Ok(f.trunc() as i64),
        Value::String(s) => Ok(parse_long_prefix(s)),
        Value::Timestamp(t) => Ok(t.timestamp()),
        Value::Null => Err(ConvertError::parse("null", "long", "null")),
    }
}

fn to_double(value: &Value) -> Result<f64, ConvertError> {
    match value {
        Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Long(n) => Ok(*n as f64),
        Value::Double(f) => Ok(*f),
        Value::String(s) => Ok(parse_double_prefix(s)),
        Value::Timestamp(t) => {
            Ok(t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) / 1e9)
        }
        Value::Null => Err(ConvertError::parse("null", "double", "null")),
    }
}

/// Longest leading `[+-]digits` of `s` after whitespace, or with
/// `fraction` the longest leading decimal with optional exponent.
fn numeric_prefix(s: &str, fraction: bool) -> &str {
    let s = s.trim_start();
    let b = s.as_bytes();
    let digits = |mut i: usize| {
        while b.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        i
    };

    let start = usize::from(matches!(b.first(), Some(b'+' | b'-')));
    let mut end = digits(start);
    if fraction {
        if b.get(end) == Some(&b'.') {
            let frac = digits(end + 1);
            if frac > end + 1 {
                end = frac;
            }
        }
        if end > start && matches!(b.get(end), Some(b'e' | b'E')) {
            let exp = end + 1 + usize::from(matches!(b.get(end + 1), Some(b'+' | b'-')));
            let exp_end = digits(exp);
            if exp_end > exp {
                end = exp_end;
            }
        }
    }
    &s[..end]
}

/// Leading integer of `s`; 0 when there is none. Saturates on overflow.
fn parse_long_prefix(s: &str) -> i64 {
    let prefix = numeric_prefix(s, false);
    match prefix.parse::<i64>() {
        Ok(n) => n,
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => i64::MAX,
            IntErrorKind::NegOverflow => i64::MIN,
            _ => 0,
        },
    }
}

/// Leading decimal of `s`; 0.0 when there is none.
fn parse_double_prefix(s: &str) -> f64 {
    numeric_prefix(s, true).parse().unwrap_or(0.0)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Boolean(b) => b.to_string(),
        Value::Long(n) => n.to_string(),
        // Debug keeps the fractional part of integral values: `1.0`.
        Value::Double(f) => format!("{f:?}"),
        Value::String(s) => s.clone(),
        Value::Timestamp(t) => t.format(WIRE_TIMESTAMP_FORMAT).to_string(),
    }
}

fn from_epoch(value: &Value, tz: FixedOffset) -> Result<DateTime<FixedOffset>, ConvertError> {
    let utc = match value {
        Value::Long(secs) => DateTime::from_timestamp(*secs, 0),
        Value::Double(f) if f.is_finite() => {
            let secs = f.floor();
            let nanos = ((f - secs) * 1e9).round() as u32;
            DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
        }
        Value::Timestamp(t) => return Ok(t.with_timezone(&tz)),
        _ => None,
    };

    utc.map(|t| t.with_timezone(&tz))
        .ok_or_else(|| ConvertError::parse(format!("{value:?}"), "timestamp", "out of range"))
}

fn parse_timestamp(
    value: &Value,
    format: &str,
    tz: FixedOffset,
) -> Result<DateTime<FixedOffset>, ConvertError> {
    let text = match value {
        Value::String(s) => s.as_str(),
        Value::Timestamp(t) => return Ok(t.with_timezone(&tz)),
        other => {
            return Err(ConvertError::parse(
                format!("{other:?}"),
                "timestamp",
                "expected text",
            ));
        }
    };

    // The text carries its own offset: keep the instant, express it at tz.
    if let Ok(t) = DateTime::parse_from_str(text, format) {
        return Ok(t.with_timezone(&tz));
    }

    // Otherwise the wall clock is read at tz.
    let naive = NaiveDateTime::parse_from_str(text, format)
        .or_else(|_| {
            NaiveDate::parse_from_str(text, format)
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|e| ConvertError::parse(text, "timestamp", e))?;

    tz.from_local_datetime(&naive)
        .single()
        .ok_or_else(|| ConvertError::parse(text, "timestamp", "ambiguous local time"))
}

/// Column converters for one load, positionally aligned to the schema.
///
/// Built once before the pool starts and shared read-only by all workers.
#[derive(Debug, Clone)]
pub struct ConverterMap {
    converters: Vec<(String, ValueConverter)>,
}

impl ConverterMap {
    pub fn new(
        schema: &Schema,
        column_options: &HashMap<String, ColumnOption>,
        default_timezone: &str,
    ) -> Result<Self, ConvertError> {
        let default_tz = resolve_timezone(default_timezone)?;

        for name in column_options.keys() {
            if !schema.names().any(|n| n == name) {
                warn!("column option for unknown column `{name}` is ignored");
            }
        }

        let converters = schema
            .columns()
            .iter()
            .map(|column| {
                let converter = match column_options.get(&column.name) {
                    Some(option) => {
                        ValueConverter::new(&column.name, column.ty, option, default_tz)?
                    }
                    None => ValueConverter::identity(column.ty),
                };
                Ok((column.name.clone(), converter))
            })
            .collect::<Result<Vec<_>, ConvertError>>()?;

        Ok(Self { converters })
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&ValueConverter> {
        self.converters
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, c)| c)
    }

    /// Column names and converters in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValueConverter)> {
        self.converters.iter().map(|(n, c)| (n.as_str(), c))
    }
}

#[cfg(test)]
#[path = "converter_tests.rs"]
mod tests;
