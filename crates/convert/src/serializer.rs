use std::io::Write;
use std::sync::Arc;

use crate::converter::ConverterMap;
use crate::error::ConvertError;
use crate::types::Value;

/// Turns records into newline-terminated JSON object lines, one field per
/// schema column in schema order.
#[derive(Debug, Clone)]
pub struct RecordSerializer {
    converters: Arc<ConverterMap>,
    /// Pre-encoded `"name":` prefixes, one per column.
    keys: Vec<Vec<u8>>,
}

impl RecordSerializer {
    pub fn new(converters: Arc<ConverterMap>) -> Self {
        let keys = converters
            .iter()
            .map(|(name, _)| {
                let mut key = serde_json::Value::from(name).to_string().into_bytes();
                key.push(b':');
                key
            })
            .collect();

        Self { converters, keys }
    }

    pub fn converters(&self) -> &ConverterMap {
        &self.converters
    }

    /// Append one line for `record` to `out`. Nothing is appended on error.
    pub fn write_line(&self, record: &[Value], out: &mut Vec<u8>) -> Result<(), ConvertError> {
        if record.len() != self.keys.len() {
            return Err(ConvertError::ArityMismatch {
                expected: self.keys.len(),
                actual: record.len(),
            });
        }

        let start = out.len();
        let result = self.encode(record, out);
        if result.is_err() {
            out.truncate(start);
        }
        result
    }

    fn encode(&self, record: &[Value], out: &mut Vec<u8>) -> Result<(), ConvertError> {
        out.push(b'{');
        for (i, ((_, converter), value)) in self.converters.iter().zip(record).enumerate() {
            if i > 0 {
                out.push(b',');
            }
            out.extend_from_slice(&self.keys[i]);
            let wire = converter.convert(value)?.to_json()?;
            // Writing into a Vec cannot fail.
            let _ = write!(out, "{wire}");
        }
        out.extend_from_slice(b"}\n");
        Ok(())
    }

    pub fn to_line(&self, record: &[Value]) -> Result<String, ConvertError> {
        let mut out = Vec::new();
        self.write_line(record, &mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

#[cfg(test)]
#[path = "serializer_tests.rs"]
mod tests;
