mod converter;
mod error;
mod serializer;
mod timezone;
mod types;

pub use converter::{ColumnOption, ConverterMap, ValueConverter};
pub use error::ConvertError;
pub use serializer::RecordSerializer;
pub use timezone::resolve_timezone;
pub use types::{Batch, Column, ColumnType, Record, Schema, Value, WIRE_TIMESTAMP_FORMAT};
