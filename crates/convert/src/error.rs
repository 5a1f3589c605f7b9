use thiserror::Error;

/// Errors raised while building or applying value converters.
///
/// Everything except `Parse` and `ArityMismatch` is a construction error:
/// it surfaces before the first batch is accepted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConvertError {
    #[error("unsupported column type `{0}`")]
    UnsupportedType(String),

    #[error("cannot convert `{declared}` column `{column}` to `{requested}`")]
    UnsupportedConversion {
        column: String,
        declared: String,
        requested: String,
    },

    #[error("invalid timezone `{0}`: expected [+-]HH[:MM], UTC or Region/City")]
    InvalidTimezone(String),

    #[error("invalid timestamp format `{0}`")]
    InvalidFormat(String),

    #[error("duplicate column `{0}` in schema")]
    DuplicateColumn(String),

    #[error("cannot convert {value} to {target}: {reason}")]
    Parse {
        value: String,
        target: &'static str,
        reason: String,
    },

    #[error("record has {actual} values but schema has {expected} columns")]
    ArityMismatch { expected: usize, actual: usize },
}

impl ConvertError {
    pub(crate) fn parse(value: impl ToString, target: &'static str, reason: impl ToString) -> Self {
        ConvertError::Parse {
            value: value.to_string(),
            target,
            reason: reason.to_string(),
        }
    }
}
