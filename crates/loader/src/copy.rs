use crate::config::{Compression, CopyMode};

/// The destination's COPY-from-stream statement for one temp table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyStatement {
    pub schema: String,
    pub table: String,
    pub compression: Compression,
    pub copy_mode: CopyMode,
    pub abort_on_error: bool,
    pub reject_on_materialized_type_error: bool,
}

impl CopyStatement {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            compression: Compression::None,
            copy_mode: CopyMode::Auto,
            abort_on_error: false,
            reject_on_materialized_type_error: false,
        }
    }

    pub fn sql(&self) -> String {
        let gzip = match self.compression {
            Compression::None => "",
            Compression::Gzip => " GZIP",
        };
        let parser_option = if self.reject_on_materialized_type_error {
            "reject_on_materialized_type_error=true"
        } else {
            ""
        };
        let abort = if self.abort_on_error {
            " ABORT ON ERROR"
        } else {
            ""
        };

        format!(
            "COPY {}.{} FROM STDIN{} PARSER fjsonparser({}) {}{} NO COMMIT",
            quote_identifier(&self.schema),
            quote_identifier(&self.table),
            gzip,
            parser_option,
            self.copy_mode,
            abort
        )
    }
}

pub fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
#[path = "copy_tests.rs"]
mod tests;
