use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sluice_convert::{Column, ColumnType, ConverterMap, Schema};
use sluice_loader::{LoadConfig, LoadTask};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// A load job file: the input schema plus the load options.
///
/// ```json
/// {
///   "columns": [{ "name": "id", "type": "long" }],
///   "load": { "table": "events", "compress": "GZIP" }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub columns: Vec<ColumnSpec>,
    pub load: LoadConfig,
}

/// A validated job, ready to run.
#[derive(Debug)]
pub struct Job {
    pub schema: Schema,
    pub converters: ConverterMap,
    pub task: LoadTask,
    pub load: LoadConfig,
}

impl JobConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn schema(&self) -> Result<Schema> {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let ty: ColumnType = c
                    .ty
                    .parse()
                    .with_context(|| format!("column `{}`", c.name))?;
                Ok(Column::new(c.name.clone(), ty))
            })
            .collect::<Result<Vec<_>>>()?;

        if columns.is_empty() {
            anyhow::bail!("`columns` must not be empty");
        }

        Ok(Schema::new(columns)?)
    }

    /// Check everything that can be checked before touching the destination.
    pub fn validate(self) -> Result<Job> {
        let schema = self.schema()?;
        let converters = ConverterMap::new(
            &schema,
            &self.load.column_options,
            &self.load.default_timezone,
        )?;
        let task = self.load.to_task()?;

        Ok(Job {
            schema,
            converters,
            task,
            load: self.load,
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
