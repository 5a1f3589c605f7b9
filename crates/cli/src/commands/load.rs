use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use log::{debug, error, info, warn};
use sluice_convert::{Record, Schema, Value};
use sluice_loader::{DirSessionFactory, LoadError, LoadPool, PoolReport, SessionFactory};

use crate::config::{Job, JobConfig};
use crate::printer::{OutputFormat, write_report};

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Job file with the input columns and load options.
    #[arg(long, short = 'c')]
    pub config: PathBuf,

    /// Newline-delimited JSON input; `-` reads stdin.
    #[arg(long, short = 'i', default_value = "-")]
    pub input: String,

    /// Destination directory.
    #[arg(long, short = 'o')]
    pub out: PathBuf,

    /// Records per batch handed to a worker.
    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,

    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,
}

pub fn run(args: LoadArgs) -> ExitCode {
    match execute(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("[load] {e:#}");
            ExitCode::from(2)
        }
    }
}

fn execute(args: LoadArgs) -> Result<ExitCode> {
    if args.batch_size == 0 {
        bail!("--batch-size must be at least 1");
    }

    let job = JobConfig::from_path(&args.config)?.validate()?;
    let input = open_input(&args.input)?;
    let factory = DirSessionFactory::new(&args.out)
        .with_context(|| format!("cannot use {} as destination", args.out.display()))?;

    let mut stdout = io::stdout().lock();
    match load(job, input, &factory, args.batch_size) {
        Ok(report) => {
            write_report(&mut stdout, &report, args.format)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            if let Some(LoadError::PoolFailed(report)) = e.downcast_ref::<LoadError>() {
                write_report(&mut stdout, report, args.format)?;
            }
            error!("{e:#}");
            eprintln!("[load] {e:#}");
            Ok(ExitCode::from(1))
        }
    }
}

fn open_input(input: &str) -> Result<Box<dyn BufRead>> {
    if input == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(input).with_context(|| format!("cannot open input {input}"))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Run one load into `factory`'s directory. The temp table is promoted into
/// the target table on success and discarded otherwise.
pub fn load<R: BufRead>(
    job: Job,
    input: R,
    factory: &DirSessionFactory,
    batch_size: usize,
) -> Result<PoolReport> {
    let Job {
        schema,
        converters,
        task,
        load,
    } = job;
    let db_schema = task.copy.schema.clone();
    let temp = task.copy.table.clone();
    info!("loading into {db_schema}.{} via {temp}", load.table);

    let mut pool = LoadPool::new(task, Arc::new(converters), factory.clone())?;
    pool.start()?;

    let fed = feed(&pool, &schema, input, batch_size);
    let committed = pool.commit();

    let result = match (fed, committed) {
        (Ok(rows), Ok(report)) => {
            debug!("fed {rows} records");
            Ok(report)
        }
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(pool_err)) => Err(anyhow::Error::from(pool_err).context(format!("{e:#}"))),
    };

    match result {
        Ok(report) => {
            factory
                .promote(&db_schema, &temp, &load.table)
                .with_context(|| format!("failed to promote {temp} into {}", load.table))?;
            Ok(report)
        }
        Err(e) => {
            if let Err(cleanup) = factory.discard(&db_schema, &temp) {
                warn!("failed to discard {temp}: {cleanup}");
            }
            Err(e)
        }
    }
}

fn feed<F: SessionFactory, R: BufRead>(
    pool: &LoadPool<F>,
    schema: &Schema,
    input: R,
    batch_size: usize,
) -> Result<u64> {
    let mut batch = Vec::with_capacity(batch_size);
    let mut rows = 0;

    for (n, line) in input.lines().enumerate() {
        let line = line.context("failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }

        let record = parse_record(&line, schema).with_context(|| format!("input line {}", n + 1))?;
        batch.push(record);
        rows += 1;

        if batch.len() >= batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            pool.enqueue(full)?;
        }
    }

    if !batch.is_empty() {
        pool.enqueue(batch)?;
    }
    Ok(rows)
}

static NULL: serde_json::Value = serde_json::Value::Null;

/// Type one input line by the schema. Missing fields are null; fields not
/// in the schema are ignored.
pub fn parse_record(line: &str, schema: &Schema) -> Result<Record> {
    let json: serde_json::Value = serde_json::from_str(line)?;
    let Some(object) = json.as_object() else {
        bail!("expected a JSON object");
    };

    schema
        .columns()
        .iter()
        .map(|column| {
            let raw = object.get(&column.name).unwrap_or(&NULL);
            Value::from_json(raw, column.ty).with_context(|| format!("column `{}`", column.name))
        })
        .collect()
}

#[cfg(test)]
#[path = "load_tests.rs"]
mod tests;
