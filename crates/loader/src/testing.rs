//! Scripted destination used by the pool and worker tests.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam::channel::Receiver;
use flate2::read::GzDecoder;
use sluice_convert::{Batch, Column, ColumnType, ConverterMap, Schema, Value};

use crate::config::LoadTask;
use crate::copy::CopyStatement;
use crate::error::SessionError;
use crate::session::{CopyOutcome, Session, SessionFactory};
use crate::stream::CopyStream;

/// What every scripted session observed, across all workers.
#[derive(Debug, Default)]
pub(crate) struct Recorded {
    pub lines: Mutex<BTreeMap<usize, Vec<String>>>,
    pub connects: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Recorded {
    pub fn lines(&self, worker: usize) -> Vec<String> {
        self.lines
            .lock()
            .expect("lines lock")
            .get(&worker)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_lines(&self) -> usize {
        self.lines.lock().expect("lines lock").values().map(Vec::len).sum()
    }
}

#[derive(Default)]
pub(crate) struct ScriptedFactory {
    pub recorded: Arc<Recorded>,
    /// Row indices every load rejects.
    pub reject: Vec<u64>,
    /// Error message every load fails with after reading its stream.
    pub load_error: Option<String>,
    /// `connect` blocks until this channel yields or hangs up.
    pub gate: Option<Receiver<()>>,
    pub stall_load: Option<Duration>,
    pub stall_commit: Option<Duration>,
    pub stall_rollback: Option<Duration>,
}

pub(crate) struct ScriptedSession {
    worker: usize,
    recorded: Arc<Recorded>,
    reject: Vec<u64>,
    load_error: Option<String>,
    stall_load: Option<Duration>,
    stall_commit: Option<Duration>,
    stall_rollback: Option<Duration>,
}

impl SessionFactory for ScriptedFactory {
    type Session = ScriptedSession;

    fn connect(&self, worker: usize) -> Result<ScriptedSession, SessionError> {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        self.recorded.connects.fetch_add(1, Ordering::SeqCst);

        Ok(ScriptedSession {
            worker,
            recorded: Arc::clone(&self.recorded),
            reject: self.reject.clone(),
            load_error: self.load_error.clone(),
            stall_load: self.stall_load,
            stall_commit: self.stall_commit,
            stall_rollback: self.stall_rollback,
        })
    }
}

impl Session for ScriptedSession {
    fn query(&mut self, _sql: &str) -> Result<Vec<Vec<String>>, SessionError> {
        Ok(Vec::new())
    }

    fn streaming_load(
        &mut self,
        sql: &str,
        stream: &mut CopyStream,
    ) -> Result<CopyOutcome, SessionError> {
        let reader: Box<dyn Read + '_> = if sql.contains(" GZIP") {
            Box::new(GzDecoder::new(stream))
        } else {
            Box::new(stream)
        };

        let lines = BufReader::new(reader)
            .lines()
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(delay) = self.stall_load {
            thread::sleep(delay);
        }
        if let Some(message) = &self.load_error {
            return Err(SessionError::Statement(message.clone()));
        }

        let total = lines.len() as u64;
        let rejected: Vec<u64> = self.reject.iter().copied().filter(|&i| i < total).collect();
        self.recorded
            .lines
            .lock()
            .expect("lines lock")
            .entry(self.worker)
            .or_default()
            .extend(lines);

        Ok(CopyOutcome {
            accepted: total - rejected.len() as u64,
            rejected,
        })
    }

    fn commit(&mut self) -> Result<(), SessionError> {
        if let Some(delay) = self.stall_commit {
            thread::sleep(delay);
        }
        self.recorded.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SessionError> {
        if let Some(delay) = self.stall_rollback {
            thread::sleep(delay);
        }
        self.recorded.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.recorded.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn schema() -> Schema {
    Schema::new(vec![
        Column::new("id", ColumnType::Long),
        Column::new("name", ColumnType::String),
    ])
    .expect("schema")
}

pub(crate) fn converters() -> Arc<ConverterMap> {
    Arc::new(ConverterMap::new(&schema(), &Default::default(), "UTC").expect("converters"))
}

pub(crate) fn task(pool_size: usize) -> LoadTask {
    LoadTask::new(CopyStatement::new("public", "t_LOAD_TEMP_test"), pool_size)
}

/// A batch of `rows` records with ids starting at `first_id`.
pub(crate) fn batch(first_id: i64, rows: usize) -> Batch {
    (0..rows as i64)
        .map(|i| {
            let id = first_id + i;
            vec![Value::Long(id), Value::String(format!("row-{id}"))]
        })
        .collect()
}
