use std::fmt;
use std::io;
use std::time::Duration;

use sluice_convert::ConvertError;
use thiserror::Error;

use crate::report::PoolReport;

/// Blocking points of a load, each bounded by its own timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Enqueue,
    Dequeue,
    Write,
    /// Waiting for the destination to finalize the streaming load.
    Finalize,
    Commit,
    Rollback,
    Close,
    Finish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Enqueue => "enqueue",
            Stage::Dequeue => "dequeue",
            Stage::Write => "write",
            Stage::Finalize => "finalize",
            Stage::Commit => "commit",
            Stage::Rollback => "rollback",
            Stage::Close => "close",
            Stage::Finish => "finish",
        };
        f.write_str(name)
    }
}

/// Error reported by a destination session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("statement failed: {0}")]
    Statement(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("worker {worker}: {stage} timed out after {timeout:?}")]
    Timeout {
        worker: usize,
        stage: Stage,
        timeout: Duration,
    },

    #[error("worker {0} is no longer alive")]
    WorkerDead(usize),

    #[error("pool has not been started")]
    NotStarted,

    #[error("pool has already been started")]
    AlreadyStarted,

    #[error("worker {worker}: {source}")]
    Session {
        worker: usize,
        #[source]
        source: SessionError,
    },

    #[error("worker {0}: session thread is gone")]
    SessionLost(usize),

    #[error("worker {0}: destination closed the load stream")]
    StreamClosed(usize),

    #[error("worker {worker}: destination rejected {count} rows")]
    Rejected { worker: usize, count: usize },

    #[error("worker {0}: abandoned by the pool")]
    Abandoned(usize),

    #[error("worker {0}: thread panicked")]
    Panicked(usize),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("load failed: {} of {} workers did not succeed", .0.failed().count(), .0.workers.len())]
    PoolFailed(Box<PoolReport>),
}

impl LoadError {
    /// A timeout no stage-specific handler accounts for. These trigger the
    /// one-time diagnostic dump.
    pub fn is_unexpected_timeout(&self) -> bool {
        matches!(
            self,
            LoadError::Timeout {
                stage: Stage::Finalize,
                ..
            }
        )
    }

    pub fn timeout_stage(&self) -> Option<Stage> {
        match self {
            LoadError::Timeout { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
