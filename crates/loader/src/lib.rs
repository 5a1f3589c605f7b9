//! Parallel streaming bulk loader.
//!
//! A [`LoadPool`] owns a fixed set of workers. Each worker has a queue one
//! batch deep, its own destination [`Session`] and a single long-lived
//! streaming load into which it serializes every batch it receives.

mod config;
mod copy;
mod diagnostics;
mod dir_session;
mod error;
mod pool;
mod progress;
mod report;
mod session;
mod stream;
mod worker;

#[cfg(test)]
mod testing;

pub use config::{
    Compression, CopyMode, LoadConfig, LoadTask, TimeoutConfig, Timeouts, temp_table_name,
};
pub use copy::{CopyStatement, quote_identifier};
pub use diagnostics::Diagnostics;
pub use dir_session::{DirSession, DirSessionFactory};
pub use error::{LoadError, SessionError, Stage};
pub use pool::LoadPool;
pub use progress::{Progress, ProgressMeter};
pub use report::{PoolReport, WorkerOutcome, WorkerReport};
pub use session::{CopyOutcome, Session, SessionFactory};
pub use stream::CopyStream;
pub use worker::WorkerState;
