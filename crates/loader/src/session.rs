use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use crate::error::{LoadError, SessionError, Stage};
use crate::stream::CopyStream;

/// Result of one finalized streaming load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOutcome {
    pub accepted: u64,
    /// Zero-based indices of the rows the destination parser rejected.
    pub rejected: Vec<u64>,
}

/// A connection to the destination store.
pub trait Session: Send + 'static {
    fn query(&mut self, sql: &str) -> Result<Vec<Vec<String>>, SessionError>;

    /// Run `sql` as a streaming load fed by `stream`. Returns once the
    /// stream has ended and the destination has finalized the load.
    fn streaming_load(
        &mut self,
        sql: &str,
        stream: &mut CopyStream,
    ) -> Result<CopyOutcome, SessionError>;

    fn commit(&mut self) -> Result<(), SessionError>;
    fn rollback(&mut self) -> Result<(), SessionError>;
    fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens one session per worker.
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    fn connect(&self, worker: usize) -> Result<Self::Session, SessionError>;
}

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Owns a session on a dedicated thread so that every call into it can be
/// waited on with a timeout.
///
/// Dropping the handle hangs up the job channel; the thread exits after
/// the call it is running, if any, returns. It is never joined.
pub(crate) struct SessionHandle<S: Session> {
    worker: usize,
    jobs: Sender<Job<S>>,
}

impl<S: Session> SessionHandle<S> {
    pub(crate) fn spawn(worker: usize, mut session: S) -> Result<Self, LoadError> {
        let (jobs, rx) = channel::unbounded::<Job<S>>();

        thread::Builder::new()
            .name(format!("sluice-session-{worker}"))
            .spawn(move || {
                for job in rx {
                    job(&mut session);
                }
                debug!("session thread finished");
            })
            .map_err(LoadError::Spawn)?;

        Ok(Self { worker, jobs })
    }

    /// Queue `f` on the session thread. The reply arrives on the returned
    /// channel.
    pub(crate) fn submit<R, F>(&self, f: F) -> Result<Receiver<R>, LoadError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let job: Job<S> = Box::new(move |session| {
            let _ = tx.send(f(session));
        });

        self.jobs
            .send(job)
            .map_err(|_| LoadError::SessionLost(self.worker))?;
        Ok(rx)
    }

    pub(crate) fn wait<R>(
        &self,
        reply: &Receiver<R>,
        stage: Stage,
        timeout: Duration,
    ) -> Result<R, LoadError> {
        match reply.recv_timeout(timeout) {
            Ok(r) => Ok(r),
            Err(RecvTimeoutError::Timeout) => Err(LoadError::Timeout {
                worker: self.worker,
                stage,
                timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(LoadError::SessionLost(self.worker)),
        }
    }

    /// Run a session method and wait for it, bounded by `timeout`.
    pub(crate) fn call<F>(&self, stage: Stage, timeout: Duration, f: F) -> Result<(), LoadError>
    where
        F: FnOnce(&mut S) -> Result<(), SessionError> + Send + 'static,
    {
        let reply = self.submit(f)?;
        self.wait(&reply, stage, timeout)?
            .map_err(|source| LoadError::Session {
                worker: self.worker,
                source,
            })
    }

    /// Like [`call`](Self::call), but failures are only logged.
    pub(crate) fn call_quietly<F>(&self, stage: Stage, timeout: Duration, f: F)
    where
        F: FnOnce(&mut S) -> Result<(), SessionError> + Send + 'static,
    {
        if let Err(e) = self.call(stage, timeout, f) {
            warn!("{stage} failed: {e}");
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
