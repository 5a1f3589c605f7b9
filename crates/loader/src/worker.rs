use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, error, info, trace, warn};
use sluice_convert::{Batch, RecordSerializer};
use sluice_runtime::{PROGRESS_INTERVAL, STREAM_BUFFER_CHUNKS, WORKER_QUEUE_DEPTH};

use crate::config::LoadTask;
use crate::diagnostics::Diagnostics;
use crate::error::{LoadError, SessionError, Stage};
use crate::progress::ProgressMeter;
use crate::report::{WorkerOutcome, WorkerReport};
use crate::session::{Session, SessionFactory, SessionHandle};
use crate::stream::{StreamWriter, copy_channel};

/// Destination error text produced when a value cannot be materialized
/// into its column type.
const PARSER_REJECTION: &str = "Rejected by user-defined parser";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Succeeded = 3,
    Failed = 4,
    Killed = 5,
}

impl WorkerState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Idle,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            3 => WorkerState::Succeeded,
            4 => WorkerState::Failed,
            _ => WorkerState::Killed,
        }
    }
}

/// Element of a worker queue.
pub(crate) enum Message {
    Batch(Batch),
    /// No more batches: finalize the load and commit.
    Finish,
}

/// Clears the liveness flag when the worker thread exits, panics included.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Pool-side handle of one worker: its queue and its thread.
pub(crate) struct Worker {
    id: usize,
    tx: Sender<Message>,
    rx: Option<Receiver<Message>>,
    done: Option<Receiver<WorkerReport>>,
    handle: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
    abandon: Arc<AtomicBool>,
    diagnostics: Arc<Diagnostics>,
    enqueue_timeout: Duration,
}

impl Worker {
    pub(crate) fn new(id: usize, enqueue_timeout: Duration, diagnostics: Arc<Diagnostics>) -> Self {
        let (tx, rx) = channel::bounded(WORKER_QUEUE_DEPTH);
        Self {
            id,
            tx,
            rx: Some(rx),
            done: None,
            handle: None,
            alive: Arc::new(AtomicBool::new(false)),
            abandon: Arc::new(AtomicBool::new(false)),
            diagnostics,
            enqueue_timeout,
        }
    }

    pub(crate) fn start<F: SessionFactory>(
        &mut self,
        factory: Arc<F>,
        task: Arc<LoadTask>,
        serializer: Arc<RecordSerializer>,
    ) -> Result<(), LoadError> {
        let rx = self.rx.take().ok_or(LoadError::AlreadyStarted)?;
        let (done_tx, done_rx) = channel::bounded(1);

        let ctx = WorkerContext {
            id: self.id,
            rx,
            task,
            serializer,
            diagnostics: Arc::clone(&self.diagnostics),
            alive: Arc::clone(&self.alive),
            abandon: Arc::clone(&self.abandon),
        };

        self.alive.store(true, Ordering::Release);
        let guard = AliveGuard(Arc::clone(&self.alive));
        let spawned = thread::Builder::new()
            .name(format!("sluice-worker-{}", self.id))
            .spawn(move || {
                let _guard = guard;
                let report = ctx.run(&*factory);
                let _ = done_tx.send(report);
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.done = Some(done_rx);
                Ok(())
            }
            Err(e) => {
                self.alive.store(false, Ordering::Release);
                Err(LoadError::Spawn(e))
            }
        }
    }

    /// Push a batch, blocking while the queue is full.
    pub(crate) fn enqueue(&self, batch: Batch) -> Result<(), LoadError> {
        if self.done.is_none() {
            return Err(LoadError::NotStarted);
        }
        if !self.alive.load(Ordering::Acquire) {
            return Err(LoadError::WorkerDead(self.id));
        }

        trace!("enqueue {} rows to worker {}", batch.len(), self.id);
        match self
            .tx
            .send_timeout(Message::Batch(batch), self.enqueue_timeout)
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(LoadError::Timeout {
                worker: self.id,
                stage: Stage::Enqueue,
                timeout: self.enqueue_timeout,
            }),
            Err(SendTimeoutError::Disconnected(_)) => Err(LoadError::WorkerDead(self.id)),
        }
    }

    /// Tell a live worker to finalize. Dead workers are left alone.
    pub(crate) fn signal_finish(&self) {
        if !self.alive.load(Ordering::Acquire) {
            return;
        }

        if let Err(e) = self.tx.send_timeout(Message::Finish, self.enqueue_timeout) {
            let reason = match e {
                SendTimeoutError::Timeout(_) => "queue stayed full",
                SendTimeoutError::Disconnected(_) => "worker exited",
            };
            warn!("could not signal worker {} to finish: {reason}", self.id);
        }
    }

    /// Wait for the worker's report. A worker still running after `timeout`
    /// is abandoned: its thread is detached and it is reported as killed.
    pub(crate) fn join(&mut self, timeout: Duration) -> WorkerReport {
        let Some(done) = self.done.take() else {
            return WorkerReport {
                outcome: WorkerOutcome::Failed(LoadError::NotStarted),
                ..WorkerReport::new(self.id)
            };
        };

        match done.recv_timeout(timeout) {
            Ok(report) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                report
            }
            Err(RecvTimeoutError::Timeout) => {
                self.abandon.store(true, Ordering::Release);
                self.diagnostics.set_state(self.id, WorkerState::Killed);
                self.handle.take();
                error!(
                    "worker {} did not finish within {timeout:?}; abandoning its thread",
                    self.id
                );
                WorkerReport::killed(self.id)
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                self.diagnostics.set_state(self.id, WorkerState::Failed);
                error!("worker {} thread panicked", self.id);
                WorkerReport {
                    outcome: WorkerOutcome::Failed(LoadError::Panicked(self.id)),
                    ..WorkerReport::new(self.id)
                }
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // A thread that was never joined must not commit afterwards.
        if self.handle.is_some() {
            self.abandon.store(true, Ordering::Release);
        }
    }
}

/// Everything the worker thread owns.
struct WorkerContext {
    id: usize,
    rx: Receiver<Message>,
    task: Arc<LoadTask>,
    serializer: Arc<RecordSerializer>,
    diagnostics: Arc<Diagnostics>,
    alive: Arc<AtomicBool>,
    abandon: Arc<AtomicBool>,
}

impl WorkerContext {
    fn run<F: SessionFactory>(self, factory: &F) -> WorkerReport {
        debug!("thread started");
        self.diagnostics.set_state(self.id, WorkerState::Running);

        let mut report = WorkerReport::new(self.id);
        match self.load(factory, &mut report) {
            Ok(()) => {
                self.diagnostics.set_state(self.id, WorkerState::Succeeded);
            }
            Err(e) => {
                self.alive.store(false, Ordering::Release);
                if e.is_unexpected_timeout() {
                    self.diagnostics.dump_once(self.id, &e.to_string());
                }

                let discarded = self.rx.try_iter().count();
                if discarded > 0 {
                    warn!("discarded {discarded} queued messages");
                }

                error!("load failed: {e}");
                self.diagnostics.set_state(self.id, WorkerState::Failed);
                report.outcome = WorkerOutcome::Failed(e);
            }
        }

        debug!(
            "thread finished: {} rows in, {} rows out, {} rejected",
            report.num_input_rows, report.num_output_rows, report.num_rejected_rows
        );
        report
    }

    fn load<F: SessionFactory>(
        &self,
        factory: &F,
        report: &mut WorkerReport,
    ) -> Result<(), LoadError> {
        let first = match self.dequeue()? {
            Message::Batch(batch) => batch,
            Message::Finish => {
                debug!("finished before the first batch");
                return Ok(());
            }
        };

        let session = factory
            .connect(self.id)
            .map_err(|source| LoadError::Session {
                worker: self.id,
                source,
            })?;
        let session = SessionHandle::spawn(self.id, session)?;

        let timeouts = &self.task.timeouts;
        let result = self.copy_and_commit(&session, first, report);
        if result.is_err() {
            warn!("ROLLBACK");
            session.call_quietly(Stage::Rollback, timeouts.rollback, |s| s.rollback());
        }
        session.call_quietly(Stage::Close, timeouts.close, |s| s.close());

        result
    }

    fn copy_and_commit<S: Session>(
        &self,
        session: &SessionHandle<S>,
        first: Batch,
        report: &mut WorkerReport,
    ) -> Result<(), LoadError> {
        let task = &self.task;
        let sql = task.copy.sql();
        debug!("{sql}");

        let (tx, mut stream) = copy_channel(STREAM_BUFFER_CHUNKS);
        let copy = session.submit(move |s| s.streaming_load(&sql, &mut stream))?;

        let writer = StreamWriter::new(
            self.id,
            tx,
            task.copy.compression,
            task.chunk_size,
            task.timeouts.write,
            Arc::clone(&self.abandon),
        );

        let mut last_line = Vec::new();
        if let Err(e) = self.stream_batches(first, writer, &mut last_line, report) {
            // The destination hung up early: its own error explains why.
            if matches!(e, LoadError::StreamClosed(_)) {
                if let Ok(Err(source)) = session.wait(&copy, Stage::Finalize, task.timeouts.write) {
                    return Err(self.session_failed(source, &last_line));
                }
            }
            return Err(e);
        }

        let outcome = session
            .wait(&copy, Stage::Finalize, task.timeouts.write)?
            .map_err(|source| self.session_failed(source, &last_line))?;

        let rejected = outcome.rejected.len();
        report.num_rejected_rows += rejected as u64;
        if rejected > 0 {
            for row in &outcome.rejected {
                trace!("row {row} rejected");
            }
            if task.abort_on_reject {
                return Err(LoadError::Rejected {
                    worker: self.id,
                    count: rejected,
                });
            }
            warn!("{rejected} rows rejected by the destination");
        }

        if self.abandon.load(Ordering::Acquire) {
            return Err(LoadError::Abandoned(self.id));
        }

        session.call(Stage::Commit, task.timeouts.commit, |s| s.commit())?;
        report.num_output_rows += outcome.accepted;
        info!("COMMIT!");

        Ok(())
    }

    /// Serialize `first` and every following batch until the finish message,
    /// then end the stream.
    fn stream_batches(
        &self,
        first: Batch,
        mut writer: StreamWriter,
        line: &mut Vec<u8>,
        report: &mut WorkerReport,
    ) -> Result<(), LoadError> {
        let mut meter = ProgressMeter::new(self.id, PROGRESS_INTERVAL, Instant::now());
        let mut batch = first;

        loop {
            for record in &batch {
                line.clear();
                self.serializer.write_line(record, line)?;
                trace!("{}", String::from_utf8_lossy(line).trim_end());
                writer.write(line)?;
                report.num_input_rows += 1;
            }
            report.num_batches += 1;

            if let Some(p) = meter.observe(report.num_input_rows, Instant::now()) {
                info!("{} rows loaded ({:.1} rows/s)", p.total_rows, p.rows_per_sec);
            }

            match self.dequeue()? {
                Message::Batch(next) => batch = next,
                Message::Finish => break,
            }
        }

        self.diagnostics.set_state(self.id, WorkerState::Draining);
        let bytes = writer.finish()?;
        debug!("stream finished after {bytes} bytes");
        Ok(())
    }

    fn dequeue(&self) -> Result<Message, LoadError> {
        let timeout = self.task.timeouts.dequeue;
        match self.rx.recv_timeout(timeout) {
            Ok(_) if self.abandon.load(Ordering::Acquire) => Err(LoadError::Abandoned(self.id)),
            Ok(msg) => {
                if let Message::Batch(batch) = &msg {
                    trace!("dequeue {} rows", batch.len());
                }
                Ok(msg)
            }
            Err(RecvTimeoutError::Timeout) => Err(LoadError::Timeout {
                worker: self.id,
                stage: Stage::Dequeue,
                timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(LoadError::Abandoned(self.id)),
        }
    }

    fn session_failed(&self, source: SessionError, last_line: &[u8]) -> LoadError {
        if self.task.copy.reject_on_materialized_type_error
            && source.to_string().contains(PARSER_REJECTION)
        {
            warn!(
                "a value does not match its destination column type; last line sent: {}",
                String::from_utf8_lossy(last_line).trim_end()
            );
        }
        LoadError::Session {
            worker: self.id,
            source,
        }
    }
}
