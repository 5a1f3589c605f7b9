use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info};
use sluice_convert::{Batch, ConverterMap, RecordSerializer};

use crate::config::LoadTask;
use crate::diagnostics::Diagnostics;
use crate::error::LoadError;
use crate::report::PoolReport;
use crate::session::SessionFactory;
use crate::worker::{Worker, WorkerState};

struct Dispatch {
    workers: Vec<Worker>,
    next: usize,
}

/// Fixed-size pool of load workers fed round-robin.
///
/// Batch `k` (counting successful enqueues since start) goes to worker
/// `k % pool_size`. Each worker queue holds a single batch, so a producer
/// blocks in [`enqueue`](Self::enqueue) until the target worker catches up.
///
/// ```text
/// let mut pool = LoadPool::new(task, converters, factory)?;
/// pool.start()?;
/// for batch in batches { pool.enqueue(batch)?; }
/// let report = pool.commit()?;
/// ```
pub struct LoadPool<F: SessionFactory> {
    factory: Arc<F>,
    task: Arc<LoadTask>,
    serializer: Arc<RecordSerializer>,
    diagnostics: Arc<Diagnostics>,
    dispatch: Mutex<Dispatch>,
    started: bool,
}

impl<F: SessionFactory> LoadPool<F> {
    pub fn new(
        task: LoadTask,
        converters: Arc<ConverterMap>,
        factory: F,
    ) -> Result<Self, LoadError> {
        if task.pool_size == 0 {
            return Err(LoadError::Config("pool size must be at least 1".into()));
        }

        let diagnostics = Diagnostics::new(task.pool_size);
        let workers = (0..task.pool_size)
            .map(|id| Worker::new(id, task.timeouts.enqueue, Arc::clone(&diagnostics)))
            .collect();

        Ok(Self {
            factory: Arc::new(factory),
            serializer: Arc::new(RecordSerializer::new(converters)),
            task: Arc::new(task),
            diagnostics,
            dispatch: Mutex::new(Dispatch { workers, next: 0 }),
            started: false,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.task.pool_size
    }

    pub fn task(&self) -> &LoadTask {
        &self.task
    }

    pub fn worker_state(&self, worker: usize) -> Option<WorkerState> {
        self.diagnostics.state(worker)
    }

    /// Launch every worker thread.
    pub fn start(&mut self) -> Result<(), LoadError> {
        if self.started {
            return Err(LoadError::AlreadyStarted);
        }
        self.started = true;

        let dispatch = self
            .dispatch
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for worker in &mut dispatch.workers {
            worker.start(
                Arc::clone(&self.factory),
                Arc::clone(&self.task),
                Arc::clone(&self.serializer),
            )?;
        }

        debug!("started {} workers", dispatch.workers.len());
        Ok(())
    }

    /// Hand `batch` to the next worker in turn. Safe to call from several
    /// producer threads; routing and the push happen under one lock.
    pub fn enqueue(&self, batch: Batch) -> Result<(), LoadError> {
        if !self.started {
            return Err(LoadError::NotStarted);
        }

        let mut dispatch = self.lock();
        let next = dispatch.next;
        dispatch.workers[next].enqueue(batch)?;
        dispatch.next = (next + 1) % dispatch.workers.len();
        Ok(())
    }

    /// Finish every worker, wait for all of them and aggregate their reports.
    ///
    /// Fails with [`LoadError::PoolFailed`] carrying the full report when any
    /// worker failed or had to be abandoned.
    pub fn commit(self) -> Result<PoolReport, LoadError> {
        if !self.started {
            return Err(LoadError::NotStarted);
        }

        let finish = self.task.timeouts.finish;
        let mut dispatch = self
            .dispatch
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        for worker in &dispatch.workers {
            worker.signal_finish();
        }

        let workers = dispatch
            .workers
            .iter_mut()
            .map(|worker| worker.join(finish))
            .collect();
        let report = PoolReport { workers };

        if report.success() {
            info!(
                "load finished: {} rows in, {} rows out, {} rejected",
                report.num_input_rows(),
                report.num_output_rows(),
                report.num_rejected_rows()
            );
            Ok(report)
        } else {
            for failed in report.failed() {
                error!(
                    "worker {} {}: {}",
                    failed.worker,
                    failed.outcome.as_str(),
                    failed
                        .error()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no report".into())
                );
            }
            Err(LoadError::PoolFailed(Box::new(report)))
        }
    }

    fn lock(&self) -> MutexGuard<'_, Dispatch> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
