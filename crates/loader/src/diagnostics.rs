use std::backtrace::Backtrace;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use log::error;

use crate::worker::WorkerState;

/// Pool-wide diagnostic state shared by every worker.
///
/// Holds the single-flight flag for the one-time dump and a snapshot slot
/// for each worker's current state.
#[derive(Debug)]
pub struct Diagnostics {
    claimed: AtomicBool,
    states: Vec<AtomicU8>,
}

impl Diagnostics {
    pub fn new(workers: usize) -> Arc<Self> {
        Arc::new(Self {
            claimed: AtomicBool::new(false),
            states: (0..workers)
                .map(|_| AtomicU8::new(WorkerState::Idle as u8))
                .collect(),
        })
    }

    /// Returns true for exactly one caller over the lifetime of the pool.
    pub fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn set_state(&self, worker: usize, state: WorkerState) {
        if let Some(slot) = self.states.get(worker) {
            slot.store(state as u8, Ordering::Release);
        }
    }

    pub fn state(&self, worker: usize) -> Option<WorkerState> {
        self.states
            .get(worker)
            .map(|slot| WorkerState::from_u8(slot.load(Ordering::Acquire)))
    }

    /// Log every worker's state and the caller's backtrace, once per pool.
    /// Returns whether this call performed the dump.
    pub fn dump_once(&self, worker: usize, reason: &str) -> bool {
        if !self.claim() {
            return false;
        }

        let mut out = String::new();
        let _ = writeln!(out, "worker {worker} hit an unexpected timeout: {reason}");
        for (i, _) in self.states.iter().enumerate() {
            if let Some(state) = self.state(i) {
                let _ = writeln!(out, "  worker {i}: {state:?}");
            }
        }
        let _ = write!(out, "{}", Backtrace::force_capture());

        error!("{out}");
        true
    }
}

#[cfg(test)]
#[path = "diagnostics_tests.rs"]
mod tests;
