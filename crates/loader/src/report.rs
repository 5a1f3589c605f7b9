use serde_json::{Value as JsonValue, json};

use crate::error::LoadError;

#[derive(Debug)]
pub enum WorkerOutcome {
    Success,
    Failed(LoadError),
    /// Did not finish within the finish timeout and was abandoned.
    Killed,
}

impl WorkerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerOutcome::Success => "success",
            WorkerOutcome::Failed(_) => "failed",
            WorkerOutcome::Killed => "killed",
        }
    }
}

/// Counters of one worker. Written only by the worker's own thread and
/// handed to the pool through its completion channel.
#[derive(Debug)]
pub struct WorkerReport {
    pub worker: usize,
    pub num_input_rows: u64,
    pub num_output_rows: u64,
    pub num_rejected_rows: u64,
    pub num_batches: u64,
    pub outcome: WorkerOutcome,
}

impl WorkerReport {
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            num_input_rows: 0,
            num_output_rows: 0,
            num_rejected_rows: 0,
            num_batches: 0,
            outcome: WorkerOutcome::Success,
        }
    }

    /// Report for a worker whose thread never handed back its counters.
    pub fn killed(worker: usize) -> Self {
        Self {
            outcome: WorkerOutcome::Killed,
            ..Self::new(worker)
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, WorkerOutcome::Success)
    }

    pub fn error(&self) -> Option<&LoadError> {
        match &self.outcome {
            WorkerOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn summary(&self) -> JsonValue {
        json!({
            "worker": self.worker,
            "outcome": self.outcome.as_str(),
            "error": self.error().map(|e| e.to_string()),
            "num_input_rows": self.num_input_rows,
            "num_output_rows": self.num_output_rows,
            "num_rejected_rows": self.num_rejected_rows,
            "num_batches": self.num_batches,
        })
    }
}

/// Aggregate of every worker's report, in worker order.
#[derive(Debug)]
pub struct PoolReport {
    pub workers: Vec<WorkerReport>,
}

impl PoolReport {
    /// True only when every worker succeeded.
    pub fn success(&self) -> bool {
        self.workers.iter().all(WorkerReport::success)
    }

    pub fn num_input_rows(&self) -> u64 {
        self.workers.iter().map(|w| w.num_input_rows).sum()
    }

    pub fn num_output_rows(&self) -> u64 {
        self.workers.iter().map(|w| w.num_output_rows).sum()
    }

    pub fn num_rejected_rows(&self) -> u64 {
        self.workers.iter().map(|w| w.num_rejected_rows).sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &WorkerReport> {
        self.workers.iter().filter(|w| !w.success())
    }

    pub fn summary(&self) -> JsonValue {
        json!({
            "success": self.success(),
            "num_input_rows": self.num_input_rows(),
            "num_output_rows": self.num_output_rows(),
            "num_rejected_rows": self.num_rejected_rows(),
            "workers": self.workers.iter().map(WorkerReport::summary).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
