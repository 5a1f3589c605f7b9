use std::time::{Duration, Instant};

/// A single progress observation of one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub worker: usize,
    pub total_rows: u64,
    pub rows_per_sec: f64,
}

/// Rate limiter for progress reports: at most one per `interval`.
#[derive(Debug)]
pub struct ProgressMeter {
    worker: usize,
    interval: Duration,
    last_at: Instant,
    last_rows: u64,
}

impl ProgressMeter {
    pub fn new(worker: usize, interval: Duration, now: Instant) -> Self {
        Self {
            worker,
            interval,
            last_at: now,
            last_rows: 0,
        }
    }

    /// Returns a report once `interval` has elapsed since the previous one.
    /// Throughput covers the rows seen since that report.
    pub fn observe(&mut self, total_rows: u64, now: Instant) -> Option<Progress> {
        let elapsed = now.saturating_duration_since(self.last_at);
        if elapsed < self.interval || elapsed.is_zero() {
            return None;
        }

        let rows = total_rows.saturating_sub(self.last_rows);
        let rows_per_sec = rows as f64 / elapsed.as_secs_f64();

        self.last_at = now;
        self.last_rows = total_rows;

        Some(Progress {
            worker: self.worker,
            total_rows,
            rows_per_sec,
        })
    }
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
