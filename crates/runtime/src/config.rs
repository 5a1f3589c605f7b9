use std::time::Duration;

pub const PROGRAM_NAME: &str = "sluice";
pub const PROGRAM_LOG_LEVEL: &str = "SLUICE_LOG_LEVEL";

/// Producer blocked on a full worker queue.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(13 * 60);
/// Worker waiting for its next batch.
pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(12 * 60);
/// A single chunk write into the load stream.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(11 * 60);
pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(60);
/// Pool-level join of one worker after the finish sentinel was pushed.
pub const DEFAULT_FINISH_TIMEOUT: Duration = Duration::from_secs(6 * 60);

/// Depth of every worker queue. One queued batch per worker bounds memory.
pub const WORKER_QUEUE_DEPTH: usize = 1;

/// Size of a single write into the load stream. The transport only buffers
/// a few of these, so writes larger than this are split.
pub const STREAM_CHUNK_SIZE: usize = 32 * 1024;
/// Number of chunks the transport buffers before a write blocks.
pub const STREAM_BUFFER_CHUNKS: usize = 4;

/// Minimum wall-clock interval between two progress reports of a worker.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";
pub const DEFAULT_DB_SCHEMA: &str = "public";
pub const DEFAULT_COPY_MODE: &str = "AUTO";

/// Worker count used when none is configured.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
