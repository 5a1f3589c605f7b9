mod config;
pub mod logging;

pub use config::{
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_COMMIT_TIMEOUT, DEFAULT_COPY_MODE, DEFAULT_DB_SCHEMA,
    DEFAULT_DEQUEUE_TIMEOUT, DEFAULT_ENQUEUE_TIMEOUT, DEFAULT_FINISH_TIMEOUT,
    DEFAULT_ROLLBACK_TIMEOUT, DEFAULT_TIMESTAMP_FORMAT, DEFAULT_TIMEZONE, DEFAULT_WRITE_TIMEOUT,
    PROGRAM_LOG_LEVEL, PROGRAM_NAME, PROGRESS_INTERVAL, STREAM_BUFFER_CHUNKS, STREAM_CHUNK_SIZE,
    WORKER_QUEUE_DEPTH, default_pool_size,
};

pub use logging::init;
