use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use flate2::write::GzEncoder;

use crate::config::Compression;
use crate::error::{LoadError, Stage};

/// Read side of the load stream, handed to the destination session.
///
/// Backed by a bounded channel of chunks, so the writer blocks once the
/// destination stops reading. End of stream is signalled by the writer
/// hanging up.
pub struct CopyStream {
    rx: Receiver<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
}

impl CopyStream {
    /// A stream that yields `data` and then ends.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let (tx, rx) = channel::bounded(1);
        let _ = tx.send(data);
        Self {
            rx,
            current: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for CopyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.current.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Create a connected writer-side sender and [`CopyStream`] buffering at most
/// `buffer_chunks` chunks.
pub(crate) fn copy_channel(buffer_chunks: usize) -> (Sender<Vec<u8>>, CopyStream) {
    let (tx, rx) = channel::bounded(buffer_chunks);
    let stream = CopyStream {
        rx,
        current: Vec::new(),
        pos: 0,
    };
    (tx, stream)
}

/// Output filter applied to serialized lines before they hit the transport.
pub(crate) enum CompressionFilter {
    Uncompressed(Vec<u8>),
    Gzip(GzEncoder<Vec<u8>>),
}

impl CompressionFilter {
    pub(crate) fn new(compression: Compression) -> Self {
        match compression {
            Compression::None => CompressionFilter::Uncompressed(Vec::new()),
            Compression::Gzip => {
                CompressionFilter::Gzip(GzEncoder::new(Vec::new(), flate2::Compression::default()))
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            CompressionFilter::Uncompressed(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            CompressionFilter::Gzip(encoder) => encoder.write_all(data),
        }
    }

    /// Bytes produced so far and not yet sent.
    fn output(&mut self) -> &mut Vec<u8> {
        match self {
            CompressionFilter::Uncompressed(buf) => buf,
            CompressionFilter::Gzip(encoder) => encoder.get_mut(),
        }
    }

    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            CompressionFilter::Uncompressed(buf) => Ok(buf),
            CompressionFilter::Gzip(encoder) => encoder.finish(),
        }
    }
}

/// Worker side of the load stream.
///
/// Lines pass through the compression filter and leave in chunks of at
/// most `chunk_size` bytes, each send bounded by the write timeout.
pub(crate) struct StreamWriter {
    worker: usize,
    tx: Sender<Vec<u8>>,
    filter: CompressionFilter,
    chunk_size: usize,
    timeout: Duration,
    abandon: Arc<AtomicBool>,
    bytes_sent: u64,
}

impl StreamWriter {
    pub(crate) fn new(
        worker: usize,
        tx: Sender<Vec<u8>>,
        compression: Compression,
        chunk_size: usize,
        timeout: Duration,
        abandon: Arc<AtomicBool>,
    ) -> Self {
        Self {
            worker,
            tx,
            filter: CompressionFilter::new(compression),
            chunk_size: chunk_size.max(1),
            timeout,
            abandon,
            bytes_sent: 0,
        }
    }

    pub(crate) fn write(&mut self, data: &[u8]) -> Result<(), LoadError> {
        self.filter.write(data)?;

        while self.filter.output().len() >= self.chunk_size {
            let buf = self.filter.output();
            let rest = buf.split_off(self.chunk_size);
            let chunk = std::mem::replace(buf, rest);
            self.send(chunk)?;
        }

        Ok(())
    }

    /// Flush the filter and hang up, ending the stream. Returns the number
    /// of bytes sent over the transport.
    pub(crate) fn finish(mut self) -> Result<u64, LoadError> {
        let filter = std::mem::replace(
            &mut self.filter,
            CompressionFilter::Uncompressed(Vec::new()),
        );
        let tail = filter.finish()?;

        for chunk in tail.chunks(self.chunk_size) {
            self.send(chunk.to_vec())?;
        }

        Ok(self.bytes_sent)
    }

    fn send(&mut self, chunk: Vec<u8>) -> Result<(), LoadError> {
        if self.abandon.load(Ordering::Acquire) {
            return Err(LoadError::Abandoned(self.worker));
        }

        let len = chunk.len() as u64;
        match self.tx.send_timeout(chunk, self.timeout) {
            Ok(()) => {
                self.bytes_sent += len;
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => Err(LoadError::Timeout {
                worker: self.worker,
                stage: Stage::Write,
                timeout: self.timeout,
            }),
            Err(SendTimeoutError::Disconnected(_)) => Err(LoadError::StreamClosed(self.worker)),
        }
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
