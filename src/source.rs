//! Data source and sink capabilities supplied by the embedder.
//!
//! The pipeline owns its collaborators for its whole lifetime: they are
//! moved in at construction and dropped with it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Supplies elementary-stream bytes to a feed worker.
pub trait ByteSource: Send {
    /// Fill `buf` with up to `buf.len()` bytes and return how many were
    /// written. Zero means "nothing available right now", not end of
    /// stream; the worker keeps asking until the pipeline stops.
    fn produce(&mut self, buf: &mut [u8]) -> usize;

    /// Advisory count of bytes the source could produce immediately.
    /// The pipeline never consults this for control flow.
    fn available_bytes(&self) -> usize {
        0
    }
}

/// Receives muxed output bytes from the drain worker.
pub trait ByteSink: Send {
    /// Accept a span of output bytes. An empty slice means "no data this
    /// tick" and must be a no-op, never end of stream.
    fn consume(&mut self, data: &[u8]);
}

/// A source that yields a fixed byte vector, in order, then runs dry.
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
    chunk: Option<usize>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            chunk: None,
        }
    }

    /// Cap each `produce` call at `chunk` bytes, regardless of the buffer
    /// capacity the worker offers. Useful for reproducing fixed-size read
    /// patterns in tests.
    pub fn with_chunk_size(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk: Some(chunk),
        }
    }
}

impl ByteSource for MemorySource {
    fn produce(&mut self, buf: &mut [u8]) -> usize {
        let mut n = (self.data.len() - self.pos).min(buf.len());
        if let Some(chunk) = self.chunk {
            n = n.min(chunk);
        }
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    fn available_bytes(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// A sink that appends everything it receives into a shared buffer.
///
/// Create the sink, keep a [`MemorySinkHandle`] via [`MemorySink::handle`],
/// and move the sink into the pipeline; the handle stays usable from any
/// thread while the pipeline runs.
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
    deliveries: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::new())),
            deliveries: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A cloneable view over the bytes collected so far.
    pub fn handle(&self) -> MemorySinkHandle {
        MemorySinkHandle {
            buf: Arc::clone(&self.buf),
            deliveries: Arc::clone(&self.deliveries),
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteSink for MemorySink {
    fn consume(&mut self, data: &[u8]) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
        if !data.is_empty() {
            self.buf.lock().extend_from_slice(data);
        }
    }
}

/// Read side of a [`MemorySink`].
#[derive(Clone)]
pub struct MemorySinkHandle {
    buf: Arc<Mutex<Vec<u8>>>,
    deliveries: Arc<AtomicUsize>,
}

impl MemorySinkHandle {
    /// Copy of the bytes collected so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }

    /// Number of bytes collected so far.
    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `consume` calls observed, empty deliveries included.
    pub fn deliveries(&self) -> usize {
        self.deliveries.load(Ordering::Relaxed)
    }
}
