//! # ffpipe
//!
//! Pump raw elementary streams through an external `ffmpeg` process.
//!
//! A [`Pipeline`] creates a set of named pipes (FIFOs) in a private temp
//! directory, launches `ffmpeg` with those pipe paths spliced into a
//! caller-supplied argument list, and moves bytes with one dedicated
//! thread per pipe direction: video feed, optional audio feed, and output
//! drain. The per-direction threads exist because every pipe open, read,
//! and write can block independently; none of them may stall the others.
//!
//! The embedder supplies the data ends as [`ByteSource`] and [`ByteSink`]
//! implementations. What ffmpeg does with the bytes is controlled entirely
//! by the caller's argument lists, which are forwarded verbatim.
//!
//! Unix only: the transport is `mkfifo` special files and teardown uses
//! POSIX signals.
//!
//! ## Example
//!
//! ```no_run
//! use ffpipe::{MemorySink, MemorySource, Pipeline};
//!
//! # fn main() -> ffpipe::Result<()> {
//! let sink = MemorySink::new();
//! let output = sink.handle();
//!
//! let mut pipeline = Pipeline::builder()
//!     .video_source(MemorySource::new(vec![0u8; 4096]))
//!     .video_args(["-f", "h264"])
//!     .output_args(["-f", "mpegts"])
//!     .output_sink(sink)
//!     .build()?;
//! pipeline.start()?;
//!
//! // ... let the pipeline run ...
//!
//! if let Some(err) = pipeline.shutdown() {
//!     eprintln!("pipeline failed: {err}");
//! }
//! println!("muxed {} bytes", output.len());
//! # Ok(())
//! # }
//! ```

mod error;
mod fifo;
mod io;
mod pipeline;
mod process;
mod pump;
pub mod source;

// Re-exports
pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use source::{ByteSink, ByteSource, MemorySink, MemorySinkHandle, MemorySource};

/// One of the three pipe directions between the pipeline and ffmpeg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Raw video elementary stream fed into ffmpeg.
    Video,
    /// Raw audio elementary stream fed into ffmpeg.
    Audio,
    /// Muxed output read back from ffmpeg.
    Output,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Video => write!(f, "video"),
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Output => write!(f, "output"),
        }
    }
}
