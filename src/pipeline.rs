//! The pipeline facade: construction, start, and teardown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::fifo::FifoSet;
use crate::io::{DrainPipe, FeedPipe};
use crate::process::{self, TranscoderProcess};
use crate::pump::{self, ErrorSlot, Lifecycle};
use crate::source::{ByteSink, ByteSource};
use crate::{Error, Result, StreamKind};

/// Default per-direction buffer capacities, in bytes.
const VIDEO_BUFFER: usize = 1024;
const AUDIO_BUFFER: usize = 512;
const OUTPUT_BUFFER: usize = 1024;

/// Default grace period between SIGTERM and SIGKILL at teardown.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Builder for a [`Pipeline`].
///
/// A video source and an output sink are required; the audio source is
/// optional and its absence disables the audio pipe end to end. The three
/// argument lists are opaque to the pipeline and end up verbatim on the
/// transcoder command line, each ahead of the pipe path it describes.
pub struct PipelineBuilder {
    video_source: Option<Box<dyn ByteSource>>,
    audio_source: Option<Box<dyn ByteSource>>,
    output_sink: Option<Box<dyn ByteSink>>,
    video_args: Vec<String>,
    audio_args: Vec<String>,
    output_args: Vec<String>,
    video_buffer: usize,
    audio_buffer: usize,
    output_buffer: usize,
    program: Option<PathBuf>,
    grace: Duration,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            video_source: None,
            audio_source: None,
            output_sink: None,
            video_args: Vec::new(),
            audio_args: Vec::new(),
            output_args: Vec::new(),
            video_buffer: VIDEO_BUFFER,
            audio_buffer: AUDIO_BUFFER,
            output_buffer: OUTPUT_BUFFER,
            program: None,
            grace: TERMINATE_GRACE,
        }
    }
}

impl PipelineBuilder {
    /// Set the video data source. Required.
    pub fn video_source(mut self, source: impl ByteSource + 'static) -> Self {
        self.video_source = Some(Box::new(source));
        self
    }

    /// Set the audio data source. Without one, no audio pipe is created
    /// and no audio worker runs.
    pub fn audio_source(mut self, source: impl ByteSource + 'static) -> Self {
        self.audio_source = Some(Box::new(source));
        self
    }

    /// Set the output data sink. Required.
    pub fn output_sink(mut self, sink: impl ByteSink + 'static) -> Self {
        self.output_sink = Some(Box::new(sink));
        self
    }

    /// Transcoder arguments describing the video input stream.
    pub fn video_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.video_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Transcoder arguments describing the audio input stream.
    pub fn audio_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.audio_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Transcoder arguments describing the muxed output.
    pub fn output_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.output_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Override a per-direction transfer buffer capacity.
    pub fn buffer_capacity(mut self, kind: StreamKind, bytes: usize) -> Self {
        match kind {
            StreamKind::Video => self.video_buffer = bytes,
            StreamKind::Audio => self.audio_buffer = bytes,
            StreamKind::Output => self.output_buffer = bytes,
        }
        self
    }

    /// Use an explicit transcoder binary instead of looking `ffmpeg` up
    /// on PATH.
    pub fn program(mut self, path: impl Into<PathBuf>) -> Self {
        self.program = Some(path.into());
        self
    }

    /// Grace period between SIGTERM and SIGKILL at teardown.
    pub fn terminate_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Create the FIFO set and park the worker threads.
    ///
    /// Fails hard if any FIFO cannot be created or a worker thread cannot
    /// be spawned; no partially-constructed pipeline is ever returned and
    /// anything created before the failure is cleaned up.
    pub fn build(self) -> Result<Pipeline> {
        let video_source = self
            .video_source
            .ok_or_else(|| Error::InvalidInput("video source is required".into()))?;
        let output_sink = self
            .output_sink
            .ok_or_else(|| Error::InvalidInput("output sink is required".into()))?;
        let audio_source = self.audio_source;
        if [self.video_buffer, self.audio_buffer, self.output_buffer].contains(&0) {
            return Err(Error::InvalidInput(
                "buffer capacity must be non-zero".into(),
            ));
        }

        let fifos = FifoSet::create(audio_source.is_some())?;
        let lifecycle = Arc::new(Lifecycle::default());
        let errors = Arc::new(ErrorSlot::default());
        let mut workers = Vec::with_capacity(3);

        let spawned = spawn_workers(
            &fifos,
            &lifecycle,
            &errors,
            &mut workers,
            video_source,
            audio_source,
            output_sink,
            [self.video_buffer, self.audio_buffer, self.output_buffer],
        );
        if let Err(e) = spawned {
            lifecycle.request_stop();
            for worker in workers {
                let _ = worker.join();
            }
            return Err(e);
        }

        Ok(Pipeline {
            fifos: Some(fifos),
            process: None,
            workers,
            lifecycle,
            errors,
            started: false,
            video_args: self.video_args,
            audio_args: self.audio_args,
            output_args: self.output_args,
            program: self.program,
            grace: self.grace,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_workers(
    fifos: &FifoSet,
    lifecycle: &Arc<Lifecycle>,
    errors: &Arc<ErrorSlot>,
    workers: &mut Vec<JoinHandle<()>>,
    video_source: Box<dyn ByteSource>,
    audio_source: Option<Box<dyn ByteSource>>,
    output_sink: Box<dyn ByteSink>,
    capacities: [usize; 3],
) -> Result<()> {
    let [video_cap, audio_cap, output_cap] = capacities;

    let pipe = FeedPipe::new(StreamKind::Video, fifos.video().to_path_buf());
    let (lc, er) = (Arc::clone(lifecycle), Arc::clone(errors));
    workers.push(spawn_worker("video", move || {
        pump::feed_loop(StreamKind::Video, video_source, pipe, &lc, &er, video_cap);
    })?);

    // With no audio source the audio worker is already stopped: no thread,
    // no FIFO, no pipe I/O.
    if let (Some(source), Some(path)) = (audio_source, fifos.audio()) {
        let pipe = FeedPipe::new(StreamKind::Audio, path.to_path_buf());
        let (lc, er) = (Arc::clone(lifecycle), Arc::clone(errors));
        workers.push(spawn_worker("audio", move || {
            pump::feed_loop(StreamKind::Audio, source, pipe, &lc, &er, audio_cap);
        })?);
    }

    let pipe = DrainPipe::new(fifos.output().to_path_buf());
    let (lc, er) = (Arc::clone(lifecycle), Arc::clone(errors));
    workers.push(spawn_worker("output", move || {
        pump::drain_loop(output_sink, pipe, &lc, &er, output_cap);
    })?);

    Ok(())
}

fn spawn_worker(
    name: &str,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("ffpipe-{name}"))
        .spawn(body)
        .map_err(Error::Io)
}

/// A running transcoding pipeline.
///
/// Construction (via [`Pipeline::builder`]) creates the FIFOs and parks
/// the worker threads; [`start`](Pipeline::start) launches the transcoder
/// and releases the workers. Teardown happens in
/// [`shutdown`](Pipeline::shutdown) or on drop: stop the workers, join
/// them, terminate the transcoder, and remove the FIFO files, each step
/// tolerating whatever already went away.
pub struct Pipeline {
    fifos: Option<FifoSet>,
    process: Option<TranscoderProcess>,
    workers: Vec<JoinHandle<()>>,
    lifecycle: Arc<Lifecycle>,
    errors: Arc<ErrorSlot>,
    started: bool,
    video_args: Vec<String>,
    audio_args: Vec<String>,
    output_args: Vec<String>,
    program: Option<PathBuf>,
    grace: Duration,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Launch the transcoder and release the workers.
    ///
    /// Must be called exactly once. On failure the workers stay parked
    /// and the pipeline can only be torn down.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        let fifos = self
            .fifos
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("pipeline already shut down".into()))?;
        // Latch the attempt up front so a failed start cannot be retried.
        self.started = true;

        let program = process::resolve_program(self.program.as_deref())?;
        let args = process::build_args(
            fifos,
            &self.video_args,
            &self.audio_args,
            &self.output_args,
        );
        let child = TranscoderProcess::spawn(&program, args)?;
        tracing::info!(
            "transcoder started, pid {}, pipes in {}",
            child.id(),
            fifos.dir().display()
        );

        self.process = Some(child);
        self.lifecycle.request_start();
        Ok(())
    }

    /// Whether the transcoder process is still alive. False before
    /// `start` and after `shutdown`.
    pub fn is_running(&mut self) -> bool {
        self.process.as_mut().is_some_and(|p| p.is_running())
    }

    /// First error reported by a worker since the last call, if any.
    pub fn take_error(&self) -> Option<Error> {
        self.errors.take()
    }

    /// Directory holding the FIFO special files, for diagnostics. None
    /// once the pipeline has been shut down.
    pub fn pipe_dir(&self) -> Option<&Path> {
        self.fifos.as_ref().map(FifoSet::dir)
    }

    /// Tear the pipeline down: stop and join the workers, terminate the
    /// transcoder, remove the FIFOs. Safe to call more than once; drop
    /// calls it as well. Returns the first worker error, if one occurred.
    pub fn shutdown(&mut self) -> Option<Error> {
        self.lifecycle.request_stop();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("worker panicked during shutdown");
            }
        }
        if let Some(mut child) = self.process.take() {
            child.terminate(self.grace);
        }
        // Dropping the set unlinks the FIFO files, after every worker has
        // let go of its descriptor.
        self.fifos.take();
        self.errors.take()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySink, MemorySource};

    #[test]
    fn test_build_requires_video_source() {
        let result = Pipeline::builder().output_sink(MemorySink::new()).build();
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_build_requires_output_sink() {
        let result = Pipeline::builder()
            .video_source(MemorySource::new(Vec::new()))
            .build();
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_drop_without_start_joins_and_cleans_up() {
        let pipeline = Pipeline::builder()
            .video_source(MemorySource::new(vec![1, 2, 3]))
            .output_sink(MemorySink::new())
            .build()
            .unwrap();
        let dir = pipeline.pipe_dir().unwrap().to_path_buf();
        assert!(dir.join("video.fifo").exists());

        drop(pipeline);
        assert!(!dir.exists());
    }

    #[test]
    fn test_start_with_missing_program_fails_and_cleans_up() {
        let mut pipeline = Pipeline::builder()
            .video_source(MemorySource::new(vec![1, 2, 3]))
            .output_sink(MemorySink::new())
            .program("/nonexistent/transcoder_xyz_12345")
            .build()
            .unwrap();
        let dir = pipeline.pipe_dir().unwrap().to_path_buf();

        assert!(matches!(
            pipeline.start(),
            Err(Error::ToolNotFound { .. })
        ));
        assert!(!pipeline.is_running());

        assert!(pipeline.shutdown().is_none());
        assert!(!dir.exists());
    }

    #[test]
    fn test_build_rejects_zero_buffer_capacity() {
        let result = Pipeline::builder()
            .video_source(MemorySource::new(Vec::new()))
            .output_sink(MemorySink::new())
            .buffer_capacity(StreamKind::Output, 0)
            .build();
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_failed_start_cannot_be_retried() {
        let mut pipeline = Pipeline::builder()
            .video_source(MemorySource::new(Vec::new()))
            .output_sink(MemorySink::new())
            .program("/nonexistent/transcoder_xyz_12345")
            .build()
            .unwrap();

        assert!(matches!(
            pipeline.start(),
            Err(Error::ToolNotFound { .. })
        ));
        // The attempt is latched; a retry does not spawn another process.
        assert!(matches!(pipeline.start(), Err(Error::AlreadyStarted)));
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut pipeline = Pipeline::builder()
            .video_source(MemorySource::new(Vec::new()))
            .output_sink(MemorySink::new())
            .program("/bin/true")
            .build()
            .unwrap();

        pipeline.start().unwrap();
        assert!(matches!(pipeline.start(), Err(Error::AlreadyStarted)));
    }
}
