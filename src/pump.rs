//! Worker loops that move bytes between the collaborators and the pipes.
//!
//! Each worker owns a disjoint pipe, buffer, and collaborator; the only
//! state shared across threads is the two lifecycle flags and the first
//! error slot, all owned by the facade. Workers check the flags at
//! iteration boundaries, so every suspension point is bounded and stop is
//! observed within one blocking call plus the largest poll interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::io::{PipeRead, PipeWrite};
use crate::source::{ByteSink, ByteSource};
use crate::{Error, StreamKind};

/// Cadence for polling the start flag, and for idling an empty source.
const START_POLL: Duration = Duration::from_millis(10);

/// Bounded wait before each output read so stop is observed promptly.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Start/stop broadcast shared by the facade and the workers.
///
/// Each flag is written once, by the owning thread, and only polled by
/// the workers.
#[derive(Default)]
pub(crate) struct Lifecycle {
    start: AtomicBool,
    stop: AtomicBool,
}

impl Lifecycle {
    pub fn request_start(&self) {
        self.start.store(true, Ordering::Release);
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn started(&self) -> bool {
        self.start.load(Ordering::Acquire)
    }

    /// Park until start is requested. Returns false if stop came first,
    /// so a pipeline that is torn down without ever starting still joins.
    fn wait_for_start(&self) -> bool {
        while !self.started() {
            if self.stopped() {
                return false;
            }
            std::thread::sleep(START_POLL);
        }
        true
    }
}

/// Holds the first error reported by any worker, for the facade to expose.
#[derive(Default)]
pub(crate) struct ErrorSlot(Mutex<Option<Error>>);

impl ErrorSlot {
    pub fn record(&self, err: Error) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(err);
        } else {
            tracing::debug!("suppressing subsequent worker error: {err}");
        }
    }

    pub fn take(&self) -> Option<Error> {
        self.0.lock().take()
    }
}

/// Feed loop: pull chunks from `source`, push them into `pipe`.
///
/// A chunk pulled from the source is retried until the pipe accepts it;
/// nothing is re-read from the source before the previous chunk went out
/// and nothing is dropped while the pipe is still opening. An I/O error
/// stops this worker and is recorded for the facade.
pub(crate) fn feed_loop(
    kind: StreamKind,
    mut source: Box<dyn ByteSource>,
    mut pipe: impl PipeWrite,
    lifecycle: &Lifecycle,
    errors: &ErrorSlot,
    capacity: usize,
) {
    if !lifecycle.wait_for_start() {
        return;
    }

    let mut buf = vec![0u8; capacity];
    let mut read_pending = true;
    let mut len = 0;
    while !lifecycle.stopped() {
        if read_pending {
            len = source.produce(&mut buf).min(buf.len());
        }
        match pipe.write_chunk(&buf[..len]) {
            Ok(true) => {
                read_pending = true;
                if len == 0 {
                    // Source had nothing this round; idle instead of
                    // spinning at full rate.
                    std::thread::sleep(START_POLL);
                }
            }
            Ok(false) => read_pending = false,
            Err(err) => {
                tracing::warn!("{kind} feed worker stopping: {err}");
                errors.record(err);
                return;
            }
        }
    }
}

/// Drain loop: poll-read the output pipe and hand every result to the
/// sink, zero-length "no data this tick" reads included. Only the stop
/// flag or an I/O error ends the loop; a quiet pipe never does.
pub(crate) fn drain_loop(
    mut sink: Box<dyn ByteSink>,
    mut pipe: impl PipeRead,
    lifecycle: &Lifecycle,
    errors: &ErrorSlot,
    capacity: usize,
) {
    if !lifecycle.wait_for_start() {
        return;
    }

    let mut buf = vec![0u8; capacity];
    while !lifecycle.stopped() {
        match pipe.read_chunk(&mut buf, DRAIN_POLL) {
            Ok(n) => sink.consume(&buf[..n]),
            Err(err) => {
                tracing::warn!("output drain worker stopping: {err}");
                errors.record(err);
                return;
            }
        }
    }
}
