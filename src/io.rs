//! Lazy-open pipe adapters.
//!
//! The transcoder opens its ends of the FIFOs at its own pace after
//! launch, so each adapter opens its descriptor lazily on first use. The
//! first open is attempted non-blocking and "peer not attached yet" is
//! reported back to the worker instead of blocking the thread; once the
//! open succeeds the descriptor is switched back to blocking mode and
//! stays open until the worker drops the adapter.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::{Error, Result, StreamKind};

/// Backoff while waiting for the transcoder to attach to a pipe.
const OPEN_RETRY: Duration = Duration::from_millis(10);

/// Write half of a feed pipe, as seen by a feed worker.
pub(crate) trait PipeWrite: Send {
    /// Write `data` to the pipe. `Ok(false)` means the transcoder has not
    /// opened its end yet: nothing was consumed and the caller should
    /// retry the same data. `Ok(true)` means the whole chunk was written.
    fn write_chunk(&mut self, data: &[u8]) -> Result<bool>;
}

/// Read half of the output pipe, as seen by the drain worker.
pub(crate) trait PipeRead: Send {
    /// Wait up to `timeout` for data, then read into `buf`. A timeout is
    /// a zero-length read, not an error.
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

pub(crate) struct FeedPipe {
    kind: StreamKind,
    path: PathBuf,
    file: Option<File>,
}

impl FeedPipe {
    pub fn new(kind: StreamKind, path: PathBuf) -> Self {
        Self {
            kind,
            path,
            file: None,
        }
    }

    /// Attempt the non-blocking first open. ENXIO means no reader has the
    /// FIFO open yet and is transient; anything else is an error.
    fn try_open(&mut self) -> Result<bool> {
        let opened = OpenOptions::new()
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&self.path);
        match opened {
            Ok(file) => {
                set_blocking(&file, self.kind)?;
                tracing::debug!("{} pipe opened for writing", self.kind);
                self.file = Some(file);
                Ok(true)
            }
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => Ok(false),
            Err(e) => Err(Error::pipe_io(self.kind, e)),
        }
    }
}

impl PipeWrite for FeedPipe {
    fn write_chunk(&mut self, data: &[u8]) -> Result<bool> {
        if self.file.is_none() && !self.try_open()? {
            std::thread::sleep(OPEN_RETRY);
            return Ok(false);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(data)
                .map_err(|e| Error::pipe_io(self.kind, e))?;
        }
        Ok(true)
    }
}

pub(crate) struct DrainPipe {
    path: PathBuf,
    file: Option<File>,
}

impl DrainPipe {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    /// Opening the read end of a FIFO non-blocking succeeds even before
    /// the transcoder attaches; the per-read poll gates actual reads.
    fn open_once(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&self.path)
            .map_err(|e| Error::pipe_io(StreamKind::Output, e))?;
        set_blocking(&file, StreamKind::Output)?;
        tracing::debug!("output pipe opened for reading");
        self.file = Some(file);
        Ok(())
    }
}

impl PipeRead for DrainPipe {
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.open_once()?;
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };

        {
            let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
            let ready = poll(&mut fds, poll_timeout(timeout))
                .map_err(|errno| Error::pipe_io(StreamKind::Output, errno_io(errno)))?;
            if ready == 0 {
                // No data this tick.
                return Ok(0);
            }
        }

        let n = file
            .read(buf)
            .map_err(|e| Error::pipe_io(StreamKind::Output, e))?;
        if n == 0 {
            // The writer end is not attached (poll reported hangup, not
            // data). Back off so the loop does not spin on instant wakeups.
            std::thread::sleep(OPEN_RETRY);
        }
        Ok(n)
    }
}

/// Clear O_NONBLOCK so later reads and writes block normally.
fn set_blocking(file: &File, kind: StreamKind) -> Result<()> {
    let fd = file.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| Error::pipe_io(kind, errno_io(e)))?;
    let flags = OFlag::from_bits_truncate(flags) & !OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| Error::pipe_io(kind, errno_io(e)))?;
    Ok(())
}

fn poll_timeout(timeout: Duration) -> PollTimeout {
    PollTimeout::from(timeout.as_millis().min(u16::MAX as u128) as u16)
}

fn errno_io(errno: Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(errno as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::stat::Mode;
    use nix::unistd::mkfifo;
    use std::path::Path;

    fn make_fifo(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
        path
    }

    fn open_reader(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)
            .unwrap()
    }

    #[test]
    fn test_feed_reports_not_ready_without_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_fifo(dir.path(), "feed.fifo");
        let mut pipe = FeedPipe::new(StreamKind::Video, path);

        assert!(!pipe.write_chunk(b"abcd").unwrap());
        // Nothing consumed; the same chunk can be retried later.
        assert!(!pipe.write_chunk(b"abcd").unwrap());
    }

    #[test]
    fn test_feed_writes_once_reader_attached() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_fifo(dir.path(), "feed.fifo");
        let mut reader = open_reader(&path);
        let mut pipe = FeedPipe::new(StreamKind::Video, path);

        assert!(pipe.write_chunk(b"abcd").unwrap());
        assert!(pipe.write_chunk(&[]).unwrap());
        assert!(pipe.write_chunk(b"efgh").unwrap());

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abcdefgh");
    }

    #[test]
    fn test_drain_times_out_to_zero_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_fifo(dir.path(), "drain.fifo");
        // Keep a writer attached but idle so poll actually waits.
        let _writer = {
            let _reader = open_reader(&path);
            OpenOptions::new().write(true).open(&path).unwrap()
        };
        let mut pipe = DrainPipe::new(path);

        let mut buf = [0u8; 16];
        let n = pipe
            .read_chunk(&mut buf, Duration::from_millis(20))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_drain_reads_written_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_fifo(dir.path(), "drain.fifo");
        let mut pipe = DrainPipe::new(path.clone());

        // First read observes the empty, writer-less pipe.
        let mut buf = [0u8; 16];
        let n = pipe
            .read_chunk(&mut buf, Duration::from_millis(10))
            .unwrap();
        assert_eq!(n, 0);

        let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(b"muxed").unwrap();

        let n = pipe
            .read_chunk(&mut buf, Duration::from_millis(100))
            .unwrap();
        assert_eq!(&buf[..n], b"muxed");
    }
}
