//! Transcoder process launch and termination.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::fifo::FifoSet;
use crate::{Error, Result};

/// Name of the transcoder binary looked up on PATH when no explicit path
/// is configured.
const TRANSCODER: &str = "ffmpeg";

/// Reap cadence while waiting out the termination grace period.
const REAP_INTERVAL: Duration = Duration::from_millis(10);

/// Resolve the transcoder binary, preferring a configured path over a
/// PATH lookup.
pub(crate) fn resolve_program(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    which::which(TRANSCODER).map_err(|_| Error::tool_not_found(TRANSCODER))
}

/// Build the transcoder argv: global flags, then the caller's per-stage
/// argument lists with the pipe paths spliced in at fixed positions. The
/// caller's arguments are forwarded verbatim, never parsed.
pub(crate) fn build_args(
    fifos: &FifoSet,
    video_args: &[String],
    audio_args: &[String],
    output_args: &[String],
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into()];
    args.extend(video_args.iter().map(OsString::from));
    args.push("-i".into());
    args.push(fifos.video().into());
    if let Some(audio) = fifos.audio() {
        args.extend(audio_args.iter().map(OsString::from));
        args.push("-i".into());
        args.push(audio.into());
    }
    args.extend(output_args.iter().map(OsString::from));
    args.push(fifos.output().into());
    args
}

/// A running transcoder child process.
pub(crate) struct TranscoderProcess {
    child: Child,
}

impl TranscoderProcess {
    /// Spawn the transcoder. The child inherits nothing: all three
    /// standard streams are null, data only moves over the FIFOs.
    pub fn spawn(program: &Path, args: Vec<OsString>) -> Result<Self> {
        tracing::debug!("spawning {} {:?}", program.display(), args);
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::tool_not_found(program.display().to_string())
                } else {
                    Error::Spawn {
                        tool: program.display().to_string(),
                        source: e,
                    }
                }
            })?;
        Ok(Self { child })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Whether the child is still running. Non-blocking.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the child to exit with SIGTERM, reap it for up to `grace`, and
    /// escalate to SIGKILL if it is still alive after that. Never blocks
    /// longer than the grace period.
    pub fn terminate(&mut self, grace: Duration) {
        let pid = Pid::from_raw(self.child.id() as i32);
        if kill(pid, Signal::SIGTERM).is_err() {
            // Already gone; reap whatever is left.
            let _ = self.child.try_wait();
            return;
        }

        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!("transcoder exited: {status}");
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("could not reap transcoder: {e}");
                    return;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(REAP_INTERVAL);
        }

        tracing::warn!("transcoder pid {} ignored SIGTERM, killing", self.child.id());
        let _ = self.child.kill();
        // SIGKILL cannot be ignored; reaping here is prompt.
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(strings: &[&str]) -> Vec<String> {
        strings.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_args_without_audio() {
        let fifos = FifoSet::create(false).unwrap();
        let args = build_args(
            &fifos,
            &os(&["-f", "h264"]),
            &os(&["ignored"]),
            &os(&["-f", "mpegts"]),
        );

        let expected: Vec<OsString> = vec![
            "-y".into(),
            "-f".into(),
            "h264".into(),
            "-i".into(),
            fifos.video().into(),
            "-f".into(),
            "mpegts".into(),
            fifos.output().into(),
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn test_build_args_with_audio() {
        let fifos = FifoSet::create(true).unwrap();
        let args = build_args(
            &fifos,
            &os(&["-f", "h264"]),
            &os(&["-f", "s16le"]),
            &os(&[]),
        );

        let expected: Vec<OsString> = vec![
            "-y".into(),
            "-f".into(),
            "h264".into(),
            "-i".into(),
            fifos.video().into(),
            "-f".into(),
            "s16le".into(),
            "-i".into(),
            fifos.audio().unwrap().into(),
            fifos.output().into(),
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn test_resolve_program_prefers_configured_path() {
        let path = Path::new("/opt/custom/ffmpeg");
        assert_eq!(resolve_program(Some(path)).unwrap(), path);
    }

    #[test]
    fn test_spawn_nonexistent_program() {
        let fifos = FifoSet::create(false).unwrap();
        let args = build_args(&fifos, &[], &[], &[]);
        let result = TranscoderProcess::spawn(Path::new("/nonexistent/tool_xyz_12345"), args);
        assert!(matches!(result, Err(Error::ToolNotFound { .. })));
    }

    #[test]
    fn test_terminate_cooperative_child() {
        let mut child =
            TranscoderProcess::spawn(Path::new("/bin/sh"), vec!["-c".into(), "sleep 30".into()])
                .unwrap();
        assert!(child.is_running());

        let start = Instant::now();
        child.terminate(Duration::from_secs(2));
        // SIGTERM is enough; the full grace period is not consumed.
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!child.is_running());
    }

    #[test]
    fn test_terminate_escalates_to_kill() {
        let mut child = TranscoderProcess::spawn(
            Path::new("/bin/sh"),
            vec!["-c".into(), "trap '' TERM; while :; do sleep 1; done".into()],
        )
        .unwrap();
        // Give the shell a moment to install the trap.
        std::thread::sleep(Duration::from_millis(100));

        child.terminate(Duration::from_millis(300));
        assert!(!child.is_running());
    }
}
