//! Creation and removal of the FIFO set shared with the transcoder.

use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tempfile::TempDir;

use crate::{Error, Result, StreamKind};

/// The named pipes a pipeline shares with its transcoder process.
///
/// All pipes live in a private temp directory, so their names are unique
/// per pipeline instance. The audio pipe only exists when the pipeline was
/// built with an audio source. Files are removed on drop; if creation
/// fails partway, the temp directory drop reclaims whatever was created.
pub(crate) struct FifoSet {
    dir: TempDir,
    video: PathBuf,
    audio: Option<PathBuf>,
    output: PathBuf,
}

impl FifoSet {
    pub fn create(with_audio: bool) -> Result<Self> {
        let dir = TempDir::new()?;
        let video = make_fifo(dir.path(), "video.fifo", StreamKind::Video)?;
        let audio = if with_audio {
            Some(make_fifo(dir.path(), "audio.fifo", StreamKind::Audio)?)
        } else {
            None
        };
        let output = make_fifo(dir.path(), "output.fifo", StreamKind::Output)?;

        Ok(Self {
            dir,
            video,
            audio,
            output,
        })
    }

    pub fn video(&self) -> &Path {
        &self.video
    }

    pub fn audio(&self) -> Option<&Path> {
        self.audio.as_deref()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the FIFO files. Files that are already gone are ignored;
    /// the directory itself is reclaimed when the set drops.
    fn remove(&self) {
        let paths = [Some(&self.video), self.audio.as_ref(), Some(&self.output)];
        for path in paths.into_iter().flatten() {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("could not remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

impl Drop for FifoSet {
    fn drop(&mut self) {
        self.remove();
    }
}

fn make_fifo(dir: &Path, name: &str, kind: StreamKind) -> Result<PathBuf> {
    let path = dir.join(name);
    let mode = Mode::S_IWUSR | Mode::S_IRUSR | Mode::S_IRGRP | Mode::S_IROTH;
    mkfifo(&path, mode).map_err(|errno| Error::FifoCreate {
        kind,
        path: path.clone(),
        source: std::io::Error::from_raw_os_error(errno as i32),
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;

    fn is_fifo(path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|m| m.file_type().is_fifo())
            .unwrap_or(false)
    }

    #[test]
    fn test_create_with_audio() {
        let set = FifoSet::create(true).unwrap();
        assert!(is_fifo(set.video()));
        assert!(is_fifo(set.audio().unwrap()));
        assert!(is_fifo(set.output()));
    }

    #[test]
    fn test_no_audio_fifo_without_audio() {
        let set = FifoSet::create(false).unwrap();
        assert!(set.audio().is_none());
        assert!(is_fifo(set.video()));
        assert!(is_fifo(set.output()));
        assert_eq!(std::fs::read_dir(set.dir()).unwrap().count(), 2);
    }

    #[test]
    fn test_drop_removes_files_and_dir() {
        let set = FifoSet::create(true).unwrap();
        let dir = set.dir().to_path_buf();
        let video = set.video().to_path_buf();
        drop(set);
        assert!(!video.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_tolerates_already_deleted() {
        let set = FifoSet::create(false).unwrap();
        std::fs::remove_file(set.video()).unwrap();
        // Drop must not panic on the missing file.
        drop(set);
    }
}
