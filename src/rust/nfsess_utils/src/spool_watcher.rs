use notify::{Config, RecursiveMode, Watcher};
use std::{
  fs,
  path::{Path, PathBuf},
  sync::mpsc::{channel, Receiver},
  time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Watches a spool directory into which flow exports are dropped.
///
/// On Linux the directory is watched with `inotify`, so a new file
/// wakes the caller straight away. If the watcher can't be created
/// the spool is simply polled every `poll_interval`.
///
/// ## Example
///
/// ```rust
/// use nfsess_utils::spool_watcher::SpoolWatcher;
/// use std::time::Duration;
///
/// let dir = std::env::temp_dir();
/// let watcher = SpoolWatcher::new("tmp", dir, Duration::from_millis(10));
/// let _files = watcher.pending();
/// ```
pub struct SpoolWatcher {
  nice_name: String,
  path: PathBuf,
  poll_interval: Duration,
  events: Option<(notify::RecommendedWatcher, Receiver<notify::Result<notify::Event>>)>,
}

impl SpoolWatcher {
  /// Creates a new `SpoolWatcher`.
  ///
  /// ## Arguments
  ///
  /// * `nice_name` - the print-friendly (short) name of the spool.
  /// * `path` - the directory to watch. It must already exist.
  /// * `poll_interval` - the longest `wait` will block without an event.
  pub fn new<S: ToString>(nice_name: S, path: PathBuf, poll_interval: Duration) -> Self {
    let nice_name = nice_name.to_string();
    let events = match Self::start_watcher(&path) {
      Ok(events) => Some(events),
      Err(e) => {
        warn!("Unable to watch {} ({:?}), falling back to polling: {e}", nice_name, path);
        None
      }
    };
    Self {
      nice_name,
      path,
      poll_interval,
      events,
    }
  }

  fn start_watcher(
    path: &Path,
  ) -> Result<(notify::RecommendedWatcher, Receiver<notify::Result<notify::Event>>), SpoolWatchError> {
    let (tx, rx) = channel();
    let mut watcher = notify::RecommendedWatcher::new(tx, Config::default())
      .map_err(|_| SpoolWatchError::CreateWatcherError)?;
    watcher
      .watch(path, RecursiveMode::NonRecursive)
      .map_err(|_| SpoolWatchError::StartWatcherError)?;
    Ok((watcher, rx))
  }

  /// Is the directory being watched, or only polled?
  pub fn is_watching(&self) -> bool {
    self.events.is_some()
  }

  /// Lists the files currently waiting in the spool, ordered by file
  /// name. Hidden files (in-flight temporaries) and anything that isn't
  /// a regular file are skipped.
  pub fn pending(&self) -> Result<Vec<PathBuf>, SpoolWatchError> {
    let entries = fs::read_dir(&self.path).map_err(|e| SpoolWatchError::ReadDirError(e.to_string()))?;
    let mut files: Vec<PathBuf> = entries
      .flatten()
      .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
      .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
      .map(|entry| entry.path())
      .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
  }

  /// Blocks until the spool changes or the poll interval elapses,
  /// whichever comes first. Bursts of events are collapsed into one
  /// wake-up.
  pub fn wait(&self) {
    match &self.events {
      Some((_watcher, rx)) => {
        if rx.recv_timeout(self.poll_interval).is_ok() {
          debug!("{} changed", self.nice_name);
          while rx.try_recv().is_ok() {}
        }
      }
      None => std::thread::sleep(self.poll_interval),
    }
  }
}

/// Errors that can occur when watching a spool directory.
#[derive(Error, Debug)]
pub enum SpoolWatchError {
  /// Unable to create the directory watcher.
  #[error("Unable to create watcher")]
  CreateWatcherError,

  /// Unable to start the directory watcher.
  #[error("Unable to start watcher")]
  StartWatcherError,

  /// The spool directory could not be listed.
  #[error("Unable to read spool directory: {0}")]
  ReadDirError(String),
}

#[cfg(test)]
mod test {
  use super::*;
  use std::time::Instant;

  #[test]
  fn pending_is_sorted_and_skips_hidden_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    for name in ["nfcapd.202401010010", ".tmp-123", "nfcapd.202401010005"] {
      fs::write(dir.path().join(name), b"").expect("write");
    }
    fs::create_dir(dir.path().join("nested")).expect("mkdir");

    let watcher = SpoolWatcher::new("test", dir.path().to_path_buf(), Duration::from_millis(10));
    let pending = watcher.pending().expect("pending");
    let names: Vec<_> = pending
      .iter()
      .map(|p| p.file_name().expect("name").to_string_lossy().to_string())
      .collect();
    assert_eq!(names, vec!["nfcapd.202401010005", "nfcapd.202401010010"]);
  }

  #[test]
  fn wait_returns_after_poll_interval() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watcher = SpoolWatcher::new("test", dir.path().to_path_buf(), Duration::from_millis(20));
    let start = Instant::now();
    watcher.wait();
    assert!(start.elapsed() < Duration::from_secs(5));
  }

  #[test]
  fn missing_directory_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gone = dir.path().join("gone");
    let watcher = SpoolWatcher::new("test", gone, Duration::from_millis(10));
    assert!(!watcher.is_watching());
    assert!(matches!(watcher.pending(), Err(SpoolWatchError::ReadDirError(_))));
  }
}
