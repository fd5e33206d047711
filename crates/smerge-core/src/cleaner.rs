//! Single-threaded background worker that deletes retired directories and
//! files off the hot path: superseded merge generations, retired attempts,
//! removed applications, and the three per-partition files of a superseded
//! mergeId. Failure to delete is logged and swallowed, never fatal, and the
//! worker never touches partition mutexes.

use std::path::PathBuf;
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, TrySendError};

/// Bound on the queue of pending deletions; a slow or wedged filesystem
/// degrades by dropping further cleanup requests (logged) rather than
/// backing up unboundedly in memory.
const QUEUE_CAPACITY: usize = 4096;

/// A single queued deletion. `Dir` recurses; `File` removes one regular
/// file (the per-partition `.data`/`.index`/`.meta` paths, which are never
/// directories).
enum Job {
    Dir(PathBuf),
    File(PathBuf),
}

pub struct Cleaner {
    tx: Sender<Job>,
    _handle: JoinHandle<()>,
}

impl Cleaner {
    pub fn spawn() -> Self {
        let (tx, rx) = crossbeam_channel::bounded::<Job>(QUEUE_CAPACITY);
        let handle = std::thread::Builder::new()
            .name("smerge-cleaner".into())
            .spawn(move || {
                for job in rx.iter() {
                    match job {
                        Job::Dir(path) => match std::fs::remove_dir_all(&path) {
                            Ok(()) => tracing::debug!(path = %path.display(), "removed retired directory"),
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => {
                                tracing::warn!(path = %path.display(), error = %e, "failed to remove retired directory")
                            }
                        },
                        Job::File(path) => match std::fs::remove_file(&path) {
                            Ok(()) => tracing::debug!(path = %path.display(), "removed retired file"),
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => {
                                tracing::warn!(path = %path.display(), error = %e, "failed to remove retired file")
                            }
                        },
                    }
                }
            })
            .expect("failed to spawn background cleaner thread");
        Self { tx, _handle: handle }
    }

    /// Queues `path` for best-effort recursive deletion. Drops the request
    /// (logged) if the queue is full rather than blocking the caller, since
    /// callers hold no partition mutex here but may be on another hot path.
    pub fn queue_delete(&self, path: PathBuf) {
        self.send(Job::Dir(path));
    }

    /// Queues a single regular file for best-effort deletion, used for the
    /// three per-partition files of a superseded mergeId (`remove_dir_all`
    /// would fail on a plain file).
    pub fn queue_delete_file(&self, path: PathBuf) {
        self.send(Job::File(path));
    }

    fn send(&self, job: Job) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                tracing::warn!(path = %job.path().display(), "cleaner queue full, dropping delete request");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::error!("cleaner thread is gone, dropping delete request");
            }
        }
    }
}

impl Job {
    fn path(&self) -> &std::path::Path {
        match self {
            Job::Dir(p) | Job::File(p) => p,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn queued_directory_eventually_removed() {
        let temp = tempfile::tempdir().unwrap();
        let victim = temp.path().join("retired");
        std::fs::create_dir_all(victim.join("nested")).unwrap();
        std::fs::write(victim.join("nested/file.txt"), b"x").unwrap();

        let cleaner = Cleaner::spawn();
        cleaner.queue_delete(victim.clone());

        let deadline = Instant::now() + Duration::from_secs(2);
        while victim.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!victim.exists());
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let cleaner = Cleaner::spawn();
        cleaner.queue_delete(PathBuf::from("/nonexistent/path/for/sure"));
        std::thread::sleep(Duration::from_millis(50));
    }

    #[test]
    fn queued_file_eventually_removed() {
        let temp = tempfile::tempdir().unwrap();
        let victim = temp.path().join("mergedShuffle_app_0_0_0.data");
        std::fs::write(&victim, b"x").unwrap();

        let cleaner = Cleaner::spawn();
        cleaner.queue_delete_file(victim.clone());

        let deadline = Instant::now() + Duration::from_secs(2);
        while victim.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!victim.exists());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let cleaner = Cleaner::spawn();
        cleaner.queue_delete_file(PathBuf::from("/nonexistent/path/for/sure.data"));
        std::thread::sleep(Duration::from_millis(50));
    }
}
