//! Cross-process advisory file lock (fs2 flock).
//!
//! Serializes writers of shared on-disk state (the credential record and
//! the security event log) across concurrently running `i18ntk` processes.
//! In-process callers still need their own mutex; flock is per open file
//! description, not per thread.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Advisory lock backed by a dedicated lock file.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

/// RAII guard that releases the lock on drop.
pub struct FileLockGuard {
    file: File,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl FileLock {
    /// Lock file at `path`. The parent directory must already exist; the
    /// caller is expected to have resolved `path` through the sandbox.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocking acquire; waits until the lock is available.
    pub fn acquire(&self) -> io::Result<FileLockGuard> {
        let file = self.open()?;
        file.lock_exclusive()?;
        Ok(FileLockGuard { file })
    }

    fn open(&self) -> io::Result<File> {
        // Never truncate: another process may hold the lock on this inode.
        let mut options = OpenOptions::new();
        options.create(true).truncate(false).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Barrier};

    #[test]
    fn acquire_and_release() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = FileLock::new(tmp.path().join("test.lock"));

        let guard = lock.acquire().unwrap();
        drop(guard);

        let _guard2 = lock.acquire().unwrap();
    }

    #[test]
    fn acquire_keeps_existing_lock_file() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join("test.lock");
        std::fs::write(&lock_path, "held").unwrap();

        let lock = FileLock::new(&lock_path);
        let _guard = lock.acquire().unwrap();
        assert_eq!(std::fs::read_to_string(&lock_path).unwrap(), "held");
    }

    #[test]
    fn concurrent_threads_serialize() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.lock");
        let counter = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(Barrier::new(3));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let p = path.clone();
                let c = counter.clone();
                let b = barrier.clone();
                std::thread::spawn(move || {
                    let lock = FileLock::new(p);
                    b.wait();
                    let _guard = lock.acquire().unwrap();
                    c.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
