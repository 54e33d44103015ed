mod file_lock;

pub use file_lock::{FileLock, FileLockGuard};
