//! Lock polymorphism: a small capability for serializing `Store`
//! operations, with two concrete implementations — a cross-process
//! advisory lock for the common case of several processes sharing a
//! directory, and an in-process mutex for callers who don't need that
//! and want to skip the syscall overhead.

use std::io;
use std::path::{Path, PathBuf};

use file_lock::{FileLock, FileOptions};
use lock_api::RawMutex as _;
use parking_lot::{Mutex as ParkingMutex, RawMutex};

use crate::error::{Error, Result};

/// The name of the advisory-lock file a `ProcessLock` keeps inside its
/// store directory. Hidden so directory scans (`Store::iterate`) skip
/// it like any other dotfile.
pub(crate) const LOCK_FILE_NAME: &str = ".lock";

/// Acquire/release capability a [`crate::Store`] holds for the
/// duration of one operation. `acquire` can fail — a cross-process
/// lock is a real filesystem object — so callers propagate it like any
/// other I/O error rather than aborting the process.
pub trait Lock: Send + Sync {
    fn acquire(&self) -> Result<()>;
    fn release(&self);
}

/// Cross-process advisory lock backed by a real file, the default for
/// `Store::open`. Safe to share between processes pointed at the same
/// directory; within one process, a `Mutex<Option<FileLock>>` keeps
/// concurrent callers from racing to hold the same file lock.
pub struct ProcessLock {
    path: PathBuf,
    held: ParkingMutex<Option<FileLock>>,
}

impl ProcessLock {
    pub fn new(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(LOCK_FILE_NAME),
            held: ParkingMutex::new(None),
        })
    }
}

impl Lock for ProcessLock {
    fn acquire(&self) -> Result<()> {
        let opts = FileOptions::new()
            .write(true)
            .create(true)
            .append(false)
            .read(true);
        let lock = FileLock::lock(&self.path, true, opts).map_err(Error::Io)?;
        *self.held.lock() = Some(lock);
        Ok(())
    }

    fn release(&self) {
        // Dropping the FileLock releases the OS advisory lock.
        self.held.lock().take();
    }
}

/// In-process-only lock. Cheaper than `ProcessLock` when the caller
/// knows no other process touches this directory.
pub struct ThreadLock {
    raw: RawMutex,
}

impl ThreadLock {
    pub fn new() -> Self {
        Self { raw: RawMutex::INIT }
    }
}

impl Default for ThreadLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock for ThreadLock {
    fn acquire(&self) -> Result<()> {
        self.raw.lock();
        Ok(())
    }

    fn release(&self) {
        // Safety: `release` is only ever called by the same `Store`
        // operation that just called `acquire`, so the raw mutex is
        // held by the current thread.
        unsafe { self.raw.unlock() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_lock_serializes_acquire_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProcessLock::new(dir.path()).unwrap();
        lock.acquire().unwrap();
        lock.release();
        lock.acquire().unwrap();
        lock.release();
    }

    #[test]
    fn thread_lock_serializes_acquire_release() {
        let lock = ThreadLock::new();
        lock.acquire().unwrap();
        lock.release();
        lock.acquire().unwrap();
        lock.release();
    }

    #[test]
    fn thread_lock_blocks_a_second_acquirer() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;
        use std::time::Duration;

        let lock = Arc::new(ThreadLock::new());
        let flag = Arc::new(AtomicBool::new(false));

        lock.acquire().unwrap();
        let lock2 = lock.clone();
        let flag2 = flag.clone();
        let handle = thread::spawn(move || {
            lock2.acquire().unwrap();
            flag2.store(true, Ordering::SeqCst);
            lock2.release();
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!flag.load(Ordering::SeqCst));
        lock.release();
        handle.join().unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
