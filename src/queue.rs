//! A durable FIFO queue: the same directory-as-database mechanics as
//! [`crate::Store`], ordered by insertion and consumed oldest-first.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::codec::Value;
use crate::error::{Error, Result};
use crate::lock::LOCK_FILE_NAME;
use crate::store::Store;

/// A FIFO queue whose entries survive a restart: `put` inserts under a
/// fresh UUID key, `get` pops the oldest. Safe to share across threads
/// (and, via the underlying `Store`'s process lock, across processes).
#[derive(Clone)]
pub struct DurableQueue {
    store: Store,
    path: PathBuf,
    // Wakes blocked `get` callers when a `put` lands, so waiting does
    // not have to be a busy poll.
    signal: Arc<(Mutex<()>, Condvar)>,
}

impl DurableQueue {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Store::open(&path)?;
        Ok(Self {
            store,
            path,
            signal: Arc::new((Mutex::new(()), Condvar::new())),
        })
    }

    pub fn put(&self, value: impl Into<Value>) -> Result<()> {
        self.put_nowait(value)
    }

    pub fn put_nowait(&self, value: impl Into<Value>) -> Result<()> {
        let key = uuid::Uuid::new_v4().to_string();
        self.store.insert(&key, value)?;
        self.signal.1.notify_one();
        Ok(())
    }

    /// Pops the oldest value. `timeout` of `None` waits indefinitely;
    /// `Some(0.0)` is equivalent to [`get_nowait`](Self::get_nowait).
    /// A negative timeout is a caller error, not an empty queue.
    pub fn get(&self, timeout: Option<f64>) -> Result<Value> {
        if let Some(t) = timeout {
            if t < 0.0 {
                return Err(Error::InvalidArgument(format!(
                    "timeout must not be negative, got {t}"
                )));
            }
        }

        if let Some(value) = self.try_pop_oldest()? {
            return Ok(value);
        }

        let deadline = timeout.map(|t| Instant::now() + Duration::from_secs_f64(t));
        loop {
            let mut guard = self.signal.0.lock();
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Empty);
                    }
                    self.signal
                        .1
                        .wait_for(&mut guard, deadline - now);
                }
                None => {
                    self.signal.1.wait(&mut guard);
                }
            }
            drop(guard);

            if let Some(value) = self.try_pop_oldest()? {
                return Ok(value);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(Error::Empty);
                }
            }
        }
    }

    pub fn get_nowait(&self) -> Result<Value> {
        self.try_pop_oldest()?.ok_or(Error::Empty)
    }

    fn try_pop_oldest(&self) -> Result<Option<Value>> {
        match self.store.popitem() {
            Ok(value) => Ok(Some(value)),
            Err(Error::Empty) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn qsize(&self) -> usize {
        self.store.length()
    }

    pub fn empty(&self) -> bool {
        self.qsize() == 0
    }

    /// Removes the queue's directory. The process lock leaves its own
    /// `.lock` file behind, which would otherwise make a plain
    /// `remove_dir` fail with `ENOTEMPTY`, so it's cleared explicitly
    /// first.
    pub fn close(&self) -> Result<()> {
        let _ = std::fs::remove_file(self.path.join(LOCK_FILE_NAME));
        match std::fs::remove_dir(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(_) if !self.path.exists() => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
