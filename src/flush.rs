//! An in-memory FIFO with optional overflow to (and reload from) a
//! [`DurableQueue`], for callers who want queue semantics most of the
//! time but durability at shutdown/startup boundaries.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::codec::Value;
use crate::error::{Error, Result};
use crate::queue::DurableQueue;

/// A plain in-memory blocking FIFO, with no disk component at all.
#[derive(Clone)]
pub struct MemQueue<T> {
    inner: Arc<(Mutex<VecDeque<T>>, Condvar)>,
}

impl<T> Default for MemQueue<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new((Mutex::new(VecDeque::new()), Condvar::new())),
        }
    }
}

impl<T> MemQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, value: T) {
        let (lock, cvar) = &*self.inner;
        lock.lock().push_back(value);
        cvar.notify_one();
    }

    /// Blocks until an item is available.
    pub fn get(&self) -> T {
        let (lock, cvar) = &*self.inner;
        let mut queue = lock.lock();
        loop {
            if let Some(value) = queue.pop_front() {
                return value;
            }
            cvar.wait(&mut queue);
        }
    }

    pub fn get_nowait(&self) -> Option<T> {
        self.inner.0.lock().pop_front()
    }

    pub fn qsize(&self) -> usize {
        self.inner.0.lock().len()
    }
}

/// Pairs a [`MemQueue`] with a path to a [`DurableQueue`] it can spill
/// into or reload from, without paying the per-item xattr/fsync cost
/// of durability on the common path.
#[derive(Clone)]
pub struct FlushQueue<T> {
    mem: MemQueue<T>,
    path: PathBuf,
}

impl<T> FlushQueue<T>
where
    T: Clone + Into<Value> + TryFrom<Value, Error = Error>,
{
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            mem: MemQueue::new(),
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn put(&self, value: T) {
        self.mem.put(value);
    }

    pub fn get(&self) -> T {
        self.mem.get()
    }

    pub fn get_nowait(&self) -> Option<T> {
        self.mem.get_nowait()
    }

    pub fn qsize(&self) -> usize {
        self.mem.qsize()
    }

    /// Drains every in-memory item into a [`DurableQueue`] at `path`,
    /// in FIFO order. Leaves the durable queue open on disk.
    pub fn flush(&self) -> Result<()> {
        let queue = DurableQueue::open(&self.path)?;
        while let Some(value) = self.mem.get_nowait() {
            queue.put(value.into())?;
        }
        Ok(())
    }

    /// Loads every entry from the durable queue at `path` (oldest
    /// first) back into memory, then removes the on-disk queue. A
    /// no-op if nothing was ever flushed.
    pub fn ingest(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let queue = DurableQueue::open(&self.path)?;
        loop {
            match queue.get_nowait() {
                Ok(value) => self.mem.put(T::try_from(value)?),
                Err(Error::Empty) | Err(Error::Missing) => break,
                Err(e) => return Err(e),
            }
        }
        queue.close()
    }
}
