//! The directory store: the mapping contract (`insert`, `get`,
//! `delete`, `iterate`, ...) implemented over one directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::Value;
use crate::error::{Error, Result};
use crate::lock::{Lock, ProcessLock};
use crate::meta;

struct Inner {
    dir: PathBuf,
    xattr_supported: bool,
    lock: Box<dyn Lock>,
}

/// A directory-backed associative map: one regular file per key,
/// ordered by insertion (birth-time), safe to share across threads
/// and — via the default [`ProcessLock`] — cooperating processes on
/// the same host.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Opens (creating if needed) a store rooted at `dir`, using the
    /// default cross-process lock.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        StoreOptions::new().open(dir)
    }

    /// Opens a store using a caller-supplied lock implementation, e.g.
    /// a [`crate::ThreadLock`] when cross-process safety isn't needed.
    pub fn open_with_lock<P: AsRef<Path>>(dir: P, lock: Box<dyn Lock>) -> Result<Self> {
        StoreOptions::new().lock(lock).open(dir)
    }

    /// Opens a store with an explicit [`StoreOptions`] configuration.
    pub fn open_with<P: AsRef<Path>>(dir: P, options: StoreOptions) -> Result<Self> {
        options.open(dir)
    }

    pub fn path(&self) -> &Path {
        &self.inner.dir
    }

    fn entry_path(&self, name: &str) -> PathBuf {
        self.inner.dir.join(name)
    }

    /// Runs `f` with the store's lock held, propagating a lock
    /// acquisition failure as an I/O error, matching a mutating
    /// operation's documented "fails with I/O error from the
    /// underlying filesystem" contract.
    fn with_lock<T>(&self, f: impl FnOnce() -> T) -> Result<T> {
        self.inner.lock.acquire()?;
        let result = f();
        self.inner.lock.release();
        Ok(result)
    }

    /// Runs `f` with the store's lock held, for operations the
    /// contract promises never fail (`contains`, `iterate`). A lock
    /// acquisition failure is logged and tolerated — `f` still runs,
    /// just without the serialization guarantee, which §5 already
    /// allows for unlocked readers.
    fn with_lock_infallible<T>(&self, f: impl FnOnce() -> T) -> T {
        match self.inner.lock.acquire() {
            Ok(()) => {
                let result = f();
                self.inner.lock.release();
                result
            }
            Err(err) => {
                log::warn!(
                    "lock acquisition failed for {}: {err}; proceeding without the lock",
                    self.inner.dir.display()
                );
                f()
            }
        }
    }

    /// Atomically replaces any prior entry for `key`. After this
    /// returns, `get(key)` yields `value`.
    pub fn insert(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.with_lock(|| self.insert_locked(key, &value))?
    }

    fn insert_locked(&self, key: &str, value: &Value) -> Result<()> {
        let name = meta::encode_name(key, self.inner.xattr_supported);
        let path = self.entry_path(&name);
        let bytes = value.encode()?;
        fs::write(&path, bytes)?;
        meta::write_metadata(&path, key, self.inner.xattr_supported)?;
        Ok(())
    }

    /// Returns the most recently inserted value for `key`.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.with_lock(|| self.read_locked(key))?
    }

    fn read_locked(&self, key: &str) -> Result<Value> {
        let name = meta::encode_name(key, self.inner.xattr_supported);
        let path = self.entry_path(&name);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Missing
            } else {
                Error::Io(e)
            }
        })?;
        Value::decode(&bytes)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.with_lock_infallible(|| {
            let name = meta::encode_name(key, self.inner.xattr_supported);
            self.entry_path(&name).exists()
        })
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.with_lock(|| {
            let name = meta::encode_name(key, self.inner.xattr_supported);
            let path = self.entry_path(&name);
            fs::remove_file(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::Missing
                } else {
                    Error::Io(e)
                }
            })
        })?
    }

    /// Enumerates keys in ascending birth-time order (ties broken
    /// lexicographically by key). A snapshot taken under the lock and
    /// then released — the lock guards the directory listing, not the
    /// per-key reads a consumer may later perform via `get`.
    pub fn iterate(&self, from_index: usize) -> Vec<String> {
        let snapshot = self.with_lock_infallible(|| self.snapshot_sorted());
        snapshot.into_iter().skip(from_index).collect()
    }

    fn snapshot_sorted(&self) -> Vec<String> {
        let mut pairs = self.scan_once();
        pairs.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        pairs.into_iter().map(|(key, _)| key).collect()
    }

    /// One pass over the directory, tolerating entries that vanish
    /// mid-scan. Retried once if the directory itself couldn't be read
    /// (e.g. a concurrent `clear()`), bounded to avoid livelock.
    fn scan_once(&self) -> Vec<(String, f64)> {
        for attempt in 0..2 {
            if let Some(pairs) = self.try_scan() {
                return pairs;
            }
            if attempt == 1 {
                break;
            }
        }
        Vec::new()
    }

    fn try_scan(&self) -> Option<Vec<(String, f64)>> {
        let read_dir = fs::read_dir(&self.inner.dir).ok()?;
        let mut pairs = Vec::new();
        for entry in read_dir.flatten() {
            let path = entry.path();
            // Skip our own lock file and anything else hidden; skip
            // files that vanished between the readdir and now.
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if !path.is_file() || !path.exists() {
                continue;
            }
            let key = match meta::read_key(&path, self.inner.xattr_supported) {
                Ok(k) => k,
                Err(_) => continue,
            };
            let birthtime = match meta::read_birthtime(&path, self.inner.xattr_supported) {
                Ok(t) => t,
                Err(_) => continue,
            };
            pairs.push((key, birthtime));
        }
        Some(pairs)
    }

    pub fn length(&self) -> usize {
        self.iterate(0).len()
    }

    /// Deletes every entry. Per-entry deletions that race with an
    /// external removal are tolerated, not surfaced.
    pub fn clear(&self) -> Result<()> {
        for key in self.iterate(0) {
            match self.delete(&key) {
                Ok(()) | Err(Error::Missing) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Returns the value for `key` and removes the entry. If absent
    /// and `default` is given, returns it; otherwise fails `Missing`.
    /// The delete is always attempted, even when the key turns out to
    /// be absent, mirroring the source's try/finally structure.
    pub fn pop(&self, key: &str, default: Option<Value>) -> Result<Value> {
        let got = self.get(key);
        match self.delete(key) {
            Ok(()) | Err(Error::Missing) => {}
            Err(e) => return Err(e),
        }
        match got {
            Ok(value) => Ok(value),
            Err(Error::Missing) => default.ok_or(Error::Missing),
            Err(e) => Err(e),
        }
    }

    /// Pops and returns the *value* of the oldest entry — not a
    /// `(key, value)` pair. This departs from the usual mapping
    /// convention; the source behaves identically and this crate
    /// preserves it verbatim (see DESIGN.md).
    pub fn popitem(&self) -> Result<Value> {
        match self.iterate(0).into_iter().next() {
            Some(key) => self.pop(&key, None),
            None => Err(Error::Empty),
        }
    }

    pub fn items(&self) -> impl Iterator<Item = (String, Result<Value>)> + '_ {
        self.iterate(0).into_iter().map(move |k| {
            let v = self.get(&k);
            (k, v)
        })
    }

    pub fn keys(&self) -> Vec<String> {
        self.iterate(0)
    }

    pub fn values(&self) -> impl Iterator<Item = Result<Value>> + '_ {
        self.iterate(0).into_iter().map(move |k| self.get(&k))
    }

    /// Returns a handle to the same underlying directory — a shallow
    /// alias, not a deep copy. See DESIGN.md for why equality is by
    /// directory identity rather than content.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn setdefault(&self, key: &str, default: impl Into<Value>) -> Result<Value> {
        match self.get(key) {
            Ok(v) => Ok(v),
            Err(Error::Missing) => {
                let value = default.into();
                self.insert(key, value.clone())?;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    pub fn fromkeys<I, K>(&self, keys: I, default: Option<Value>) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let value = default.unwrap_or(Value::Null);
        for key in keys {
            self.insert(key.as_ref(), value.clone())?;
        }
        Ok(())
    }

    pub fn update<I, K>(&self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        for (key, value) in pairs {
            self.insert(key.as_ref(), value)?;
        }
        Ok(())
    }
}

/// Builder-style configuration for [`Store::open_with`]: the lock
/// implementation to use and, for tests that need to pin down behavior
/// regardless of what the test filesystem actually supports, an
/// override of the xattr-capability probe.
///
/// No field here is process-global — every `Store` carries its own
/// resolved configuration, per §9's "process-wide state: none".
#[derive(Default)]
pub struct StoreOptions {
    lock: Option<Box<dyn Lock>>,
    xattr_override: Option<bool>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this lock implementation instead of the default
    /// [`ProcessLock`]. Default to `ProcessLock` when unset.
    pub fn lock(mut self, lock: Box<dyn Lock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Skip the `listxattr` capability probe and force xattr mode on or
    /// off. Meant for tests that want deterministic naming/iteration
    /// behavior independent of the test filesystem's actual xattr
    /// support.
    pub fn xattr_supported(mut self, supported: bool) -> Self {
        self.xattr_override = Some(supported);
        self
    }

    /// Opens (creating if needed) a store rooted at `dir` with this
    /// configuration.
    pub fn open<P: AsRef<Path>>(self, dir: P) -> Result<Store> {
        let dir = dir.as_ref().to_path_buf();
        ensure_dir(&dir)?;
        let xattr_supported = self
            .xattr_override
            .unwrap_or_else(|| meta::probe_xattr_support(&dir));
        log::debug!(
            "opened store at {} (xattr_supported={xattr_supported})",
            dir.display()
        );
        let lock = match self.lock {
            Some(lock) => lock,
            None => Box::new(ProcessLock::new(&dir)?),
        };
        Ok(Store {
            inner: Arc::new(Inner {
                dir,
                xattr_supported,
                lock,
            }),
        })
    }
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.dir == other.inner.dir
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_file() {
        fs::remove_file(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// RAII guard that clears the wrapped store when dropped — the Rust
/// expression of the source's `__exit__`-calls-`clear` contract.
/// Opening a store behind a `scope_guard` is the explicit signal that
/// its contents are ephemeral.
pub struct ScopeGuard {
    store: Store,
}

pub fn scope_guard(store: Store) -> ScopeGuard {
    ScopeGuard { store }
}

impl std::ops::Deref for ScopeGuard {
    type Target = Store;
    fn deref(&self) -> &Store {
        &self.store
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Err(err) = self.store.clear() {
            log::error!(
                "scope_guard: clear failed for {}: {err}",
                self.store.path().display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn insert_get_iterate_in_order() {
        let (_dir, store) = open_temp();
        store.insert("a", 1i64).unwrap();
        store.insert("b", 2i64).unwrap();
        store.insert("c", 3i64).unwrap();

        assert_eq!(store.keys(), vec!["a", "b", "c"]);
        assert_eq!(store.length(), 3);
    }

    #[test]
    fn insert_nested_mapping_value() {
        let (_dir, store) = open_temp();
        let mapping = Value::Map(vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Int(2)),
        ]);
        store.insert("d", mapping.clone()).unwrap();
        assert_eq!(store.get("d").unwrap(), mapping);
    }

    #[test]
    fn distinct_keys_with_equal_values_are_independent() {
        let (_dir, store) = open_temp();
        store.insert("q", "dedup").unwrap();
        store.insert("r", "dedup").unwrap();
        store.delete("q").unwrap();
        assert_eq!(store.get("r").unwrap(), Value::Str("dedup".to_string()));
        assert!(!store.contains("q"));
    }

    #[test]
    fn fromkeys_without_default_stores_null() {
        let (_dir, store) = open_temp();
        store.fromkeys(["f", "g"], None).unwrap();
        assert_eq!(store.get("f").unwrap(), Value::Null);
        assert_eq!(store.get("g").unwrap(), Value::Null);
    }

    #[test]
    fn get_missing_key_errors() {
        let (_dir, store) = open_temp();
        assert!(matches!(store.get("nope"), Err(Error::Missing)));
    }

    #[test]
    fn delete_missing_key_errors() {
        let (_dir, store) = open_temp();
        assert!(matches!(store.delete("nope"), Err(Error::Missing)));
    }

    #[test]
    fn insert_same_key_twice_keeps_length_stable() {
        let (_dir, store) = open_temp();
        store.insert("a", 1i64).unwrap();
        let before = store.length();
        store.insert("a", 2i64).unwrap();
        assert_eq!(store.length(), before);
        assert_eq!(store.get("a").unwrap(), Value::Int(2));
    }

    #[test]
    fn clear_empties_the_store() {
        let (_dir, store) = open_temp();
        store.insert("a", 1i64).unwrap();
        store.insert("b", 2i64).unwrap();
        store.clear().unwrap();
        assert_eq!(store.length(), 0);
        assert!(store.keys().is_empty());
    }

    #[test]
    fn popitem_pops_oldest_first() {
        let (_dir, store) = open_temp();
        store.insert("a", 1i64).unwrap();
        store.insert("b", 2i64).unwrap();
        assert_eq!(store.popitem().unwrap(), Value::Int(1));
        assert_eq!(store.popitem().unwrap(), Value::Int(2));
    }

    #[test]
    fn popitem_on_empty_store_is_empty() {
        let (_dir, store) = open_temp();
        assert!(matches!(store.popitem(), Err(Error::Empty)));
    }

    #[test]
    fn pop_with_default_tolerates_missing_key() {
        let (_dir, store) = open_temp();
        assert_eq!(
            store.pop("nope", Some(Value::Str("default".into()))).unwrap(),
            Value::Str("default".into())
        );
    }

    #[test]
    fn pop_without_default_errors_on_missing_key() {
        let (_dir, store) = open_temp();
        assert!(matches!(store.pop("nope", None), Err(Error::Missing)));
    }

    #[test]
    fn setdefault_returns_existing_value() {
        let (_dir, store) = open_temp();
        store.insert("k", 1i64).unwrap();
        assert_eq!(store.setdefault("k", 2i64).unwrap(), Value::Int(1));
    }

    #[test]
    fn setdefault_inserts_when_absent() {
        let (_dir, store) = open_temp();
        assert_eq!(store.setdefault("k", 2i64).unwrap(), Value::Int(2));
        assert_eq!(store.get("k").unwrap(), Value::Int(2));
    }

    #[test]
    fn iterate_from_index_drops_leading_elements() {
        let (_dir, store) = open_temp();
        for k in ["a", "b", "c"] {
            store.insert(k, 1i64).unwrap();
        }
        assert_eq!(store.iterate(1), vec!["b", "c"]);
        assert_eq!(store.iterate(10), Vec::<String>::new());
    }

    #[test]
    fn copy_is_a_shallow_alias() {
        let (_dir, store) = open_temp();
        let alias = store.copy();
        assert_eq!(store, alias);
        alias.insert("a", 1i64).unwrap();
        assert!(store.contains("a"));
    }

    #[test]
    fn update_inserts_every_pair() {
        let (_dir, store) = open_temp();
        store
            .update([("a", Value::Int(1)), ("b", Value::Int(2)), ("c", Value::Int(3))])
            .unwrap();
        assert_eq!(store.length(), 3);
        assert_eq!(store.get("b").unwrap(), Value::Int(2));
    }

    #[test]
    fn scope_guard_clears_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        {
            let guarded = scope_guard(store.clone());
            guarded.insert("a", 1i64).unwrap();
            assert_eq!(guarded.length(), 1);
        }
        assert_eq!(store.length(), 0);
    }

    #[test]
    fn store_options_can_force_non_xattr_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreOptions::new()
            .xattr_supported(false)
            .open(dir.path())
            .unwrap();
        store.insert("plain-key", 1i64).unwrap();
        assert!(dir.path().join("plain-key").is_file());
    }

    #[test]
    fn store_options_can_inject_a_thread_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreOptions::new()
            .lock(Box::new(crate::ThreadLock::new()))
            .open(dir.path())
            .unwrap();
        store.insert("a", 1i64).unwrap();
        assert_eq!(store.get("a").unwrap(), Value::Int(1));
    }

    #[test]
    fn opening_a_path_that_is_a_regular_file_replaces_it() {
        let parent = tempfile::tempdir().unwrap();
        let path = parent.path().join("store-here");
        std::fs::write(&path, b"not a directory").unwrap();
        let store = Store::open(&path).unwrap();
        store.insert("a", 1i64).unwrap();
        assert!(path.is_dir());
    }
}
