//! A durable, filesystem-backed associative map and the FIFO queue
//! built on top of it.
//!
//! Every key/value pair is one regular file under a directory: the
//! filename (a `blake3` digest of the key, or the key itself when
//! extended attributes aren't available) identifies the entry, the
//! file's bytes hold the encoded [`Value`], and an xattr (or `ctime`
//! as a fallback) fixes insertion order. [`Store`] is the mapping; a
//! [`DurableQueue`] layers a FIFO over a `Store`, and [`FlushQueue`]
//! bridges that durable queue with an in-memory one for
//! overflow-to-disk / reload-on-restart use cases.
//!
//! The directory *is* the database: no sidecar index, no journal, no
//! manifest.

mod codec;
mod error;
mod flush;
mod lock;
mod meta;
mod queue;
mod store;
mod wrappers;

pub use codec::Value;
pub use error::{Error, Result};
pub use flush::{FlushQueue, MemQueue};
pub use lock::{Lock, ProcessLock, ThreadLock};
pub use queue::DurableQueue;
pub use store::{scope_guard, ScopeGuard, Store, StoreOptions};
