//! Error taxonomy shared by the naming layer, the directory store, and
//! the queues built on top of it.

/// The small set of failure modes a caller can observe: a missing key
/// or empty queue, a malformed argument, a filesystem error, or a
/// codec failure while decoding a stored value.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no such key")]
    Missing,
    #[error("store is empty")]
    Empty,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode value: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
