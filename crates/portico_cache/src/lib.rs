//! In-memory caching: a byte-budgeted LRU store and the named-cache registry
//! that shares instances across routing rules.

use thiserror::Error;

pub mod lru;
pub mod registry;

pub use lru::LruCache;
pub use registry::CacheRegistry;

/// Anything the cache can account for by size.
pub trait Measured {
    /// Size of this entry in bytes, as charged against the cache budget.
    fn size(&self) -> usize;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The single entry is larger than the whole cache budget.
    #[error("exceeds max size, can't store")]
    ExceedsMaxSize,

    #[error("zero sized cache")]
    ZeroSized,

    #[error("you need to specify a cache strategy")]
    StrategyRequired,

    #[error("unknown cache strategy '{0}'")]
    UnknownStrategy(String),
}
