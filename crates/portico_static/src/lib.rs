//! Static file serving: loader chain, cacheable file payloads, conditional
//! GET and the filesystem request handler with error-page fallback.

mod conditional;
pub mod content;
pub mod handler;
pub mod loader;

pub use content::CachedFile;
pub use handler::{compile_error_rules, ErrorRule, FsHandler};
pub use loader::{CacheLoader, FsLoader, LoadError, Loader};
