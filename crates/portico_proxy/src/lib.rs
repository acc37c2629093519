//! Socket-backed handlers: the HTTP reverse proxy and the unix-socket stub.

pub mod handler;
pub mod pool;
pub mod upstream;

pub use handler::{HttpSocketHandler, UnixSocketHandler};
pub use pool::BufferPool;
pub use upstream::{UpstreamBase, UpstreamClient};
