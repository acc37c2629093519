//! HTTP/1.1 plumbing shared by the handlers and the connection worker.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod request;
pub mod responses;

pub use request::{read_request, Request};

/// A bidirectional client connection (plain TCP or TLS).
pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ClientStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// The per-request dispatcher for one matched routing rule.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Write a full response for `req`. Returns `true` when the connection
    /// must be closed afterwards (e.g. an EOF-delimited body was streamed).
    async fn handle(&self, stream: &mut dyn ClientStream, req: &Request) -> anyhow::Result<bool>;
}
