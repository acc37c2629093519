//! The http-socket handler: relays a request to an origin server and streams
//! the response back, plus the unix-socket stub.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use portico_config::ServerResource;
use portico_http::responses::{send_501, status_line};
use portico_http::{ClientStream, Handler, Request};
use portico_static::{ErrorRule, FsHandler};

use crate::pool::BufferPool;
use crate::upstream::{read_head, UpstreamBase, UpstreamClient, UpstreamHead};

/// Outcome of the upstream exchange before anything is written to the client.
enum Exchange {
    /// 200/304: head parsed, body (partially buffered in `leftover`) pending.
    Success {
        head: UpstreamHead,
        leftover: Vec<u8>,
        upstream: TcpStream,
    },
    /// Any other upstream status, surfaced to the error path.
    ErrorStatus(u16),
}

/// Reverse-proxies matched requests to a fixed HTTP origin.
pub struct HttpSocketHandler {
    base: UpstreamBase,
    error_pages: FsHandler,
    pool: BufferPool,
}

impl HttpSocketHandler {
    pub fn new(resource: Arc<ServerResource>, error_rules: Vec<ErrorRule>) -> anyhow::Result<Self> {
        let base = UpstreamBase::parse(&resource.path)?;
        Ok(Self {
            base,
            error_pages: FsHandler::uncached(resource, error_rules),
            pool: BufferPool::new(),
        })
    }

    /// Serialise the outbound request: inbound method and path against the
    /// configured origin, headers copied minus the hop-by-hop set, body
    /// relayed with an explicit length.
    fn build_upstream_request(&self, req: &Request) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} HTTP/1.1\r\n",
            req.method,
            req.path_without_query()
        ));
        out.push_str(&format!("Host: {}\r\n", self.base.authority));
        for (name, value) in req.header_lines() {
            if name.eq_ignore_ascii_case("host")
                || name.eq_ignore_ascii_case("connection")
                || name.eq_ignore_ascii_case("keep-alive")
                || name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("transfer-encoding")
            {
                continue;
            }
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!("Content-Length: {}\r\n", req.body.len()));
        out.push_str("Connection: close\r\n\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&req.body);
        bytes
    }

    /// Perform the upstream round trip up to (and including) the response
    /// head. Nothing has been written to the client yet when this returns,
    /// so every failure can still be mapped to an error page.
    async fn exchange(&self, req: &Request) -> anyhow::Result<Exchange> {
        let client = UpstreamClient::global();
        let mut upstream = client.connect(&self.base.authority).await?;

        let out = self.build_upstream_request(req);
        match timeout(client.write_timeout(), upstream.write_all(&out)).await {
            Ok(res) => res?,
            Err(_) => anyhow::bail!("upstream write timeout to {}", self.base.authority),
        }

        let (head, leftover) = read_head(&mut upstream, client.read_timeout()).await?;
        if head.status != 200 && head.status != 304 {
            return Ok(Exchange::ErrorStatus(head.status));
        }
        Ok(Exchange::Success {
            head,
            leftover,
            upstream,
        })
    }

    /// Write the upstream status and headers, then stream the body. Returns
    /// true when the client connection must close (EOF-delimited body).
    async fn relay(
        &self,
        stream: &mut dyn ClientStream,
        req: &Request,
        head: &UpstreamHead,
        leftover: Vec<u8>,
        mut upstream: TcpStream,
    ) -> anyhow::Result<bool> {
        let known_length = head.content_length;
        let keep_alive = known_length.is_some() && !req.close_after;

        let mut block = String::new();
        block.push_str(&format!("HTTP/1.1 {}\r\n", status_line(head.status)));
        for (name, value) in &head.headers {
            if name.eq_ignore_ascii_case("connection")
                || name.eq_ignore_ascii_case("keep-alive")
                || name.eq_ignore_ascii_case("transfer-encoding")
            {
                continue;
            }
            block.push_str(&format!("{name}: {value}\r\n"));
        }
        block.push_str(&format!(
            "Connection: {}\r\n\r\n",
            if keep_alive { "keep-alive" } else { "close" }
        ));
        stream.write_all(block.as_bytes()).await?;

        match known_length {
            Some(total) => {
                let take = leftover.len().min(total);
                stream.write_all(&leftover[..take]).await?;
                self.stream_exact(stream, &mut upstream, total - take).await?;
            }
            None => {
                if leftover.is_empty() {
                    // Length unknown: probe a single byte. An immediate EOF
                    // means the body is empty and we close cleanly.
                    let mut probe = [0u8; 1];
                    let n = timed_read(&mut upstream, &mut probe).await?;
                    if n > 0 {
                        stream.write_all(&probe).await?;
                        self.stream_to_eof(stream, &mut upstream).await?;
                    }
                } else {
                    stream.write_all(&leftover).await?;
                    self.stream_to_eof(stream, &mut upstream).await?;
                }
            }
        }

        stream.flush().await?;
        Ok(!keep_alive)
    }

    /// Relay exactly `remaining` body bytes through a pooled buffer.
    async fn stream_exact(
        &self,
        stream: &mut dyn ClientStream,
        upstream: &mut TcpStream,
        mut remaining: usize,
    ) -> anyhow::Result<()> {
        let mut buf = self.pool.take();
        let result = async {
            while remaining > 0 {
                let want = remaining.min(buf.len());
                let n = timed_read(upstream, &mut buf[..want]).await?;
                if n == 0 {
                    anyhow::bail!("upstream closed before sending the full body");
                }
                stream.write_all(&buf[..n]).await?;
                remaining -= n;
            }
            Ok(())
        }
        .await;
        self.pool.put(buf);
        result
    }

    /// Relay body bytes until the upstream closes the connection.
    async fn stream_to_eof(
        &self,
        stream: &mut dyn ClientStream,
        upstream: &mut TcpStream,
    ) -> anyhow::Result<()> {
        let mut buf = self.pool.take();
        let result = async {
            loop {
                let n = timed_read(upstream, &mut buf).await?;
                if n == 0 {
                    return Ok(());
                }
                stream.write_all(&buf[..n]).await?;
            }
        }
        .await;
        self.pool.put(buf);
        result
    }
}

/// A single upstream read bounded by the inactivity timeout.
async fn timed_read(upstream: &mut TcpStream, buf: &mut [u8]) -> anyhow::Result<usize> {
    match timeout(UpstreamClient::global().read_timeout(), upstream.read(buf)).await {
        Ok(res) => Ok(res?),
        Err(_) => anyhow::bail!("upstream read timed out"),
    }
}

#[async_trait]
impl Handler for HttpSocketHandler {
    async fn handle(&self, stream: &mut dyn ClientStream, req: &Request) -> anyhow::Result<bool> {
        debug!(
            target: "portico::proxy",
            method = %req.method,
            path = %req.path,
            upstream = %self.base.authority,
            "Forwarding request to upstream"
        );

        let compression = self.error_pages.wants_compression(req);
        match self.exchange(req).await {
            Ok(Exchange::Success {
                head,
                leftover,
                upstream,
            }) => self.relay(stream, req, &head, leftover, upstream).await,
            Ok(Exchange::ErrorStatus(status)) => {
                debug!(
                    target: "portico::proxy",
                    status,
                    "Upstream returned an error status"
                );
                self.error_pages
                    .serve_error(stream, req, status, compression)
                    .await?;
                Ok(false)
            }
            Err(err) => {
                warn!(target: "portico::proxy", error = %err, "Upstream request failed");
                self.error_pages
                    .serve_error(stream, req, 500, compression)
                    .await?;
                Ok(false)
            }
        }
    }
}

/// Placeholder for the unix-socket backend.
pub struct UnixSocketHandler;

#[async_trait]
impl Handler for UnixSocketHandler {
    async fn handle(&self, stream: &mut dyn ClientStream, _req: &Request) -> anyhow::Result<bool> {
        send_501(stream).await?;
        Ok(true)
    }
}
