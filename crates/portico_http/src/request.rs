//! Reading and parsing one HTTP/1.1 request from a client stream.

use bytes::{Buf, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::responses::{send_400, send_408, send_411, send_413, send_431};
use crate::ClientStream;

/// Upper bound on the request header block.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Upper bound on an inbound request body.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// One parsed inbound request.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub version: String,

    /// Raw header block, request line included.
    pub headers: String,

    pub body: Vec<u8>,

    /// Client asked for (or implies) connection close after this response.
    pub close_after: bool,
}

impl Request {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_lines()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// The Host header value, if present.
    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    /// The request path with any query string removed.
    pub fn path_without_query(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }

    /// Iterate the header lines as trimmed (name, value) pairs.
    pub fn header_lines(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.lines().skip(1).filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (name, value) = line.split_once(':')?;
            Some((name.trim(), value.trim()))
        })
    }
}

enum ReadOutcome {
    Read(usize),
    Timeout,
}

async fn read_more(
    stream: &mut dyn ClientStream,
    buf: &mut BytesMut,
    timeout_dur: Duration,
) -> anyhow::Result<ReadOutcome> {
    let mut tmp = [0u8; 4096];
    match timeout(timeout_dur, stream.read(&mut tmp)).await {
        Ok(res) => {
            let n = res?;
            if n > 0 {
                buf.extend_from_slice(&tmp[..n]);
            }
            Ok(ReadOutcome::Read(n))
        }
        Err(_) => Ok(ReadOutcome::Timeout),
    }
}

fn find_headers_end(buf: &BytesMut) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Read one full request (header block plus Content-Length body).
///
/// Returns `Ok(None)` when the connection should simply be closed: clean EOF,
/// idle timeout, or a malformed request that has already been answered with
/// an error status. Leftover bytes stay in `buf` for the next request on a
/// keep-alive connection.
pub async fn read_request(
    stream: &mut dyn ClientStream,
    buf: &mut BytesMut,
    idle_timeout: Duration,
    read_timeout: Duration,
) -> anyhow::Result<Option<Request>> {
    let headers_end = loop {
        if let Some(pos) = find_headers_end(buf) {
            break pos;
        }

        if buf.len() > MAX_HEADER_BYTES {
            send_431(stream).await?;
            return Ok(None);
        }

        let timeout_dur = if buf.is_empty() {
            idle_timeout
        } else {
            read_timeout
        };
        match read_more(stream, buf, timeout_dur).await? {
            ReadOutcome::Timeout => {
                if !buf.is_empty() {
                    send_408(stream).await?;
                }
                return Ok(None);
            }
            ReadOutcome::Read(0) => return Ok(None),
            ReadOutcome::Read(_) => {}
        }
    };

    let headers = String::from_utf8_lossy(&buf[..headers_end]).to_string();
    buf.advance(headers_end + 4);

    let mut lines = headers.lines();
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        warn!(target: "portico::http", %request_line, "Malformed request line");
        send_400(stream).await?;
        return Ok(None);
    };
    let method = method.to_string();
    let path = path.to_string();
    let version = parts.next().unwrap_or("HTTP/1.1").to_string();

    let mut content_length = 0usize;
    let mut connection_close = false;
    let mut connection_keep_alive = false;

    for line in lines {
        let line = line.trim();
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-length") {
            match value.parse::<usize>() {
                Ok(len) => content_length = len,
                Err(_) => {
                    warn!(target: "portico::http", %value, "Invalid Content-Length");
                    send_400(stream).await?;
                    return Ok(None);
                }
            }
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            // Inbound chunked framing is not accepted; clients must send a
            // Content-Length.
            warn!(target: "portico::http", %value, "Rejecting Transfer-Encoding request");
            send_411(stream).await?;
            return Ok(None);
        } else if name.eq_ignore_ascii_case("connection") {
            let lower = value.to_ascii_lowercase();
            if lower.split(',').any(|t| t.trim() == "close") {
                connection_close = true;
            }
            if lower.split(',').any(|t| t.trim() == "keep-alive") {
                connection_keep_alive = true;
            }
        }
    }

    if content_length > MAX_BODY_BYTES {
        send_413(stream).await?;
        return Ok(None);
    }

    let mut body = Vec::with_capacity(content_length);
    while body.len() < content_length {
        if !buf.is_empty() {
            let take = (content_length - body.len()).min(buf.len());
            body.extend_from_slice(&buf[..take]);
            buf.advance(take);
            continue;
        }
        match read_more(stream, buf, read_timeout).await? {
            ReadOutcome::Timeout => {
                send_408(stream).await?;
                return Ok(None);
            }
            ReadOutcome::Read(0) => return Ok(None),
            ReadOutcome::Read(_) => {}
        }
    }

    let close_after = if version == "HTTP/1.0" {
        !connection_keep_alive || connection_close
    } else {
        connection_close
    };

    debug!(
        target: "portico::http",
        %method,
        %path,
        content_length,
        close_after,
        "Parsed HTTP request"
    );

    Ok(Some(Request {
        method,
        path,
        version,
        headers,
        body,
        close_after,
    }))
}
