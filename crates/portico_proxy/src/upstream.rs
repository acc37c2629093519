//! Outbound connection plumbing: base-URL parsing, the process-wide
//! connector and upstream response-head reading.

use std::sync::OnceLock;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Parsed `http://host[:port]` base of an upstream resource.
#[derive(Debug, Clone)]
pub struct UpstreamBase {
    /// `host:port` used for both the TCP connect and the Host header.
    pub authority: String,
}

impl UpstreamBase {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let rest = raw.strip_prefix("http://").ok_or_else(|| {
            anyhow::anyhow!("upstream base URL '{raw}' must start with 'http://'")
        })?;
        let authority = rest.split('/').next().unwrap_or("");
        if authority.is_empty() {
            anyhow::bail!("upstream base URL '{raw}' has no host");
        }
        let authority = if authority.contains(':') {
            authority.to_string()
        } else {
            format!("{authority}:80")
        };
        Ok(Self { authority })
    }
}

/// Process-wide outbound HTTP connector.
pub struct UpstreamClient {
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
}

static CLIENT: OnceLock<UpstreamClient> = OnceLock::new();

impl UpstreamClient {
    pub fn global() -> &'static UpstreamClient {
        CLIENT.get_or_init(|| UpstreamClient {
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
        })
    }

    pub async fn connect(&self, authority: &str) -> anyhow::Result<TcpStream> {
        debug!(target: "portico::proxy", upstream = %authority, "Connecting to upstream");
        match timeout(self.connect_timeout, TcpStream::connect(authority)).await {
            Ok(res) => Ok(res?),
            Err(_) => anyhow::bail!("upstream connect timeout to {authority}"),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }
}

/// Status line and headers of an upstream response.
#[derive(Debug)]
pub(crate) struct UpstreamHead {
    pub(crate) status: u16,
    pub(crate) content_length: Option<usize>,
    pub(crate) headers: Vec<(String, String)>,
}

/// Read the upstream response head. Returns the parsed head plus any body
/// bytes that arrived in the same reads.
pub(crate) async fn read_head(
    upstream: &mut TcpStream,
    read_timeout: Duration,
) -> anyhow::Result<(UpstreamHead, Vec<u8>)> {
    let mut buf: Vec<u8> = Vec::new();
    let mut tmp = [0u8; 4096];

    let headers_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            anyhow::bail!("upstream response headers too large");
        }
        let n = match timeout(read_timeout, upstream.read(&mut tmp)).await {
            Ok(res) => res?,
            Err(_) => anyhow::bail!("upstream read timeout while receiving headers"),
        };
        if n == 0 {
            anyhow::bail!("upstream closed the connection while sending headers");
        }
        buf.extend_from_slice(&tmp[..n]);
    };

    let head_str = String::from_utf8_lossy(&buf[..headers_end]).to_string();
    let mut lines = head_str.lines();

    let status_line = lines.next().unwrap_or("");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| anyhow::anyhow!("invalid upstream status line '{status_line}'"))?;

    let mut content_length = None;
    let mut headers = Vec::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().ok();
        }
        headers.push((name.to_string(), value.to_string()));
    }

    let leftover = buf[headers_end + 4..].to_vec();
    Ok((
        UpstreamHead {
            status,
            content_length,
            headers,
        },
        leftover,
    ))
}
