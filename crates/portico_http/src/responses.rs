//! HTTP response rendering and small send helpers.

use tokio::io::AsyncWriteExt;

use crate::ClientStream;

type HeaderPair<'a> = (&'a str, &'a str);

const HTTP_VERSION: &str = "HTTP/1.1";
const CRLF: &str = "\r\n";
const TEXT_PLAIN: &str = "text/plain";

/// Reason phrase for a status code, for rendering status lines.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Status",
    }
}

/// Render "code reason" for the status line.
pub fn status_line(status: u16) -> String {
    format!("{status} {}", reason_phrase(status))
}

fn connection_value(keep_alive: bool) -> &'static str {
    if keep_alive {
        "keep-alive"
    } else {
        "close"
    }
}

fn write_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str(CRLF);
}

/// Central builder for fully-buffered HTTP/1.1 responses.
pub struct ResponseBuilder;

impl ResponseBuilder {
    /// Build a response with extra headers and an optional body.
    pub fn build_with_headers(
        status: &str,
        content_type: Option<&str>,
        content_length: usize,
        keep_alive: bool,
        extra_headers: &[HeaderPair<'_>],
        body: Option<&[u8]>,
    ) -> Vec<u8> {
        let mut head = String::new();
        head.push_str(HTTP_VERSION);
        head.push(' ');
        head.push_str(status);
        head.push_str(CRLF);
        write_header(&mut head, "Content-Length", &content_length.to_string());
        if let Some(ct) = content_type {
            write_header(&mut head, "Content-Type", ct);
        }
        for (name, value) in extra_headers {
            write_header(&mut head, name, value);
        }
        write_header(&mut head, "Connection", connection_value(keep_alive));
        head.push_str(CRLF);

        let mut out = head.into_bytes();
        if let Some(body) = body {
            out.extend_from_slice(body);
        }
        out
    }

    /// Build a response with a body and default headers.
    pub fn build(status: &str, content_type: Option<&str>, body: &[u8], keep_alive: bool) -> Vec<u8> {
        Self::build_with_headers(status, content_type, body.len(), keep_alive, &[], Some(body))
    }

    /// Build a header-only response.
    pub fn build_empty(status: &str, keep_alive: bool, extra_headers: &[HeaderPair<'_>]) -> Vec<u8> {
        Self::build_with_headers(status, None, 0, keep_alive, extra_headers, None)
    }

    /// Build a plain-text response.
    pub fn plain_text(status: &str, body: &str, keep_alive: bool) -> Vec<u8> {
        Self::build(status, Some(TEXT_PLAIN), body.as_bytes(), keep_alive)
    }
}

/// Write a raw status code with no body.
pub async fn send_status(stream: &mut dyn ClientStream, status: u16) -> anyhow::Result<()> {
    let resp = ResponseBuilder::build_empty(&status_line(status), false, &[]);
    stream.write_all(&resp).await?;
    stream.flush().await?;
    Ok(())
}

async fn send_text(stream: &mut dyn ClientStream, status: u16) -> anyhow::Result<()> {
    let line = status_line(status);
    let resp = ResponseBuilder::plain_text(&line, &line, false);
    stream.write_all(&resp).await?;
    stream.flush().await?;
    Ok(())
}

/// Send a 400 Bad Request response.
pub async fn send_400(stream: &mut dyn ClientStream) -> anyhow::Result<()> {
    send_text(stream, 400).await
}

/// Send a 404 Not Found response.
pub async fn send_404(stream: &mut dyn ClientStream) -> anyhow::Result<()> {
    send_text(stream, 404).await
}

/// Send a 408 Request Timeout response.
pub async fn send_408(stream: &mut dyn ClientStream) -> anyhow::Result<()> {
    send_text(stream, 408).await
}

/// Send a 411 Length Required response.
pub async fn send_411(stream: &mut dyn ClientStream) -> anyhow::Result<()> {
    send_text(stream, 411).await
}

/// Send a 413 Payload Too Large response.
pub async fn send_413(stream: &mut dyn ClientStream) -> anyhow::Result<()> {
    send_text(stream, 413).await
}

/// Send a 431 Request Header Fields Too Large response.
pub async fn send_431(stream: &mut dyn ClientStream) -> anyhow::Result<()> {
    send_text(stream, 431).await
}

/// Send a 501 Not Implemented response.
pub async fn send_501(stream: &mut dyn ClientStream) -> anyhow::Result<()> {
    send_text(stream, 501).await
}
