//! Per-connection worker: reads requests, routes them and dispatches to the
//! matched handler until the connection closes.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::time::Duration;
use tracing::debug;

use portico_http::responses::send_404;
use portico_http::{read_request, ClientStream};

use crate::router::Router;

const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(15);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(65);

/// Handle every request arriving on one accepted connection.
pub async fn handle_connection(
    mut stream: Box<dyn ClientStream>,
    client_addr: SocketAddr,
    router: Arc<Router>,
) -> anyhow::Result<()> {
    debug!(target: "portico::worker", client = %client_addr, "Handling new connection");

    let mut buf = BytesMut::new();
    let mut first_request = true;

    loop {
        let idle_timeout = if first_request {
            CLIENT_READ_TIMEOUT
        } else {
            KEEPALIVE_TIMEOUT
        };

        let Some(req) =
            read_request(stream.as_mut(), &mut buf, idle_timeout, CLIENT_READ_TIMEOUT).await?
        else {
            break;
        };
        first_request = false;

        let host = req.host().unwrap_or("");
        let Some(handler) = router.route(host, req.path_without_query()) else {
            debug!(
                target: "portico::worker",
                %host,
                path = %req.path,
                "No rule matched; returning 404"
            );
            send_404(stream.as_mut()).await?;
            break;
        };

        let force_close = handler.handle(stream.as_mut(), &req).await?;
        if force_close || req.close_after {
            break;
        }
    }

    debug!(target: "portico::worker", client = %client_addr, "Connection finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_config::{
        CacheStrategy, FileSystemDefaults, HandlerKind, Host, ServerBlock, ServerResource,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_root(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!("portico-worker-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<p>index</p>").unwrap();
        dir.to_string_lossy().into_owned()
    }

    fn router(root: &str, pattern: &str) -> Arc<Router> {
        let blocks = vec![ServerBlock {
            hosts: vec![Host {
                host: "test".to_string(),
                port: 80,
                cert_file: None,
                key_file: None,
            }],
            content: vec![ServerResource {
                pattern: pattern.to_string(),
                kind: HandlerKind::FileSystem,
                path: root.to_string(),
                compression: false,
                fs_defaults: FileSystemDefaults::default(),
                cache: CacheStrategy::default(),
                error_pages: Vec::new(),
            }],
            default: true,
        }];
        Arc::new(Router::build(&blocks).unwrap())
    }

    async fn converse(router: Arc<Router>, raw: &[u8]) -> Vec<u8> {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let worker = tokio::spawn(handle_connection(Box::new(server), addr, router));

        client.write_all(raw).await.unwrap();
        client.shutdown().await.unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        worker.await.unwrap().unwrap();
        out
    }

    #[tokio::test]
    async fn serves_a_routed_request() {
        let root = test_root("serve");
        let out = converse(
            router(&root, ".*"),
            b"GET /index.html HTTP/1.1\r\nHost: test\r\n\r\n",
        )
        .await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.ends_with("<p>index</p>"));
    }

    #[tokio::test]
    async fn keep_alive_serves_sequential_requests() {
        let root = test_root("keepalive");
        let out = converse(
            router(&root, ".*"),
            b"GET /index.html HTTP/1.1\r\nHost: test\r\n\r\n\
              GET /index.html HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
        )
        .await;
        let text = String::from_utf8_lossy(&out);
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
    }

    #[tokio::test]
    async fn unmatched_path_gets_404() {
        let root = test_root("nomatch");
        let out = converse(
            router(&root, "^/files/"),
            b"GET /elsewhere HTTP/1.1\r\nHost: test\r\n\r\n",
        )
        .await;
        assert!(out.starts_with(b"HTTP/1.1 404 Not Found"));
    }

    #[tokio::test]
    async fn query_string_is_ignored_for_matching() {
        let root = test_root("query");
        let out = converse(
            router(&root, "^/index.html$"),
            b"GET /index.html?version=2 HTTP/1.1\r\nHost: test\r\n\r\n",
        )
        .await;
        assert!(out.starts_with(b"HTTP/1.1 200 OK"));
    }
}
