//! Process startup: builds the listen plan from the configured blocks and
//! runs one accept loop per port, with optional TLS.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::Duration;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use portico_config::{Host, ServerBlock};

use crate::router::Router;
use crate::worker::handle_connection;

/// Global cap on concurrently handled connections.
const MAX_CONNECTIONS: usize = 1024;

struct ListenPlan {
    port: u16,
    tls: Option<TlsPaths>,
}

struct TlsPaths {
    cert_file: String,
    key_file: String,
}

fn tls_paths(host: &Host) -> Option<TlsPaths> {
    match (host.cert_file.as_deref(), host.key_file.as_deref()) {
        (Some(cert), Some(key)) if !cert.is_empty() && !key.is_empty() => Some(TlsPaths {
            cert_file: cert.to_string(),
            key_file: key.to_string(),
        }),
        _ => None,
    }
}

/// Owns the listeners; dispatches accepted connections to the worker.
pub struct Master {
    blocks: Vec<ServerBlock>,
}

impl Master {
    pub fn new(blocks: Vec<ServerBlock>) -> Self {
        Self { blocks }
    }

    /// One listener per distinct port. The first host configuring a port
    /// decides whether it speaks TLS; later conflicting hosts are ignored
    /// with a warning.
    fn listen_plan(&self) -> Vec<ListenPlan> {
        let mut seen: HashSet<u16> = HashSet::new();
        let mut plan = Vec::new();

        for block in &self.blocks {
            for host in &block.hosts {
                if !seen.insert(host.port) {
                    if tls_paths(host).is_some() {
                        warn!(
                            target: "portico::master",
                            port = host.port,
                            host = %host.host,
                            "Port already bound without TLS; ignoring cert config"
                        );
                    }
                    continue;
                }
                plan.push(ListenPlan {
                    port: host.port,
                    tls: tls_paths(host),
                });
            }
        }
        plan
    }

    /// Bind every planned listener and serve until the process is stopped.
    pub async fn run(self, router: Arc<Router>) -> anyhow::Result<()> {
        info!(
            target: "portico::master",
            blocks = self.blocks.len(),
            "Starting portico master"
        );

        let semaphore = Arc::new(Semaphore::new(MAX_CONNECTIONS));
        let plan = self.listen_plan();
        if plan.is_empty() {
            anyhow::bail!("configuration defines no listening ports");
        }

        for entry in plan {
            let addr = format!("0.0.0.0:{}", entry.port);
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;

            let acceptor = match &entry.tls {
                Some(paths) => Some(
                    load_tls_acceptor(paths)
                        .with_context(|| format!("invalid TLS config for port {}", entry.port))?,
                ),
                None => None,
            };

            info!(
                target: "portico::master",
                listen = %addr,
                tls = acceptor.is_some(),
                "Listening"
            );

            let router = router.clone();
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                if let Err(e) = accept_loop(listener, acceptor, semaphore, router).await {
                    error!(
                        target: "portico::master",
                        listen = %addr,
                        error = ?e,
                        "Accept loop exited with an error"
                    );
                }
            });
        }

        // The accept loops carry the work; keep the master task alive.
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    semaphore: Arc<Semaphore>,
    router: Arc<Router>,
) -> anyhow::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let permit = semaphore.clone().acquire_owned().await?;

        debug!(
            target: "portico::master",
            client = %addr,
            in_flight = MAX_CONNECTIONS - semaphore.available_permits(),
            "Accepted connection"
        );

        let router = router.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let _permit = permit;

            let result = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        handle_connection(Box::new(tls_stream), addr, router).await
                    }
                    Err(e) => {
                        error!(
                            target: "portico::worker",
                            client = %addr,
                            error = ?e,
                            "TLS handshake failed"
                        );
                        return;
                    }
                },
                None => handle_connection(Box::new(stream), addr, router).await,
            };

            if let Err(e) = result {
                error!(
                    target: "portico::worker",
                    client = %addr,
                    error = ?e,
                    "Error while handling connection"
                );
            }
        });
    }
}

/// Build a TLS acceptor from configured certificate/key paths.
fn load_tls_acceptor(paths: &TlsPaths) -> anyhow::Result<TlsAcceptor> {
    let certs = load_certs(&paths.cert_file)?;
    let key = load_private_key(&paths.key_file)?;

    let mut config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| anyhow::anyhow!("invalid TLS config: {e}"))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Load PEM-encoded certificates from disk.
fn load_certs(path: &str) -> anyhow::Result<Vec<rustls::Certificate>> {
    let file = File::open(path).with_context(|| format!("failed to open cert file '{path}'"))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)?;
    if certs.is_empty() {
        anyhow::bail!("no certificates found in {path}");
    }
    Ok(certs.into_iter().map(rustls::Certificate).collect())
}

/// Load a PEM-encoded private key (PKCS8 or RSA) from disk.
fn load_private_key(path: &str) -> anyhow::Result<rustls::PrivateKey> {
    let file = File::open(path).with_context(|| format!("failed to open key file '{path}'"))?;
    let mut reader = BufReader::new(file);
    let keys = rustls_pemfile::pkcs8_private_keys(&mut reader)?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(rustls::PrivateKey(key));
    }

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let keys = rustls_pemfile::rsa_private_keys(&mut reader)?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(rustls::PrivateKey(key));
    }

    anyhow::bail!("no private keys found in {path}");
}
