//! Configuration records for the portico server.
//!
//! The configuration file is a JSON array of [`ServerBlock`]s. Each block
//! binds a set of hosts to an ordered list of routing resources.

use anyhow::Context;
use serde::Deserialize;

// =======================================================
// SERVER BLOCK
// =======================================================

/// One unit of configuration: hosts plus the resources served for them.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerBlock {
    pub hosts: Vec<Host>,

    /// Routing rules in declaration order.
    #[serde(default)]
    pub content: Vec<ServerResource>,

    /// Marks this block as the fallback when no host matches.
    #[serde(default)]
    pub default: bool,
}

/// A hostname/port binding, optionally with TLS material.
#[derive(Debug, Clone, Deserialize)]
pub struct Host {
    pub host: String,
    pub port: u16,

    /// Path to a PEM-encoded certificate chain. TLS is enabled on the port
    /// when both `cert_file` and `key_file` are set.
    #[serde(default)]
    pub cert_file: Option<String>,

    /// Path to a PEM-encoded private key.
    #[serde(default)]
    pub key_file: Option<String>,
}

// =======================================================
// SERVER RESOURCE
// =======================================================

/// Which backend a resource dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum HandlerKind {
    #[serde(rename = "file_system")]
    FileSystem,
    #[serde(rename = "http_socket")]
    HttpSocket,
    #[serde(rename = "unix_socket")]
    UnixSocket,
}

/// One routing rule and its handler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerResource {
    /// Regex matched against the request path. Anchoring is up to the
    /// configuration author.
    #[serde(rename = "match")]
    pub pattern: String,

    #[serde(rename = "type")]
    pub kind: HandlerKind,

    /// Filesystem root for `file_system`, upstream base URL for
    /// `http_socket`.
    pub path: String,

    #[serde(default)]
    pub compression: bool,

    #[serde(default)]
    pub fs_defaults: FileSystemDefaults,

    #[serde(default)]
    pub cache: CacheStrategy,

    /// Error-page rules, applied in declaration order.
    #[serde(default, rename = "error")]
    pub error_pages: Vec<ErrorRedirect>,
}

/// Fallback names tried while resolving directory and extension-less URLs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileSystemDefaults {
    #[serde(default)]
    pub default_files: Vec<String>,

    #[serde(default)]
    pub default_extensions: Vec<String>,
}

/// Cache configuration for a resource. An empty `strategy` disables caching;
/// a non-empty `name` shares the instance across resources.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheStrategy {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub strategy: String,

    /// Cache budget in bytes.
    #[serde(default)]
    pub limit: usize,
}

/// Maps a status-code regex to an error-page path.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorRedirect {
    #[serde(rename = "match")]
    pub pattern: String,
    pub path: String,
}

// =======================================================
// LOADING
// =======================================================

/// Read and decode a configuration file (a JSON array of blocks).
pub fn load_from_file(path: &str) -> anyhow::Result<Vec<ServerBlock>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{path}'"))?;
    load_from_str(&raw).with_context(|| format!("failed to parse config file '{path}'"))
}

/// Decode a configuration document from a JSON string.
pub fn load_from_str(raw: &str) -> anyhow::Result<Vec<ServerBlock>> {
    let blocks: Vec<ServerBlock> = serde_json::from_str(raw)?;
    Ok(blocks)
}
