//! The loader chain: filesystem reads, optionally memoised by an LRU cache.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use portico_cache::LruCache;
use portico_config::ServerResource;

use crate::content::{is_text_mime, mime_for, CachedFile};

/// Appended to cache keys holding gzip-encoded payloads.
const COMPRESSION_SUFFIX: &str = "gzip";

#[derive(Debug, Error)]
pub enum LoadError {
    /// No file could be resolved for the request path.
    #[error("unable to locate file for '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Pluggable reader of filesystem bytes for a resource.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(
        &self,
        request_path: &str,
        resource: &ServerResource,
        compression: bool,
    ) -> Result<Arc<CachedFile>, LoadError>;
}

// =======================================================
// FILESYSTEM LOADER
// =======================================================

/// Resolves request paths against the resource root and reads the bytes.
pub struct FsLoader;

impl FsLoader {
    /// Resolve a request path to an existing file.
    ///
    /// Directory URLs (trailing `/`) try the configured default files;
    /// extension-less URLs try the configured default extensions; anything
    /// else is taken verbatim.
    async fn locate(
        &self,
        request_path: &str,
        resource: &ServerResource,
    ) -> Option<(String, std::fs::Metadata)> {
        let base = format!("{}{}", resource.path, request_path);

        if request_path.ends_with('/') {
            self.find_by_appending(&base, &resource.fs_defaults.default_files)
                .await
        } else if !request_path.contains('.') {
            self.find_by_appending(&base, &resource.fs_defaults.default_extensions)
                .await
        } else {
            stat_file(&base).await.map(|meta| (base, meta))
        }
    }

    /// Try each suffix in order; the first existing file wins.
    async fn find_by_appending(
        &self,
        base: &str,
        suffixes: &[String],
    ) -> Option<(String, std::fs::Metadata)> {
        for suffix in suffixes {
            let candidate = format!("{base}{suffix}");
            if let Some(meta) = stat_file(&candidate).await {
                debug!(target: "portico::static", path = %candidate, "Resolved file by appending");
                return Some((candidate, meta));
            }
        }
        None
    }

    async fn read(&self, absolute_path: &str, compression: bool) -> Result<Vec<u8>, LoadError> {
        let data = fs::read(absolute_path).await?;
        if !compression {
            return Ok(data);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data)?;
        Ok(encoder.finish()?)
    }
}

async fn stat_file(path: &str) -> Option<std::fs::Metadata> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta),
        _ => None,
    }
}

#[async_trait]
impl Loader for FsLoader {
    async fn load(
        &self,
        request_path: &str,
        resource: &ServerResource,
        compression: bool,
    ) -> Result<Arc<CachedFile>, LoadError> {
        let Some((absolute_path, metadata)) = self.locate(request_path, resource).await else {
            return Err(LoadError::NotFound(request_path.to_string()));
        };

        let mime = mime_for(&absolute_path);
        let ignore_compression = !is_text_mime(mime);
        let compression = compression && !ignore_compression;

        let data = self.read(&absolute_path, compression).await?;
        let modified = metadata.modified()?;

        Ok(Arc::new(CachedFile {
            absolute_path,
            modified,
            data,
            compressed: compression,
            ignore_compression,
            mime,
        }))
    }
}

// =======================================================
// CACHE-WRAPPING LOADER
// =======================================================

/// Decorates an inner loader with an LRU cache keyed by request path and
/// compression. A hit skips path resolution entirely; the cached absolute
/// path is still stat-ed so a modification-time mismatch invalidates the
/// entry and falls through to the inner loader.
pub struct CacheLoader {
    inner: Arc<dyn Loader>,
    cache: Arc<LruCache<CachedFile>>,
}

impl CacheLoader {
    pub fn new(inner: Arc<dyn Loader>, cache: Arc<LruCache<CachedFile>>) -> Self {
        Self { inner, cache }
    }

    /// Probe the cache without consulting the filesystem.
    fn probe(&self, request_path: &str, compression: bool) -> Option<(Arc<CachedFile>, String)> {
        if compression {
            let gz_key = format!("{request_path}{COMPRESSION_SUFFIX}");
            if let Some(hit) = self.cache.get(&gz_key) {
                return Some((hit, gz_key));
            }
            // A plain entry only satisfies a compressed request for content
            // the server never compresses.
            let plain = self.cache.get(request_path)?;
            if plain.ignore_compression {
                Some((plain, request_path.to_string()))
            } else {
                None
            }
        } else {
            self.cache
                .get(request_path)
                .map(|hit| (hit, request_path.to_string()))
        }
    }

    /// Cache lookup guarded by the entry's modification-time snapshot.
    async fn lookup(&self, request_path: &str, compression: bool) -> Option<Arc<CachedFile>> {
        let (entry, key) = self.probe(request_path, compression)?;

        match fs::metadata(&entry.absolute_path)
            .await
            .and_then(|meta| meta.modified())
        {
            Ok(modified) if modified == entry.modified => {
                debug!(
                    target: "portico::static",
                    path = %entry.absolute_path,
                    "Serving file from cache"
                );
                Some(entry)
            }
            _ => {
                // Changed on disk (or no longer statable): drop the entry.
                self.cache.remove(&key);
                None
            }
        }
    }
}

#[async_trait]
impl Loader for CacheLoader {
    async fn load(
        &self,
        request_path: &str,
        resource: &ServerResource,
        compression: bool,
    ) -> Result<Arc<CachedFile>, LoadError> {
        if let Some(hit) = self.lookup(request_path, compression).await {
            return Ok(hit);
        }

        let fresh = self.inner.load(request_path, resource, compression).await?;

        let key = if fresh.compressed {
            format!("{request_path}{COMPRESSION_SUFFIX}")
        } else {
            request_path.to_string()
        };
        if let Err(err) = self.cache.add(&key, fresh.clone()) {
            debug!(target: "portico::static", %key, error = %err, "Skipping cache insert");
        }

        Ok(fresh)
    }
}
