//! The filesystem request handler: response assembly, conditional GET and
//! error-page fallback.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use portico_cache::{CacheError, CacheRegistry};
use portico_config::ServerResource;
use portico_http::responses::{send_status, status_line, ResponseBuilder};
use portico_http::{ClientStream, Handler, Request};

use crate::conditional::not_modified;
use crate::content::CachedFile;
use crate::loader::{CacheLoader, FsLoader, LoadError, Loader};

/// A status-code regex mapped to an error-page path.
pub struct ErrorRule {
    pub pattern: Regex,
    pub path: String,
}

/// Compile a resource's error-page rules, preserving declaration order.
pub fn compile_error_rules(resource: &ServerResource) -> anyhow::Result<Vec<ErrorRule>> {
    resource
        .error_pages
        .iter()
        .map(|rule| {
            let pattern = Regex::new(&rule.pattern)
                .with_context(|| format!("invalid error-page pattern '{}'", rule.pattern))?;
            Ok(ErrorRule {
                pattern,
                path: rule.path.clone(),
            })
        })
        .collect()
}

/// Serves files for one routing rule through its loader chain.
pub struct FsHandler {
    resource: Arc<ServerResource>,
    error_rules: Vec<ErrorRule>,
    loader: Arc<dyn Loader>,
}

impl FsHandler {
    /// Build a handler, wrapping the filesystem loader in a cache when the
    /// resource configures one.
    pub fn new(
        resource: Arc<ServerResource>,
        error_rules: Vec<ErrorRule>,
        registry: &CacheRegistry<CachedFile>,
    ) -> Result<Self, CacheError> {
        let mut loader: Arc<dyn Loader> = Arc::new(FsLoader);
        if !resource.cache.strategy.is_empty() {
            let cache = registry.create(
                &resource.cache.name,
                &resource.cache.strategy,
                resource.cache.limit,
            )?;
            loader = Arc::new(CacheLoader::new(loader, cache));
        }
        Ok(Self {
            resource,
            error_rules,
            loader,
        })
    }

    /// Build a handler that never caches. The socket handlers use this for
    /// their error pages.
    pub fn uncached(resource: Arc<ServerResource>, error_rules: Vec<ErrorRule>) -> Self {
        Self {
            resource,
            error_rules,
            loader: Arc::new(FsLoader),
        }
    }

    /// Whether this request negotiates a gzip response: the resource must
    /// enable compression and the client must accept gzip. The loader may
    /// still refuse for binary content.
    pub fn wants_compression(&self, req: &Request) -> bool {
        self.resource.compression
            && req
                .header("accept-encoding")
                .map_or(false, |v| v.contains("gzip"))
    }

    async fn write_file(
        &self,
        stream: &mut dyn ClientStream,
        req: &Request,
        file: &CachedFile,
        conditional: bool,
    ) -> anyhow::Result<()> {
        let keep_alive = !req.close_after;

        if conditional && not_modified(req.header("if-modified-since"), file.modified) {
            debug!(target: "portico::static", path = %file.absolute_path, "File not modified");
            let resp = ResponseBuilder::build_with_headers(
                &status_line(304),
                Some(file.mime),
                0,
                keep_alive,
                &[],
                None,
            );
            stream.write_all(&resp).await?;
            stream.flush().await?;
            return Ok(());
        }

        let last_modified = httpdate::fmt_http_date(file.modified);
        let mut extra: Vec<(&str, &str)> = vec![
            ("Expires", "-1"),
            ("Cache-Control", "must-revalidate, private"),
            ("Last-Modified", last_modified.as_str()),
        ];
        if file.compressed {
            extra.push(("Content-Encoding", "gzip"));
        }

        let resp = ResponseBuilder::build_with_headers(
            "200 OK",
            Some(file.mime),
            file.data.len(),
            keep_alive,
            &extra,
            Some(&file.data),
        );
        stream.write_all(&resp).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Serve the mapped error page for `status`, falling back to a bare
    /// status write. Single-shot: a failure here never re-enters the error
    /// path.
    pub async fn serve_error(
        &self,
        stream: &mut dyn ClientStream,
        req: &Request,
        status: u16,
        compression: bool,
    ) -> anyhow::Result<()> {
        let Some(error_path) = self.find_error_file(status) else {
            return send_status(stream, status).await;
        };

        match self.loader.load(&error_path, &self.resource, compression).await {
            // The error page is unrelated to the client's cached copy, so the
            // If-Modified-Since check is skipped.
            Ok(file) => self.write_file(stream, req, &file, false).await,
            Err(err) => {
                debug!(
                    target: "portico::static",
                    %error_path,
                    error = %err,
                    "Error page load failed; writing bare status"
                );
                send_status(stream, status).await
            }
        }
    }

    /// First error rule whose regex matches the decimal status text.
    fn find_error_file(&self, status: u16) -> Option<String> {
        let status_text = status.to_string();
        self.error_rules
            .iter()
            .find(|rule| rule.pattern.is_match(&status_text))
            .map(|rule| rule.path.clone())
    }
}

#[async_trait]
impl Handler for FsHandler {
    async fn handle(&self, stream: &mut dyn ClientStream, req: &Request) -> anyhow::Result<bool> {
        debug!(target: "portico::static", path = %req.path, "Serving static file");

        let compression = self.wants_compression(req);
        match self
            .loader
            .load(req.path_without_query(), &self.resource, compression)
            .await
        {
            Ok(file) => {
                if self.write_file(stream, req, &file, true).await.is_err() {
                    self.serve_error(stream, req, 500, compression).await?;
                }
            }
            Err(LoadError::NotFound(_)) => {
                self.serve_error(stream, req, 404, compression).await?;
            }
            Err(LoadError::Io(err)) => {
                warn!(target: "portico::static", path = %req.path, error = %err, "File read failed");
                self.serve_error(stream, req, 500, compression).await?;
            }
        }
        Ok(false)
    }
}
