//! Materialised file payloads and the content-type table.

use std::time::SystemTime;

use portico_cache::Measured;

/// Fallback content type for unknown suffixes.
pub const PLAIN_TEXT_MIME: &str = "text/plain";

const TEXT_MIME_PREFIX: &str = "text";

const MIME_TABLE: &[(&str, &str)] = &[
    (".html", "text/html"),
    (".css", "text/css"),
    (".js", "text/javascript"),
    (".ico", "image/x-icon"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".png", "image/png"),
    (".gif", "image/gif"),
];

/// Content type for a file path, selected by suffix.
pub fn mime_for(path: &str) -> &'static str {
    MIME_TABLE
        .iter()
        .find(|(suffix, _)| path.ends_with(suffix))
        .map(|(_, mime)| *mime)
        .unwrap_or(PLAIN_TEXT_MIME)
}

/// Only text content is ever gzip-compressed.
pub fn is_text_mime(mime: &str) -> bool {
    mime.starts_with(TEXT_MIME_PREFIX)
}

/// A file payload plus the metadata snapshot taken when it was read.
#[derive(Debug, Clone)]
pub struct CachedFile {
    /// Resolved filesystem path the payload was read from.
    pub absolute_path: String,

    /// Modification time at read time; a later mismatch invalidates the
    /// entry.
    pub modified: SystemTime,

    /// File bytes, gzip-encoded when `compressed` is set.
    pub data: Vec<u8>,

    pub compressed: bool,

    /// Set for non-text content; such entries satisfy both compressed and
    /// uncompressed lookups.
    pub ignore_compression: bool,

    pub mime: &'static str,
}

impl Measured for CachedFile {
    fn size(&self) -> usize {
        self.data.len()
    }
}
