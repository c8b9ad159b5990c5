//! Represents an object (blob) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fallback MIME type when nothing better is known.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Sidecar descriptor for a single object within a bucket.
///
/// The struct stores metadata only, never the payload bytes. Field names are
/// the on-disk JSON names, so existing stores stay readable.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Payload length in bytes, measured during the write.
    pub size: u64,

    /// MIME type, caller-supplied or inferred from the key.
    pub content_type: String,

    /// Lowercase hex MD5 of the payload.
    pub etag: String,

    /// Timestamp of the most recent successful write.
    pub last_modified: DateTime<Utc>,
}

/// Guess a MIME type from the extension of a key or local filename.
pub fn content_type_for(name: &str) -> &'static str {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return DEFAULT_CONTENT_TYPE;
    };

    match ext.to_ascii_lowercase().as_str() {
        "txt" => "text/plain",
        "md" => "text/markdown",
        "html" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
