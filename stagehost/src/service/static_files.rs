//! Static file serving with a byte-bounded cache.

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::DocRootConfig;

/// Content type for a file name.
#[must_use]
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" | "log" => "text/plain; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "tif" | "tiff" => "image/tiff",
        "pdf" => "application/pdf",
        "gz" | "tgz" => "application/gzip",
        "zip" => "application/zip",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Joins a URL path onto `root`, refusing anything that leaves it.
///
/// An empty path or one ending in `/` maps to `index.html`.
#[must_use]
pub fn resolve(root: &Path, url_path: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for segment in url_path.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment.contains('\\') || segment.contains(':') {
            return None;
        }
        match Path::new(segment).components().next() {
            Some(Component::Normal(_)) => relative.push(segment),
            _ => return None,
        }
    }
    if url_path.is_empty() || url_path.ends_with('/') {
        relative.push("index.html");
    }
    let candidate = root.join(relative);

    // symlinks may still point outside
    let canonical_root = root.canonicalize().ok()?;
    let canonical = candidate.canonicalize().ok()?;
    canonical.starts_with(&canonical_root).then_some(canonical)
}

/// A file loaded from disk.
#[derive(Debug, Clone)]
pub struct StaticFile {
    /// File contents.
    pub bytes: Bytes,
    /// Strong validator.
    pub etag: String,
    /// Response content type.
    pub content_type: &'static str,
}

impl StaticFile {
    fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = Bytes::from(std::fs::read(path)?);
        let etag = format!("\"{}\"", hex::encode(Sha256::digest(&bytes)));
        Ok(Self {
            bytes,
            etag,
            content_type: content_type(path),
        })
    }

    /// Builds the response, answering `304` when `If-None-Match` matches.
    #[must_use]
    pub fn into_response_for(self, request_headers: &HeaderMap) -> Response {
        let not_modified = request_headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|tags| tags.split(',').any(|t| t.trim() == self.etag || t.trim() == "*"));

        let mut headers = HeaderMap::new();
        if let Ok(etag) = HeaderValue::from_str(&self.etag) {
            headers.insert(header::ETAG, etag);
        }
        if not_modified {
            return (StatusCode::NOT_MODIFIED, headers).into_response();
        }
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        (StatusCode::OK, headers, self.bytes).into_response()
    }
}

#[derive(Debug)]
struct CacheEntry {
    file: StaticFile,
    loaded: Instant,
}

#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<PathBuf, CacheEntry>,
    total: usize,
}

impl Cache {
    fn remove(&mut self, path: &Path) {
        if let Some(old) = self.entries.remove(path) {
            self.total -= old.file.bytes.len();
        }
    }

    fn insert(&mut self, path: PathBuf, file: StaticFile, capacity: usize) {
        self.remove(&path);
        let size = file.bytes.len();
        while self.total + size > capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.loaded)
                .map(|(p, _)| p.clone());
            match oldest {
                Some(p) => self.remove(&p),
                None => break,
            }
        }
        self.total += size;
        self.entries.insert(
            path,
            CacheEntry {
                file,
                loaded: Instant::now(),
            },
        );
    }
}

/// Serves files below a document root.
///
/// Files up to `max_cached_file_size` bytes are kept in memory until
/// `cache_time` has passed; the cache never holds more than `cache_size`
/// bytes in total.
pub struct StaticFiles {
    root: Option<PathBuf>,
    cache_size: usize,
    max_cached_file_size: usize,
    cache_time: Duration,
    cache: Mutex<Cache>,
}

impl StaticFiles {
    /// Creates the server from settings.
    #[must_use]
    pub fn new(config: &DocRootConfig) -> Self {
        Self {
            root: config.path.clone(),
            cache_size: config.cache_size,
            max_cached_file_size: config.max_cached_file_size.min(config.cache_size),
            cache_time: config.cache_time(),
            cache: Mutex::new(Cache::default()),
        }
    }

    /// The document root, if any.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Loads `url_path` from the document root.
    pub fn get(&self, url_path: &str) -> Option<StaticFile> {
        let root = self.root.as_ref()?;
        let path = resolve(root, url_path)?;
        if !path.is_file() {
            return None;
        }

        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.entries.get(&path) {
                if entry.loaded.elapsed() <= self.cache_time {
                    return Some(entry.file.clone());
                }
            }
        }

        let file = match StaticFile::read(&path) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), "Failed to read static file: {e}");
                return None;
            }
        };
        let mut cache = self.cache.lock();
        if file.bytes.len() <= self.max_cached_file_size {
            debug!(path = %path.display(), bytes = file.bytes.len(), "Caching static file");
            cache.insert(path, file.clone(), self.cache_size);
        } else {
            cache.remove(&path);
        }
        Some(file)
    }

    /// Loads a file below `dir` without caching.
    pub fn get_uncached(dir: &Path, url_path: &str) -> Option<StaticFile> {
        let path = resolve(dir, url_path)?;
        if !path.is_file() {
            return None;
        }
        StaticFile::read(&path).ok()
    }

    /// Bytes currently cached.
    #[must_use]
    pub fn cached_bytes(&self) -> usize {
        self.cache.lock().total
    }

    /// Number of cached files.
    #[must_use]
    pub fn cached_files(&self) -> usize {
        self.cache.lock().entries.len()
    }
}

impl fmt::Debug for StaticFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticFiles")
            .field("root", &self.root)
            .field("cached_files", &self.cached_files())
            .field("cached_bytes", &self.cached_bytes())
            .finish()
    }
}
