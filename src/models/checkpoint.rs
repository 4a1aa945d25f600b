//! Checkpoint fetcher.
//!
//! Downloads the fine-tuned weights file from remote object storage to a
//! well-known local path. A file already present at that path is trusted as
//! is; downloads land in a temporary sibling and are renamed into place only
//! once complete (and verified, if a digest is configured).

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{Result, ServiceError};

/// Default object storage endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Default number of retries after a failed download.
pub const DEFAULT_FETCH_RETRIES: u32 = 3;

/// Base delay between download attempts, doubled on each retry.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Remote location of a checkpoint blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSource {
    /// Base URL of the object store.
    pub endpoint: String,
    /// Bucket name.
    pub bucket: String,
    /// Object path inside the bucket.
    pub blob: String,
    /// Expected lowercase hex SHA-256 of the blob, if known.
    pub sha256: Option<String>,
}

impl CheckpointSource {
    /// Creates a source on the default endpoint with no digest.
    pub fn new(bucket: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            bucket: bucket.into(),
            blob: blob.into(),
            sha256: None,
        }
    }

    /// Returns the download URL.
    pub fn url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.bucket,
            self.blob.trim_start_matches('/')
        )
    }

    /// Returns the file name used for the local copy: the blob's basename.
    pub fn local_file_name(&self) -> String {
        Path::new(&self.blob)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoint.bin".to_string())
    }

    /// Validates the source, returning an error message if invalid.
    pub fn validate(&self) -> Option<String> {
        if self.bucket.trim().is_empty() {
            return Some("Checkpoint bucket cannot be empty".to_string());
        }
        if self.blob.trim().is_empty() || self.blob.ends_with('/') {
            return Some(format!("Checkpoint blob '{}' does not name a file", self.blob));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Some(format!("Checkpoint endpoint '{}' is not an HTTP URL", self.endpoint));
        }
        if let Some(digest) = &self.sha256 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Some(format!("Checkpoint sha256 '{}' is not 64 hex digits", digest));
            }
        }
        None
    }
}

impl std::fmt::Display for CheckpointSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.blob)
    }
}

/// Remote object storage.
pub trait RemoteStore: Send + Sync {
    /// Downloads `source` to `dest`, returning the number of bytes written.
    fn download(&self, source: &CheckpointSource, dest: &Path) -> Result<u64>;
}

/// Object store reached over plain HTTP(S) GETs.
pub struct HttpObjectStore {
    client: reqwest::blocking::Client,
}

impl HttpObjectStore {
    /// Creates a store with a long timeout suitable for large checkpoints.
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(3600))
            .build()
            .map_err(|e| {
                ServiceError::checkpoint_fetch_failed(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }
}

impl RemoteStore for HttpObjectStore {
    fn download(&self, source: &CheckpointSource, dest: &Path) -> Result<u64> {
        let url = source.url();
        let mut response = self
            .client
            .get(&url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| ServiceError::checkpoint_fetch_failed(format!("GET {}: {}", url, e)))?;

        let expected = response.content_length();
        let file = fs::File::create(dest).map_err(|e| {
            ServiceError::checkpoint_fetch_failed(format!("Cannot create {}: {}", dest.display(), e))
        })?;

        let mut writer = ProgressWriter::new(io::BufWriter::new(file), source, expected);
        io::copy(&mut response, &mut writer).map_err(|e| {
            ServiceError::checkpoint_fetch_failed(format!(
                "{} stopped after {} bytes: {}",
                source, writer.written, e
            ))
        })?;
        let written = writer.finish().map_err(|e| {
            ServiceError::checkpoint_fetch_failed(format!("Cannot flush {}: {}", dest.display(), e))
        })?;

        match expected {
            Some(expected) if written != expected => Err(ServiceError::checkpoint_fetch_failed(
                format!("{} is truncated: {} of {} bytes", source, written, expected),
            )),
            _ => Ok(written),
        }
    }
}

/// Counts bytes written for one checkpoint and logs each completed quarter.
struct ProgressWriter<'a, W> {
    inner: W,
    source: &'a CheckpointSource,
    total: Option<u64>,
    written: u64,
    reported_quarters: u64,
}

impl<'a, W: Write> ProgressWriter<'a, W> {
    fn new(inner: W, source: &'a CheckpointSource, total: Option<u64>) -> Self {
        Self {
            inner,
            source,
            total: total.filter(|&total| total > 0),
            written: 0,
            reported_quarters: 0,
        }
    }

    fn quarters_done(&self) -> u64 {
        self.total
            .map(|total| self.written.min(total) * 4 / total)
            .unwrap_or(0)
    }

    /// Flushes the inner writer and returns the byte count.
    fn finish(mut self) -> io::Result<u64> {
        self.inner.flush()?;
        Ok(self.written)
    }
}

impl<W: Write> Write for ProgressWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;

        let quarters = self.quarters_done();
        if quarters > self.reported_quarters {
            self.reported_quarters = quarters;
            info!(
                source = %self.source,
                percent = quarters * 25,
                bytes = self.written,
                "checkpoint download progress"
            );
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Ensures a checkpoint is present locally, fetching it on demand.
#[derive(Clone)]
pub struct CheckpointFetcher {
    store: Arc<dyn RemoteStore>,
    retries: u32,
    backoff: Duration,
}

impl CheckpointFetcher {
    /// Creates a fetcher with the default backoff.
    pub fn new(store: Arc<dyn RemoteStore>, retries: u32) -> Self {
        Self {
            store,
            retries,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Overrides the base backoff delay.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns `local_path`, downloading `source` to it first if it is missing.
    ///
    /// Presence of the file counts as validity; no digest is checked for an
    /// existing copy.
    pub fn ensure_local(&self, source: &CheckpointSource, local_path: &Path) -> Result<PathBuf> {
        if local_path.exists() {
            return Ok(local_path.to_path_buf());
        }

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ServiceError::checkpoint_fetch_failed(format!(
                    "Failed to create checkpoint directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        info!(source = %source, path = %local_path.display(), "fetching checkpoint");

        let mut attempt = 0;
        loop {
            match self.fetch_once(source, local_path) {
                Ok(bytes) => {
                    info!(bytes, path = %local_path.display(), "checkpoint stored");
                    return Ok(local_path.to_path_buf());
                }
                Err(e) if attempt < self.retries => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt);
                    warn!(attempt = attempt + 1, error = %e, ?delay, "checkpoint fetch failed, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fetch_once(&self, source: &CheckpointSource, local_path: &Path) -> Result<u64> {
        let part = part_path(local_path);
        let result = self
            .store
            .download(source, &part)
            .and_then(|bytes| {
                if let Some(expected) = &source.sha256 {
                    verify_sha256(&part, expected)?;
                }
                Ok(bytes)
            })
            .and_then(|bytes| {
                fs::rename(&part, local_path).map_err(|e| {
                    ServiceError::checkpoint_fetch_failed(format!(
                        "Failed to move checkpoint into place: {}",
                        e
                    ))
                })?;
                Ok(bytes)
            });

        if result.is_err() {
            let _ = fs::remove_file(&part);
        }
        result
    }
}

/// Unique temporary sibling of `path`.
fn part_path(path: &Path) -> PathBuf {
    let suffix: [u8; 4] = rand::thread_rng().gen();
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.part-{}", name, hex::encode(suffix)))
}

/// Computes the lowercase hex SHA-256 of a file.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| {
        ServiceError::checkpoint_fetch_failed(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| {
        ServiceError::checkpoint_fetch_failed(format!("Failed to read {}: {}", path.display(), e))
    })?;
    Ok(hex::encode(hasher.finalize()))
}

fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = file_sha256(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ServiceError::checkpoint_fetch_failed(format!(
            "Checksum mismatch: expected {}, got {}",
            expected, actual
        )))
    }
}
