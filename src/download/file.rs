use std::path::Path;

use base64::Engine;
use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::DownloadError;

/// Size heuristics a finished transfer must pass.
#[derive(Debug, Clone, Copy)]
pub struct Verification {
    /// Anything smaller is treated as an error page or truncated body.
    pub min_valid_bytes: u64,
    /// Fraction of the expected size a file must reach.
    pub min_size_ratio: f64,
}

impl Default for Verification {
    fn default() -> Self {
        Self {
            min_valid_bytes: 1024,
            min_size_ratio: 0.9,
        }
    }
}

impl Verification {
    /// Whether `size` is a plausible complete file given `expected`.
    pub fn accepts(&self, size: u64, expected: Option<u64>) -> bool {
        if size < self.min_valid_bytes {
            return false;
        }
        match expected.filter(|&e| e > 0) {
            Some(expected) => size as f64 >= expected as f64 * self.min_size_ratio,
            None => true,
        }
    }

    /// Size of `path` when it holds a plausible complete copy.
    pub fn verified_size(&self, path: &Path, expected: Option<u64>) -> Option<u64> {
        let meta = std::fs::metadata(path).ok()?;
        (meta.is_file() && self.accepts(meta.len(), expected)).then_some(meta.len())
    }
}

/// What the caller knows about the file before fetching it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Expectation {
    pub size: Option<u64>,
    /// Decoded SHA-256 digest.
    pub checksum: Option<Sha256Digest>,
}

pub(crate) type Sha256Digest = [u8; 32];

/// Decode a hex or base64 SHA-256 digest. Anything else is `None`.
pub(crate) fn parse_checksum(encoded: &str) -> Option<Sha256Digest> {
    let encoded = encoded.trim();
    if encoded.len() == 64 && encoded.chars().all(|c| c.is_ascii_hexdigit()) {
        let mut digest = [0u8; 32];
        for (byte, pair) in digest.iter_mut().zip(encoded.as_bytes().chunks(2)) {
            let pair = std::str::from_utf8(pair).ok()?;
            *byte = u8::from_str_radix(pair, 16).ok()?;
        }
        return Some(digest);
    }
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()
        .and_then(|decoded| decoded.try_into().ok())
}

/// Single download attempt into `<final_path>.part`, verified then renamed.
///
/// Any existing partial file is discarded first so every attempt starts from
/// scratch. `on_chunk` receives the running byte count and the expected total
/// (declared size, else the transfer's content length). Returns the final
/// file size.
pub(crate) async fn attempt_download(
    client: &Client,
    url: &str,
    final_path: &Path,
    expectation: Expectation,
    verify: &Verification,
    mut on_chunk: impl FnMut(u64, Option<u64>),
) -> Result<u64, DownloadError> {
    let part_path = super::paths::part_path(final_path);
    let _ = fs::remove_file(&part_path).await;

    let response = client.get(url).send().await.map_err(|e| DownloadError::Http {
        source: e,
        url: url.to_string(),
        bytes_written: 0,
    })?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let total = expectation
        .size
        .filter(|&s| s > 0)
        .or(response.content_length());

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&part_path)
        .await?;

    // Hash while streaming so large videos are never buffered in memory.
    let mut hasher = expectation.checksum.map(|_| Sha256::new());
    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&part_path).await;
                return Err(DownloadError::Http {
                    source: e,
                    url: url.to_string(),
                    bytes_written,
                });
            }
        };
        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&chunk);
        }
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
        on_chunk(bytes_written, total);
    }
    file.flush().await?;
    drop(file);

    if !verify.accepts(bytes_written, total) {
        let _ = fs::remove_file(&part_path).await;
        return Err(DownloadError::Integrity {
            written: bytes_written,
            expected: total,
        });
    }

    if let (Some(expected), Some(hasher)) = (expectation.checksum, hasher) {
        if hasher.finalize()[..] != expected[..] {
            let _ = fs::remove_file(&part_path).await;
            return Err(DownloadError::ChecksumMismatch {
                url: url.to_string(),
            });
        }
    }

    fs::rename(&part_path, final_path).await?;
    Ok(bytes_written)
}
