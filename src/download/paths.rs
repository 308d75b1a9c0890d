//! Deterministic cache file naming.
//!
//! Files are named from the content id, never from the URL, so a changed URL
//! for the same id lands on the same path.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::catalog::ContentType;

const FILE_PREFIX: &str = "content_";
pub(crate) const PART_SUFFIX: &str = ".part";

/// Make a content id safe to embed in a file name.
///
/// Ids that needed rewriting get a `~` and a short digest of the original id
/// appended, so `a.b` and `a_b` never share a file. `~` never survives in an
/// untouched id, which keeps the two forms apart.
fn sanitize_id(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe == id {
        return safe;
    }
    let digest = Sha256::digest(id.as_bytes());
    let suffix: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    format!("{safe}~{suffix}")
}

/// Name stem shared by every file belonging to `content_id`, including the
/// trailing dot: `content_<id>.`
pub(crate) fn file_stem_prefix(content_id: &str) -> String {
    format!("{FILE_PREFIX}{}.", sanitize_id(content_id))
}

/// Final cache path: `<dir>/content_<id>.<ext>`.
pub fn cache_path(cache_dir: &Path, content_id: &str, extension: &str) -> PathBuf {
    cache_dir.join(format!("{}{}", file_stem_prefix(content_id), extension))
}

/// Temporary path an attempt streams into before verification.
pub(crate) fn part_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Whether `file_name` is a cache file (complete or partial) managed here.
pub(crate) fn is_cache_file(file_name: &str) -> bool {
    file_name.starts_with(FILE_PREFIX)
}

pub(crate) fn is_part_file(file_name: &str) -> bool {
    file_name.ends_with(PART_SUFFIX)
}

/// Pick the file extension for a download.
///
/// Uses the last path segment's extension when it is 1-5 ASCII alphanumerics,
/// otherwise falls back to the content type default.
pub fn infer_extension(url: &str, content_type: ContentType) -> String {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    let segment = path.rsplit('/').next().unwrap_or_default();
    match segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => content_type.default_extension().to_string(),
    }
}
