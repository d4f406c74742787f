//! Content directory storage
//!
//! Memory-ingested binary content is stored under the data directory,
//! addressed by its content hash so identical bytes are stored once. The
//! metadata store references these files through `content_metadata` rows.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants::MAX_CONTENT_SIZE_BYTES;
use crate::error::{RagError, Result};

/// Outcome of storing a piece of content
#[derive(Debug, Clone)]
pub struct StoredContent {
    pub content_hash: String,
    pub content_path: PathBuf,
    pub file_size: u64,
    /// True when the bytes were already present and nothing was written
    pub deduplicated: bool,
}

/// Hash-addressed file store under a single root directory
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate and store `bytes`, returning its hash-addressed location.
    pub fn store_bytes(
        &self,
        bytes: &[u8],
        display_name: &str,
        content_type: &str,
    ) -> Result<StoredContent> {
        validate_content(display_name, content_type, bytes.len() as u64)?;

        let content_hash = hash_bytes(bytes);
        let dir = self.root.join(&content_hash[..2]);
        let content_path = dir.join(&content_hash);

        if content_path.exists() {
            debug!("content {content_hash} already stored; deduplicated");
            return Ok(StoredContent {
                content_hash,
                content_path,
                file_size: bytes.len() as u64,
                deduplicated: true,
            });
        }

        std::fs::create_dir_all(&dir).map_err(|e| {
            RagError::content_with_hint(
                format!("could not prepare storage for '{display_name}': {e}"),
                "check permissions on the data directory",
            )
        })?;
        std::fs::write(&content_path, bytes).map_err(|e| {
            RagError::content_with_hint(
                format!("could not store '{display_name}': {e}"),
                "free disk space and retry the ingest",
            )
        })?;

        Ok(StoredContent {
            content_hash,
            content_path,
            file_size: bytes.len() as u64,
            deduplicated: false,
        })
    }

    /// Read stored content back by its recorded path.
    pub fn retrieve(&self, content_path: &Path) -> Result<Vec<u8>> {
        std::fs::read(content_path).map_err(|_| {
            RagError::content_with_hint(
                format!("content at {} was not found", content_path.display()),
                "re-ingest the original document to restore it",
            )
        })
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Per-category format validation with distinct recovery hints.
fn validate_content(display_name: &str, content_type: &str, size: u64) -> Result<()> {
    if size == 0 {
        return Err(RagError::content_with_hint(
            format!("'{display_name}' is empty"),
            "provide non-empty content",
        ));
    }
    if size > MAX_CONTENT_SIZE_BYTES {
        return Err(RagError::content_with_hint(
            format!(
                "'{display_name}' is {size} bytes, over the {MAX_CONTENT_SIZE_BYTES} byte limit"
            ),
            "split the document into smaller pieces and ingest those",
        ));
    }

    let lowered = content_type.to_ascii_lowercase();
    if lowered.starts_with("audio/") {
        return Err(RagError::content_with_hint(
            format!("'{display_name}' is audio content, which cannot be indexed"),
            "convert it to a text transcript and ingest that instead",
        ));
    }
    if lowered.starts_with("video/") {
        return Err(RagError::content_with_hint(
            format!("'{display_name}' is video content, which cannot be indexed"),
            "extract still frames or a transcript and ingest those instead",
        ));
    }
    if matches!(
        lowered.as_str(),
        "application/x-executable"
            | "application/x-msdownload"
            | "application/x-sharedlib"
            | "application/x-mach-binary"
    ) {
        return Err(RagError::content_with_hint(
            format!("'{display_name}' is an executable, which cannot be indexed"),
            "ingest the program's documentation or source instead",
        ));
    }
    Ok(())
}
