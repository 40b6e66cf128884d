//! Filesystem storage for proof attachments.
//!
//! The upload collaborator of the story API: it persists raw file bytes
//! under the configured upload directory and hands back an opaque
//! `/uploads/<name>` reference string for the story's proof list.  File
//! names are always generated server-side (UUID plus a sanitized extension),
//! so client-supplied names can never escape the directory.

use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct ProofStore {
    base_dir: PathBuf,
    max_size: usize,
}

impl ProofStore {
    pub async fn new(base_dir: PathBuf, max_size: usize) -> Result<Self, ApiError> {
        fs::create_dir_all(&base_dir).await.map_err(|e| {
            ApiError::Internal(format!(
                "Failed to create upload directory '{}': {}",
                base_dir.display(),
                e
            ))
        })?;

        info!(path = %base_dir.display(), "Proof store initialized");

        Ok(Self { base_dir, max_size })
    }

    /// Persist one uploaded file and return its reference string.
    pub async fn store_proof(&self, original_name: &str, data: &[u8]) -> Result<String, ApiError> {
        if data.is_empty() {
            return Err(ApiError::BadRequest("empty upload".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ApiError::UploadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let file_name = match sanitize_extension(original_name) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };

        let path = self.base_dir.join(&file_name);
        fs::write(&path, data).await.map_err(|e| {
            ApiError::Internal(format!("Failed to write upload {}: {}", file_name, e))
        })?;

        debug!(name = %file_name, size = data.len(), "Stored proof upload");
        Ok(format!("/uploads/{file_name}"))
    }

    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }
}

/// Extract a safe file extension from a client-supplied name: the part after
/// the final dot, lowercased, alphanumeric only, at most 8 characters.
fn sanitize_extension(name: &str) -> Option<String> {
    let ext = name.rsplit('.').next()?;
    if ext.len() == name.len() {
        // No dot at all.
        return None;
    }
    let cleaned: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if cleaned.is_empty() || cleaned.len() > 8 {
        return None;
    }
    Some(cleaned)
}
