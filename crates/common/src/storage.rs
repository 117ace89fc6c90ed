//! Blob store abstraction for attachment bytes and derived image renditions.
//!
//! The store is keyed by two roots (`attachments_root`, `images_root`); all
//! resolved paths must stay under their root. Callers never build a
//! `PathBuf` themselves — every path is assembled from validated segments
//! so a `../`-laced slug or filename can't escape the root.

use std::path::{Path, PathBuf};

use crate::{AppError, AppResult};

/// Space-level attachments (not bound to any note) live under this segment.
pub const SPACE_SCOPE: &str = "__space__";

/// Local-filesystem blob store rooted at `attachments_root`/`images_root`.
#[derive(Debug, Clone)]
pub struct BlobStore {
    attachments_root: PathBuf,
    images_root: PathBuf,
}

impl BlobStore {
    /// Create a new blob store over the given roots.
    #[must_use]
    pub fn new(attachments_root: impl Into<PathBuf>, images_root: impl Into<PathBuf>) -> Self {
        Self {
            attachments_root: attachments_root.into(),
            images_root: images_root.into(),
        }
    }

    /// Path of a not-yet-bound pending attachment.
    pub fn pending_path(&self, number: i64) -> AppResult<PathBuf> {
        safe_join(&self.attachments_root, &["pending", &number.to_string()])
    }

    /// Path of an attachment bound to a specific note.
    pub fn note_attachment_path(
        &self,
        space_slug: &str,
        note_number: i64,
        number: i64,
    ) -> AppResult<PathBuf> {
        safe_join(
            &self.attachments_root,
            &[space_slug, &note_number.to_string(), &number.to_string()],
        )
    }

    /// Path of an attachment bound to a space but no specific note.
    pub fn space_attachment_path(&self, space_slug: &str, number: i64) -> AppResult<PathBuf> {
        safe_join(
            &self.attachments_root,
            &[space_slug, SPACE_SCOPE, &number.to_string()],
        )
    }

    /// Path of the derived WebP rendition of a note-bound attachment.
    pub fn rendition_path(
        &self,
        space_slug: &str,
        note_number: i64,
        attachment_number: i64,
    ) -> AppResult<PathBuf> {
        safe_join(
            &self.images_root,
            &[
                space_slug,
                &note_number.to_string(),
                &attachment_number.to_string(),
            ],
        )
    }

    /// Read a blob fully into memory.
    pub async fn read(&self, path: &Path) -> AppResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| AppError::Internal(format!("failed to read blob: {e}")))
    }

    /// Write a blob, creating parent directories as needed.
    pub async fn write(&self, path: &Path, data: &[u8]) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Internal(format!("failed to create directory: {e}")))?;
        }
        tokio::fs::write(path, data)
            .await
            .map_err(|e| AppError::Internal(format!("failed to write blob: {e}")))
    }

    /// Move a blob from one path to another, creating the destination's
    /// parent directory as needed. Used for pending→bound promotion.
    pub async fn rename(&self, from: &Path, to: &Path) -> AppResult<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Internal(format!("failed to create directory: {e}")))?;
        }
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| AppError::Internal(format!("failed to move blob: {e}")))
    }

    /// Delete a blob if it exists.
    pub async fn delete(&self, path: &Path) -> AppResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Internal(format!("failed to delete blob: {e}"))),
        }
    }

    /// Delete a whole space's attachment tree (cascade on space delete).
    pub async fn delete_space_tree(&self, space_slug: &str) -> AppResult<()> {
        let dir = safe_join(&self.attachments_root, &[space_slug])?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Internal(format!(
                "failed to delete space attachment tree: {e}"
            ))),
        }?;
        let images_dir = safe_join(&self.images_root, &[space_slug])?;
        match tokio::fs::remove_dir_all(&images_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Internal(format!(
                "failed to delete space image tree: {e}"
            ))),
        }
    }

    /// Check whether a blob exists.
    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }
}

/// Join `root` with `segments`, rejecting any segment that could escape the
/// root (`..`, `.`, empty, or containing a path separator) and verifying
/// the lexically-normalized result is still prefixed by `root`. This does
/// not require the path to exist, since blobs are frequently written for
/// the first time.
fn safe_join(root: &Path, segments: &[&str]) -> AppResult<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in segments {
        if segment.is_empty()
            || *segment == "."
            || *segment == ".."
            || segment.contains('/')
            || segment.contains('\\')
        {
            return Err(AppError::ValidationFailure(format!(
                "invalid path segment: {segment}"
            )));
        }
        path.push(segment);
    }

    let normalized_root = normalize(root);
    let normalized_path = normalize(&path);
    if !normalized_path.starts_with(&normalized_root) {
        return Err(AppError::ValidationFailure(
            "resolved path escapes storage root".to_string(),
        ));
    }
    Ok(path)
}

/// Lexical path normalization (no filesystem access, so it works for paths
/// that don't exist yet).
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> BlobStore {
        BlobStore::new("/data/attachments", "/data/images")
    }

    #[test]
    fn pending_path_is_under_root() {
        let store = store();
        let path = store.pending_path(7).unwrap();
        assert_eq!(path, PathBuf::from("/data/attachments/pending/7"));
    }

    #[test]
    fn note_attachment_path_layout() {
        let store = store();
        let path = store.note_attachment_path("blog", 3, 9).unwrap();
        assert_eq!(path, PathBuf::from("/data/attachments/blog/3/9"));
    }

    #[test]
    fn space_attachment_path_uses_space_scope_marker() {
        let store = store();
        let path = store.space_attachment_path("blog", 9).unwrap();
        assert_eq!(path, PathBuf::from("/data/attachments/blog/__space__/9"));
    }

    #[test]
    fn rejects_parent_dir_traversal_in_space_slug() {
        let store = store();
        assert!(store.space_attachment_path("../../etc", 1).is_err());
    }

    #[test]
    fn rejects_embedded_separator_in_segment() {
        let store = store();
        assert!(store.space_attachment_path("blog/evil", 1).is_err());
    }
}
