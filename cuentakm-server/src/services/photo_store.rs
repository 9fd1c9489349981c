//! Photo lifecycle manager
//!
//! Photos are evidence for the administrative emails and are kept only
//! until the week closes. References are paths relative to the media root,
//! under the `lecturas/` upload namespace; each upload gets a fresh UUID
//! name so concurrent uploads never share a file.
//!
//! Deletion is tolerant: a missing blob or an already-cleared reference is
//! success, and I/O faults are logged rather than returned. The record's
//! reference is cleared whether or not the blob removal worked.

use cuentakm_common::db::Reading;
use cuentakm_common::{Error, Result};
use sqlx::SqlitePool;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::db::readings;

/// Upload namespace under the media root
pub const UPLOAD_NAMESPACE: &str = "lecturas";

#[derive(Debug, Clone)]
pub struct PhotoStore {
    root: PathBuf,
}

impl PhotoStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Persist an uploaded photo and return its reference
    pub async fn store(&self, bytes: &[u8]) -> Result<String> {
        let extension = infer::get(bytes).map(|t| t.extension()).unwrap_or("jpg");
        let reference = format!("{}/{}.{}", UPLOAD_NAMESPACE, Uuid::new_v4(), extension);
        let path = self.root.join(&reference);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        debug!(reference = %reference, bytes = bytes.len(), "Stored photo");
        Ok(reference)
    }

    /// Absolute path for a reference; `None` if it escapes the media root
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let relative = Path::new(reference);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if reference.is_empty() || !contained {
            return None;
        }
        Some(self.root.join(relative))
    }

    pub async fn read(&self, reference: &str) -> Result<Vec<u8>> {
        let path = self
            .resolve(reference)
            .ok_or_else(|| Error::InvalidInput(format!("Invalid photo reference: {}", reference)))?;
        Ok(tokio::fs::read(path).await?)
    }

    pub async fn exists(&self, reference: &str) -> bool {
        match self.resolve(reference) {
            Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            None => false,
        }
    }

    /// Remove a blob; true if it is gone afterwards
    pub async fn remove_blob(&self, reference: &str) -> bool {
        let Some(path) = self.resolve(reference) else {
            warn!(reference = %reference, "Refusing to delete photo outside media root");
            return false;
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(reference = %reference, "Deleted photo");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                error!(reference = %reference, error = %e, "Error deleting photo");
                false
            }
        }
    }

    /// Delete a reading's photo and clear its reference
    ///
    /// Idempotent; never fails.
    pub async fn discard(&self, pool: &SqlitePool, reading: &mut Reading) {
        let Some(reference) = reading.photo_ref.take() else {
            return;
        };

        self.remove_blob(&reference).await;

        if let Err(e) = readings::clear_photo(pool, reading.id).await {
            error!(
                reading_id = reading.id,
                error = %e,
                "Error clearing photo reference"
            );
        }
    }
}
