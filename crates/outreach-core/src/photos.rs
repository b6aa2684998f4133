//! On-disk archive of accepted enrollment photos.
//!
//! Layout: `<root>/<identity_id>/<uuid>.<ext>`. Paths handed out are relative
//! to the root and double as descriptor provenance.

use crate::embedder::FaceImage;
use std::path::{Path, PathBuf};

pub struct PhotoArchive {
    root: PathBuf,
}

impl PhotoArchive {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the original encoded image and return its relative path.
    pub async fn save(&self, identity_id: &str, image: &FaceImage) -> std::io::Result<String> {
        let dir = self.root.join(identity_id);
        tokio::fs::create_dir_all(&dir).await?;

        let name = format!("{}.{}", uuid::Uuid::new_v4(), image.extension());
        tokio::fs::write(dir.join(&name), &image.encoded).await?;

        let relative = format!("{identity_id}/{name}");
        tracing::debug!(path = %relative, bytes = image.encoded.len(), "photo archived");
        Ok(relative)
    }

    /// Best-effort removal of a photo written by [`save`](Self::save).
    pub async fn discard(&self, relative: &str) {
        if let Err(e) = tokio::fs::remove_file(self.root.join(relative)).await {
            tracing::warn!(path = relative, error = %e, "failed to discard archived photo");
        }
    }
}
