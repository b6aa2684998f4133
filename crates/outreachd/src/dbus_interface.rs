use crate::config::Config;
use crate::engine::EngineHandle;
use crate::response::{self, EnrollFailure};
use outreach_core::{
    DescriptorError, DescriptorStore, Embedder, EmbedderError, EnrollError, Enrollment, FaceImage,
    Gallery, ImageError, PhotoArchive, SampleOutcome, SqliteStore, StoreError,
};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use zbus::interface;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Embedder(#[from] EmbedderError),
}

impl From<ServiceError> for zbus::fdo::Error {
    fn from(err: ServiceError) -> Self {
        let msg = err.to_string();
        match err {
            ServiceError::Descriptor(_)
            | ServiceError::Image(_)
            | ServiceError::Store(StoreError::EmptyLabel | StoreError::DuplicateExternalRef(_)) => {
                zbus::fdo::Error::InvalidArgs(msg)
            }
            ServiceError::Store(StoreError::IdentityNotFound(_)) => zbus::fdo::Error::UnknownObject(msg),
            _ => {
                tracing::error!(error = %msg, "request failed");
                zbus::fdo::Error::Failed(msg)
            }
        }
    }
}

/// D-Bus interface for the outreach face gallery.
///
/// Bus name: org.outreach.Gallery1
/// Object path: /org/outreach/Gallery1
pub struct GalleryService {
    store: SqliteStore,
    engine: EngineHandle,
    archive: PhotoArchive,
    threshold: f32,
    detect_timeout: Duration,
    max_image_bytes: usize,
    min_usable_samples: usize,
}

impl GalleryService {
    pub fn new(store: SqliteStore, engine: EngineHandle, config: &Config) -> Self {
        Self {
            store,
            engine,
            archive: PhotoArchive::new(config.photo_dir.clone()),
            threshold: config.match_threshold,
            detect_timeout: config.detect_timeout,
            max_image_bytes: config.max_image_bytes,
            min_usable_samples: config.min_usable_samples,
        }
    }

    async fn do_identify(&self, descriptor: &[f64]) -> Result<Value, ServiceError> {
        // Validate before touching the store.
        let query = outreach_core::Descriptor::from_f64(descriptor)?;
        let gallery = Gallery::build(&self.store).await?;
        let result = outreach_core::identify(query.values(), &gallery, self.threshold)?;
        Ok(response::identify(&result))
    }

    async fn do_identify_image(&self, image: Vec<u8>) -> Result<Value, ServiceError> {
        let image = FaceImage::decode(image, self.max_image_bytes)?;
        let descriptor = match tokio::time::timeout(self.detect_timeout, self.engine.detect(&image)).await {
            Ok(found) => found?,
            Err(_) => {
                tracing::warn!(timeout = ?self.detect_timeout, "identify_image: detection timed out");
                None
            }
        };
        let Some(descriptor) = descriptor else {
            return Ok(response::no_face());
        };
        let gallery = Gallery::build(&self.store).await?;
        let result = outreach_core::identify(descriptor.values(), &gallery, self.threshold)?;
        Ok(response::identify(&result))
    }

    async fn do_enroll(&self, identity_ref: &str, image: Vec<u8>) -> Result<Value, ServiceError> {
        let identity = match self.store.resolve_identity(identity_ref).await {
            Ok(id) => id,
            Err(e @ StoreError::IdentityNotFound(_)) => {
                return Ok(response::enroll_rejected(EnrollFailure::IdentityNotFound, e));
            }
            Err(e) => return Err(e.into()),
        };

        let image = match FaceImage::decode(image, self.max_image_bytes) {
            Ok(img) => img,
            Err(e) => return Ok(response::enroll_rejected(response::image_failure(&e), e)),
        };

        let report = match Enrollment::new(&self.engine, &self.store, self.detect_timeout)
            .with_archive(&self.archive)
            .enroll(&identity, std::slice::from_ref(&image))
            .await
        {
            Ok(report) => report,
            Err(e) => match response::enroll_failure(&e) {
                Some(kind) => return Ok(response::enroll_rejected(kind, e)),
                None => return Err(e.into()),
            },
        };

        match report.samples.into_iter().next() {
            Some(SampleOutcome::Accepted {
                descriptor_id,
                provenance,
            }) => Ok(response::enroll_ok(&identity, &descriptor_id, provenance.as_deref())),
            Some(SampleOutcome::Rejected { reason, detail }) => {
                let (kind, message) = response::rejection(reason);
                Ok(response::enroll_rejected(kind, detail.as_deref().unwrap_or(message)))
            }
            None => Err(EmbedderError::Unavailable.into()),
        }
    }

    /// Enroll every upload; bad images are reported per sample and never
    /// abort the rest of the batch.
    async fn do_enroll_batch(&self, identity_ref: &str, images: Vec<Vec<u8>>) -> Result<Value, ServiceError> {
        let identity = match self.store.resolve_identity(identity_ref).await {
            Ok(id) => id,
            Err(e @ StoreError::IdentityNotFound(_)) => {
                return Ok(response::enroll_rejected(EnrollFailure::IdentityNotFound, e));
            }
            Err(e) => return Err(e.into()),
        };

        let report = match Enrollment::new(&self.engine, &self.store, self.detect_timeout)
            .with_archive(&self.archive)
            .enroll_uploads(&identity, images, self.max_image_bytes)
            .await
        {
            Ok(report) => report,
            Err(e) => match response::enroll_failure(&e) {
                Some(kind) => return Ok(response::enroll_rejected(kind, e)),
                None => return Err(e.into()),
            },
        };
        Ok(response::enroll_report(&identity, &report))
    }

    async fn do_list_gallery(&self) -> Result<Value, ServiceError> {
        let gallery = Gallery::build(&self.store).await?;
        Ok(serde_json::json!(gallery.summary(self.min_usable_samples)))
    }

    async fn do_list_descriptors(&self, identity_ref: &str) -> Result<Value, ServiceError> {
        let identity = self.store.resolve_identity(identity_ref).await?;
        let descriptors = self.store.list_descriptors(&identity).await?;
        Ok(serde_json::json!(descriptors))
    }

    async fn do_create_identity(&self, label: &str, external_ref: &str) -> Result<Value, ServiceError> {
        let external_ref = Some(external_ref.trim()).filter(|r| !r.is_empty());
        let identity = self.store.create_identity(label, external_ref).await?;
        Ok(serde_json::json!(identity))
    }

    async fn do_status(&self) -> Result<Value, ServiceError> {
        let gallery = Gallery::build(&self.store).await?;
        Ok(serde_json::json!(response::Status {
            version: env!("CARGO_PKG_VERSION"),
            enrolled: gallery.len(),
            descriptors: gallery.sample_count(),
            threshold: self.threshold,
            min_usable_samples: self.min_usable_samples,
        }))
    }
}

#[interface(name = "org.outreach.Gallery1")]
impl GalleryService {
    /// Match a 128-element descriptor against the current gallery.
    async fn identify(&self, descriptor: Vec<f64>) -> zbus::fdo::Result<String> {
        tracing::info!(len = descriptor.len(), "identify requested");
        Ok(self.do_identify(&descriptor).await?.to_string())
    }

    /// Extract a descriptor from an image, then identify it.
    async fn identify_image(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "identify_image requested");
        Ok(self.do_identify_image(image).await?.to_string())
    }

    /// Enroll one image for an identity (id or external reference).
    async fn enroll(&self, identity: &str, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(identity, bytes = image.len(), "enroll requested");
        Ok(self.do_enroll(identity, image).await?.to_string())
    }

    /// Enroll several images for one identity and return the per-sample report.
    async fn enroll_batch(&self, identity: &str, images: Vec<Vec<u8>>) -> zbus::fdo::Result<String> {
        tracing::info!(identity, count = images.len(), "enroll_batch requested");
        Ok(self.do_enroll_batch(identity, images).await?.to_string())
    }

    /// Enrolled identities with their sample counts.
    async fn list_gallery(&self) -> zbus::fdo::Result<String> {
        tracing::info!("list_gallery requested");
        Ok(self.do_list_gallery().await?.to_string())
    }

    async fn list_descriptors(&self, identity: &str) -> zbus::fdo::Result<String> {
        tracing::info!(identity, "list_descriptors requested");
        Ok(self.do_list_descriptors(identity).await?.to_string())
    }

    /// Register an identity. An empty `external_ref` means none.
    async fn create_identity(&self, label: &str, external_ref: &str) -> zbus::fdo::Result<String> {
        tracing::info!(label, external_ref, "create_identity requested");
        Ok(self.do_create_identity(label, external_ref).await?.to_string())
    }

    /// Remove a descriptor. Returns whether it existed; unknown ids are not an error.
    async fn remove_descriptor(&self, descriptor_id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(descriptor_id, "remove_descriptor requested");
        Ok(self
            .store
            .remove_descriptor(descriptor_id)
            .await
            .map_err(ServiceError::from)?)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.do_status().await?.to_string())
    }
}
