//! Enrollment workflow: captured images → validated descriptors → store.

use crate::embedder::{Embedder, EmbedderError, FaceImage, ImageError};
use crate::photos::PhotoArchive;
use crate::store::{DescriptorStore, StoreError};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Recommended samples per identity before it is considered robust.
/// Advisory only: the matcher accepts identities with a single sample.
pub const RECOMMENDED_MIN_SAMPLES: usize = 2;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("photo archive: {0}")]
    Archive(#[from] std::io::Error),
}

/// Why a sample was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    NoFace,
    Timeout,
    EmbedderError,
    InvalidDescriptor,
    /// Upload was too large, not PNG/JPEG, or undecodable.
    InvalidImage,
}

/// Outcome of one image in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SampleOutcome {
    Accepted {
        descriptor_id: String,
        provenance: Option<String>,
    },
    Rejected {
        reason: Rejection,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl SampleOutcome {
    fn rejected(reason: Rejection, detail: Option<String>) -> Self {
        SampleOutcome::Rejected { reason, detail }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrollReport {
    pub accepted: usize,
    pub rejected: usize,
    /// One entry per input image, in input order.
    pub samples: Vec<SampleOutcome>,
}

/// Drives one enrollment batch.
///
/// Bad samples are counted and skipped; only an unknown identity or a
/// storage failure aborts the batch.
pub struct Enrollment<'a, E, S> {
    embedder: &'a E,
    store: &'a S,
    archive: Option<&'a PhotoArchive>,
    detect_timeout: Duration,
}

impl<'a, E: Embedder, S: DescriptorStore> Enrollment<'a, E, S> {
    pub fn new(embedder: &'a E, store: &'a S, detect_timeout: Duration) -> Self {
        Self {
            embedder,
            store,
            archive: None,
            detect_timeout,
        }
    }

    /// Archive accepted images and record their path as provenance.
    pub fn with_archive(mut self, archive: &'a PhotoArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub async fn enroll(
        &self,
        identity_id: &str,
        images: &[FaceImage],
    ) -> Result<EnrollReport, EnrollError> {
        let mut report = EnrollReport::default();
        for image in images {
            let outcome = self.sample(identity_id, image).await?;
            report.push(identity_id, outcome);
        }
        report.finish(identity_id);
        Ok(report)
    }

    /// Like [`enroll`](Self::enroll), but takes encoded uploads. Images that
    /// fail validation are rejected in place instead of failing the batch.
    pub async fn enroll_uploads(
        &self,
        identity_id: &str,
        uploads: Vec<Vec<u8>>,
        max_image_bytes: usize,
    ) -> Result<EnrollReport, EnrollError> {
        let mut report = EnrollReport::default();
        for bytes in uploads {
            let outcome = match FaceImage::decode(bytes, max_image_bytes) {
                Ok(image) => self.sample(identity_id, &image).await?,
                Err(e) => invalid_image(&e),
            };
            report.push(identity_id, outcome);
        }
        report.finish(identity_id);
        Ok(report)
    }

    /// Process one image. An `Err` aborts the batch; rejections are outcomes.
    async fn sample(
        &self,
        identity_id: &str,
        image: &FaceImage,
    ) -> Result<SampleOutcome, EnrollError> {
        let descriptor = match tokio::time::timeout(self.detect_timeout, self.embedder.detect(image)).await {
            Err(_) => return Ok(SampleOutcome::rejected(Rejection::Timeout, None)),
            Ok(Ok(None)) => return Ok(SampleOutcome::rejected(Rejection::NoFace, None)),
            Ok(Ok(Some(d))) => d,
            Ok(Err(EmbedderError::InvalidDescriptor(e))) => {
                tracing::warn!(error = %e, "embedder returned invalid descriptor");
                return Ok(SampleOutcome::rejected(
                    Rejection::InvalidDescriptor,
                    Some(e.to_string()),
                ));
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "embedder failed on sample");
                return Ok(SampleOutcome::rejected(Rejection::EmbedderError, Some(e.to_string())));
            }
        };

        let provenance = match self.archive {
            Some(archive) => Some(archive.save(identity_id, image).await?),
            None => None,
        };

        match self
            .store
            .add_descriptor(identity_id, &descriptor, provenance.as_deref())
            .await
        {
            Ok(descriptor_id) => Ok(SampleOutcome::Accepted {
                descriptor_id,
                provenance,
            }),
            Err(e) => {
                if let (Some(archive), Some(path)) = (self.archive, &provenance) {
                    archive.discard(path).await;
                }
                Err(e.into())
            }
        }
    }
}

impl EnrollReport {
    fn push(&mut self, identity_id: &str, outcome: SampleOutcome) {
        match &outcome {
            SampleOutcome::Accepted { .. } => self.accepted += 1,
            SampleOutcome::Rejected { reason, detail } => {
                self.rejected += 1;
                tracing::info!(
                    identity = identity_id,
                    sample = self.samples.len(),
                    ?reason,
                    detail = detail.as_deref().unwrap_or(""),
                    "enroll: sample rejected"
                );
            }
        }
        self.samples.push(outcome);
    }

    fn finish(&self, identity_id: &str) {
        tracing::info!(
            identity = identity_id,
            accepted = self.accepted,
            rejected = self.rejected,
            "enroll: batch done"
        );
    }
}

fn invalid_image(err: &ImageError) -> SampleOutcome {
    SampleOutcome::rejected(Rejection::InvalidImage, Some(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::test_support::{face_image, png_bytes};
    use crate::gallery::Gallery;
    use crate::matcher::identify;
    use crate::store::SqliteStore;
    use crate::types::test_support::axis;
    use crate::types::{Descriptor, DescriptorError};

    /// Derives the descriptor from the image shade; shade 0 means no face,
    /// 1 hangs, 2 fails, 3 returns garbage.
    struct FakeEmbedder;

    impl Embedder for FakeEmbedder {
        async fn detect(&self, image: &FaceImage) -> Result<Option<Descriptor>, EmbedderError> {
            let shade = image.rgb.get_pixel(0, 0).0[0];
            match shade {
                0 => Ok(None),
                1 => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(None)
                }
                2 => Err(EmbedderError::InferenceFailed("boom".into())),
                3 => Err(EmbedderError::InvalidDescriptor(DescriptorError::WrongLength(64))),
                s => Ok(Some(axis(s as f32 / 100.0))),
            }
        }
    }

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_partial_batch() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.create_identity("Alice", None).await.unwrap().id;

        let images = vec![face_image(10), face_image(0), face_image(20)];
        let report = Enrollment::new(&FakeEmbedder, &store, TIMEOUT)
            .enroll(&id, &images)
            .await
            .unwrap();

        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(
            report.samples[1],
            SampleOutcome::Rejected {
                reason: Rejection::NoFace,
                detail: None,
            }
        );
        assert_eq!(store.list_descriptors(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_batch() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.create_identity("Bob", None).await.unwrap().id;

        let images = vec![face_image(1), face_image(2), face_image(3), face_image(50)];
        let report = Enrollment::new(&FakeEmbedder, &store, TIMEOUT)
            .enroll(&id, &images)
            .await
            .unwrap();

        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 3);
        let reasons: Vec<_> = report
            .samples
            .iter()
            .filter_map(|s| match s {
                SampleOutcome::Rejected { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect();
        assert_eq!(
            reasons,
            vec![Rejection::Timeout, Rejection::EmbedderError, Rejection::InvalidDescriptor]
        );
    }

    #[tokio::test]
    async fn test_uploads_reject_bad_images_in_place() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.create_identity("Frank", None).await.unwrap().id;

        let uploads = vec![png_bytes(60), b"not an image".to_vec(), png_bytes(2), Vec::new()];
        let report = Enrollment::new(&FakeEmbedder, &store, TIMEOUT)
            .enroll_uploads(&id, uploads, 1024 * 1024)
            .await
            .unwrap();

        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 3);
        assert!(matches!(report.samples[0], SampleOutcome::Accepted { .. }));
        let SampleOutcome::Rejected { reason, detail } = &report.samples[1] else {
            panic!("expected rejection, got {:?}", report.samples[1]);
        };
        assert_eq!(*reason, Rejection::InvalidImage);
        assert!(detail.is_some());
        let SampleOutcome::Rejected { reason, detail } = &report.samples[2] else {
            panic!("expected rejection, got {:?}", report.samples[2]);
        };
        assert_eq!(*reason, Rejection::EmbedderError);
        assert!(detail.as_deref().unwrap().contains("boom"));
        assert_eq!(store.list_descriptors(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_identity_aborts() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let err = Enrollment::new(&FakeEmbedder, &store, TIMEOUT)
            .enroll("missing", &[face_image(10)])
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollError::Store(StoreError::IdentityNotFound(_))));
        assert_eq!(store.count_descriptors().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enrolled_sample_self_matches() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let carol = store.create_identity("Carol", None).await.unwrap().id;
        let dave = store.create_identity("Dave", None).await.unwrap().id;
        let enrollment = Enrollment::new(&FakeEmbedder, &store, TIMEOUT);
        enrollment.enroll(&carol, &[face_image(40), face_image(42)]).await.unwrap();
        enrollment.enroll(&dave, &[face_image(90)]).await.unwrap();

        let gallery = Gallery::build(&store).await.unwrap();
        let result = identify(axis(0.9).values(), &gallery, 0.5).unwrap();
        let c = result.accepted().unwrap();
        assert_eq!(c.identity, dave);
        assert_eq!(c.distance, 0.0);
    }

    #[tokio::test]
    async fn test_archive_records_provenance() {
        let dir = std::env::temp_dir().join(format!("outreach-enroll-{}", uuid::Uuid::new_v4()));
        let archive = PhotoArchive::new(dir.clone());
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.create_identity("Erin", None).await.unwrap().id;

        let report = Enrollment::new(&FakeEmbedder, &store, TIMEOUT)
            .with_archive(&archive)
            .enroll(&id, &[face_image(30), face_image(0)])
            .await
            .unwrap();

        let SampleOutcome::Accepted { provenance: Some(path), .. } = &report.samples[0] else {
            panic!("expected accepted sample with provenance, got {:?}", report.samples[0]);
        };
        assert!(path.starts_with(&id));
        assert!(dir.join(path).exists());
        // The rejected sample leaves nothing behind.
        assert_eq!(std::fs::read_dir(dir.join(&id)).unwrap().count(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
