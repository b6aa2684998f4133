//! JSON payloads returned over D-Bus.

use outreach_core::{EnrollError, EnrollReport, ImageError, MatchResult, Rejection, StoreError};
use serde::Serialize;
use serde_json::{json, Value};

pub fn identify(result: &MatchResult) -> Value {
    match (&result.best, result.matched) {
        (None, _) => json!({ "match": null, "reason": "gallery empty" }),
        (Some(c), true) => json!({ "match": c, "threshold": result.threshold }),
        (Some(c), false) => json!({
            "match": null,
            "bestCandidate": c,
            "threshold": result.threshold,
        }),
    }
}

pub fn no_face() -> Value {
    json!({ "match": null, "reason": "no face detected" })
}

/// Structured enroll rejection kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollFailure {
    NoFaceDetected,
    Timeout,
    ImageTooLarge,
    UnsupportedFormat,
    IdentityNotFound,
    InvalidDescriptor,
    EmbedderError,
}

pub fn enroll_ok(identity: &str, descriptor_id: &str, saved_as: Option<&str>) -> Value {
    json!({
        "ok": true,
        "identity": identity,
        "descriptorId": descriptor_id,
        "savedAs": saved_as,
    })
}

pub fn enroll_rejected(kind: EnrollFailure, message: impl std::fmt::Display) -> Value {
    json!({ "ok": false, "error": kind, "message": message.to_string() })
}

/// Classify an image validation failure. Undecodable bytes count as an
/// unsupported format from the caller's point of view.
pub fn image_failure(err: &ImageError) -> EnrollFailure {
    match err {
        ImageError::TooLarge { .. } => EnrollFailure::ImageTooLarge,
        ImageError::Empty | ImageError::UnsupportedFormat | ImageError::Decode(_) => {
            EnrollFailure::UnsupportedFormat
        }
    }
}

/// Map a per-sample rejection to its kind and a default message.
pub fn rejection(reason: Rejection) -> (EnrollFailure, &'static str) {
    match reason {
        Rejection::NoFace => (EnrollFailure::NoFaceDetected, "no face detected in image"),
        Rejection::Timeout => (EnrollFailure::Timeout, "face detection timed out"),
        Rejection::InvalidDescriptor => {
            (EnrollFailure::InvalidDescriptor, "embedder produced an invalid descriptor")
        }
        Rejection::EmbedderError => (EnrollFailure::EmbedderError, "embedder failed on sample"),
        Rejection::InvalidImage => (EnrollFailure::UnsupportedFormat, "image could not be used"),
    }
}

pub fn enroll_report(identity: &str, report: &EnrollReport) -> Value {
    json!({
        "ok": true,
        "identity": identity,
        "accepted": report.accepted,
        "rejected": report.rejected,
        "samples": report.samples,
    })
}

/// Enroll errors that are the caller's fault become structured rejections;
/// the rest stay errors.
pub fn enroll_failure(err: &EnrollError) -> Option<EnrollFailure> {
    match err {
        EnrollError::Store(StoreError::IdentityNotFound(_)) => Some(EnrollFailure::IdentityNotFound),
        _ => None,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status<'a> {
    pub version: &'a str,
    /// Identities with at least one sample.
    pub enrolled: usize,
    pub descriptors: usize,
    pub threshold: f32,
    pub min_usable_samples: usize,
}
