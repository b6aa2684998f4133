//! outreach-core — Face gallery for outreach identification.
//!
//! Stores enrolled face descriptors in SQLite, builds a per-request gallery,
//! and matches query descriptors by Euclidean distance to the closest
//! enrolled sample.

pub mod embedder;
pub mod enroll;
pub mod gallery;
pub mod matcher;
pub mod onnx;
pub mod photos;
pub mod store;
pub mod types;

pub use embedder::{Embedder, EmbedderError, FaceImage, ImageError};
pub use enroll::{EnrollError, EnrollReport, Enrollment, Rejection, SampleOutcome};
pub use gallery::{Gallery, GallerySummary};
pub use matcher::{identify, Candidate, EuclideanMatcher, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use onnx::OnnxEmbedder;
pub use photos::PhotoArchive;
pub use store::{DescriptorStore, SqliteStore, StoreError};
pub use types::{Descriptor, DescriptorError, Identity, EXPECTED_DIM};
