use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimensionality of every face descriptor produced by the embedding model.
pub const EXPECTED_DIM: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("descriptor must have 128 elements, got {0}")]
    WrongLength(usize),
    #[error("descriptor element {index} is not finite")]
    NonFinite { index: usize },
    #[error("descriptor blob must be 512 bytes, got {0}")]
    BadBlob(usize),
}

/// Face descriptor: a fixed-length embedding of one face sample.
///
/// Construction validates the length and rejects NaN/infinite values, so a
/// `Descriptor` in hand is always safe to compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.len() != EXPECTED_DIM {
            return Err(DescriptorError::WrongLength(values.len()));
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(DescriptorError::NonFinite { index });
        }
        Ok(Self { values })
    }

    /// Build from double-precision input (D-Bus and JSON carry `f64`).
    pub fn from_f64(values: &[f64]) -> Result<Self, DescriptorError> {
        Self::new(values.iter().map(|&v| v as f32).collect())
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean distance on raw coordinates.
    ///
    /// The match threshold is calibrated against this metric; do not swap in
    /// cosine similarity.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Little-endian `f32` encoding used for the SQLite BLOB column.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.len() != EXPECTED_DIM * 4 {
            return Err(DescriptorError::BadBlob(bytes.len()));
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::new(values)
    }
}

impl TryFrom<Vec<f32>> for Descriptor {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Descriptor> for Vec<f32> {
    fn from(d: Descriptor) -> Self {
        d.values
    }
}

/// An enrolled person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub label: String,
    /// Reference used by the wider application (case or personal id).
    pub external_ref: Option<String>,
    pub created_at: String,
}

/// Metadata for one stored descriptor sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDescriptor {
    pub id: String,
    pub identity_id: String,
    /// Source image reference, if the sample came from an archived photo.
    pub provenance: Option<String>,
    pub created_at: String,
}

/// One row of a full store listing: the input to the gallery builder.
#[derive(Debug, Clone)]
pub struct DescriptorRow {
    pub identity_id: String,
    pub label: String,
    pub descriptor: Descriptor,
}
