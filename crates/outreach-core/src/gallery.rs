//! Request-scoped gallery built from the descriptor store.
//!
//! A `Gallery` is a point-in-time projection: rebuild it for every
//! identification request and drop it afterwards.

use crate::store::{DescriptorStore, StoreError};
use crate::types::{Descriptor, DescriptorRow};
use serde::Serialize;
use std::collections::HashMap;

/// All samples enrolled for one identity.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity_id: String,
    pub label: String,
    pub samples: Vec<Descriptor>,
}

/// Listing row for UI/debugging.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GallerySummary {
    pub identity: String,
    pub label: String,
    pub sample_count: usize,
    /// Whether the identity has at least the recommended number of samples.
    pub usable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// Load a fresh snapshot from the store.
    pub async fn build<S: DescriptorStore>(store: &S) -> Result<Self, StoreError> {
        let rows = store.list_all().await?;
        let gallery = Self::from_rows(rows);
        tracing::debug!(
            identities = gallery.len(),
            samples = gallery.sample_count(),
            "gallery built"
        );
        Ok(gallery)
    }

    /// Group rows by identity. Identities without samples never appear.
    pub fn from_rows(rows: impl IntoIterator<Item = DescriptorRow>) -> Self {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut entries: Vec<GalleryEntry> = Vec::new();

        for row in rows {
            match index.get(&row.identity_id) {
                Some(&i) => entries[i].samples.push(row.descriptor),
                None => {
                    index.insert(row.identity_id.clone(), entries.len());
                    entries.push(GalleryEntry {
                        identity_id: row.identity_id,
                        label: row.label,
                        samples: vec![row.descriptor],
                    });
                }
            }
        }

        entries.retain(|e| !e.samples.is_empty());
        Self { entries }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn sample_count(&self) -> usize {
        self.entries.iter().map(|e| e.samples.len()).sum()
    }

    pub fn summary(&self, min_usable_samples: usize) -> Vec<GallerySummary> {
        self.entries
            .iter()
            .map(|e| GallerySummary {
                identity: e.identity_id.clone(),
                label: e.label.clone(),
                sample_count: e.samples.len(),
                usable: e.samples.len() >= min_usable_samples,
            })
            .collect()
    }
}
