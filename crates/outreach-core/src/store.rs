//! Descriptor store backed by SQLite.
//!
//! Owns the persisted face descriptors and the identity rows they hang off.
//! All access goes through a single `tokio-rusqlite` connection thread, so
//! individual inserts and deletes are serialised and atomic.

use crate::types::{Descriptor, DescriptorRow, Identity, StoredDescriptor};
use rusqlite::{params, OptionalExtension};
use std::future::Future;
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS identities (
    id           TEXT PRIMARY KEY,
    label        TEXT NOT NULL,
    external_ref TEXT UNIQUE,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS descriptors (
    id          TEXT PRIMARY KEY,
    identity_id TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    vector      BLOB NOT NULL,
    provenance  TEXT,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_descriptors_identity ON descriptors(identity_id);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    #[error("identity label must not be empty")]
    EmptyLabel,
    #[error("external reference already assigned: {0}")]
    DuplicateExternalRef(String),
    #[error("storage: {0}")]
    Storage(#[from] tokio_rusqlite::Error),
}

/// Persistence contract for enrolled descriptors.
///
/// `list_all` must reflect the latest committed state on every call; callers
/// never rely on an in-memory copy surviving between requests.
pub trait DescriptorStore {
    /// Append one descriptor sample to an existing identity.
    fn add_descriptor(
        &self,
        identity_id: &str,
        descriptor: &Descriptor,
        provenance: Option<&str>,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Snapshot of every stored descriptor with its identity label. Unordered.
    fn list_all(&self) -> impl Future<Output = Result<Vec<DescriptorRow>, StoreError>> + Send;

    /// Delete a descriptor. Unknown ids are a no-op; returns whether a row existed.
    fn remove_descriptor(
        &self,
        descriptor_id: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
            }
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self { conn };
        store.init().await?;
        tracing::info!(path = %path.display(), "descriptor store opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                // journal_mode returns a row, so it cannot go through execute_batch.
                conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Register a new identity. Identity management sits outside the
    /// enrollment workflow; this is the administrative entry point for it.
    pub async fn create_identity(
        &self,
        label: &str,
        external_ref: Option<&str>,
    ) -> Result<Identity, StoreError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(StoreError::EmptyLabel);
        }
        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            external_ref: external_ref.map(str::to_string),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let row = identity.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if let Some(ext) = &row.external_ref {
                    let taken: Option<String> = tx
                        .query_row(
                            "SELECT id FROM identities WHERE external_ref = ?1",
                            params![ext],
                            |r| r.get(0),
                        )
                        .optional()?;
                    if taken.is_some() {
                        return Ok(false);
                    }
                }
                tx.execute(
                    "INSERT INTO identities (id, label, external_ref, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![row.id, row.label, row.external_ref, row.created_at],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Err(StoreError::DuplicateExternalRef(
                external_ref.unwrap_or_default().to_string(),
            ));
        }
        tracing::info!(identity = %identity.id, label = %identity.label, "identity created");
        Ok(identity)
    }

    /// Map a caller-supplied reference to an identity id.
    ///
    /// An exact identity id wins; otherwise the input is looked up as an
    /// external reference.
    pub async fn resolve_identity(&self, raw: &str) -> Result<String, StoreError> {
        let raw = raw.trim().to_string();
        if raw.is_empty() {
            return Err(StoreError::IdentityNotFound(raw));
        }
        let key = raw.clone();
        let found: Option<String> = self
            .conn
            .call(move |conn| {
                let direct = conn
                    .query_row(
                        "SELECT id FROM identities WHERE id = ?1",
                        params![key],
                        |r| r.get(0),
                    )
                    .optional()?;
                if direct.is_some() {
                    return Ok(direct);
                }
                Ok(conn
                    .query_row(
                        "SELECT id FROM identities WHERE external_ref = ?1",
                        params![key],
                        |r| r.get(0),
                    )
                    .optional()?)
            })
            .await?;
        found.ok_or(StoreError::IdentityNotFound(raw))
    }

    /// Descriptor metadata for one identity, oldest first.
    pub async fn list_descriptors(
        &self,
        identity_id: &str,
    ) -> Result<Vec<StoredDescriptor>, StoreError> {
        let identity_id = identity_id.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, identity_id, provenance, created_at FROM descriptors
                     WHERE identity_id = ?1 ORDER BY created_at, id",
                )?;
                let rows = stmt
                    .query_map(params![identity_id], |r| {
                        Ok(StoredDescriptor {
                            id: r.get(0)?,
                            identity_id: r.get(1)?,
                            provenance: r.get(2)?,
                            created_at: r.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    pub async fn count_descriptors(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM descriptors", [], |r| r.get(0))?))
            .await?;
        Ok(n as usize)
    }
}

impl DescriptorStore for SqliteStore {
    async fn add_descriptor(
        &self,
        identity_id: &str,
        descriptor: &Descriptor,
        provenance: Option<&str>,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let row_id = id.clone();
        let owner = identity_id.to_string();
        let blob = descriptor.to_le_bytes();
        let provenance = provenance.map(str::to_string);
        let created_at = chrono::Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let known: Option<String> = tx
                    .query_row(
                        "SELECT id FROM identities WHERE id = ?1",
                        params![owner],
                        |r| r.get(0),
                    )
                    .optional()?;
                if known.is_none() {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO descriptors (id, identity_id, vector, provenance, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![row_id, owner, blob, provenance, created_at],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Err(StoreError::IdentityNotFound(identity_id.to_string()));
        }
        tracing::debug!(identity = identity_id, descriptor = %id, "descriptor stored");
        Ok(id)
    }

    async fn list_all(&self) -> Result<Vec<DescriptorRow>, StoreError> {
        let raw: Vec<(String, String, String, Vec<u8>)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT d.id, d.identity_id, i.label, d.vector
                     FROM descriptors d JOIN identities i ON i.id = d.identity_id",
                )?;
                let rows = stmt
                    .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut rows = Vec::with_capacity(raw.len());
        for (descriptor_id, identity_id, label, blob) in raw {
            match Descriptor::from_le_bytes(&blob) {
                Ok(descriptor) => rows.push(DescriptorRow {
                    identity_id,
                    label,
                    descriptor,
                }),
                Err(e) => tracing::warn!(
                    descriptor = %descriptor_id,
                    error = %e,
                    "skipping unreadable descriptor row"
                ),
            }
        }
        Ok(rows)
    }

    async fn remove_descriptor(&self, descriptor_id: &str) -> Result<bool, StoreError> {
        let id = descriptor_id.to_string();
        let removed = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM descriptors WHERE id = ?1", params![id])?))
            .await?;
        tracing::debug!(descriptor = descriptor_id, removed, "remove_descriptor");
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::axis;

    #[tokio::test]
    async fn test_add_and_list() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let alice = store.create_identity("Alice Doe", None).await.unwrap();

        store.add_descriptor(&alice.id, &axis(0.1), Some("a.png")).await.unwrap();
        store.add_descriptor(&alice.id, &axis(0.2), None).await.unwrap();

        let rows = store.list_all().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.identity_id == alice.id && r.label == "Alice Doe"));

        let meta = store.list_descriptors(&alice.id).await.unwrap();
        assert_eq!(meta.len(), 2);
        assert!(meta.iter().any(|m| m.provenance.as_deref() == Some("a.png")));
    }

    #[tokio::test]
    async fn test_add_unknown_identity_fails_without_write() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let err = store.add_descriptor("nobody", &axis(0.0), None).await.unwrap_err();
        assert!(matches!(err, StoreError::IdentityNotFound(id) if id == "nobody"));
        assert_eq!(store.count_descriptors().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let bob = store.create_identity("Bob", None).await.unwrap();
        let keep = store.add_descriptor(&bob.id, &axis(1.0), None).await.unwrap();
        let gone = store.add_descriptor(&bob.id, &axis(2.0), None).await.unwrap();

        assert!(store.remove_descriptor(&gone).await.unwrap());
        assert!(!store.remove_descriptor(&gone).await.unwrap());
        assert!(!store.remove_descriptor("never-existed").await.unwrap());

        let meta = store.list_descriptors(&bob.id).await.unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].id, keep);
    }

    #[tokio::test]
    async fn test_list_all_sees_latest_writes() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.create_identity("Carol", None).await.unwrap().id;
        assert!(store.list_all().await.unwrap().is_empty());

        let d = store.add_descriptor(&id, &axis(0.5), None).await.unwrap();
        assert_eq!(store.list_all().await.unwrap().len(), 1);

        store.remove_descriptor(&d).await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_identity() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let dana = store.create_identity("Dana", Some("case-42")).await.unwrap();

        assert_eq!(store.resolve_identity(&dana.id).await.unwrap(), dana.id);
        assert_eq!(store.resolve_identity(" case-42 ").await.unwrap(), dana.id);
        assert!(matches!(
            store.resolve_identity("case-43").await,
            Err(StoreError::IdentityNotFound(_))
        ));
        assert!(matches!(
            store.resolve_identity("").await,
            Err(StoreError::IdentityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_identity_validation() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(matches!(
            store.create_identity("   ", None).await,
            Err(StoreError::EmptyLabel)
        ));
        store.create_identity("Eve", Some("pkg-1")).await.unwrap();
        assert!(matches!(
            store.create_identity("Eve again", Some("pkg-1")).await,
            Err(StoreError::DuplicateExternalRef(r)) if r == "pkg-1"
        ));
    }

    #[tokio::test]
    async fn test_concurrent_appends_same_identity() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let id = store.create_identity("Frank", None).await.unwrap().id;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store.add_descriptor(&id, &axis(i as f32), None).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.count_descriptors().await.unwrap(), 8);
    }
}
