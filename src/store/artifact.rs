//! Artifact store (spec §4.E): persistent storage of job rows, per-source
//! raw blobs, and merged structured documents. Out of scope as a concrete
//! backend (§1) — this module defines the interface plus an in-memory
//! implementation used for local running and tests.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::orchestrator::model::StageError;

/// The field keys a handler may write under a history row (spec §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    Raw,
    StructuredJourney,
    StructuredTimeline,
    StructuredDocumentary,
    StructuredMerged,
    IntroVideoUrl,
    FullVideoUrl,
    SegmentVideoUrl,
}

impl FieldKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::StructuredJourney => "structured.journey",
            Self::StructuredTimeline => "structured.timeline",
            Self::StructuredDocumentary => "structured.documentary",
            Self::StructuredMerged => "structured.merged",
            Self::IntroVideoUrl => "intro_video_url",
            Self::FullVideoUrl => "full_video_url",
            Self::SegmentVideoUrl => "segment_video_urls",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub history_id: String,
    pub owner_ref: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub fields: HashMap<&'static str, Value>,
}

/// Persistent storage of job rows, raw blobs, and structured documents
/// (spec §4.E). Store operations may fail transiently; handlers treat
/// persistence failures as non-fatal unless otherwise noted.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn create_job_row(&self, owner_ref: &str, source_ref: &str) -> Result<String, StageError>;

    /// Must be atomic per key.
    async fn write_field(&self, history_id: &str, key: FieldKey, document: Value) -> Result<(), StageError>;

    async fn read_structured(&self, history_id: &str, key: FieldKey) -> Result<Option<Value>, StageError>;

    async fn list_by_owner(&self, owner_ref: &str) -> Result<Vec<HistoryRow>, StageError>;

    /// Stage a freshly uploaded résumé's raw bytes and return an opaque
    /// handle, for use as a [`SourceRef`](crate::orchestrator::model::SourceRef)
    /// reference before any history row exists yet.
    async fn stage_blob(&self, bytes: Vec<u8>) -> Result<String, StageError>;

    /// Fetch a blob previously staged for a PDF résumé upload.
    async fn read_blob(&self, handle: &str) -> Result<Vec<u8>, StageError>;

    /// Stage an arbitrary blob (e.g. a rendered video) and return its URL.
    async fn upload_blob(&self, history_id: &str, name: &str, bytes: Vec<u8>) -> Result<String, StageError>;

    /// Delete a previously staged blob (spec §4.F.1: "Deletes the blob on
    /// successful extraction").
    async fn delete_blob(&self, handle: &str) -> Result<(), StageError>;

    /// Duplicate-submission guard backing the compute-documentary /
    /// generate-video endpoints' 30s cooldown (spec §6, §9 "Resumable-job /
    /// advisory-lock pattern"). Returns `true` if the lock was acquired.
    async fn try_acquire_submission_lock(&self, history_id: &str) -> Result<bool, StageError>;

    async fn release_submission_lock(&self, history_id: &str) -> Result<(), StageError>;
}

#[derive(Default)]
struct HistoryRecord {
    owner_ref: String,
    created_at: DateTime<Utc>,
    is_default: bool,
    fields: HashMap<&'static str, Value>,
}

/// In-memory [`ArtifactStore`] backing local runs and tests. Blobs are held
/// in a separate map keyed by an opaque handle string so `read_blob`/
/// `delete_blob` model the same contract a real blob store would expose.
pub struct InMemoryArtifactStore {
    rows: Mutex<HashMap<String, HistoryRecord>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    locks: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            blobs: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn stage_blob(&self, bytes: Vec<u8>) -> Result<String, StageError> {
        let handle = format!("blob-{}", Uuid::new_v4());
        self.blobs.lock().expect("mutex poisoned").insert(handle.clone(), bytes);
        Ok(handle)
    }

    async fn create_job_row(&self, owner_ref: &str, _source_ref: &str) -> Result<String, StageError> {
        let history_id = Uuid::new_v4().to_string();
        let mut rows = self.rows.lock().expect("mutex poisoned");
        let is_default = !rows.values().any(|r| r.owner_ref == owner_ref);
        rows.insert(
            history_id.clone(),
            HistoryRecord { owner_ref: owner_ref.to_string(), created_at: Utc::now(), is_default, fields: HashMap::new() },
        );
        Ok(history_id)
    }

    async fn write_field(&self, history_id: &str, key: FieldKey, document: Value) -> Result<(), StageError> {
        let mut rows = self.rows.lock().expect("mutex poisoned");
        let row = rows
            .get_mut(history_id)
            .ok_or_else(|| StageError::Internal(format!("unknown history_id: {history_id}")))?;
        row.fields.insert(key.as_str(), document);
        Ok(())
    }

    async fn read_structured(&self, history_id: &str, key: FieldKey) -> Result<Option<Value>, StageError> {
        let rows = self.rows.lock().expect("mutex poisoned");
        Ok(rows.get(history_id).and_then(|row| row.fields.get(key.as_str()).cloned()))
    }

    async fn list_by_owner(&self, owner_ref: &str) -> Result<Vec<HistoryRow>, StageError> {
        let rows = self.rows.lock().expect("mutex poisoned");
        let mut out: Vec<HistoryRow> = rows
            .iter()
            .filter(|(_, record)| record.owner_ref == owner_ref)
            .map(|(history_id, record)| HistoryRow {
                history_id: history_id.clone(),
                owner_ref: record.owner_ref.clone(),
                is_default: record.is_default,
                created_at: record.created_at,
                fields: record.fields.clone(),
            })
            .collect();
        out.sort_by_key(|row| row.created_at);
        Ok(out)
    }

    async fn read_blob(&self, handle: &str) -> Result<Vec<u8>, StageError> {
        self.blobs
            .lock()
            .expect("mutex poisoned")
            .get(handle)
            .cloned()
            .ok_or_else(|| StageError::Domain(format!("blob not found: {handle}")))
    }

    async fn upload_blob(&self, history_id: &str, name: &str, bytes: Vec<u8>) -> Result<String, StageError> {
        let handle = format!("blob-{history_id}-{name}");
        self.blobs.lock().expect("mutex poisoned").insert(handle.clone(), bytes);
        Ok(format!("https://blobs.local/{handle}"))
    }

    async fn delete_blob(&self, handle: &str) -> Result<(), StageError> {
        self.blobs.lock().expect("mutex poisoned").remove(handle);
        Ok(())
    }

    async fn try_acquire_submission_lock(&self, history_id: &str) -> Result<bool, StageError> {
        const COOLDOWN_SECS: i64 = 30;
        let mut locks = self.locks.lock().expect("mutex poisoned");
        let now = Utc::now();
        if let Some(acquired_at) = locks.get(history_id) {
            if (now - *acquired_at).num_seconds() < COOLDOWN_SECS {
                return Ok(false);
            }
        }
        locks.insert(history_id.to_string(), now);
        Ok(true)
    }

    async fn release_submission_lock(&self, history_id: &str) -> Result<(), StageError> {
        self.locks.lock().expect("mutex poisoned").remove(history_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_job_row_marks_first_record_as_default() {
        let store = InMemoryArtifactStore::new();
        let first = store.create_job_row("owner-1", "https://example.dev").await.unwrap();
        let second = store.create_job_row("owner-1", "https://example.dev/2").await.unwrap();

        let rows = store.list_by_owner("owner-1").await.unwrap();
        let first_row = rows.iter().find(|r| r.history_id == first).unwrap();
        let second_row = rows.iter().find(|r| r.history_id == second).unwrap();
        assert!(first_row.is_default);
        assert!(!second_row.is_default);
    }

    #[tokio::test]
    async fn write_then_read_structured_round_trips() {
        let store = InMemoryArtifactStore::new();
        let history_id = store.create_job_row("owner-1", "https://example.dev").await.unwrap();
        store
            .write_field(&history_id, FieldKey::StructuredMerged, serde_json::json!({"name": "Ada"}))
            .await
            .unwrap();

        let value = store.read_structured(&history_id, FieldKey::StructuredMerged).await.unwrap();
        assert_eq!(value, Some(serde_json::json!({"name": "Ada"})));
    }

    #[tokio::test]
    async fn submission_lock_enforces_cooldown() {
        let store = InMemoryArtifactStore::new();
        assert!(store.try_acquire_submission_lock("h1").await.unwrap());
        assert!(!store.try_acquire_submission_lock("h1").await.unwrap());
    }

    #[tokio::test]
    async fn blob_lifecycle_stage_read_delete() {
        let store = InMemoryArtifactStore::new();
        let handle = store.stage_blob(vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.read_blob(&handle).await.unwrap(), vec![1, 2, 3]);
        store.delete_blob(&handle).await.unwrap();
        assert!(store.read_blob(&handle).await.is_err());
    }
}
