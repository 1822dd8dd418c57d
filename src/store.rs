//!
//! src/store.rs
//!
//! In-memory view over the persisted track log: a per-run snapshot for
//! membership checks plus a staging buffer that flushes to the row
//! store in one batch
//!

use std::collections::HashSet;

use async_trait::async_trait;

use crate::errors::SyncError;
use crate::identity::TrackIdentity;

/// One persisted row of the track log. Rows are append-only; nothing
/// in this core mutates or deletes them once written.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRow {
    pub identity: TrackIdentity,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: i32,
    pub found: bool,
    pub added_at: String,
}

/// Store collaborator seam. `append_batch` is best-effort batch append:
/// on failure the caller cannot know how many rows landed and must
/// reload before retrying.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<RecordedRow>, SyncError>;
    async fn append_batch(&self, rows: &[RecordedRow]) -> Result<usize, SyncError>;
}

/// Everything known to be recorded, loaded once per run. The row log
/// keeps its insertion order; membership checks go through the
/// identity set.
#[derive(Debug, Default)]
pub struct TrackStoreSnapshot {
    pub rows: Vec<RecordedRow>,
    identities: HashSet<TrackIdentity>,
}

impl TrackStoreSnapshot {
    /// Identities are taken from the rows as the collaborator returned
    /// them, never re-derived here.
    pub fn from_rows(rows: Vec<RecordedRow>) -> Self {
        let identities = rows.iter().map(|r| r.identity.clone()).collect();
        Self { rows, identities }
    }

    pub fn contains(&self, identity: &TrackIdentity) -> bool {
        self.identities.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct TrackStore<S> {
    backend: S,
    staged: Vec<RecordedRow>,
}

impl<S: RowStore> TrackStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend, staged: Vec::new() }
    }

    pub async fn load(&self) -> Result<TrackStoreSnapshot, SyncError> {
        let rows = self.backend.load_all().await?;
        Ok(TrackStoreSnapshot::from_rows(rows))
    }

    /// Queues rows for append without touching persisted storage.
    pub fn stage(&mut self, rows: impl IntoIterator<Item = RecordedRow>) {
        self.staged.extend(rows);
    }

    pub fn staged(&self) -> &[RecordedRow] {
        &self.staged
    }

    /// Writes all staged rows in one batch, in staged order. The buffer
    /// is cleared only on success; after a failure the staged rows are
    /// still here, but the caller must reload before any retry.
    pub async fn flush(&mut self) -> Result<usize, SyncError> {
        if self.staged.is_empty() {
            return Ok(0);
        }
        let appended = self.backend.append_batch(&self.staged).await?;
        self.staged.clear();
        Ok(appended)
    }
}
