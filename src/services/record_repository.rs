//! Upload-record persistence and its coordination with blob cleanup.
//!
//! No transaction spans the metadata store and the blob store. Consistency
//! between them is best-effort with a fixed bias: an unreferenced blob is an
//! acceptable leftover (a later purge reclaims the key space), a row pointing
//! at a missing blob is not. Create inserts the row only after every blob
//! write has finished; delete and purge remove rows even when blob cleanup
//! fails.

use crate::models::record::{FileItem, RecordRow, UploadRecord, decode_files, encode_files};
use crate::services::blob_store::BlobStore;
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Records returned per page by [`RecordRepository::list_records`].
pub const PAGE_SIZE: i64 = 20;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Input to [`RecordRepository::create_record`]. The id and creation time
/// are assigned by the store, never by the caller.
#[derive(Clone, Debug)]
pub struct NewRecord {
    pub uploader: String,
    pub size: i64,
    pub files: Vec<FileItem>,
    pub message: String,
}

/// Owns the `upload_record` table and keeps it consistent with the blob
/// store across create, list, fetch, delete, and purge.
#[derive(Clone)]
pub struct RecordRepository {
    db: Arc<SqlitePool>,
    blobs: Arc<dyn BlobStore>,
}

const SELECT_COLUMNS: &str = "SELECT id, uploader, ctime, size, files, message FROM upload_record";

impl RecordRepository {
    pub fn new(db: Arc<SqlitePool>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { db, blobs }
    }

    /// The underlying pool, for readiness probes.
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Create the `upload_record` table if it does not exist yet. Idempotent;
    /// safe to run on every cold start and never touches existing rows.
    ///
    /// AUTOINCREMENT keeps ids monotonic even after the newest rows are
    /// deleted, which the pagination cursor relies on.
    pub async fn ensure_schema(&self) -> RepoResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS upload_record (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uploader TEXT NOT NULL,
                ctime TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                size INTEGER DEFAULT 0,
                files TEXT DEFAULT '',
                message TEXT DEFAULT ''
            )",
        )
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Latest page of records, newest first, at most [`PAGE_SIZE`] of them.
    ///
    /// Pass the smallest id of the previous page as `before_id` to fetch the
    /// next older page; only records with a strictly smaller id are returned,
    /// so concurrent inserts never leak into an older page. A non-positive
    /// cursor is ignored.
    pub async fn list_records(&self, before_id: Option<i64>) -> RepoResult<Vec<UploadRecord>> {
        let mut query = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        if let Some(before_id) = before_id.filter(|id| *id > 0) {
            query.push(" WHERE id < ");
            query.push_bind(before_id);
        }
        query.push(" ORDER BY id DESC LIMIT ");
        query.push_bind(PAGE_SIZE);

        let rows: Vec<RecordRow> = query.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows.into_iter().map(RecordRow::into_record).collect())
    }

    /// Fetch a single record. Absence is a normal outcome, not an error.
    pub async fn get_record(&self, id: i64) -> RepoResult<Option<UploadRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row.map(RecordRow::into_record))
    }

    /// Insert a new record and return it with the store-assigned id.
    ///
    /// The caller must have finished writing every referenced blob first; if
    /// this insert fails, those blobs are left behind unreferenced rather
    /// than a row ever pointing at bytes that were never written. There is no
    /// rollback path.
    ///
    /// The returned `ctime` is taken client-side at call time and may differ
    /// from the row's `CURRENT_TIMESTAMP` default by a moment.
    pub async fn create_record(&self, new: NewRecord) -> RepoResult<(i64, UploadRecord)> {
        let result = sqlx::query(
            "INSERT INTO upload_record (uploader, size, files, message) VALUES (?, ?, ?, ?)",
        )
        .bind(&new.uploader)
        .bind(new.size)
        .bind(encode_files(&new.files))
        .bind(&new.message)
        .execute(&*self.db)
        .await?;

        let id = result.last_insert_rowid();
        let record = UploadRecord {
            id,
            uploader: new.uploader,
            ctime: Utc::now(),
            size: new.size,
            files: new.files,
            message: new.message,
        };
        Ok((id, record))
    }

    /// Delete one record, attempting to remove its blobs first.
    ///
    /// A missing id is a silent no-op. Blob-cleanup failures are logged and
    /// swallowed; the row is deleted regardless.
    pub async fn delete_record(&self, id: i64) -> RepoResult<()> {
        let Some(record) = self.get_record(id).await? else {
            debug!("delete requested for missing record {id}");
            return Ok(());
        };

        if !record.files.is_empty() {
            let paths: Vec<String> = record.files.iter().map(|f| f.path.clone()).collect();
            if let Err(err) = self.blobs.delete(&paths).await {
                warn!("blob cleanup for record {id} failed: {err}");
            }
        }

        sqlx::query("DELETE FROM upload_record WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Remove every record with id below `before_id`, blobs first, then all
    /// matching rows in one bulk delete. Returns the number of rows removed.
    ///
    /// Safe to rerun after a partial failure: the blob store treats missing
    /// blobs as success, and rows left behind are picked up by the next call.
    pub async fn purge_records_before(&self, before_id: i64) -> RepoResult<u64> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, files FROM upload_record WHERE id < ?")
                .bind(before_id)
                .fetch_all(&*self.db)
                .await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(rows.len());
        for (id, raw_files) in rows {
            ids.push(id);
            let files = decode_files(&raw_files);
            if files.is_empty() {
                continue;
            }
            let paths: Vec<String> = files.into_iter().map(|f| f.path).collect();
            if let Err(err) = self.blobs.delete(&paths).await {
                warn!("blob cleanup for record {id} failed during purge: {err}");
            }
        }

        let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM upload_record WHERE id IN (");
        let mut separated = query.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        query.push(")");
        let result = query.build().execute(&*self.db).await?;
        Ok(result.rows_affected())
    }
}
