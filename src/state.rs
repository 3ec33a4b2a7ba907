//! Shared state handed to every handler.

use crate::services::blob_store::BlobStore;
use crate::services::record_repository::RecordRepository;
use std::sync::Arc;

/// Router state: the record repository plus direct access to the blob store
/// for the download path.
#[derive(Clone)]
pub struct AppState {
    pub repo: RecordRepository,
    pub blobs: Arc<dyn BlobStore>,
}
