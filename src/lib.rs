//! filedrop — a minimal file-drop service.
//!
//! Clients upload one or more files plus an optional message. File payloads
//! land as blobs on local disk, one metadata row per upload lands in SQLite.
//! Records are listed newest-first with an id cursor, files download with
//! byte-range support, and records can be deleted one at a time or purged in
//! bulk below an id threshold.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

pub use models::record::{FileItem, UploadRecord};
pub use services::blob_store::{BlobStore, FsBlobStore};
pub use services::record_repository::RecordRepository;
pub use state::AppState;
