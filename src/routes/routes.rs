//! Defines routes for the drop API.
//!
//! ## Structure
//! - `GET  /api/list`                 — paginated record listing (`?beforeId=` cursor)
//! - `POST /api/upload`               — multipart upload (files + thumbnails + message)
//! - `GET  /api/download/{id}/{index}` — single file by position, or the
//!   record's message when `index` is `message`
//! - `POST /api/delete`               — delete one record by id
//! - `POST /api/purge`                — bulk-delete records below an id threshold
//!
//! Health endpoints (`/healthz`, `/readyz`) are mounted at the root.

use crate::{
    handlers::{
        drop_handlers::{delete_record, download, list_records, purge_records, upload},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for the whole service.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // drop API
        .route("/api/list", get(list_records))
        .route("/api/upload", post(upload))
        .route("/api/download/{id}/{index}", get(download))
        .route("/api/delete", post(delete_record))
        .route("/api/purge", post(purge_records))
}
