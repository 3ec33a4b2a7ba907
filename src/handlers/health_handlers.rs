//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and the blob store

use crate::services::blob_store::{BlobStore, ByteRange};
use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs a lightweight query against SQLite (`SELECT 1`).
/// 2. Performs a best-effort put/get/delete round trip against the blob store.
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    // 1) SQLite check
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.repo.pool())
        .await
    {
        Ok(v) if v == 1 => (true, None::<String>),
        Ok(v) => (false, Some(format!("unexpected result: {}", v))),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    // 2) Blob store check, through the same capability uploads use.
    let probe_key = format!(".readyz-{}", Uuid::new_v4());
    let blob_check = probe_blob_store(&state, &probe_key).await;
    // Best-effort cleanup regardless of probe outcome.
    let _ = state.blobs.delete(&[probe_key]).await;

    let sqlite_ok = sqlite_check.0;
    let blobs_ok = blob_check.0;
    let overall_ok = sqlite_ok && blobs_ok;

    let mut checks = HashMap::new();
    checks.insert(
        "sqlite",
        CheckStatus {
            ok: sqlite_ok,
            error: sqlite_check.1,
        },
    );
    checks.insert(
        "blobs",
        CheckStatus {
            ok: blobs_ok,
            error: blob_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn probe_blob_store(state: &AppState, key: &str) -> (bool, Option<String>) {
    if let Err(e) = state
        .blobs
        .put(key, None, Bytes::from_static(b"readyz"))
        .await
    {
        return (false, Some(format!("could not write probe blob: {}", e)));
    }

    let reader = match state.blobs.get(key, None::<ByteRange>).await {
        Ok(Some(reader)) => reader,
        Ok(None) => return (false, Some("probe blob missing after write".into())),
        Err(e) => return (false, Some(format!("could not open probe blob: {}", e))),
    };

    let mut contents = Vec::new();
    match reader.file.take(reader.len).read_to_end(&mut contents).await {
        Ok(_) if contents == b"readyz" => (true, None),
        Ok(_) => (false, Some("probe blob content mismatch".into())),
        Err(e) => (false, Some(format!("could not read probe blob: {}", e))),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
