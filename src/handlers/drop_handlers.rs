//! HTTP handlers for the drop API.
//!
//! The upload handler is the orchestrator: it writes each incoming file to
//! the blob store first and only then creates the metadata record, so a
//! failure partway leaves unreferenced blobs rather than a record pointing
//! at payloads that never landed. Downloads stream straight from the blob
//! store and pass single byte ranges through.

use crate::{
    errors::AppError,
    models::record::{FileItem, UploadRecord},
    services::blob_store::{BlobStore, ByteRange},
    services::record_repository::NewRecord,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

/// Query params accepted by `GET /api/list`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Pagination cursor: only records with a strictly smaller id are
    /// returned. Values that do not parse as an integer are ignored.
    #[serde(rename = "beforeId")]
    pub before_id: Option<String>,
}

/// Request body for `POST /api/delete`.
#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub id: i64,
}

/// Request body for `POST /api/purge`.
#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    #[serde(rename = "beforeId")]
    pub before_id: i64,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: i64,
    pub record: UploadRecord,
}

/// GET `/api/list` — latest page of records, or the page older than
/// `?beforeId=` when given.
pub async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<UploadRecord>>, AppError> {
    let before_id = query.before_id.as_deref().and_then(|s| s.parse().ok());
    let records = state.repo.list_records(before_id).await?;
    Ok(Json(records))
}

/// POST `/api/upload` — multipart form with any number of `files` parts,
/// optional `thumbnails` text parts paired with files by position, and an
/// optional `message` part. The uploader comes from the `x-uploader` header.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let uploader = headers
        .get("x-uploader")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    // One prefix per upload keeps blob keys unique across requests even for
    // identical filenames.
    let prefix = format!("drops/{}", Utc::now().timestamp_millis());
    let mut files: Vec<FileItem> = Vec::new();
    let mut thumbnails: Vec<String> = Vec::new();
    let mut message = String::new();

    while let Some(field) = multipart.next_field().await? {
        let Some(field_name) = field.name().map(str::to_string) else {
            continue;
        };
        match field_name.as_str() {
            "files" => {
                let Some(name) = field.file_name().map(str::to_string) else {
                    continue;
                };
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?;
                let path = format!("{prefix}/{name}");
                let size = state
                    .blobs
                    .put(&path, content_type.as_deref(), data)
                    .await?;
                files.push(FileItem {
                    name,
                    size: size as i64,
                    path,
                    thumbnail: String::new(),
                });
            }
            "thumbnails" => thumbnails.push(field.text().await?),
            "message" => message = field.text().await?,
            _ => {}
        }
    }

    if files.is_empty() && message.is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "no files or message"));
    }

    for (file, thumbnail) in files.iter_mut().zip(thumbnails) {
        file.thumbnail = thumbnail;
    }

    let size = files.iter().map(|f| f.size).sum();
    let (id, record) = state
        .repo
        .create_record(NewRecord {
            uploader,
            size,
            files,
            message,
        })
        .await?;

    Ok(Json(UploadResponse { id, record }))
}

/// GET `/api/download/{id}/{index}` — stream one file of a record, by
/// position. `index = "message"` returns the record's message as plain text.
pub async fn download(
    State(state): State<AppState>,
    Path((id, index)): Path<(i64, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let Some(record) = state.repo.get_record(id).await? else {
        return Err(AppError::not_found(format!("record {id} not found")));
    };

    if index == "message" {
        return Ok(record.message.into_response());
    }

    let file = index
        .parse::<usize>()
        .ok()
        .and_then(|i| record.files.get(i))
        .ok_or_else(|| AppError::not_found(format!("record {id} has no file {index}")))?;

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(ByteRange::parse);

    let Some(reader) = state.blobs.get(&file.path, range).await? else {
        return Err(AppError::not_found("file not found"));
    };

    let basename = file
        .path
        .rsplit('/')
        .next()
        .unwrap_or(&file.path)
        .split('?')
        .next()
        .unwrap_or_default()
        .to_string();

    let status = if reader.range_start.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let content_type = reader
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());

    let stream = ReaderStream::new(reader.file.take(reader.len));
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;

    let resp_headers = response.headers_mut();
    resp_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    resp_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&reader.len.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    if let Some(start) = reader.range_start {
        let content_range = format!(
            "bytes {}-{}/{}",
            start,
            start + reader.len - 1,
            reader.total_len
        );
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            resp_headers.insert(header::CONTENT_RANGE, value);
        }
    }
    if !served_inline(&basename) {
        let disposition = format!("attachment; filename=\"{basename}\"");
        resp_headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(&disposition)
                .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
        );
    }

    Ok(response)
}

/// POST `/api/delete` — delete one record. Deleting a missing id is a no-op.
pub async fn delete_record(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.repo.delete_record(req.id).await?;
    Ok(Json(json!({ "ok": true })))
}

/// POST `/api/purge` — bulk-delete every record with id below `beforeId`.
pub async fn purge_records(
    State(state): State<AppState>,
    Json(req): Json<PurgeRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let purged = state.repo.purge_records_before(req.before_id).await?;
    Ok(Json(json!({ "ok": true, "purged": purged })))
}

/// Extensions a browser can render directly; everything else is served as an
/// attachment.
const INLINE_EXTENSIONS: [&str; 13] = [
    "jpg", "png", "gif", "avif", "mp4", "mov", "txt", "html", "js", "css", "json", "yaml", "yml",
];

fn served_inline(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            INLINE_EXTENSIONS
                .iter()
                .any(|candidate| ext.eq_ignore_ascii_case(candidate))
        })
        .unwrap_or(false)
}
