//! Upload records and the file entries embedded in them.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata for one upload event: one or more files and/or a text message.
///
/// Records are immutable once created. The `id` is assigned by SQLite and
/// grows monotonically; cursor pagination depends on that.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadRecord {
    /// Store-assigned, monotonically increasing identifier.
    pub id: i64,

    /// Identifier of the submitting actor.
    pub uploader: String,

    /// Creation time.
    pub ctime: DateTime<Utc>,

    /// Sum of the constituent file sizes, in bytes.
    pub size: i64,

    /// Ordered file list; the download endpoint addresses files by position.
    pub files: Vec<FileItem>,

    /// Free-text message accompanying the upload.
    pub message: String,
}

/// One file belonging to an upload record.
///
/// Not a table of its own — the whole list is serialized into the record's
/// `files` column. The `path` is the blob store key and is the only link
/// between the metadata row and the stored payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileItem {
    /// Display filename.
    #[serde(default)]
    pub name: String,

    /// Byte count as reported by the blob store at upload time.
    #[serde(default)]
    pub size: i64,

    /// Blob store key.
    #[serde(default)]
    pub path: String,

    /// Optional small preview (e.g. a data URI).
    #[serde(default)]
    pub thumbnail: String,
}

/// Row shape as stored in the `upload_record` table. `files` holds the JSON
/// encoded file list and `ctime` the naive timestamp SQLite writes for
/// `CURRENT_TIMESTAMP`, which is UTC.
#[derive(FromRow, Debug)]
pub struct RecordRow {
    pub id: i64,
    pub uploader: String,
    pub ctime: NaiveDateTime,
    pub size: i64,
    pub files: String,
    pub message: String,
}

impl RecordRow {
    /// Convert a stored row into an in-memory record.
    pub fn into_record(self) -> UploadRecord {
        UploadRecord {
            id: self.id,
            uploader: self.uploader,
            ctime: DateTime::from_naive_utc_and_offset(self.ctime, Utc),
            size: self.size,
            files: decode_files(&self.files),
            message: self.message,
        }
    }
}

/// Parse a serialized file list.
///
/// `null` entries are dropped and absent fields take their defaults. A column
/// that does not parse at all yields an empty list instead of an error, so a
/// record with unreadable file metadata stays listable and deletable.
pub fn decode_files(raw: &str) -> Vec<FileItem> {
    serde_json::from_str::<Vec<Option<FileItem>>>(raw)
        .map(|items| items.into_iter().flatten().collect())
        .unwrap_or_default()
}

/// Encode a file list for the `files` column.
pub fn encode_files(files: &[FileItem]) -> String {
    serde_json::to_string(files).unwrap_or_else(|_| "[]".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, size: i64, path: &str) -> FileItem {
        FileItem {
            name: name.into(),
            size,
            path: path.into(),
            thumbnail: String::new(),
        }
    }

    #[test]
    fn round_trip_preserves_fields() {
        let files = vec![item("a.txt", 10, "drops/1/a.txt"), item("b.jpg", 20, "drops/1/b.jpg")];
        let decoded = decode_files(&encode_files(&files));
        assert_eq!(decoded, files);
    }

    #[test]
    fn decode_drops_null_entries() {
        let raw = r#"[{"name":"a.txt","size":1,"path":"p/a.txt"},null,{"name":"b.txt","size":2,"path":"p/b.txt"}]"#;
        let decoded = decode_files(raw);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].name, "a.txt");
        assert_eq!(decoded[1].name, "b.txt");
    }

    #[test]
    fn decode_defaults_missing_fields() {
        let decoded = decode_files(r#"[{"name":"a.txt"}]"#);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].size, 0);
        assert_eq!(decoded[0].path, "");
        assert_eq!(decoded[0].thumbnail, "");
    }

    #[test]
    fn decode_malformed_yields_empty() {
        assert!(decode_files("").is_empty());
        assert!(decode_files("not json").is_empty());
        assert!(decode_files(r#"{"name":"a"}"#).is_empty());
    }

    #[test]
    fn encode_empty_list() {
        assert_eq!(encode_files(&[]), "[]");
    }
}
