//! Data model for the file-drop service.
//!
//! A single entity: the upload record, with its file list serialized into
//! one column rather than normalized into a second table. It maps to its
//! table via `sqlx::FromRow` and serializes as JSON via `serde`.

pub mod record;
