//! Represents an uploaded PDF and its library metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::Path;

/// Category stamped on uploads that do not name one.
pub const DEFAULT_CATEGORY: &str = "other";

/// A single row of the `documents` table.
///
/// The struct stores metadata only; the bytes live in the blob store at
/// `filepath`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Document {
    /// Auto-increment primary key.
    pub id: i64,

    /// Human title, never empty.
    pub title: String,

    pub description: String,

    pub category: String,

    /// Original filename as sent by the uploader.
    pub filename: String,

    /// Server-side location of the blob.
    pub filepath: String,

    /// Size in bytes.
    pub filesize: i64,

    /// Owner identity id captured at upload time (`"anonymous"` for anonymous uploads).
    pub user_id: Option<String>,

    /// Owner display name captured at upload time.
    pub user_name: Option<String>,

    #[serde(rename = "uploadedAt")]
    pub uploaded_at: DateTime<Utc>,
}

/// Metadata for a row that is about to be inserted.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub description: String,
    pub category: String,
    pub filename: String,
    pub filepath: String,
    pub filesize: i64,
    pub user_id: String,
    pub user_name: String,
}

/// A document as returned by the API: the stored row plus links.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DocumentResponse {
    #[serde(flatten)]
    pub document: Document,

    /// Static URL of the blob, served from the uploads prefix.
    #[serde(rename = "viewUrl")]
    pub view_url: String,

    /// API URL that downloads the blob under its original filename.
    #[serde(rename = "downloadUrl")]
    pub download_url: String,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        let blob_name = Path::new(&document.filepath)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let view_url = format!("/uploads/{}", blob_name);
        let download_url = format!("/api/documents/{}/download", document.id);
        Self {
            document,
            view_url,
            download_url,
        }
    }
}

/// Body of `201 Created` after an upload.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreatedResponse {
    pub id: i64,
    pub message: String,
}

/// Body of a plain acknowledgement such as a successful delete.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessageResponse {
    pub message: String,
}
