//! Terminal views over the document API: the library table and the upload
//! form. Both keep their own state (rows, last error) and only change it in
//! response to finished API calls.

use crate::{
    client::api::{ClientError, ClientResult, DocumentClient, UploadRequest},
    models::{
        document::{Document, DocumentResponse},
        identity::Identity,
    },
    services::document_service::{MAX_UPLOAD_BYTES, PDF_MEDIA_TYPE, may_delete},
};
use bytes::Bytes;
use chrono::Local;
use std::path::PathBuf;
use tracing::error;

const GENERIC_ERROR: &str = "Something went wrong, please try again";

/// Where the client goes after an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Library,
    Upload,
}

/// The document table.
pub struct LibraryView {
    client: DocumentClient,
    /// Only list documents owned by the current identity.
    pub mine_only: bool,
    pub rows: Vec<DocumentResponse>,
    pub error: Option<String>,
}

impl LibraryView {
    pub fn new(client: DocumentClient) -> Self {
        Self {
            client,
            mine_only: false,
            rows: Vec::new(),
            error: None,
        }
    }

    /// Identity of the viewer, taken from the held token on every call.
    pub fn viewer(&self) -> Option<Identity> {
        self.client.tokens().identity()
    }

    /// Reload the rows, scoped to the viewer when `mine_only` is set and a
    /// viewer is known.
    pub async fn refresh(&mut self) -> ClientResult<()> {
        let viewer = self.viewer();
        let scope = if self.mine_only {
            viewer.as_ref().map(|v| v.id.as_str())
        } else {
            None
        };

        match self.client.list(scope).await {
            Ok(rows) => {
                self.rows = rows;
                self.error = None;
                Ok(())
            }
            Err(err) => {
                self.record(&err);
                Err(err)
            }
        }
    }

    pub async fn set_mine_only(&mut self, mine_only: bool) -> ClientResult<()> {
        self.mine_only = mine_only;
        self.refresh().await
    }

    /// Delete is offered only on rows the viewer owns.
    pub fn can_delete(&self, doc: &Document) -> bool {
        self.viewer()
            .map(|viewer| may_delete(&viewer, doc))
            .unwrap_or(false)
    }

    /// Delete `id` on the server, then drop it from the local rows.
    pub async fn delete(&mut self, id: i64) -> ClientResult<()> {
        match self.client.delete(id).await {
            Ok(_) => {
                self.rows.retain(|row| row.document.id != id);
                self.error = None;
                Ok(())
            }
            Err(err) => {
                self.record(&err);
                Err(err)
            }
        }
    }

    fn record(&mut self, err: &ClientError) {
        error!("library request failed: {}", err);
        self.error = Some(display_message(err));
    }

    /// Plain-text table of the current rows.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(err) = &self.error {
            out.push_str(&format!("error: {}\n", err));
        }
        if self.rows.is_empty() {
            out.push_str("No documents found.\n");
            return out;
        }

        let header = ["ID", "TITLE", "CATEGORY", "OWNER", "SIZE", "UPLOADED", ""];
        let mut table: Vec<[String; 7]> = vec![header.map(str::to_string)];
        for row in &self.rows {
            let doc = &row.document;
            table.push([
                doc.id.to_string(),
                doc.title.clone(),
                doc.category.clone(),
                doc.user_name
                    .clone()
                    .unwrap_or_else(|| "Anonymous User".to_string()),
                format_file_size(doc.filesize),
                doc.uploaded_at
                    .with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M")
                    .to_string(),
                if self.can_delete(doc) {
                    "[delete]".to_string()
                } else {
                    String::new()
                },
            ]);
        }

        let mut widths = [0usize; 7];
        for line in &table {
            for (i, cell) in line.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
        for line in &table {
            let cells: Vec<String> = line
                .iter()
                .zip(widths)
                .map(|(cell, w)| format!("{:<w$}", cell, w = w))
                .collect();
            out.push_str(cells.join("  ").trim_end());
            out.push('\n');
        }
        out
    }
}

/// A file picked for upload.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl SelectedFile {
    /// Read a file from disk, deriving its media type from the extension.
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let bytes = tokio::fs::read(&path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        let is_pdf = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        let content_type = if is_pdf {
            PDF_MEDIA_TYPE
        } else {
            "application/octet-stream"
        };
        Ok(Self {
            filename,
            content_type: content_type.to_string(),
            bytes: Bytes::from(bytes),
        })
    }
}

/// The upload form.
#[derive(Debug, Clone)]
pub struct UploadForm {
    pub title: String,
    pub description: String,
    pub category: String,
    pub file: Option<SelectedFile>,
    pub error: Option<String>,
}

impl Default for UploadForm {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            category: "general".to_string(),
            file: None,
            error: None,
        }
    }
}

impl UploadForm {
    /// Select a file, rejecting it up front when the server would.
    pub fn select_file(&mut self, file: SelectedFile) -> Result<(), String> {
        if let Err(msg) = check_file(&file) {
            self.file = None;
            self.error = Some(msg.clone());
            return Err(msg);
        }
        self.file = Some(file);
        self.error = None;
        Ok(())
    }

    /// Client-side checks mirroring the server's.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Title is required".to_string());
        }
        match &self.file {
            None => Err("You must select a PDF file".to_string()),
            Some(file) => check_file(file),
        }
    }

    /// Validate and upload. On success the caller should navigate to the
    /// library; on failure the message stays in `error`.
    pub async fn submit(&mut self, client: &DocumentClient) -> ClientResult<Route> {
        if let Err(msg) = self.validate() {
            self.error = Some(msg.clone());
            return Err(ClientError::Validation(msg));
        }
        let Some(file) = self.file.clone() else {
            return Err(ClientError::Validation("You must select a PDF file".into()));
        };

        let request = UploadRequest {
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            filename: file.filename,
            content_type: file.content_type,
            bytes: file.bytes,
        };

        match client.upload(request).await {
            Ok(_) => {
                self.error = None;
                Ok(Route::Library)
            }
            Err(err) => {
                error!("upload failed: {}", err);
                self.error = Some(display_message(&err));
                Err(err)
            }
        }
    }
}

fn check_file(file: &SelectedFile) -> Result<(), String> {
    if !file.content_type.eq_ignore_ascii_case(PDF_MEDIA_TYPE) {
        return Err("Only PDF files are allowed".to_string());
    }
    if file.bytes.len() as u64 > MAX_UPLOAD_BYTES {
        return Err("The file must not exceed 20MB".to_string());
    }
    Ok(())
}

/// Message to show for `err`: the server's or validation text when there is
/// one, a generic line for transport failures.
pub fn display_message(err: &ClientError) -> String {
    match err {
        ClientError::Api { message, .. } | ClientError::Validation(message) => message.clone(),
        ClientError::Http(_) | ClientError::Io(_) => GENERIC_ERROR.to_string(),
    }
}

/// Human-readable byte count.
pub fn format_file_size(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes <= 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}
