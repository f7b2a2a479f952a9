//! src/services/document_service.rs
//!
//! DocumentService — the document library operations, backed by SQLite for
//! metadata and the [`BlobStore`] for file payloads.
//!
//! Each operation is a short sequence of single SQL statements; nothing is
//! serialized across requests. Upload ordering is blob-first: the file is
//! staged, the request validated, the blob renamed into place and only then
//! the row inserted. A failed insert removes the blob again.

use crate::{
    models::{
        document::{DEFAULT_CATEGORY, Document, NewDocument},
        identity::Identity,
    },
    services::blob_store::{BlobError, BlobStore, StagedBlob},
};
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{io, path::PathBuf, sync::Arc};
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, info, warn};

/// Largest accepted upload, in bytes (20 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// The only media type accepted for uploads.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

const DOCUMENT_COLUMNS: &str = "id, title, description, category, filename, filepath, \
     filesize, user_id, user_name, uploaded_at";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("{0}")]
    Validation(String),
    #[error("document {0} not found")]
    NotFound(i64),
    #[error("not allowed to delete this document")]
    Forbidden,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<BlobError> for DocumentError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::TooLarge { .. } => {
                DocumentError::Validation("The file must not exceed 20 MB".into())
            }
            BlobError::Source(msg) => {
                DocumentError::Validation(format!("Could not read the uploaded file: {}", msg))
            }
            BlobError::Io(err) => DocumentError::Io(err),
        }
    }
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// A received file part whose bytes are already staged on disk.
#[derive(Debug)]
pub struct UploadedFile {
    /// Filename as sent by the client.
    pub filename: String,
    pub blob: StagedBlob,
}

/// Fields of an upload form, as received.
#[derive(Debug, Default)]
pub struct NewUpload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub file: Option<UploadedFile>,
}

/// Returns true when `content_type` names the PDF media type, ignoring
/// parameters and case.
pub fn is_pdf_media_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|essence| essence.trim().eq_ignore_ascii_case(PDF_MEDIA_TYPE))
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct DocumentService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Directory holding the uploaded files.
    pub blobs: BlobStore,
}

impl DocumentService {
    pub fn new(db: Arc<SqlitePool>, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            blobs: BlobStore::new(storage_dir),
        }
    }

    /// All documents, newest first, optionally only those owned by `user_id`.
    ///
    /// The filter is whatever the caller asks for; it is not tied to the
    /// caller's own identity.
    pub async fn list(&self, user_id: Option<&str>) -> DocumentResult<Vec<Document>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT ");
        builder.push(DOCUMENT_COLUMNS);
        builder.push(" FROM documents");

        if let Some(user_id) = user_id {
            builder.push(" WHERE user_id = ");
            builder.push_bind(user_id);
        }

        builder.push(" ORDER BY uploaded_at DESC, id DESC");

        let rows: Vec<Document> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows)
    }

    pub async fn get(&self, id: i64) -> DocumentResult<Document> {
        sqlx::query_as::<_, Document>(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(DocumentError::NotFound(id))
    }

    /// Validate an upload, move its blob into place and record it as owned
    /// by `identity`.
    ///
    /// On validation failure the staged blob is dropped, so neither a blob
    /// nor a row is left behind.
    pub async fn create(&self, upload: NewUpload, identity: &Identity) -> DocumentResult<Document> {
        let file = upload
            .file
            .ok_or_else(|| DocumentError::Validation("No file was uploaded".into()))?;

        let title = upload
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DocumentError::Validation("The document title is required".into()))?;

        let description = upload.description.unwrap_or_default();
        let category = upload
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

        let filesize = file.blob.size() as i64;
        let blob_path = self.blobs.commit(file.blob, &file.filename).await?;

        let new_doc = NewDocument {
            title,
            description,
            category,
            filename: file.filename,
            filepath: blob_path.to_string_lossy().into_owned(),
            filesize,
            user_id: identity.id.clone(),
            user_name: identity.name.clone(),
        };

        match self.insert(&new_doc).await {
            Ok(doc) => {
                info!(
                    "stored document {} ({} bytes) for user {}",
                    doc.id, doc.filesize, identity.id
                );
                Ok(doc)
            }
            Err(err) => {
                if let Err(cleanup) = self.blobs.remove(&blob_path).await {
                    warn!(
                        "orphaned blob {} after failed insert: {}",
                        blob_path.display(),
                        cleanup
                    );
                }
                Err(err)
            }
        }
    }

    async fn insert(&self, doc: &NewDocument) -> DocumentResult<Document> {
        let row = sqlx::query_as::<_, Document>(&format!(
            r#"
            INSERT INTO documents (
                title, description, category, filename, filepath, filesize,
                user_id, user_name, uploaded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(&doc.title)
        .bind(&doc.description)
        .bind(&doc.category)
        .bind(&doc.filename)
        .bind(&doc.filepath)
        .bind(doc.filesize)
        .bind(&doc.user_id)
        .bind(&doc.user_name)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;
        Ok(row)
    }

    /// Look up a document and open its blob for streaming out.
    ///
    /// A row whose blob has disappeared is reported as not found.
    pub async fn open_download(&self, id: i64) -> DocumentResult<(Document, File)> {
        let doc = self.get(id).await?;
        let file = self.blobs.open(&doc.filepath).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                warn!("document {} points at missing blob {}", id, doc.filepath);
                DocumentError::NotFound(id)
            } else {
                DocumentError::Io(err)
            }
        })?;
        Ok((doc, file))
    }

    /// Delete a document on behalf of `identity`.
    ///
    /// Only a non-anonymous caller whose id equals the stored owner may
    /// delete. The row goes first; the blob is removed best-effort.
    pub async fn delete(&self, id: i64, identity: &Identity) -> DocumentResult<Document> {
        let doc = self.get(id).await?;

        if !may_delete(identity, &doc) {
            debug!(
                "user {} refused delete of document {} owned by {:?}",
                identity.id, id, doc.user_id
            );
            return Err(DocumentError::Forbidden);
        }

        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DocumentError::NotFound(id));
        }

        if let Err(err) = self.blobs.remove(&doc.filepath).await {
            warn!("failed to remove blob {} of document {}: {}", doc.filepath, id, err);
        }

        info!("deleted document {} for user {}", id, identity.id);
        Ok(doc)
    }
}

/// Ownership rule for deletes.
pub fn may_delete(identity: &Identity, doc: &Document) -> bool {
    !identity.is_anonymous() && doc.user_id.as_deref() == Some(identity.id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::test_pool, services::blob_store::test_dir};
    use bytes::Bytes;
    use futures::stream;
    use tokio::fs;

    fn user(id: &str) -> Identity {
        Identity {
            id: id.into(),
            name: format!("User {}", id),
        }
    }

    async fn service() -> DocumentService {
        DocumentService::new(Arc::new(test_pool().await), test_dir())
    }

    async fn staged(svc: &DocumentService, bytes: Vec<u8>) -> UploadedFile {
        let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from(bytes))]);
        UploadedFile {
            filename: "spec.pdf".into(),
            blob: svc.blobs.stage(body, MAX_UPLOAD_BYTES).await.unwrap(),
        }
    }

    async fn upload(svc: &DocumentService, title: &str, owner: &Identity) -> Document {
        let file = staged(svc, vec![b'x'; 64]).await;
        svc.create(
            NewUpload {
                title: Some(title.into()),
                file: Some(file),
                ..Default::default()
            },
            owner,
        )
        .await
        .unwrap()
    }

    async fn blob_count(svc: &DocumentService) -> usize {
        let mut count = 0;
        let mut entries = fs::read_dir(svc.blobs.base_path()).await.unwrap();
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[test]
    fn pdf_media_type_ignores_parameters() {
        assert!(is_pdf_media_type(Some("application/pdf")));
        assert!(is_pdf_media_type(Some("Application/PDF; name=x")));
        assert!(!is_pdf_media_type(Some("text/plain")));
        assert!(!is_pdf_media_type(None));
    }

    #[tokio::test]
    async fn create_stamps_owner_and_defaults() {
        let svc = service().await;
        let file = staged(&svc, vec![0u8; 10240]).await;
        let doc = svc
            .create(
                NewUpload {
                    title: Some("Spec".into()),
                    category: Some("manual".into()),
                    file: Some(file),
                    ..Default::default()
                },
                &user("u1"),
            )
            .await
            .unwrap();

        assert_eq!(doc.title, "Spec");
        assert_eq!(doc.category, "manual");
        assert_eq!(doc.description, "");
        assert_eq!(doc.filesize, 10240);
        assert_eq!(doc.filename, "spec.pdf");
        assert_eq!(doc.user_id.as_deref(), Some("u1"));
        assert_eq!(doc.user_name.as_deref(), Some("User u1"));
        assert!(doc.filepath.ends_with(".pdf"));
        assert_eq!(fs::metadata(&doc.filepath).await.unwrap().len(), 10240);

        let other = upload(&svc, "Other", &Identity::anonymous()).await;
        assert_eq!(other.category, DEFAULT_CATEGORY);
        assert_eq!(other.user_id.as_deref(), Some("anonymous"));
    }

    #[tokio::test]
    async fn blank_title_leaves_no_blob_or_row() {
        let svc = service().await;
        let file = staged(&svc, vec![1u8; 32]).await;
        let err = svc
            .create(
                NewUpload {
                    title: Some("   ".into()),
                    file: Some(file),
                    ..Default::default()
                },
                &user("u1"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DocumentError::Validation(_)));
        assert_eq!(blob_count(&svc).await, 0);
        assert!(svc.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_a_validation_error() {
        let svc = service().await;
        let err = svc
            .create(
                NewUpload {
                    title: Some("No file".into()),
                    ..Default::default()
                },
                &user("u1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Validation(_)));
    }

    #[tokio::test]
    async fn list_filters_by_owner_newest_first() {
        let svc = service().await;
        let first = upload(&svc, "first", &user("u1")).await;
        let _ = upload(&svc, "second", &user("u2")).await;
        let third = upload(&svc, "third", &user("u1")).await;

        let all = svc.list(None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].title, "third");

        let mine = svc.list(Some("u1")).await.unwrap();
        let ids: Vec<i64> = mine.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![third.id, first.id]);

        assert!(svc.list(Some("nobody")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_requires_matching_owner() {
        let svc = service().await;
        let doc = upload(&svc, "Spec", &user("u1")).await;

        let err = svc.delete(doc.id, &user("u2")).await.unwrap_err();
        assert!(matches!(err, DocumentError::Forbidden));
        let err = svc.delete(doc.id, &Identity::anonymous()).await.unwrap_err();
        assert!(matches!(err, DocumentError::Forbidden));
        assert_eq!(svc.list(None).await.unwrap().len(), 1);

        svc.delete(doc.id, &user("u1")).await.unwrap();
        assert!(svc.list(None).await.unwrap().is_empty());
        assert!(fs::metadata(&doc.filepath).await.is_err());

        let err = svc.delete(doc.id, &user("u1")).await.unwrap_err();
        assert!(matches!(err, DocumentError::NotFound(_)));
    }

    #[tokio::test]
    async fn anonymous_uploads_cannot_be_deleted_by_anyone() {
        let svc = service().await;
        let doc = upload(&svc, "Orphan", &Identity::anonymous()).await;
        let err = svc.delete(doc.id, &Identity::anonymous()).await.unwrap_err();
        assert!(matches!(err, DocumentError::Forbidden));
    }

    #[tokio::test]
    async fn download_of_unknown_or_deleted_id_is_not_found() {
        let svc = service().await;
        assert!(matches!(
            svc.open_download(99).await.unwrap_err(),
            DocumentError::NotFound(99)
        ));

        let doc = upload(&svc, "Spec", &user("u1")).await;
        let (meta, _file) = svc.open_download(doc.id).await.unwrap();
        assert_eq!(meta.filename, "spec.pdf");

        svc.delete(doc.id, &user("u1")).await.unwrap();
        assert!(matches!(
            svc.open_download(doc.id).await.unwrap_err(),
            DocumentError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn missing_blob_reads_as_not_found() {
        let svc = service().await;
        let doc = upload(&svc, "Spec", &user("u1")).await;
        fs::remove_file(&doc.filepath).await.unwrap();
        assert!(matches!(
            svc.open_download(doc.id).await.unwrap_err(),
            DocumentError::NotFound(_)
        ));
    }
}
