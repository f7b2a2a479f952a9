//! HTTP handlers for the document library.
//! Upload bodies are streamed to disk and download bodies streamed back;
//! storage concerns live in `DocumentService`.

use crate::{
    AppState,
    errors::AppError,
    models::{
        document::{CreatedResponse, DocumentResponse, MessageResponse},
        identity::Identity,
    },
    services::document_service::{
        DocumentError, MAX_UPLOAD_BYTES, NewUpload, UploadedFile, is_pdf_media_type,
    },
};
use axum::{
    Extension, Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::Field},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

/// Query params accepted by the list endpoint.
#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// GET `/api/documents?userId=` — list documents, newest first.
pub async fn list_documents(
    State(state): State<AppState>,
    Query(q): Query<ListDocumentsQuery>,
) -> Result<Json<Vec<DocumentResponse>>, AppError> {
    let user_id = q.user_id.as_deref().filter(|id| !id.is_empty());
    let docs = state.documents.list(user_id).await?;
    Ok(Json(docs.into_iter().map(DocumentResponse::from).collect()))
}

/// GET `/api/documents/{id}` — a single document with its links.
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DocumentResponse>, AppError> {
    let doc = state.documents.get(id).await?;
    Ok(Json(doc.into()))
}

/// POST `/api/documents` — multipart upload with `file`, `title`,
/// `description` and `category` parts.
pub async fn upload_document(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut upload = NewUpload::default();

    // Staged blobs clean themselves up if we bail out of this loop
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("Invalid multipart body: {}", e.body_text())))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                if upload.file.is_some() {
                    return Err(AppError::bad_request("Only one file may be uploaded"));
                }
                if !is_pdf_media_type(field.content_type()) {
                    return Err(AppError::bad_request("Only PDF files are allowed"));
                }
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|f| !f.is_empty())
                    .unwrap_or_else(|| "document.pdf".to_string());

                let blob = state
                    .documents
                    .blobs
                    .stage(field, MAX_UPLOAD_BYTES)
                    .await
                    .map_err(DocumentError::from)?;
                upload.file = Some(UploadedFile { filename, blob });
            }
            "title" => upload.title = Some(read_text(field).await?),
            "description" => upload.description = Some(read_text(field).await?),
            "category" => upload.category = Some(read_text(field).await?),
            _ => {}
        }
    }

    let doc = state.documents.create(upload, &identity).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            id: doc.id,
            message: "Document uploaded successfully".into(),
        }),
    ))
}

async fn read_text(field: Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::bad_request(format!("Invalid form field: {}", e.body_text())))
}

/// GET `/api/documents/{id}/download` — stream the file back under its
/// original name.
pub async fn download_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let (doc, file) = state.documents.open_download(id).await?;
    let length = file.metadata().await.map(|m| m.len()).ok();
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/pdf"),
    );
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&doc.filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

/// DELETE `/api/documents/{id}` — owner-only delete.
pub async fn delete_document(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    state.documents.delete(id, &identity).await?;
    Ok(Json(MessageResponse {
        message: "Document deleted successfully".into(),
    }))
}

/// `attachment` disposition with an ASCII fallback name and the exact name
/// in RFC 5987 form.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}
