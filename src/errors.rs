use crate::{AppState, services::document_service::DocumentError};
use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Internal error text, only rendered outside production.
    pub detail: Option<String>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            detail: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

/// Internal error text riding along with a rendered [`AppError`] until
/// [`error_detail_middleware`] decides whether it goes into the body.
#[derive(Clone, Debug)]
struct ErrorDetail {
    body: Value,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({
            "message": self.message,
            "status": self.status.as_u16()
        });

        let mut response = (self.status, Json(body.clone())).into_response();
        if let Some(detail) = self.detail {
            response
                .extensions_mut()
                .insert(ErrorDetail { body, detail });
        }
        response
    }
}

/// Re-render error bodies with their `"error"` detail, unless the state says
/// details are hidden (production).
pub async fn error_detail_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if state.expose_error_details {
        with_error_detail(response)
    } else {
        response
    }
}

fn with_error_detail(mut response: Response) -> Response {
    let Some(ErrorDetail { mut body, detail }) = response.extensions_mut().remove::<ErrorDetail>()
    else {
        return response;
    };
    body["error"] = json!(detail);
    (response.status(), Json(body)).into_response()
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("unexpected error: {:#}", err);
        AppError::internal("An unexpected error occurred").with_detail(format!("{:#}", err))
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Validation(msg) => AppError::bad_request(msg),
            DocumentError::NotFound(_) => AppError::not_found("Document not found"),
            DocumentError::Forbidden => AppError::new(
                StatusCode::FORBIDDEN,
                "You do not have permission to delete this document",
            ),
            DocumentError::Sqlx(e) => {
                tracing::error!("database error: {}", e);
                AppError::internal("Error processing the document request").with_detail(e.to_string())
            }
            DocumentError::Io(e) => {
                tracing::error!("storage I/O error: {}", e);
                AppError::internal("Error processing the document request").with_detail(e.to_string())
            }
        }
    }
}
