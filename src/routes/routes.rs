//! Defines routes for the document library API.
//!
//! ## Structure
//! - **Documents** (JSON unless noted)
//!   - `GET    /api/documents?userId=`       — list, optional owner filter
//!   - `POST   /api/documents`               — multipart upload
//!   - `GET    /api/documents/{id}`          — single record
//!   - `GET    /api/documents/{id}/download` — file stream
//!   - `DELETE /api/documents/{id}`          — owner-only delete
//!
//! - **Blobs**: `GET /uploads/{name}` serves the blob store directly.
//! - **Probes**: `/healthz`, `/readyz`.

use crate::{
    AppState,
    errors::error_detail_middleware,
    handlers::{
        document_handlers::{
            delete_document, download_document, get_document, list_documents, upload_document,
        },
        health_handlers::{healthz, readyz},
    },
    middleware::identity::{ACCESS_TOKEN_HEADER, identity_middleware},
    services::document_service::MAX_UPLOAD_BYTES,
};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Room for the multipart framing and text fields around a maximal file, so
/// oversized files are rejected by the upload handler rather than the limit.
const BODY_LIMIT_BYTES: usize = MAX_UPLOAD_BYTES as usize + 4 * 1024 * 1024;

/// Build the router for every route, with shared state applied.
pub fn routes(state: AppState, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/documents", get(list_documents).post(upload_document))
        .route("/documents/{id}", get(get_document).delete(delete_document))
        .route("/documents/{id}/download", get(download_document))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ));

    let uploads = Router::new()
        .fallback_service(ServeDir::new(state.documents.blobs.base_path()))
        .layer(axum::middleware::from_fn(hide_dot_files));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api", api)
        .nest_service("/uploads", uploads)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            error_detail_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// Staging and readiness-check files in the blob directory start with a dot; they are
/// never served.
async fn hide_dot_files(request: Request, next: Next) -> Response {
    let hidden = request
        .uri()
        .path()
        .split('/')
        .any(|segment| segment.starts_with('.'));
    if hidden {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(ACCESS_TOKEN_HEADER),
        ])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::test_pool, middleware::identity::TokenDecoder,
        services::{blob_store::test_dir, document_service::DocumentService},
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use base64::{Engine as _, engine::general_purpose};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "docLibraryTestBoundary";

    async fn state(expose_error_details: bool) -> AppState {
        AppState {
            documents: DocumentService::new(Arc::new(test_pool().await), test_dir()),
            tokens: TokenDecoder::unverified(),
            expose_error_details,
        }
    }

    async fn app() -> Router {
        routes(state(true).await, &["http://localhost:5173".to_string()])
    }

    fn token_for(id: &str) -> String {
        let payload = general_purpose::URL_SAFE_NO_PAD
            .encode(json!({"id": id, "username": format!("user-{}", id)}).to_string());
        format!("eyJhbGciOiJub25lIn0.{}.", payload)
    }

    fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        if let Some((filename, content_type, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    BOUNDARY, filename, content_type
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>, user: Option<&str>) -> Request<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/api/documents")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            );
        if let Some(user) = user {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token_for(user)));
        }
        req.body(Body::from(body)).unwrap()
    }

    fn request(method: &str, uri: &str, user: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header(ACCESS_TOKEN_HEADER, token_for(user));
        }
        req.body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, req).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn upload_list_delete_scenario() {
        let app = app().await;
        let pdf = vec![b'%'; 10240];

        let body = multipart_body(
            &[("title", "Spec"), ("category", "manual")],
            Some(("spec.pdf", "application/pdf", &pdf)),
        );
        let (status, created) = send_json(&app, upload_request(body, Some("u1"))).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_i64().unwrap();

        let (status, list) = send_json(&app, request("GET", "/api/documents", None)).await;
        assert_eq!(status, StatusCode::OK);
        let list = list.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["category"], "manual");
        assert_eq!(list[0]["filesize"], 10240);
        assert_eq!(list[0]["user_id"], "u1");
        assert_eq!(list[0]["user_name"], "user-u1");
        assert_eq!(list[0]["downloadUrl"], format!("/api/documents/{}/download", id));

        let uri = format!("/api/documents/{}", id);
        let (status, _) = send_json(&app, request("DELETE", &uri, Some("u2"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send_json(&app, request("DELETE", &uri, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send_json(&app, request("DELETE", &uri, Some("u1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].is_string());

        let (_, list) = send_json(&app, request("GET", "/api/documents", None)).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn title_may_follow_the_file_part() {
        let app = app().await;
        let mut body = multipart_body(&[], Some(("late.pdf", "application/pdf", b"%PDF")));
        // move the closing boundary so the title part comes after the file
        body.truncate(body.len() - format!("--{}--\r\n", BOUNDARY).len());
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nLate\r\n--{b}--\r\n",
                b = BOUNDARY
            )
            .as_bytes(),
        );
        let (status, _) = send_json(&app, upload_request(body, None)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, list) = send_json(&app, request("GET", "/api/documents", None)).await;
        assert_eq!(list[0]["title"], "Late");
        assert_eq!(list[0]["user_id"], "anonymous");
        assert_eq!(list[0]["category"], "other");
    }

    #[tokio::test]
    async fn invalid_uploads_are_rejected_without_records() {
        let app = app().await;

        let cases = [
            multipart_body(&[("title", "Notes")], Some(("notes.txt", "text/plain", b"hi"))),
            multipart_body(&[("title", "")], Some(("a.pdf", "application/pdf", b"%PDF"))),
            multipart_body(&[("title", "No file")], None),
        ];
        for body in cases {
            let (status, err) = send_json(&app, upload_request(body, Some("u1"))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(err["message"].is_string());
        }

        let (_, list) = send_json(&app, request("GET", "/api/documents", None)).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_file_is_a_validation_error() {
        let app = app().await;
        let big = vec![0u8; MAX_UPLOAD_BYTES as usize + 1];
        let body = multipart_body(&[("title", "Big")], Some(("big.pdf", "application/pdf", &big)));
        let (status, _) = send_json(&app, upload_request(body, Some("u1"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, list) = send_json(&app, request("GET", "/api/documents", None)).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_user_id_query() {
        let app = app().await;
        for (title, user) in [("a", "u1"), ("b", "u2"), ("c", "u1")] {
            let body = multipart_body(
                &[("title", title)],
                Some(("f.pdf", "application/pdf", b"%PDF")),
            );
            let (status, _) = send_json(&app, upload_request(body, Some(user))).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (_, list) = send_json(&app, request("GET", "/api/documents?userId=u1", None)).await;
        let titles: Vec<&str> = list
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn download_streams_original_bytes() {
        let app = app().await;
        let body = multipart_body(
            &[("title", "Spec")],
            Some(("spec.pdf", "application/pdf", b"%PDF-1.7 body")),
        );
        let (_, created) = send_json(&app, upload_request(body, Some("u1"))).await;
        let id = created["id"].as_i64().unwrap();

        let resp = app
            .clone()
            .oneshot(request("GET", &format!("/api/documents/{}/download", id), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let disposition = resp.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.contains("filename=\"spec.pdf\""));
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"%PDF-1.7 body");

        let (_, doc) = send_json(&app, request("GET", &format!("/api/documents/{}", id), None)).await;
        let view_url = doc["viewUrl"].as_str().unwrap().to_string();
        let (status, bytes) = send(&app, request("GET", &view_url, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"%PDF-1.7 body");
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let app = app().await;
        let (status, _) = send_json(&app, request("GET", "/api/documents/42/download", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send_json(&app, request("GET", "/api/documents/42", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send_json(&app, request("DELETE", "/api/documents/42", Some("u1"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blob_dir_dot_files_are_not_served() {
        let state = state(true).await;
        let dir = state.documents.blobs.base_path().to_path_buf();
        let app = routes(state, &[]);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(".tmp-staging"), b"partial").await.unwrap();
        tokio::fs::write(dir.join("kept.pdf"), b"%PDF").await.unwrap();

        let (status, _) = send(&app, request("GET", "/uploads/.tmp-staging", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, bytes) = send(&app, request("GET", "/uploads/kept.pdf", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"%PDF");
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn storage_failure_detail_only_outside_production() {
        for expose in [true, false] {
            let state = state(expose).await;
            state.documents.db.close().await;
            let app = routes(state, &[]);

            let (status, body) = send_json(&app, request("GET", "/api/documents", None)).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body["message"], "Error processing the document request");
            assert_eq!(body.get("error").is_some(), expose);
        }
    }

    #[tokio::test]
    async fn probes_report_ok() {
        let app = app().await;
        let (status, body) = send_json(&app, request("GET", "/healthz", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send_json(&app, request("GET", "/readyz", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["database"]["ok"], true);
        assert_eq!(body["checks"]["blob_store"]["ok"], true);
    }

    #[tokio::test]
    async fn cors_preflight_allows_configured_origin() {
        let app = app().await;
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/api/documents")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "DELETE")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-access-token")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(
            resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
    }
}
