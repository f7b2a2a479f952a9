//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, no I/O
//! - GET /readyz   -> database round-trip and a blob store write/read/delete probe

use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn from_result(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// HTTP 200 when every check passes, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("database", CheckStatus::from_result(check_database(&state).await));
    checks.insert("blob_store", CheckStatus::from_result(check_blob_store(&state).await));

    let overall_ok = checks.values().all(|c| c.ok);
    let (status, label) = if overall_ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    };

    (
        status,
        Json(ReadyResponse {
            status: label,
            checks,
        }),
    )
}

async fn check_database(state: &AppState) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.documents.db)
        .await
    {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {}", v)),
        Err(e) => Err(format!("error: {}", e)),
    }
}

async fn check_blob_store(state: &AppState) -> Result<(), String> {
    let blobs = &state.documents.blobs;
    blobs
        .ensure_dir()
        .await
        .map_err(|e| format!("could not create blob dir: {}", e))?;

    let probe = blobs.base_path().join(format!(".readyz-{}", Uuid::new_v4()));
    let result = async {
        fs::write(&probe, b"readyz")
            .await
            .map_err(|e| format!("could not write probe file: {}", e))?;
        let bytes = fs::read(&probe)
            .await
            .map_err(|e| format!("could not read probe file: {}", e))?;
        if bytes != b"readyz" {
            return Err("probe file content mismatch".to_string());
        }
        Ok(())
    }
    .await;

    // best-effort cleanup, the probe result is what matters
    let _ = fs::remove_file(&probe).await;
    result
}
