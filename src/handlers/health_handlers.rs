//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata DB and object storage

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness probe; never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 200 when both the metadata store answers `SELECT 1` and the object-store
/// root accepts a write/read/delete probe, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };
    let storage = probe_storage(&state.store.base_path).await;

    let overall_ok = sqlite.ok && storage.ok;
    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite);
    checks.insert("storage", storage);

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    (status, Json(body))
}

async fn probe_storage(base: &Path) -> CheckStatus {
    let tmp_path = base.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&tmp_path, b"readyz").await {
        return CheckStatus::failed(format!("could not write tmp file: {}", e));
    }
    let check = match fs::read(&tmp_path).await {
        Ok(bytes) if bytes == b"readyz" => CheckStatus::ok(),
        Ok(_) => CheckStatus::failed("file content mismatch"),
        Err(e) => CheckStatus::failed(format!("could not read tmp file: {}", e)),
    };
    match fs::remove_file(&tmp_path).await {
        Err(e) if check.ok => CheckStatus {
            ok: true,
            error: Some(format!("could not remove tmp file: {}", e)),
        },
        _ => check,
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
