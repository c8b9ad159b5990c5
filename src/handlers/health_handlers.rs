//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks disk I/O in both storage trees

use crate::services::{StorageService, layout::TEMP_PREFIX};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

const PROBE: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Very small liveness probe. Always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
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
/// Readiness probe that performs a best-effort write/read/delete in the
/// payload tree and in the metadata tree. Probe files carry the temp prefix,
/// so a leftover is never listed and is swept by recovery.
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(service): State<StorageService>) -> impl IntoResponse {
    let layout = service.layout();
    let mut checks = BTreeMap::new();
    checks.insert("data", probe_dir(layout.data_dir()).await);
    checks.insert("metadata", probe_dir(layout.metadata_dir()).await);

    let overall_ok = checks.values().all(|c| c.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn probe_dir(dir: &Path) -> CheckStatus {
    let tmp_path = dir.join(format!("{}readyz-{}", TEMP_PREFIX, Uuid::new_v4()));
    let result = match fs::write(&tmp_path, PROBE).await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) if bytes == PROBE => match fs::remove_file(&tmp_path).await {
                Ok(_) => Ok(()),
                Err(e) => Err(format!("could not remove tmp file: {}", e)),
            },
            Ok(_) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err("file content mismatch".to_string())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(format!("could not read tmp file: {}", e))
            }
        },
        Err(e) => Err(format!("could not write tmp file: {}", e)),
    };

    CheckStatus {
        ok: result.is_ok(),
        error: result.err(),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
