use crate::error::ApiError;
use crate::pipeline::batch::process_video;
use crate::state::AppState;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::crowd::BatchReport;
use common::validation::sanitize_filename;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

const UPLOAD_FIELD: &str = "file";

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "CrowdSentry Analysis API is running."
    }))
}

/// Health check endpoint
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "crowd-service"
        })),
    )
}

/// Readiness check endpoint
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let detector = state.detector();
    let detector_ready = match detector.health_check().await {
        Ok(ready) => ready,
        Err(e) => {
            warn!(error = %e, "detector health check failed");
            false
        }
    };

    let ready = detector_ready && !state.is_shutting_down();
    let status = if ready { "ready" } else { "not ready" };
    let body = Json(json!({
        "status": status,
        "detector": detector.id(),
        "live_sessions": state.live_session_count().await,
    }));

    if ready {
        (StatusCode::OK, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body)
    }
}

/// Prometheus metrics endpoint
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::render() {
        Ok(text) => text.into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Stream the upload field to `dir`, returning the staged path.
async fn stage_upload(multipart: &mut Multipart, dir: &Path, job_id: &str) -> Result<PathBuf, ApiError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let original = field.file_name().unwrap_or("upload.mp4").to_string();
        let file_name = sanitize_filename(&original).map_err(|e| ApiError::bad_request(e.to_string()))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ApiError::internal(format!("failed to create upload directory: {}", e)))?;

        let path = dir.join(format!("{}_{}", job_id, file_name));
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| ApiError::internal(format!("failed to stage upload: {}", e)))?;

        let mut written = 0usize;
        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    remove_upload(&path).await;
                    return Err(ApiError::bad_request(format!("upload interrupted: {}", e)));
                }
            };
            written += chunk.len();
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                remove_upload(&path).await;
                return Err(ApiError::internal(format!("failed to stage upload: {}", e)));
            }
        }
        if let Err(e) = file.flush().await {
            remove_upload(&path).await;
            return Err(ApiError::internal(format!("failed to stage upload: {}", e)));
        }

        info!(file = %original, bytes = written, "upload staged");
        return Ok(path);
    }

    Err(ApiError::bad_request(format!(
        "multipart field '{}' is required",
        UPLOAD_FIELD
    )))
}

async fn remove_upload(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove upload");
        }
    }
}

/// Analyse an uploaded video and return the batch report.
pub async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BatchReport>, ApiError> {
    let job_id = Uuid::new_v4().simple().to_string();
    let config = state.config();
    let upload = stage_upload(&mut multipart, &config.upload_dir, &job_id).await?;

    info!(job_id = %job_id, "starting analysis");
    let result = process_video(config, state.detector(), &upload, &job_id).await;
    remove_upload(&upload).await;

    match result {
        Ok(report) => {
            info!(job_id = %job_id, alerts = report.alerts.len(), "analysis complete");
            Ok(Json(report))
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "analysis failed");
            Err(e.into())
        }
    }
}
