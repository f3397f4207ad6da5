//! Result fetch routes
//!
//! Endpoints:
//! - GET /download/:session_id - packaged result archive
//! - GET /graphs/:session_id/:file_name/:when/:graph_type - diagnostic graph image

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::upload::storage::RESULT_ARCHIVE;

/// Create the download router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/download/:session_id", get(download))
        .route("/graphs/:session_id/:file_name/:when/:graph_type", get(graph))
}

/// GET /download/:session_id
async fn download(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response> {
    let session_id = parse_session_id(&session_id)?;
    let path = state.storage().archive_path(session_id);

    let bytes = read_or_not_found(&path, || {
        format!("No result archive for session {session_id}")
    })
    .await?;

    tracing::info!(session_id = %session_id, size = bytes.len(), "Serving result archive");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", RESULT_ARCHIVE),
        )
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from(bytes))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// GET /graphs/:session_id/:file_name/:when/:graph_type
async fn graph(
    State(state): State<AppState>,
    Path((session_id, file_name, when, graph_type)): Path<(String, String, String, String)>,
) -> Result<Response> {
    let session_id = parse_session_id(&session_id)?;
    let path = state
        .storage()
        .graph_path(session_id, &file_name, &when, &graph_type)
        .ok_or_else(|| AppError::BadRequest("Invalid graph path".to_string()))?;

    let bytes = read_or_not_found(&path, || {
        format!("No {graph_type} graph ({when}) for {file_name}")
    })
    .await?;

    let content_type = mime_guess::from_path(&path).first_or_octet_stream();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from(bytes))
        .map_err(|e| AppError::Internal(e.to_string()))
}

fn parse_session_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid session id: {raw}")))
}

async fn read_or_not_found(
    path: &std::path::Path,
    describe: impl FnOnce() -> String,
) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound(describe())),
        Err(e) => Err(e.into()),
    }
}
