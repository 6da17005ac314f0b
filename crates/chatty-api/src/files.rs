use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tokio::io::AsyncWriteExt;
use tracing::error;
use uuid::Uuid;

use chatty_auth::Claims;
use chatty_gateway::GatewayState;
use chatty_types::api::{ApiResponse, UploadResponse};
use chatty_types::error::ChatError;

use crate::error::{ApiError, run_blocking};

/// 50 MB upload limit for files
const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

const UPLOAD_DIR: &str = "./uploads";

/// Original filename travels in this header; the body is the raw bytes.
const FILE_NAME_HEADER: &str = "x-file-name";

/// POST /files — accepts raw bytes (application/octet-stream), saves to
/// ./uploads/{id}, inserts the metadata row, returns `{fileId, size}`.
pub async fn upload_file(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if bytes.is_empty() {
        return Err(ChatError::Validation("Empty upload".into()).into());
    }
    if bytes.len() > MAX_FILE_SIZE {
        return Err(ChatError::Validation(format!(
            "File exceeds the {} MB limit",
            MAX_FILE_SIZE / (1024 * 1024)
        ))
        .into());
    }

    let original_name = headers
        .get(FILE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or("upload")
        .to_string();

    let file_id = Uuid::new_v4().to_string();
    let size = bytes.len() as i64;

    tokio::fs::create_dir_all(UPLOAD_DIR).await.map_err(|e| {
        error!("Failed to create uploads directory: {}", e);
        ChatError::Internal(e.to_string())
    })?;

    let file_path = format!("{}/{}", UPLOAD_DIR, file_id);
    let mut file = tokio::fs::File::create(&file_path).await.map_err(|e| {
        error!("Failed to create file {}: {}", file_path, e);
        ChatError::Internal(e.to_string())
    })?;
    file.write_all(&bytes).await.map_err(|e| {
        error!("Failed to write file {}: {}", file_path, e);
        ChatError::Internal(e.to_string())
    })?;

    let db = state.db.clone();
    let fid = file_id.clone();
    let owner = claims.id.clone();
    run_blocking(move || {
        db.insert_file(&fid, &owner, &original_name, size)
            .map_err(ChatError::from)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(UploadResponse {
            file_id,
            size: size as u64,
        })),
    ))
}

/// GET /files/{file_id} — reads the blob from disk and streams it back.
pub async fn download_file(
    State(state): State<GatewayState>,
    Extension(_claims): Extension<Claims>,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Ids are UUIDs; anything else is a path-traversal attempt.
    file_id
        .parse::<Uuid>()
        .map_err(|_| ChatError::Validation("Invalid file id".into()))?;

    let db = state.db.clone();
    let fid = file_id.clone();
    let row = run_blocking(move || db.get_file(&fid).map_err(ChatError::from))
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("file {}", file_id)))?;

    let file_path = format!("{}/{}", UPLOAD_DIR, file_id);
    let bytes = tokio::fs::read(&file_path).await.map_err(|e| {
        error!("Failed to read file {}: {}", file_path, e);
        ChatError::NotFound(format!("file {}", file_id))
    })?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        row.original_name.replace('"', "")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}
