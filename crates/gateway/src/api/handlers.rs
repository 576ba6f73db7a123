//! HTTP handlers for sessions, command execution and file transfer.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use protocol::error::require_all;
use protocol::{
    ConnectRequest, ConnectResponse, DownloadQuery, ExecRequest, ExecResponse, HealthResponse,
    ListQuery, ListResponse, MessageResponse, PathRequest, RenameRequest,
};
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::ssh::{remote_basename, ConnectionConfig};

type ApiResult<T> = Result<T, ApiError>;

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// `POST /api/ssh/connect`
pub async fn connect(
    State(state): State<AppState>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> ApiResult<Json<ConnectResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let config = ConnectionConfig::from(request);
    let session_id = state.manager.create(&config).await?;
    Ok(Json(ConnectResponse { session_id }))
}

/// `DELETE /api/ssh/session/:session_id`
pub async fn disconnect(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state.manager.destroy(&session_id).await?;
    info!(session_id = %session_id, "Session disconnected");
    Ok(Json(MessageResponse::new("disconnected")))
}

/// `POST /api/ssh/exec`
///
/// A non-zero exit still answers 200; the status is reported alongside the
/// captured output.
pub async fn exec(
    State(state): State<AppState>,
    payload: Result<Json<ExecRequest>, JsonRejection>,
) -> ApiResult<Json<ExecResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let result = state
        .manager
        .exec(&request.session_id, &request.command)
        .await?;

    let error = match result.exit_status {
        Some(0) | None => None,
        Some(code) => Some(format!("Process exited with status {}", code)),
    };
    Ok(Json(ExecResponse {
        output: result.output,
        exit_status: result.exit_status,
        error,
    }))
}

/// `GET /api/sftp/list?session_id=..&path=..`
pub async fn list_files(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<ListResponse>> {
    let Query(query) = query?;
    query.validate()?;

    let files = state.manager.list(&query.session_id, &query.path).await?;
    Ok(Json(ListResponse { files }))
}

/// `POST /api/sftp/upload` (multipart: `session_id`, `remote_path`, `file`)
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<MessageResponse>> {
    let mut session_id = String::new();
    let mut remote_path = String::new();
    let mut file = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("session_id") => session_id = field.text().await?,
            Some("remote_path") => remote_path = field.text().await?,
            Some("file") => file = Some(field.bytes().await?),
            _ => {}
        }
    }

    require_all(&[("session_id", &session_id), ("remote_path", &remote_path)])?;
    state.manager.lookup(&session_id)?;
    let data = file.ok_or_else(|| ApiError::BadRequest("file required".to_string()))?;

    state
        .manager
        .upload(&session_id, &data, &remote_path)
        .await?;
    info!(
        session_id = %session_id,
        remote_path = %remote_path,
        bytes = data.len(),
        "File uploaded"
    );
    Ok(Json(MessageResponse::new("uploaded")))
}

/// `GET /api/sftp/download?session_id=..&remote_path=..`
pub async fn download_file(
    State(state): State<AppState>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    query.validate()?;

    let data = state
        .manager
        .download(&query.session_id, &query.remote_path)
        .await?;

    let disposition = format!(
        "attachment; filename={}",
        remote_basename(&query.remote_path)
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Bytes::from(data),
    )
        .into_response())
}

/// `DELETE /api/sftp/delete`
pub async fn delete_file(
    State(state): State<AppState>,
    payload: Result<Json<PathRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    state
        .manager
        .delete(&request.session_id, &request.path)
        .await?;
    Ok(Json(MessageResponse::new("deleted")))
}

/// `POST /api/sftp/mkdir`
pub async fn create_directory(
    State(state): State<AppState>,
    payload: Result<Json<PathRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    state
        .manager
        .mkdir(&request.session_id, &request.path)
        .await?;
    Ok(Json(MessageResponse::new("created")))
}

/// `POST /api/sftp/rename`
pub async fn rename_file(
    State(state): State<AppState>,
    payload: Result<Json<RenameRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    state
        .manager
        .rename(&request.session_id, &request.old_path, &request.new_path)
        .await?;
    Ok(Json(MessageResponse::new("renamed")))
}
