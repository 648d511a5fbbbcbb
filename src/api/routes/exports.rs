//! Export task handlers.

use super::{CreateExportResponse, ListExportsQuery};
use crate::api::AppState;
use crate::types::{ExportRequest, TaskId, TaskStatus};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio_util::io::ReaderStream;

/// POST /exports - Create a new export task
///
/// Validation happens before anything is persisted; a valid request is
/// accepted, stored as `pending`, and handed to a background runner.
#[utoipa::path(
    post,
    path = "/exports",
    tag = "exports",
    request_body = crate::types::ExportRequest,
    responses(
        (status = 202, description = "Export task accepted", body = CreateExportResponse),
        (status = 422, description = "Invalid content or unsupported format"),
        (status = 503, description = "Server is shutting down"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Response {
    let task_id = match state.pipeline.create_task(request).await {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    // The task row already exists in `pending`; a start failure here leaves
    // it retryable rather than lost
    if let Err(e) = state.pipeline.start_task(&task_id).await {
        tracing::warn!(task_id = %task_id, error = %e, "export accepted but runner did not start");
    }

    (
        StatusCode::ACCEPTED,
        Json(CreateExportResponse {
            task_id,
            status: TaskStatus::Pending,
        }),
    )
        .into_response()
}

/// GET /exports - List export tasks
#[utoipa::path(
    get,
    path = "/exports",
    tag = "exports",
    params(
        ("user_id" = Option<String>, Query, description = "Restrict to tasks owned by this user")
    ),
    responses(
        (status = 200, description = "List of export tasks", body = Vec<crate::types::TaskInfo>),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_exports(
    State(state): State<AppState>,
    Query(query): Query<ListExportsQuery>,
) -> Response {
    let result = match &query.user_id {
        Some(user_id) => state.pipeline.list_tasks_for_user(user_id).await,
        None => state.pipeline.list_tasks().await,
    };

    match result {
        Ok(tasks) => (StatusCode::OK, Json(tasks)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to list exports");
            e.into_response()
        }
    }
}

/// GET /exports/:id - Get a single export task
#[utoipa::path(
    get,
    path = "/exports/{id}",
    tag = "exports",
    params(("id" = String, Path, description = "Export task ID")),
    responses(
        (status = 200, description = "Export task information", body = crate::types::TaskInfo),
        (status = 404, description = "Task not found"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_export(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.pipeline.get_task(&TaskId::from(id)).await {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /exports/:id/cancel - Cancel an export task
#[utoipa::path(
    post,
    path = "/exports/{id}/cancel",
    tag = "exports",
    params(("id" = String, Path, description = "Export task ID")),
    responses(
        (status = 204, description = "Cancellation recorded or already cancelled"),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task already completed or failed"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn cancel_export(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.pipeline.cancel(&TaskId::from(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /exports/:id/retry - Retry a failed export task
#[utoipa::path(
    post,
    path = "/exports/{id}/retry",
    tag = "exports",
    params(("id" = String, Path, description = "Export task ID")),
    responses(
        (status = 202, description = "Retry accepted", body = CreateExportResponse),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task is not failed, or the retry budget is exhausted"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn retry_export(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let task_id = TaskId::from(id);
    match state.pipeline.retry(&task_id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(CreateExportResponse {
                task_id,
                status: TaskStatus::Pending,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /exports/:id/download - Stream the finished artifact
///
/// The artifact is streamed with chunked transfer encoding; the content type
/// and suggested filename are derived from the task's format.
#[utoipa::path(
    get,
    path = "/exports/{id}/download",
    tag = "exports",
    params(("id" = String, Path, description = "Export task ID")),
    responses(
        (status = 200, description = "Artifact bytes"),
        (status = 404, description = "Task or artifact not found"),
        (status = 409, description = "Task has not completed"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn download_export(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let task_id = TaskId::from(id);
    let info = match state.pipeline.get_task(&task_id).await {
        Ok(info) => info,
        Err(e) => return e.into_response(),
    };

    if info.status != TaskStatus::Completed {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": {
                "code": "not_completed",
                "message": format!("export {} is {}, not completed", task_id, info.status),
            }})),
        )
            .into_response();
    }

    let path = state.pipeline.store().artifact_path(&task_id, info.format);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(task_id = %task_id, path = %path.display(), error = %e, "artifact missing for completed export");
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": {
                    "code": "artifact_missing",
                    "message": "stored artifact could not be opened",
                }})),
            )
                .into_response();
        }
    };

    let filename = format!(
        "{}.{}",
        info.source_document_id,
        info.format.file_extension()
    );
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = info.format.content_type().parse() {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = format!("attachment; filename=\"{filename}\"").parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(size) = info.result_size_bytes {
        if let Ok(value) = size.to_string().parse() {
            headers.insert(header::CONTENT_LENGTH, value);
        }
    }
    response
}
