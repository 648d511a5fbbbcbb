use super::*;
use crate::pipeline::ExportPipeline;
use crate::pipeline::test_helpers::{
    StubRenderer, create_test_pipeline, sample_request, stub_registry, wait_for_status,
};
use crate::types::{ExportFormat, TaskInfo, TaskStatus};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tower::ServiceExt; // for oneshot

/// Helper to create a router over a pipeline serving stubbed PDF exports
async fn create_test_app(
    tune: impl FnOnce(&mut crate::config::Config),
) -> (Router, ExportPipeline, tempfile::TempDir) {
    let (pipeline, temp_dir) =
        create_test_pipeline(stub_registry(StubRenderer::quick()), tune).await;
    let app = create_router(pipeline.clone(), pipeline.get_config());
    (app, pipeline, temp_dir)
}

fn json_request(method: &str, uri: &str, body: &impl serde::Serialize) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _pipeline, _temp_dir) = create_test_app(|_| {}).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_cors_enabled() {
    let (app, _pipeline, _temp_dir) = create_test_app(|config| {
        config.api.cors_enabled = true;
        config.api.cors_origins = vec!["*".to_string()];
    })
    .await;

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers().contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_authentication_with_api_key() {
    let (app, _pipeline, _temp_dir) = create_test_app(|config| {
        config.api.api_key = Some("test-secret-key".to_string());
    })
    .await;

    // Without API key: 401
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // With valid API key: 200
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("X-Api-Key", "test-secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // With invalid API key: 401
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("X-Api-Key", "wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_authentication_disabled_by_default() {
    let (app, _pipeline, _temp_dir) = create_test_app(|config| {
        config.api.api_key = None;
    })
    .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_export_accepted_and_completes() {
    let (app, pipeline, _temp_dir) = create_test_app(|_| {}).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/exports",
            &sample_request(ExportFormat::Pdf),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "pending");
    let task_id = crate::types::TaskId::from(body["task_id"].as_str().unwrap());

    assert!(
        wait_for_status(
            &pipeline,
            &task_id,
            TaskStatus::Completed,
            Duration::from_secs(5)
        )
        .await,
        "accepted export should complete in the background"
    );

    // GET /exports/:id reflects the terminal row
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/exports/{task_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let info: TaskInfo = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(info.status, TaskStatus::Completed);
    assert_eq!(info.progress, 100);
    assert!(info.result_location.is_some());
}

#[tokio::test]
async fn test_create_export_unsupported_format() {
    // Only PDF has a renderer registered in the test app
    let (app, pipeline, _temp_dir) = create_test_app(|_| {}).await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/exports",
            &sample_request(ExportFormat::Word),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "unsupported_format");

    // Nothing was persisted for the rejected request
    assert!(pipeline.list_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_export_rejects_unknown_option_keys() {
    let (app, _pipeline, _temp_dir) = create_test_app(|_| {}).await;

    let mut body = serde_json::to_value(sample_request(ExportFormat::Pdf)).unwrap();
    body["options"]["page_color"] = serde_json::json!("blue");

    let response = app
        .oneshot(json_request("POST", "/exports", &body))
        .await
        .unwrap();

    assert!(
        response.status().is_client_error(),
        "unknown option keys must be rejected, got {}",
        response.status()
    );
}

#[tokio::test]
async fn test_get_export_not_found() {
    let (app, _pipeline, _temp_dir) = create_test_app(|_| {}).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/exports/no-such-task")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_list_exports_filters_by_user() {
    let (app, pipeline, _temp_dir) = create_test_app(|_| {}).await;

    let mut request = sample_request(ExportFormat::Pdf);
    request.user_id = "teacher-a".to_string();
    pipeline.create_task(request).await.unwrap();

    let mut request = sample_request(ExportFormat::Pdf);
    request.user_id = "teacher-b".to_string();
    pipeline.create_task(request).await.unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/exports")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let all: Vec<TaskInfo> = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(all.len(), 2);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/exports?user_id=teacher-a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let filtered: Vec<TaskInfo> = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].user_id, "teacher-a");
}

#[tokio::test]
async fn test_cancel_pending_export() {
    let (app, pipeline, _temp_dir) = create_test_app(|_| {}).await;

    // Created but never started, so it sits in pending
    let task_id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/exports/{task_id}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let info = pipeline.get_task(&task_id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_completed_export_conflicts() {
    let (app, pipeline, _temp_dir) = create_test_app(|_| {}).await;

    let task_id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    pipeline.start_task(&task_id).await.unwrap();
    assert!(
        wait_for_status(
            &pipeline,
            &task_id,
            TaskStatus::Completed,
            Duration::from_secs(5)
        )
        .await
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/exports/{task_id}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "invalid_transition");
    assert_eq!(body["error"]["details"]["from"], "completed");
    assert_eq!(body["error"]["details"]["to"], "cancelled");
}

#[tokio::test]
async fn test_retry_non_failed_export_conflicts() {
    let (app, pipeline, _temp_dir) = create_test_app(|_| {}).await;

    let task_id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/exports/{task_id}/retry"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_download_completed_export() {
    let (app, pipeline, _temp_dir) = create_test_app(|_| {}).await;

    let task_id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    pipeline.start_task(&task_id).await.unwrap();
    assert!(
        wait_for_status(
            &pipeline,
            &task_id,
            TaskStatus::Completed,
            Duration::from_secs(5)
        )
        .await
    );

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/exports/{task_id}/download"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/pdf"
    );
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains(".pdf"), "filename should carry the format extension");

    // StubRenderer::quick emits 8 pieces of 700 bytes
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.len(), 8 * 700);
}

#[tokio::test]
async fn test_download_pending_export_conflicts() {
    let (app, pipeline, _temp_dir) = create_test_app(|_| {}).await;

    let task_id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/exports/{task_id}/download"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "not_completed");
}

#[tokio::test]
async fn test_stats_endpoint() {
    let (app, _pipeline, _temp_dir) = create_test_app(|config| {
        config.export.max_concurrent_exports = 3;
    })
    .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["max_concurrent"], 3);
    assert_eq!(body["active"], 0);
    assert_eq!(body["connection_count"], 0);
}

#[tokio::test]
async fn test_openapi_endpoint() {
    let (app, _pipeline, _temp_dir) = create_test_app(|_| {}).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/exports"].is_object());
}

#[tokio::test]
async fn test_api_server_spawns() {
    let (pipeline, _temp_dir) =
        create_test_pipeline(stub_registry(StubRenderer::quick()), |config| {
            // Port 0 = OS assigns a free port
            config.api.bind_address = "127.0.0.1:0".parse().unwrap();
        })
        .await;

    let api_handle = pipeline.spawn_api_server();

    // Give it a moment to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    api_handle.abort();
}
