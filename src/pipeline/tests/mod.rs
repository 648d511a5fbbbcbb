//! Scenario tests driving the pipeline end-to-end with stub renderers.

use crate::error::{Error, ExportError};
use crate::pipeline::test_helpers::*;
use crate::render::RendererRegistry;
use crate::types::{ExportFormat, ProgressEvent, TaskStatus};
use std::time::Duration;

// --- Happy path ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn export_runs_to_completion_with_stored_artifact() {
    let (pipeline, _dir) =
        create_test_pipeline(stub_registry(StubRenderer::quick()), |_| {}).await;

    let id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    pipeline.start_task(&id).await.unwrap();

    assert!(
        wait_for_status(&pipeline, &id, TaskStatus::Completed, Duration::from_secs(5)).await,
        "export must complete"
    );

    let info = pipeline.get_task(&id).await.unwrap();
    assert_eq!(info.progress, 100);
    assert_eq!(info.result_size_bytes, Some(8 * 700));
    let location = info.result_location.unwrap();
    assert!(std::path::Path::new(&location).exists(), "artifact must exist");
    assert!(info.completed_at.is_some());
    assert!(info.error_message.is_none());

    let stats = pipeline.stats();
    assert_eq!(stats.active, 0, "slot must be released");
    assert_eq!(stats.completed_total, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn markdown_export_works_without_stubs() {
    let (pipeline, _dir) =
        create_test_pipeline(RendererRegistry::with_defaults(), |_| {}).await;

    let id = pipeline
        .create_task(sample_request(ExportFormat::Markdown))
        .await
        .unwrap();
    pipeline.start_task(&id).await.unwrap();

    assert!(
        wait_for_status(&pipeline, &id, TaskStatus::Completed, Duration::from_secs(5)).await
    );
    let info = pipeline.get_task(&id).await.unwrap();
    let bytes = std::fs::read(info.result_location.unwrap()).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("# Fractions worksheet"));
}

// --- Live progress ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn watcher_sees_connected_then_monotonic_progress_then_completed() {
    let (pipeline, _dir) = create_test_pipeline(
        stub_registry(StubRenderer::slow(10, Duration::from_millis(5))),
        |_| {},
    )
    .await;

    let id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    let (_, mut rx) = pipeline.watch(&id).await.unwrap();
    pipeline.start_task(&id).await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(
        matches!(events.first(), Some(ProgressEvent::Connected { .. })),
        "first frame must be connected"
    );
    assert!(
        matches!(events.last(), Some(ProgressEvent::Completed { .. })),
        "last frame must be completed, got {events:?}"
    );

    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Progress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty(), "progress frames must be delivered");
    for pair in progress.windows(2) {
        assert!(pair[0] <= pair[1], "progress must not decrease: {progress:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_watcher_gets_exactly_the_terminal_event() {
    let (pipeline, _dir) =
        create_test_pipeline(stub_registry(StubRenderer::quick()), |_| {}).await;

    let id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    pipeline.start_task(&id).await.unwrap();
    assert!(
        wait_for_status(&pipeline, &id, TaskStatus::Completed, Duration::from_secs(5)).await
    );

    let (_, mut rx) = pipeline.watch(&id).await.unwrap();
    assert!(matches!(
        rx.recv().await.unwrap(),
        ProgressEvent::Connected { status: TaskStatus::Completed, .. }
    ));
    assert!(matches!(
        rx.recv().await.unwrap(),
        ProgressEvent::Completed { .. }
    ));
    assert!(rx.recv().await.is_none(), "no further frames for a finished task");
}

// --- Concurrency bound ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ten_tasks_through_three_slots_all_complete() {
    let (pipeline, _dir) = create_test_pipeline(
        stub_registry(StubRenderer::slow(6, Duration::from_millis(5))),
        |config| {
            config.export.max_concurrent_exports = 3;
            config.export.admission_timeout = Duration::from_secs(30);
        },
    )
    .await;

    let mut ids = Vec::new();
    for _ in 0..10 {
        let id = pipeline
            .create_task(sample_request(ExportFormat::Pdf))
            .await
            .unwrap();
        pipeline.start_task(&id).await.unwrap();
        ids.push(id);
    }

    // Sample the gate while the batch drains
    let mut peak = 0;
    loop {
        let stats = pipeline.stats();
        peak = peak.max(stats.active);
        assert!(stats.active <= 3, "active exports exceeded the limit");
        let mut done = 0;
        for id in &ids {
            if pipeline.get_task(id).await.unwrap().status == TaskStatus::Completed {
                done += 1;
            }
        }
        if done == ids.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(peak >= 2, "the batch should actually exercise concurrency");
    let stats = pipeline.stats();
    assert_eq!(stats.completed_total, 10);
    assert_eq!(stats.rejected_total, 0);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.queued, 0);
}

// --- Admission timeout ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn admission_timeout_leaves_the_task_pending() {
    let (pipeline, _dir) = create_test_pipeline(
        stub_registry(StubRenderer::slow(50, Duration::from_millis(20))),
        |config| {
            config.export.max_concurrent_exports = 1;
            config.export.admission_timeout = Duration::from_millis(50);
        },
    )
    .await;

    let hog = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    pipeline.start_task(&hog).await.unwrap();
    assert!(
        wait_for_status(&pipeline, &hog, TaskStatus::Processing, Duration::from_secs(5)).await
    );

    let starved = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    pipeline.start_task(&starved).await.unwrap();

    // Give the starved runner time to hit its admission timeout
    tokio::time::sleep(Duration::from_millis(300)).await;

    let info = pipeline.get_task(&starved).await.unwrap();
    assert_eq!(
        info.status,
        TaskStatus::Pending,
        "a rejected task must not be mutated"
    );
    assert!(info.error_message.is_none());
    assert!(pipeline.stats().rejected_total >= 1);

    pipeline.cancel(&hog).await.unwrap();
}

// --- Cancellation ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_mid_stream_settles_cancelled_and_never_completes() {
    let (pipeline, _dir) = create_test_pipeline(
        stub_registry(StubRenderer::slow(100, Duration::from_millis(10))),
        |_| {},
    )
    .await;

    let id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    let (_, mut rx) = pipeline.watch(&id).await.unwrap();
    pipeline.start_task(&id).await.unwrap();
    assert!(
        wait_for_status(&pipeline, &id, TaskStatus::Processing, Duration::from_secs(5)).await
    );

    // Let a few chunks through, then cancel
    tokio::time::sleep(Duration::from_millis(50)).await;
    pipeline.cancel(&id).await.unwrap();

    assert!(
        wait_for_status(&pipeline, &id, TaskStatus::Cancelled, Duration::from_secs(5)).await,
        "task must settle as cancelled"
    );

    let mut saw_cancelled = false;
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Cancelled => saw_cancelled = true,
            ProgressEvent::Completed { .. } => {
                panic!("completed must never follow an observed cancellation")
            }
            _ => {}
        }
    }
    assert!(saw_cancelled, "subscriber must receive the cancelled frame");

    let info = pipeline.get_task(&id).await.unwrap();
    assert!(info.result_location.is_none());
    assert_eq!(pipeline.stats().active, 0, "slot must be released");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_pending_task_needs_no_runner() {
    let (pipeline, _dir) =
        create_test_pipeline(stub_registry(StubRenderer::quick()), |_| {}).await;

    let id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    pipeline.cancel(&id).await.unwrap();

    let info = pipeline.get_task(&id).await.unwrap();
    assert_eq!(info.status, TaskStatus::Cancelled);

    // Idempotent
    pipeline.cancel(&id).await.unwrap();
    // And a cancelled task cannot be started
    assert!(pipeline.start_task(&id).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_of_finished_task_is_refused() {
    let (pipeline, _dir) =
        create_test_pipeline(stub_registry(StubRenderer::quick()), |_| {}).await;

    let id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    pipeline.start_task(&id).await.unwrap();
    assert!(
        wait_for_status(&pipeline, &id, TaskStatus::Completed, Duration::from_secs(5)).await
    );

    match pipeline.cancel(&id).await {
        Err(Error::Export(ExportError::InvalidTransition { from, to, .. })) => {
            assert_eq!(from, TaskStatus::Completed);
            assert_eq!(to, TaskStatus::Cancelled);
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
    assert_eq!(
        pipeline.get_task(&id).await.unwrap().status,
        TaskStatus::Completed,
        "the refused cancel must not mutate the row"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn persistence_failure_mid_export_leaves_no_partial_artifact() {
    let (pipeline, dir) = create_test_pipeline(
        stub_registry(StubRenderer::slow(30, Duration::from_millis(20))),
        |_| {},
    )
    .await;

    let id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    pipeline.start_task(&id).await.unwrap();
    assert!(
        wait_for_status(&pipeline, &id, TaskStatus::Processing, Duration::from_secs(5)).await
    );

    // Let the runner open the partial file and write a few chunks, then pull
    // the database out from under it; the next progress write fails and the
    // runner must remove the partial file on its way out.
    tokio::time::sleep(Duration::from_millis(80)).await;
    pipeline.db.close().await;

    let exports = dir.path().join("exports");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut part_files = Vec::new();
        let mut entries = tokio::fs::read_dir(&exports).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".part") {
                part_files.push(name);
            }
        }
        if part_files.is_empty() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "partial artifact must be removed after a persistence failure, found {part_files:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// --- Failure and retry ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn renderer_failure_settles_failed_with_error_event() {
    let (pipeline, _dir) =
        create_test_pipeline(stub_registry(StubRenderer::failing_after(3)), |_| {}).await;

    let id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    let (_, mut rx) = pipeline.watch(&id).await.unwrap();
    pipeline.start_task(&id).await.unwrap();

    assert!(
        wait_for_status(&pipeline, &id, TaskStatus::Failed, Duration::from_secs(5)).await
    );

    let info = pipeline.get_task(&id).await.unwrap();
    assert_eq!(info.error_code.as_deref(), Some("render_failed"));
    assert!(info.error_message.unwrap().contains("stub renderer failure"));

    let mut saw_error = false;
    while let Some(event) = rx.recv().await {
        if matches!(event, ProgressEvent::Error { .. }) {
            saw_error = true;
        }
    }
    assert!(saw_error, "subscriber must receive the error frame");
    assert_eq!(pipeline.stats().active, 0, "slot must be released on failure");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retry_consumes_budget_then_exhausts() {
    let (pipeline, _dir) = create_test_pipeline(
        stub_registry(StubRenderer::failing_after(0)),
        |config| config.export.max_retries = 2,
    )
    .await;

    let id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    pipeline.start_task(&id).await.unwrap();
    assert!(wait_for_status(&pipeline, &id, TaskStatus::Failed, Duration::from_secs(5)).await);

    for attempt in 1..=2u32 {
        pipeline.retry(&id).await.unwrap();
        assert!(
            wait_for_status(&pipeline, &id, TaskStatus::Failed, Duration::from_secs(5)).await,
            "retry {attempt} fails again with the always-failing renderer"
        );
        assert_eq!(pipeline.get_task(&id).await.unwrap().retry_count, attempt);
    }

    match pipeline.retry(&id).await {
        Err(Error::Export(ExportError::RetryExhausted { max_retries, .. })) => {
            assert_eq!(max_retries, 2);
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    assert_eq!(
        pipeline.get_task(&id).await.unwrap().status,
        TaskStatus::Failed,
        "an exhausted failure is final"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retry_requires_a_failed_task() {
    let (pipeline, _dir) =
        create_test_pipeline(stub_registry(StubRenderer::quick()), |_| {}).await;

    let id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    assert!(matches!(
        pipeline.retry(&id).await,
        Err(Error::Export(ExportError::InvalidState { .. }))
    ));
}

// --- Request validation ---

#[tokio::test]
async fn create_rejects_unregistered_format() {
    let (pipeline, _dir) =
        create_test_pipeline(stub_registry(StubRenderer::quick()), |_| {}).await;

    let request = sample_request(ExportFormat::Word);
    match pipeline.create_task(request).await {
        Err(Error::Export(ExportError::UnsupportedFormat { format })) => {
            assert_eq!(format, "word");
        }
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
    assert!(pipeline.list_tasks().await.unwrap().is_empty(), "nothing persisted");
}

#[tokio::test]
async fn create_rejects_empty_content() {
    let (pipeline, _dir) =
        create_test_pipeline(stub_registry(StubRenderer::quick()), |_| {}).await;

    let mut request = sample_request(ExportFormat::Pdf);
    request.content.sections.clear();
    assert!(matches!(
        pipeline.create_task(request).await,
        Err(Error::Export(ExportError::InvalidInput { .. }))
    ));
    assert!(pipeline.list_tasks().await.unwrap().is_empty());
}

// --- Shutdown ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_cancels_active_and_refuses_new_work() {
    let (pipeline, _dir) = create_test_pipeline(
        stub_registry(StubRenderer::slow(200, Duration::from_millis(10))),
        |_| {},
    )
    .await;

    let id = pipeline
        .create_task(sample_request(ExportFormat::Pdf))
        .await
        .unwrap();
    pipeline.start_task(&id).await.unwrap();
    assert!(
        wait_for_status(&pipeline, &id, TaskStatus::Processing, Duration::from_secs(5)).await
    );

    pipeline.shutdown().await.unwrap();

    let info = pipeline.get_task(&id).await.unwrap();
    assert!(
        info.status.is_terminal(),
        "a running export must be settled by shutdown, got {:?}",
        info.status
    );
    assert_ne!(info.status, TaskStatus::Completed);

    assert!(matches!(
        pipeline.create_task(sample_request(ExportFormat::Pdf)).await,
        Err(Error::ShuttingDown)
    ));
}
