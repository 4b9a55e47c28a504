//! # Scan Workflow Tests
//!
//! Drives the submission and polling state machine against a scripted
//! backend with tokio's paused clock, so poll intervals cost no real time.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use zdravscan::api_errors::{ApiError, ApiResult};
use zdravscan::client_config::ClientConfig;
use zdravscan::models::{ImageFile, ScanId, ScanRecord, ScanStatus};
use zdravscan::scan_workflow::{ScanApi, ScanOutcome, ScanPhase, ScanWorkflow};

const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

type Responder = dyn Fn(&ScanId, u32) -> ApiResult<ScanRecord> + Send + Sync;

/// Backend double: uploads hand out ids "1", "2", ...; status queries are
/// answered by `responder(id, nth_query_for_that_call_sequence)`
struct ScriptedBackend {
    upload_error: Option<ApiError>,
    responder: Box<Responder>,
    uploads: AtomicU32,
    queries: AtomicU32,
}

impl ScriptedBackend {
    fn new(responder: impl Fn(&ScanId, u32) -> ApiResult<ScanRecord> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            upload_error: None,
            responder: Box::new(responder),
            uploads: AtomicU32::new(0),
            queries: AtomicU32::new(0),
        })
    }

    fn failing_upload(error: ApiError) -> Arc<Self> {
        Arc::new(Self {
            upload_error: Some(error),
            responder: Box::new(|id, _| Ok(record(id, ScanStatus::Pending))),
            uploads: AtomicU32::new(0),
            queries: AtomicU32::new(0),
        })
    }

    fn queries(&self) -> u32 {
        self.queries.load(Ordering::SeqCst)
    }

    fn uploads(&self) -> u32 {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanApi for ScriptedBackend {
    async fn upload_image(&self, _file: &ImageFile) -> ApiResult<ScanRecord> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(e) = &self.upload_error {
            return Err(e.clone());
        }
        Ok(record(&ScanId::new(n.to_string()), ScanStatus::Pending))
    }

    async fn scan_result(&self, id: &ScanId) -> ApiResult<ScanRecord> {
        let n = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
        (self.responder)(id, n)
    }
}

fn record(id: &ScanId, status: ScanStatus) -> ScanRecord {
    ScanRecord {
        id: id.clone(),
        status,
        condition_detected: None,
        description: None,
        confidence: None,
        recommendations: Vec::new(),
        created_at: None,
        processed_at: None,
    }
}

fn completed(id: &ScanId) -> ScanRecord {
    ScanRecord {
        condition_detected: Some("Psoriasis".to_string()),
        description: Some("Scaly plaques".to_string()),
        confidence: Some(0.91),
        recommendations: vec!["See a dermatologist".to_string()],
        ..record(id, ScanStatus::Completed)
    }
}

fn image() -> ImageFile {
    ImageFile::new("lesion.png", "image/png", PNG_HEADER.to_vec())
}

fn workflow(api: Arc<ScriptedBackend>) -> ScanWorkflow {
    workflow_with(api, |_| {})
}

fn workflow_with(api: Arc<ScriptedBackend>, tweak: impl FnOnce(&mut ClientConfig)) -> ScanWorkflow {
    let mut config = ClientConfig::with_api_url("http://127.0.0.1:9");
    tweak(&mut config);
    ScanWorkflow::new(api, &config)
}

#[tokio::test(start_paused = true)]
async fn test_pending_twice_then_completed() {
    let api = ScriptedBackend::new(|id, n| match n {
        1 | 2 => Ok(record(id, ScanStatus::Pending)),
        _ => Ok(completed(id)),
    });

    let started = Instant::now();
    let outcome = workflow(Arc::clone(&api)).run(image()).await;

    // 2s grace wait, then two 1s intervals between the three polls
    assert_eq!(started.elapsed(), Duration::from_secs(4));
    assert_eq!(api.queries(), 3);
    match outcome {
        ScanOutcome::Completed(diagnosis) => {
            assert_eq!(diagnosis.condition_label, "Psoriasis");
            assert_eq!(diagnosis.confidence, Some(0.91));
            assert_eq!(diagnosis.recommendations, vec!["See a dermatologist"]);
        }
        other => panic!("expected completed outcome, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_processing_until_attempts_run_out() {
    let api = ScriptedBackend::new(|id, _| Ok(record(id, ScanStatus::Processing)));

    let started = Instant::now();
    let outcome = workflow(Arc::clone(&api)).run(image()).await;

    assert_eq!(outcome, ScanOutcome::TimeoutFailure);
    // No wait after the last attempt
    assert_eq!(started.elapsed(), Duration::from_secs(2 + 29));
    assert_eq!(api.queries(), 30);
}

#[tokio::test(start_paused = true)]
async fn test_failed_on_first_poll() {
    let api = ScriptedBackend::new(|id, _| Ok(record(id, ScanStatus::Failed)));

    let started = Instant::now();
    let outcome = workflow(Arc::clone(&api)).run(image()).await;

    assert_eq!(outcome, ScanOutcome::BackendFailure);
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_eq!(api.queries(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_upload_failure_never_polls() {
    let api = ScriptedBackend::failing_upload(ApiError::Request {
        status: 500,
        message: "Internal Server Error".to_string(),
    });

    let outcome = workflow(Arc::clone(&api)).run(image()).await;

    assert_eq!(
        outcome,
        ScanOutcome::Fatal(ApiError::Upload("Internal Server Error".to_string()))
    );
    assert_eq!(api.uploads(), 1);
    assert_eq!(api.queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_completed_without_diagnosis_is_protocol_error() {
    let api = ScriptedBackend::new(|id, _| Ok(record(id, ScanStatus::Completed)));

    let outcome = workflow(Arc::clone(&api)).run(image()).await;

    assert!(matches!(outcome, ScanOutcome::Fatal(ApiError::Protocol(_))));
    assert_eq!(api.queries(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_status_keeps_polling() {
    let api = ScriptedBackend::new(|id, n| match n {
        1 => Ok(record(id, ScanStatus::Unknown)),
        _ => Ok(completed(id)),
    });

    let outcome = workflow(Arc::clone(&api)).run(image()).await;

    assert!(outcome.is_success());
    assert_eq!(api.queries(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_is_retried_within_one_attempt() {
    let api = ScriptedBackend::new(|id, n| match n {
        1 => Err(ApiError::Transport("connection reset".to_string())),
        _ => Ok(completed(id)),
    });

    let outcome = workflow(Arc::clone(&api)).run(image()).await;

    assert!(outcome.is_success());
    assert_eq!(api.queries(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_without_retries_is_fatal() {
    let api = ScriptedBackend::new(|_, _| Err(ApiError::Transport("connection reset".to_string())));

    let outcome = workflow_with(Arc::clone(&api), |config| config.recovery.poll_retries = 0)
        .run(image())
        .await;

    assert_eq!(
        outcome,
        ScanOutcome::Fatal(ApiError::Transport("connection reset".to_string()))
    );
    assert_eq!(api.queries(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_http_error_during_polling_is_not_retried() {
    let api = ScriptedBackend::new(|_, _| {
        Err(ApiError::Request {
            status: 404,
            message: "Scan not found".to_string(),
        })
    });

    let outcome = workflow(Arc::clone(&api)).run(image()).await;

    assert!(matches!(outcome, ScanOutcome::Fatal(ApiError::Request { status: 404, .. })));
    assert_eq!(api.queries(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_image_is_rejected_before_upload() {
    let api = ScriptedBackend::new(|id, _| Ok(completed(id)));
    let workflow = workflow(Arc::clone(&api));

    let empty = ImageFile::new("empty.png", "image/png", Vec::new());
    assert!(matches!(workflow.run(empty).await, ScanOutcome::Fatal(ApiError::Validation(_))));

    let text = ImageFile::new("notes.png", "image/png", b"definitely not an image".to_vec());
    assert!(matches!(workflow.run(text).await, ScanOutcome::Fatal(ApiError::Validation(_))));

    assert_eq!(api.uploads(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_image_is_rejected() {
    let api = ScriptedBackend::new(|id, _| Ok(completed(id)));
    let workflow = workflow_with(Arc::clone(&api), |config| config.max_upload_size = 8);

    let err = workflow.validate(&image()).unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
    assert_eq!(api.uploads(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_started_workflow_publishes_phases() {
    let api = ScriptedBackend::new(|id, n| match n {
        1 => Ok(record(id, ScanStatus::Processing)),
        _ => Ok(completed(id)),
    });
    let workflow = workflow(Arc::clone(&api));
    let mut phases = workflow.subscribe();

    let handle = workflow.start(image());
    assert_eq!(*phases.borrow_and_update(), ScanPhase::Uploading);

    let outcome = handle.outcome().await.expect("workflow should finish");
    assert!(outcome.is_success());

    match workflow.phase() {
        ScanPhase::Finished { id, outcome: published } => {
            assert_eq!(id, Some(ScanId::new("1")));
            assert_eq!(published, outcome);
        }
        other => panic!("expected finished phase, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_newer_workflow_supersedes_older() {
    // Scan "1" never finishes; scan "2" completes on its first poll
    let api = ScriptedBackend::new(|id, _| {
        if id.as_str() == "1" {
            Ok(record(id, ScanStatus::Pending))
        } else {
            Ok(completed(id))
        }
    });
    let workflow = workflow(Arc::clone(&api));

    let first = workflow.start(image());
    // Let the first workflow upload and start polling
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(matches!(workflow.phase(), ScanPhase::Polling { ref id, .. } if id.as_str() == "1"));

    let second = workflow.start(image());
    assert!(!first.is_current());
    assert!(second.is_current());

    assert_eq!(first.outcome().await, None);
    let outcome = second.outcome().await.expect("second workflow should finish");
    assert!(outcome.is_success());

    // Nothing from the first workflow can land after the second finished
    tokio::time::sleep(Duration::from_secs(60)).await;
    match workflow.phase() {
        ScanPhase::Finished { id, .. } => assert_eq!(id, Some(ScanId::new("2"))),
        other => panic!("expected finished phase of the second scan, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_returns_slot_to_idle() {
    let api = ScriptedBackend::new(|id, _| Ok(record(id, ScanStatus::Pending)));
    let workflow = workflow(Arc::clone(&api));

    let handle = workflow.start(image());
    tokio::time::sleep(Duration::from_secs(5)).await;
    handle.cancel();

    assert_eq!(workflow.phase(), ScanPhase::Idle);
    assert_eq!(handle.outcome().await, None);

    let polled = api.queries();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.queries(), polled);
}
