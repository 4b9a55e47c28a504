//! # Scan Workflow Module
//!
//! Drives an uploaded image from submission to a terminal diagnosis while the
//! backend processes it asynchronously.
//!
//! # Polling
//!
//! After an initial grace delay the scan status is queried on a fixed interval up
//! to a bounded number of attempts. Each query is issued only after the previous
//! one resolved, so responses are consumed in send order.
//!
//! # UI slot
//!
//! Workflows started with [`ScanWorkflow::start`] share one observable
//! [`ScanPhase`]. Every start bumps a generation counter and aborts the previous
//! task; a task may only publish while its generation is current, so a late poll
//! from an earlier submission can never overwrite a newer one.

use async_trait::async_trait;
use rand::Rng;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::api_errors::{ApiError, ApiResult};
use crate::auth::AuthSession;
use crate::client_config::{ClientConfig, PollConfig, RecoveryConfig};
use crate::http_client::ApiClient;
use crate::models::{DiagnosisResult, ImageFile, ScanId, ScanRecord, ScanStatus};

/// Backend operations the workflow depends on
#[async_trait]
pub trait ScanApi: Send + Sync {
    async fn upload_image(&self, file: &ImageFile) -> ApiResult<ScanRecord>;
    async fn scan_result(&self, id: &ScanId) -> ApiResult<ScanRecord>;
}

#[async_trait]
impl ScanApi for ApiClient {
    async fn upload_image(&self, file: &ImageFile) -> ApiResult<ScanRecord> {
        ApiClient::upload_image(self, file).await
    }

    async fn scan_result(&self, id: &ScanId) -> ApiResult<ScanRecord> {
        ApiClient::scan_result(self, id).await
    }
}

/// Terminal result of a scan workflow
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// Backend finished the analysis
    Completed(DiagnosisResult),
    /// Backend reported the scan as `failed`
    BackendFailure,
    /// Attempts exhausted without a terminal status
    TimeoutFailure,
    /// Upload failed, or a status query failed beyond recovery
    Fatal(ApiError),
}

impl ScanOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ScanOutcome::Completed(_))
    }

    /// Failures the user can simply retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanOutcome::BackendFailure | ScanOutcome::TimeoutFailure)
    }
}

/// What the UI slot currently shows
#[derive(Debug, Clone, PartialEq)]
pub enum ScanPhase {
    Idle,
    Uploading,
    Polling { id: ScanId, attempt: u32 },
    Finished { id: Option<ScanId>, outcome: ScanOutcome },
}

struct UiSlot {
    generation: Mutex<u64>,
    active: Mutex<Option<AbortHandle>>,
    sender: watch::Sender<ScanPhase>,
}

impl UiSlot {
    fn new() -> Self {
        let (sender, _) = watch::channel(ScanPhase::Idle);
        Self {
            generation: Mutex::new(0),
            active: Mutex::new(None),
            sender,
        }
    }

    /// Invalidate the running workflow and show `phase` for a new generation
    fn advance(&self, phase: ScanPhase) -> u64 {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        if let Some(previous) = self.active.lock().unwrap_or_else(PoisonError::into_inner).take() {
            previous.abort();
        }
        self.sender.send_replace(phase);
        *generation
    }

    fn track(&self, generation: u64, handle: AbortHandle) {
        let current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == generation {
            *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Publish `phase` if `generation` is still the active workflow
    fn publish(&self, generation: u64, phase: ScanPhase) -> bool {
        let current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != generation {
            debug!(generation, current = *current, "Dropping update from stale scan workflow");
            return false;
        }
        self.sender.send_replace(phase);
        true
    }
}

/// Handle to a workflow started with [`ScanWorkflow::start`]
pub struct ScanHandle {
    generation: u64,
    task: JoinHandle<ScanOutcome>,
    slot: Arc<UiSlot>,
}

impl ScanHandle {
    /// Whether this workflow still owns the UI slot
    pub fn is_current(&self) -> bool {
        *self.slot.generation.lock().unwrap_or_else(PoisonError::into_inner) == self.generation
    }

    /// Stop polling; the UI slot returns to `Idle` if this workflow owned it
    pub fn cancel(&self) {
        self.task.abort();
        let mut generation = self.slot.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *generation == self.generation {
            *generation += 1;
            self.slot.sender.send_replace(ScanPhase::Idle);
        }
    }

    /// Wait for the workflow; `None` if it was cancelled or superseded
    pub async fn outcome(mut self) -> Option<ScanOutcome> {
        let outcome = match (&mut self.task).await {
            Ok(outcome) => Some(outcome),
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                error!(error = %e, "Scan workflow task panicked");
                None
            }
        };
        // A workflow that finished just as it was superseded must not be observed
        outcome.filter(|_| self.is_current())
    }
}

/// Submission and polling of image scans
#[derive(Clone)]
pub struct ScanWorkflow {
    api: Arc<dyn ScanApi>,
    session: Option<Arc<AuthSession>>,
    poll: PollConfig,
    recovery: RecoveryConfig,
    max_upload_size: u64,
    slot: Arc<UiSlot>,
}

impl ScanWorkflow {
    pub fn new(api: Arc<dyn ScanApi>, config: &ClientConfig) -> Self {
        Self {
            api,
            session: None,
            poll: config.poll.clone(),
            recovery: config.recovery.clone(),
            max_upload_size: config.max_upload_size,
            slot: Arc::new(UiSlot::new()),
        }
    }

    /// Workflow for an auth session: uses its client and refuses to run
    /// while the session is not authenticated
    pub fn for_session(session: Arc<AuthSession>, config: &ClientConfig) -> Self {
        let api: Arc<dyn ScanApi> = Arc::new(session.client().clone());
        Self {
            session: Some(session),
            ..Self::new(api, config)
        }
    }

    /// Observe the UI slot
    pub fn subscribe(&self) -> watch::Receiver<ScanPhase> {
        self.slot.sender.subscribe()
    }

    pub fn phase(&self) -> ScanPhase {
        self.slot.sender.borrow().clone()
    }

    /// Invalidate any running workflow (e.g. the user navigated away)
    pub fn cancel_active(&self) {
        self.slot.advance(ScanPhase::Idle);
    }

    /// Invalidate the owning session when the backend rejected its token
    fn check_auth<T>(&self, result: ApiResult<T>) -> ApiResult<T> {
        match &self.session {
            Some(session) => session.check(result),
            None => result,
        }
    }

    fn ensure_authenticated(&self) -> ApiResult<()> {
        match &self.session {
            Some(session) if !session.is_authenticated() => {
                Err(ApiError::Auth("Not authenticated".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Check the file before uploading: present, within size, a known image format
    pub fn validate(&self, file: &ImageFile) -> ApiResult<()> {
        if file.bytes.is_empty() {
            return Err(ApiError::Validation("No image selected".to_string()));
        }

        if file.bytes.len() as u64 > self.max_upload_size {
            return Err(ApiError::Validation(format!(
                "Image is too large: {} bytes (max {})",
                file.bytes.len(),
                self.max_upload_size
            )));
        }

        match image::guess_format(&file.bytes) {
            Ok(
                image::ImageFormat::Png
                | image::ImageFormat::Jpeg
                | image::ImageFormat::Gif
                | image::ImageFormat::WebP
                | image::ImageFormat::Bmp
                | image::ImageFormat::Tiff,
            ) => Ok(()),
            Ok(format) => Err(ApiError::Validation(format!("Unsupported image format: {format:?}"))),
            Err(_) => Err(ApiError::Validation("Unrecognized image format".to_string())),
        }
    }

    /// Validate and upload `file`, returning the submission id
    pub async fn submit(&self, file: &ImageFile) -> ApiResult<ScanId> {
        self.ensure_authenticated()?;
        self.validate(file)?;

        match self.check_auth(self.api.upload_image(file).await) {
            Ok(record) => {
                info!(scan_id = %record.id, status = ?record.status, "Image submitted");
                Ok(record.id)
            }
            Err(e) => {
                warn!(error = %e, file_name = %file.file_name, "Image upload failed");
                Err(ApiError::Upload(match e {
                    ApiError::Request { message, .. } => message,
                    other => other.to_string(),
                }))
            }
        }
    }

    /// Poll `id` until the backend reports a terminal status or attempts run out
    pub async fn poll_until_terminal(&self, id: &ScanId) -> ScanOutcome {
        self.poll_loop(id, |_| {}).await
    }

    async fn poll_loop(&self, id: &ScanId, mut on_attempt: impl FnMut(u32) + Send) -> ScanOutcome {
        tokio::time::sleep(self.poll.initial_delay()).await;

        for attempt in 1..=self.poll.max_attempts {
            on_attempt(attempt);

            let record = match self.check_auth(self.query_status(id).await) {
                Ok(record) => record,
                Err(e) => {
                    error!(scan_id = %id, attempt, error = %e, "Scan polling aborted");
                    return ScanOutcome::Fatal(e);
                }
            };
            debug!(scan_id = %id, attempt, status = ?record.status, "Polled scan status");

            match record.status {
                ScanStatus::Completed => {
                    let diagnosis = record
                        .diagnosis()
                        .filter(|_| record.condition_detected.is_some());
                    return match diagnosis {
                        Some(diagnosis) => {
                            info!(scan_id = %id, attempt, "Scan completed");
                            ScanOutcome::Completed(diagnosis)
                        }
                        None => ScanOutcome::Fatal(ApiError::Protocol(format!(
                            "Scan {id} completed without a diagnosis"
                        ))),
                    };
                }
                ScanStatus::Failed => {
                    warn!(scan_id = %id, attempt, "Backend reported scan failure");
                    return ScanOutcome::BackendFailure;
                }
                _ if attempt < self.poll.max_attempts => {
                    tokio::time::sleep(self.poll.interval()).await;
                }
                _ => {}
            }
        }

        warn!(scan_id = %id, attempts = self.poll.max_attempts, "Scan polling timed out");
        ScanOutcome::TimeoutFailure
    }

    /// One status query, retrying transport errors with backoff
    async fn query_status(&self, id: &ScanId) -> ApiResult<ScanRecord> {
        let mut retry = 0;
        loop {
            match self.api.scan_result(id).await {
                Ok(record) => return Ok(record),
                Err(e) if e.is_transport() && retry < self.recovery.poll_retries => {
                    retry += 1;
                    let delay = calculate_retry_delay(retry, &self.recovery);
                    warn!(scan_id = %id, retry, delay_ms = delay.as_millis() as u64, error = %e, "Retrying scan status query");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Submit then poll, without touching the UI slot
    pub async fn run(&self, file: ImageFile) -> ScanOutcome {
        match self.submit(&file).await {
            Ok(id) => self.poll_until_terminal(&id).await,
            Err(e) => ScanOutcome::Fatal(e),
        }
    }

    /// Run the workflow in the background as the sole owner of the UI slot.
    ///
    /// Any workflow started earlier is aborted and can no longer publish.
    pub fn start(&self, file: ImageFile) -> ScanHandle {
        let generation = self.slot.advance(ScanPhase::Uploading);
        let workflow = self.clone();
        let task = tokio::spawn(async move { workflow.drive(file, generation).await });
        self.slot.track(generation, task.abort_handle());

        ScanHandle {
            generation,
            task,
            slot: Arc::clone(&self.slot),
        }
    }

    async fn drive(self, file: ImageFile, generation: u64) -> ScanOutcome {
        let (id, outcome) = match self.submit(&file).await {
            Ok(id) => {
                self.slot.publish(generation, ScanPhase::Polling { id: id.clone(), attempt: 0 });
                let slot = Arc::clone(&self.slot);
                let polled = id.clone();
                let outcome = self
                    .poll_loop(&id, move |attempt| {
                        slot.publish(generation, ScanPhase::Polling { id: polled.clone(), attempt });
                    })
                    .await;
                (Some(id), outcome)
            }
            Err(e) => (None, ScanOutcome::Fatal(e)),
        };

        self.slot.publish(
            generation,
            ScanPhase::Finished {
                id,
                outcome: outcome.clone(),
            },
        );
        outcome
    }
}

/// Backoff before retry number `retry` (1-based): exponential, capped, with up to
/// 10% jitter
pub fn calculate_retry_delay(retry: u32, recovery: &RecoveryConfig) -> Duration {
    let factor = 2u64.saturating_pow(retry.saturating_sub(1));
    let capped = recovery
        .base_retry_delay_ms
        .saturating_mul(factor)
        .min(recovery.max_retry_delay_ms);
    let jitter = if capped >= 10 {
        rand::thread_rng().gen_range(0..=capped / 10)
    } else {
        0
    };
    Duration::from_millis(capped.saturating_add(jitter).min(recovery.max_retry_delay_ms))
}
