//! Retry orchestration
//!
//! Drives [`TransferExecutor`] through at most `max_attempts` sequential
//! attempts. Terminal classifications stop immediately; retryable ones wait
//! `attempt_number * backoff_step` (linear: 2s, 4s, ...) and go again with a
//! fresh deadline and a fresh progress cycle.
//!
//! Every exit path delivers exactly one [`ProgressEvent::Finished`] to the
//! caller's sink, and `Percent(100)` is only ever sent right before a
//! successful finish.
//!
//! [`ProgressEvent::Finished`]: super::progress::ProgressEvent::Finished

use super::attempt::TransferExecutor;
use super::classify::TransferFault;
use super::deadline::DeadlinePolicy;
use super::progress::{
    ProgressEnd, ProgressEstimator, ProgressSink, SyntheticProgress, CHECKPOINT_PERSISTING,
    CHECKPOINT_STORED,
};
use super::validation::{self, Constraints};
use super::{
    FailureKind, UploadFailure, UploadRequest, UploadResult, DEFAULT_BACKOFF_STEP,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BYTES,
};
use crate::metrics;
use crate::store::{ObjectStore, RecordRef, RecordStore};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Upper bound on the pre-flight reachability probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the outer watchdog wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogScope {
    /// No outer watchdog; each attempt is bounded by its own deadline
    #[default]
    Attempt,
    /// One attempt's deadline bounds the entire retry sequence
    Operation,
}

/// Everything that shapes an upload besides the request itself
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPolicy {
    pub constraints: Constraints,
    pub max_attempts: u32,
    pub backoff_step: Duration,
    pub deadlines: DeadlinePolicy,
    pub watchdog: WatchdogScope,
    /// List the destination prefix before the first attempt (failure only logs)
    pub probe: bool,
    pub upsert: bool,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            constraints: Constraints {
                max_bytes: DEFAULT_MAX_BYTES,
                media_prefix: Some("video/".to_string()),
            },
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_step: DEFAULT_BACKOFF_STEP,
            deadlines: DeadlinePolicy::default(),
            watchdog: WatchdogScope::default(),
            probe: true,
            upsert: false,
        }
    }
}

/// Caller-side cancellation handle for one upload
#[derive(Debug, Default)]
pub struct UploadControl {
    token: CancellationToken,
    in_flight: AtomicBool,
}

impl UploadControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask to cancel the upload.
    ///
    /// While an attempt is in flight, `confirm` is consulted and the cancel is
    /// only honored if it returns `true`. Otherwise the cancel is immediate and
    /// `confirm` is never called. Returns whether the upload is now cancelled.
    pub fn request_cancel<F>(&self, confirm: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        if self.token.is_cancelled() {
            return true;
        }
        if self.in_flight.load(Ordering::Acquire) && !confirm() {
            tracing::debug!("cancel declined while transfer in flight");
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether a transfer attempt is currently outstanding
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.store(in_flight, Ordering::Release);
    }

    async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

fn cancelled(attempts_made: u32) -> UploadFailure {
    UploadFailure::new(FailureKind::Cancelled, "upload cancelled", attempts_made)
}

/// Upload pipeline bound to one bucket
pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    policy: UploadPolicy,
    executor: TransferExecutor,
}

impl UploadPipeline {
    /// Create a pipeline using synthetic progress estimates
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, policy: UploadPolicy) -> Self {
        Self::with_estimator(store, bucket, policy, Arc::new(SyntheticProgress))
    }

    /// Create a pipeline with a specific progress estimator
    pub fn with_estimator(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        policy: UploadPolicy,
        estimator: Arc<dyn ProgressEstimator>,
    ) -> Self {
        let bucket = bucket.into();
        let executor = TransferExecutor::new(
            Arc::clone(&store),
            bucket.clone(),
            policy.upsert,
            policy.deadlines,
            estimator,
        );
        Self {
            store,
            bucket,
            policy,
            executor,
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload `request` and return its public reference
    pub async fn upload(
        &self,
        request: UploadRequest,
        sink: &ProgressSink,
        control: &UploadControl,
    ) -> Result<UploadResult, UploadFailure> {
        self.run(request, None, sink, control).await
    }

    /// Upload `request`, then write its public reference onto `target`.
    ///
    /// A failed write yields [`FailureKind::PersistenceFailed`] with
    /// `public_reference` set: the file is stored, only the link is missing.
    pub async fn upload_and_attach(
        &self,
        request: UploadRequest,
        records: &dyn RecordStore,
        target: &RecordRef,
        sink: &ProgressSink,
        control: &UploadControl,
    ) -> Result<UploadResult, UploadFailure> {
        self.run(request, Some((records, target)), sink, control).await
    }

    #[tracing::instrument(
        name = "upload.pipeline",
        skip_all,
        fields(
            upload_id = %uuid::Uuid::new_v4(),
            store.bucket = %self.bucket,
            upload.path = %request.destination_path,
            upload.bytes = request.declared_size,
            upload.media_type = %request.media_type
        )
    )]
    async fn run(
        &self,
        request: UploadRequest,
        attach: Option<(&dyn RecordStore, &RecordRef)>,
        sink: &ProgressSink,
        control: &UploadControl,
    ) -> Result<UploadResult, UploadFailure> {
        let started = Instant::now();

        let result = if control.is_cancelled() {
            Err(cancelled(0))
        } else if let Err(rejected) = validation::validate(&request, &self.policy.constraints) {
            Err(rejected)
        } else {
            self.supervise(&request, attach, sink, control).await
        };
        control.set_in_flight(false);

        let elapsed = started.elapsed();
        match &result {
            Ok(done) => {
                sink.report(100);
                sink.finish(ProgressEnd::Succeeded);
                metrics::record_upload_success(done.bytes_written, elapsed.as_secs_f64());
                tracing::info!(
                    public_reference = %done.public_reference,
                    attempts = done.attempts_made,
                    duration_ms = elapsed.as_millis(),
                    "upload completed"
                );
            }
            Err(failure) => {
                let end = if failure.kind == FailureKind::Cancelled {
                    ProgressEnd::Cancelled
                } else {
                    ProgressEnd::Failed(failure.kind)
                };
                sink.finish(end);
                metrics::record_upload_failure(failure.kind.as_str(), elapsed.as_secs_f64());
                tracing::error!(
                    kind = %failure.kind,
                    error = %failure.message,
                    attempts = failure.attempts_made,
                    duration_ms = elapsed.as_millis(),
                    "upload failed"
                );
            }
        }

        result
    }

    /// Apply the configured watchdog around the attempt sequence
    async fn supervise(
        &self,
        request: &UploadRequest,
        attach: Option<(&dyn RecordStore, &RecordRef)>,
        sink: &ProgressSink,
        control: &UploadControl,
    ) -> Result<UploadResult, UploadFailure> {
        let attempts = AtomicU32::new(0);
        let sequence = self.attempt_sequence(request, attach, sink, control, &attempts);

        match self.policy.watchdog {
            WatchdogScope::Attempt => sequence.await,
            WatchdogScope::Operation => {
                let limit = self.policy.deadlines.deadline_for(request.declared_size);
                match tokio::time::timeout(limit, sequence).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(limit_secs = limit.as_secs(), "upload watchdog fired");
                        Err(UploadFailure::new(
                            FailureKind::TimedOut,
                            format!("upload did not finish within {}s", limit.as_secs()),
                            attempts.load(Ordering::Acquire),
                        ))
                    }
                }
            }
        }
    }

    async fn attempt_sequence(
        &self,
        request: &UploadRequest,
        attach: Option<(&dyn RecordStore, &RecordRef)>,
        sink: &ProgressSink,
        control: &UploadControl,
        attempts: &AtomicU32,
    ) -> Result<UploadResult, UploadFailure> {
        if self.policy.probe {
            tokio::select! {
                biased;
                _ = control.cancelled() => return Err(cancelled(0)),
                _ = self.probe(request) => {}
            }
        }

        let max_attempts = self.policy.max_attempts;
        let mut last_fault: Option<TransferFault> = None;

        for attempt_number in 1..=max_attempts {
            attempts.store(attempt_number, Ordering::Release);
            control.set_in_flight(true);

            let report = tokio::select! {
                biased;
                _ = control.cancelled() => {
                    control.set_in_flight(false);
                    return Err(cancelled(attempt_number));
                }
                report = self.executor.execute(attempt_number, request, sink) => report,
            };
            control.set_in_flight(false);

            let fault = match report.outcome {
                Ok(stored_path) => {
                    return self.finalize(request, stored_path, attempt_number, attach, sink).await;
                }
                Err(fault) => fault,
            };

            if !fault.kind.is_retryable() {
                return Err(UploadFailure::new(fault.kind, fault.message, attempt_number));
            }

            if attempt_number < max_attempts {
                let wait = self.policy.backoff_step * attempt_number;
                tracing::info!(
                    attempt = attempt_number,
                    wait_ms = wait.as_millis(),
                    kind = %fault.kind,
                    "retrying upload after backoff"
                );
                tokio::select! {
                    biased;
                    _ = control.cancelled() => return Err(cancelled(attempt_number)),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            last_fault = Some(fault);
        }

        let fault = last_fault.unwrap_or(TransferFault {
            kind: FailureKind::Unknown,
            message: "no attempts were made".to_string(),
        });
        Err(UploadFailure::new(fault.kind, fault.message, max_attempts))
    }

    /// Derive the public reference and optionally attach it to its record
    async fn finalize(
        &self,
        request: &UploadRequest,
        stored_path: String,
        attempts_made: u32,
        attach: Option<(&dyn RecordStore, &RecordRef)>,
        sink: &ProgressSink,
    ) -> Result<UploadResult, UploadFailure> {
        sink.report(CHECKPOINT_STORED);

        let public_reference = self
            .store
            .public_url(&self.bucket, &request.destination_path)
            .map_err(|e| {
                UploadFailure::new(FailureKind::ReferenceUnavailable, e.message, attempts_made)
            })?;

        if let Some((records, target)) = attach {
            sink.report(CHECKPOINT_PERSISTING);
            if let Err(e) = records.update(target, public_reference.as_str()).await {
                tracing::error!(
                    table = %target.table,
                    key = %target.key,
                    error = %e,
                    "file stored but saving its reference failed"
                );
                return Err(UploadFailure {
                    kind: FailureKind::PersistenceFailed,
                    message: e.message,
                    attempts_made,
                    public_reference: Some(public_reference),
                });
            }
        }

        Ok(UploadResult {
            public_reference,
            stored_path,
            attempts_made,
            bytes_written: request.declared_size,
        })
    }

    /// Best-effort reachability check; never fails the upload
    async fn probe(&self, request: &UploadRequest) {
        let prefix = request
            .destination_path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("");

        match tokio::time::timeout(PROBE_TIMEOUT, self.store.list(&self.bucket, prefix, 1)).await {
            Ok(Ok(entries)) => {
                tracing::debug!(prefix = %prefix, entries = entries.len(), "storage probe ok")
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "storage probe failed, continuing"),
            Err(_) => tracing::warn!(
                timeout_secs = PROBE_TIMEOUT.as_secs(),
                "storage probe timed out, continuing"
            ),
        }
    }
}
