//! Single transfer attempt
//!
//! Dispatches one `put` on its own task and waits for it, at most until the
//! size-scaled deadline. On timeout the executor stops waiting and the task is
//! left to finish on its own; whatever it returns later is discarded.
//!
//! An abandoned transfer can still land. A retry that then finds its own
//! path already taken counts as stored.

use super::classify::{classify, is_duplicate, TransferFault, TransferOutcome};
use super::deadline::DeadlinePolicy;
use super::progress::{ProgressEstimator, ProgressSink};
use super::{AttemptState, AttemptStatus, UploadRequest};
use crate::metrics;
use crate::store::{ObjectStore, PutOptions, PutReceipt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result of one attempt
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub attempt: AttemptState,
    /// Stored path, or the classified fault
    pub outcome: Result<String, TransferFault>,
}

/// Marks the spawned transfer as abandoned once the executor stops waiting,
/// however it stops (settled, timed out, or dropped by a cancel).
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Runs transfer attempts against one bucket
pub struct TransferExecutor {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    upsert: bool,
    deadlines: DeadlinePolicy,
    estimator: Arc<dyn ProgressEstimator>,
}

impl TransferExecutor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        upsert: bool,
        deadlines: DeadlinePolicy,
        estimator: Arc<dyn ProgressEstimator>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            upsert,
            deadlines,
            estimator,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Run attempt number `attempt_number` for `request`
    #[tracing::instrument(
        name = "upload.attempt",
        skip(self, request, sink),
        fields(
            upload.path = %request.destination_path,
            upload.bytes = request.declared_size,
            attempt.deadline_secs = tracing::field::Empty,
            attempt.outcome = tracing::field::Empty
        )
    )]
    pub async fn execute(
        &self,
        attempt_number: u32,
        request: &UploadRequest,
        sink: &ProgressSink,
    ) -> AttemptReport {
        let deadline = self.deadlines.deadline_for(request.declared_size);
        let span = tracing::Span::current();
        span.record("attempt.deadline_secs", deadline.as_secs());

        let mut attempt = AttemptState::new(attempt_number, deadline);
        let abandoned = Arc::new(AtomicBool::new(false));
        let _abandon_guard = AbandonOnDrop(Arc::clone(&abandoned));

        let mut ticker = self.estimator.begin(request.declared_size, sink);

        let transfer = {
            let store = Arc::clone(&self.store);
            let bucket = self.bucket.clone();
            let path = request.destination_path.clone();
            let body = request.content.clone();
            let options = PutOptions {
                content_type: request.media_type.clone(),
                upsert: self.upsert,
            };
            let abandoned = Arc::clone(&abandoned);

            tokio::spawn(async move {
                let result = store.put(&bucket, &path, body, &options).await;
                if abandoned.load(Ordering::Acquire) {
                    tracing::debug!(
                        path = %path,
                        succeeded = result.is_ok(),
                        "late transfer result discarded"
                    );
                }
                result
            })
        };
        attempt.dispatch();

        let raw = match tokio::time::timeout(deadline, transfer).await {
            Ok(Ok(Ok(Some(receipt)))) => TransferOutcome::Stored(receipt),
            Ok(Ok(Ok(None))) => TransferOutcome::Empty,
            Ok(Ok(Err(err))) => TransferOutcome::Rejected(err),
            Ok(Err(join_err)) => TransferOutcome::Aborted(format!("transfer task failed: {}", join_err)),
            Err(_) => TransferOutcome::DeadlineElapsed(deadline),
        };
        ticker.settle();

        let raw = match raw {
            TransferOutcome::Rejected(err) if attempt_number > 1 && is_duplicate(&err) => {
                tracing::info!(
                    path = %request.destination_path,
                    error = %err,
                    "object already stored by an earlier attempt"
                );
                TransferOutcome::Stored(PutReceipt {
                    stored_path: format!("{}/{}", self.bucket, request.destination_path),
                })
            }
            other => other,
        };

        let outcome = classify(raw);
        let (status, label) = match &outcome {
            Ok(_) => (AttemptStatus::Succeeded, "succeeded"),
            Err(fault) if fault.kind.is_retryable() => (AttemptStatus::FailedRetryable, fault.kind.as_str()),
            Err(fault) => (AttemptStatus::FailedTerminal, fault.kind.as_str()),
        };
        attempt.settle(status);

        span.record("attempt.outcome", label);
        metrics::record_attempt(label);

        match &outcome {
            Ok(stored_path) => tracing::info!(
                stored_path = %stored_path,
                elapsed_ms = attempt.started_at.elapsed().as_millis(),
                "transfer attempt succeeded"
            ),
            Err(fault) => tracing::warn!(
                kind = %fault.kind,
                error = %fault.message,
                retryable = fault.kind.is_retryable(),
                elapsed_ms = attempt.started_at.elapsed().as_millis(),
                "transfer attempt failed"
            ),
        }

        AttemptReport { attempt, outcome }
    }
}
