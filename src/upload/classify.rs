//! Transfer outcome classification
//!
//! Rules are mutually exclusive and checked in order; the first match wins:
//!
//! | # | Raw outcome | Kind | Retry |
//! |---|-------------|------|-------|
//! | 1 | empty response, no error | `TimedOut` | yes |
//! | 2 | status 406 | `BucketUnreachable` | no |
//! | 3 | status 413 | `PayloadTooLarge` | no |
//! | 4 | status 404 | `NotFound` | no |
//! | 5 | network/timeout wording, or no status | `ConnectionReset` / `TimedOut` | yes |
//! | 6 | any other error | `Unknown` | yes |
//! | 7 | no error, no usable payload | `Unknown` | yes |

use super::FailureKind;
use crate::store::{PutReceipt, StoreError};
use lazy_static::lazy_static;
use regex_lite::Regex;
use std::time::Duration;

lazy_static! {
    static ref TIMEOUT_WORDING: Regex =
        Regex::new(r"(?i)(timeout|timed out|time out|etimedout|deadline exceeded)").unwrap();
    static ref NETWORK_WORDING: Regex = Regex::new(
        r"(?i)(connection reset|econnreset|connection refused|connection closed|connection aborted|broken pipe|network|fetch failed|socket hang up)"
    )
    .unwrap();
    static ref DUPLICATE_WORDING: Regex =
        Regex::new(r"(?i)(already exists|duplicate)").unwrap();
}

/// What one attempt produced before interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Collaborator answered with nothing and declared no error
    Empty,
    Stored(PutReceipt),
    Rejected(StoreError),
    /// The attempt deadline elapsed first
    DeadlineElapsed(Duration),
    /// The transfer task died without producing a result
    Aborted(String),
}

/// A classified failure of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFault {
    pub kind: FailureKind,
    pub message: String,
}

impl TransferFault {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Classify `outcome`, returning the stored path on success
pub fn classify(outcome: TransferOutcome) -> Result<String, TransferFault> {
    match outcome {
        TransferOutcome::Empty => Err(TransferFault::new(
            FailureKind::TimedOut,
            "storage returned an empty response",
        )),
        TransferOutcome::DeadlineElapsed(deadline) => Err(TransferFault::new(
            FailureKind::TimedOut,
            format!("upload did not finish within {}s", deadline.as_secs()),
        )),
        TransferOutcome::Rejected(err) => Err(classify_error(err)),
        TransferOutcome::Aborted(reason) => Err(TransferFault::new(FailureKind::Unknown, reason)),
        TransferOutcome::Stored(receipt) if receipt.stored_path.trim().is_empty() => Err(
            TransferFault::new(FailureKind::Unknown, "storage accepted the upload but returned no path"),
        ),
        TransferOutcome::Stored(receipt) => Ok(receipt.stored_path),
    }
}

/// Whether the store refused the write because the object is already there
pub fn is_duplicate(err: &StoreError) -> bool {
    err.status == Some(409) || DUPLICATE_WORDING.is_match(&err.message)
}

fn classify_error(err: StoreError) -> TransferFault {
    match err.status {
        Some(406) => TransferFault::new(FailureKind::BucketUnreachable, err.message),
        Some(413) => TransferFault::new(FailureKind::PayloadTooLarge, err.message),
        Some(404) => TransferFault::new(FailureKind::NotFound, err.message),
        status => {
            let timeout = TIMEOUT_WORDING.is_match(&err.message);
            let network = NETWORK_WORDING.is_match(&err.message);
            let no_status = matches!(status, None | Some(0));

            if timeout {
                TransferFault::new(FailureKind::TimedOut, err.message)
            } else if network || no_status {
                TransferFault::new(FailureKind::ConnectionReset, err.message)
            } else {
                TransferFault::new(FailureKind::Unknown, err.message)
            }
        }
    }
}
