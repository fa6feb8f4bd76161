//! Upload module
//!
//! Moves a single local file into hosted object storage with bounded,
//! classified retries and cosmetic progress reporting.
//!
//! The pieces, in the order a request meets them:
//!
//! 1. [`validation`] rejects oversize or wrong-type requests before any I/O
//! 2. [`pipeline`] drives up to `max_attempts` attempts with linear backoff
//! 3. [`attempt`] runs one transfer against a size-scaled [`deadline`]
//! 4. [`classify`] maps the raw outcome to a [`FailureKind`]
//! 5. [`progress`] feeds the observer a synthetic percentage meanwhile

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub mod attempt;
pub mod classify;
pub mod deadline;
pub mod media;
pub mod pipeline;
pub mod progress;
pub mod validation;

pub use deadline::DeadlinePolicy;
pub use pipeline::{UploadControl, UploadPipeline};
pub use progress::{ProgressEnd, ProgressEvent, ProgressSink};
pub use validation::Constraints;

/// One mebibyte
pub const MIB: u64 = 1024 * 1024;

/// Default size ceiling for verification videos (50 MiB)
pub const DEFAULT_MAX_BYTES: u64 = 50 * MIB;

/// Default number of attempts per upload
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff step; attempt `n` waits `n * step` before the next one
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_secs(2);

/// A file to upload. Immutable once the first attempt starts.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub content: Bytes,
    /// Opaque key in the bucket namespace; uniqueness is the caller's concern
    pub destination_path: String,
    pub declared_size: u64,
    pub media_type: String,
}

impl UploadRequest {
    /// Build a request from in-memory bytes
    pub fn new(content: Bytes, destination_path: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            declared_size: content.len() as u64,
            content,
            destination_path: destination_path.into(),
            media_type: media_type.into(),
        }
    }

    /// Read a local file, inferring its media type from the extension.
    ///
    /// Size and type are checked against `constraints` from the file's
    /// metadata first; a rejected file is never read.
    pub async fn from_file(
        path: impl AsRef<Path>,
        destination_path: impl Into<String>,
        constraints: &Constraints,
    ) -> Result<Self, IntakeError> {
        let path = path.as_ref();
        let io_error = |source| IntakeError::Io {
            path: path.to_path_buf(),
            source,
        };

        let metadata = tokio::fs::metadata(path).await.map_err(io_error)?;
        let header = Self {
            content: Bytes::new(),
            destination_path: destination_path.into(),
            declared_size: metadata.len(),
            media_type: media::infer_media_type(path, None),
        };
        validation::validate(&header, constraints)?;

        let content = tokio::fs::read(path).await.map_err(io_error)?;
        Ok(Self {
            declared_size: content.len() as u64,
            content: Bytes::from(content),
            ..header
        })
    }
}

/// Turning a local file into an [`UploadRequest`] failed
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Rejected(#[from] UploadFailure),
}

/// Destination key for an upload owned by `owner_id`.
///
/// `{owner_id}/{unix_millis}_{file_name}`; the timestamp keeps repeated
/// uploads of the same file from colliding. Directory components and
/// whitespace in `file_name` are flattened.
pub fn destination_path(owner_id: &str, file_name: &str, at: DateTime<Utc>) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    let base = if base.is_empty() { "upload".to_string() } else { base };
    format!("{}/{}_{}", owner_id, at.timestamp_millis(), base)
}

/// Failure classification surfaced to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    SizeExceeded,
    WrongMediaType,
    BucketUnreachable,
    PayloadTooLarge,
    NotFound,
    ConnectionReset,
    TimedOut,
    Unknown,
    /// Stored, but no public URL could be derived for it
    ReferenceUnavailable,
    /// Stored, but attaching the public URL to the owning row failed
    PersistenceFailed,
    Cancelled,
}

impl FailureKind {
    /// Whether another attempt might succeed
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::ConnectionReset | FailureKind::TimedOut | FailureKind::Unknown
        )
    }

    /// Stable label for logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::SizeExceeded => "size_exceeded",
            FailureKind::WrongMediaType => "wrong_media_type",
            FailureKind::BucketUnreachable => "bucket_unreachable",
            FailureKind::PayloadTooLarge => "payload_too_large",
            FailureKind::NotFound => "not_found",
            FailureKind::ConnectionReset => "connection_reset",
            FailureKind::TimedOut => "timed_out",
            FailureKind::Unknown => "unknown",
            FailureKind::ReferenceUnavailable => "reference_unavailable",
            FailureKind::PersistenceFailed => "persistence_failed",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of an upload
#[derive(Error, Debug, Clone, PartialEq)]
#[error("upload failed ({kind}) after {attempts_made} attempt(s): {message}")]
pub struct UploadFailure {
    pub kind: FailureKind,
    pub message: String,
    pub attempts_made: u32,
    /// Set when the bytes are stored even though the overall operation failed
    pub public_reference: Option<Url>,
}

impl UploadFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>, attempts_made: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts_made,
            public_reference: None,
        }
    }

    /// Copy suitable for showing to the person who picked the file
    pub fn user_message(&self) -> String {
        match self.kind {
            FailureKind::SizeExceeded => "The file is too large. Please choose a smaller file.".into(),
            FailureKind::WrongMediaType => "This file type is not supported here.".into(),
            FailureKind::PayloadTooLarge => {
                "The storage service rejected the file as too large.".into()
            }
            FailureKind::BucketUnreachable | FailureKind::NotFound => {
                "Uploads are misconfigured on our side. Please contact support.".into()
            }
            FailureKind::ConnectionReset | FailureKind::TimedOut => {
                "The upload could not finish. Check your connection and try again.".into()
            }
            FailureKind::Unknown => "The upload failed. Please try again.".into(),
            FailureKind::ReferenceUnavailable => {
                "The file was uploaded but could not be linked. Please contact support.".into()
            }
            FailureKind::PersistenceFailed => match &self.public_reference {
                Some(url) => format!(
                    "The file is safely stored at {} but saving it to your profile failed. Please retry saving.",
                    url
                ),
                None => "The file is stored but saving it to your profile failed. Please retry saving.".into(),
            },
            FailureKind::Cancelled => "Upload cancelled.".into(),
        }
    }
}

/// Successful upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub public_reference: Url,
    pub stored_path: String,
    pub attempts_made: u32,
    pub bytes_written: u64,
}

/// Lifecycle of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Pending,
    InFlight,
    Succeeded,
    FailedRetryable,
    FailedTerminal,
}

impl AttemptStatus {
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            AttemptStatus::Succeeded | AttemptStatus::FailedRetryable | AttemptStatus::FailedTerminal
        )
    }
}

/// Per-attempt bookkeeping, discarded once the attempt settles
#[derive(Debug, Clone)]
pub struct AttemptState {
    pub attempt_number: u32,
    pub started_at: Instant,
    pub deadline: Duration,
    status: AttemptStatus,
}

impl AttemptState {
    pub fn new(attempt_number: u32, deadline: Duration) -> Self {
        Self {
            attempt_number,
            started_at: Instant::now(),
            deadline,
            status: AttemptStatus::Pending,
        }
    }

    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    /// Mark the transfer as dispatched
    pub fn dispatch(&mut self) {
        if self.status == AttemptStatus::Pending {
            self.status = AttemptStatus::InFlight;
        }
    }

    /// Record the outcome. Returns `false` (and changes nothing) if the
    /// attempt has already settled.
    pub fn settle(&mut self, status: AttemptStatus) -> bool {
        if self.status.is_settled() || !status.is_settled() {
            return false;
        }
        self.status = status;
        true
    }
}
