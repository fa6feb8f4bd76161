//! Verity Uploadr Library
//!
//! Resilient upload pipeline for verification videos and profile media
//! stored in a hosted object store.
//!
//! # Features
//!
//! - **Validated**: size ceiling and media family checked before any I/O
//! - **Bounded Retries**: linear backoff, terminal vs. retryable classification
//! - **Deadlines**: size-scaled per-attempt deadlines, optional outer watchdog
//! - **Progress**: synthetic estimates behind a swappable estimator
//! - **Cancellable**: confirmation-gated cancel while a transfer is in flight
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use verity_uploadr::config::Config;
//! use verity_uploadr::store::http::HttpObjectStore;
//! use verity_uploadr::upload::{ProgressSink, UploadControl, UploadPipeline, UploadRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let store = HttpObjectStore::new(&config.store.endpoint, &config.store.api_key)?;
//!     let policy = config.upload_policy();
//!     let request =
//!         UploadRequest::from_file("intro.mp4", "m-1/1700000000000_intro.mp4", &policy.constraints)
//!             .await?;
//!     let pipeline = UploadPipeline::new(Arc::new(store), &config.store.bucket, policy);
//!     let result = pipeline
//!         .upload(request, &ProgressSink::discard(), &UploadControl::new())
//!         .await?;
//!     println!("{}", result.public_reference);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod logging;
pub mod metrics;
pub mod session;
pub mod store;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use upload::{FailureKind, UploadFailure, UploadPipeline, UploadRequest, UploadResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
