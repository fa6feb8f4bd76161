//! Storage collaborators
//!
//! The upload pipeline talks to two hosted services and never to anything else:
//!
//! - an **object store** that accepts the file bytes and hands back a public URL
//! - a **record store** that receives the public URL on the owning row
//!
//! Both are traits so the pipeline can be driven by stubs in tests and by the
//! reqwest-backed clients in [`http`] in production.
//!
//! # Example
//!
//! ```no_run
//! use verity_uploadr::store::http::HttpObjectStore;
//! use verity_uploadr::store::{ObjectStore, PutOptions};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = HttpObjectStore::new("https://project.example.co", "service-key")?;
//! let options = PutOptions {
//!     content_type: "video/mp4".into(),
//!     upsert: false,
//! };
//! let receipt = store
//!     .put("verification-videos", "m-1/1700000000000_intro.mp4", Bytes::from("..."), &options)
//!     .await?;
//! println!("stored: {:?}", receipt);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use thiserror::Error;

pub mod http;

/// Error reported by a storage collaborator.
///
/// `status` carries the HTTP-like status code when the collaborator declared
/// one. Transport failures (connection refused, reset, DNS) carry `None`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StoreError {
    pub status: Option<u16>,
    pub message: String,
}

impl StoreError {
    /// Error with a declared status code
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Error without a status code (transport level)
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

/// Options for a single `put`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: String,
    /// Overwrite an existing object at the same path
    pub upsert: bool,
}

/// Successful `put` response body.
///
/// `stored_path` may be empty when the collaborator answered 2xx without a
/// usable payload; the classifier treats that as a retryable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    pub stored_path: String,
}

/// Entry returned by `list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub name: String,
}

/// Hosted object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` at `path` inside `bucket`.
    ///
    /// `Ok(None)` means the collaborator answered with an empty response and
    /// no declared error.
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        body: Bytes,
        options: &PutOptions,
    ) -> Result<Option<PutReceipt>, StoreError>;

    /// Durable public locator for an object
    fn public_url(&self, bucket: &str, path: &str) -> Result<Url, StoreError>;

    /// List up to `limit` objects under `prefix`
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<ObjectEntry>, StoreError>;
}

/// Row that receives the public reference after a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub table: String,
    pub key_column: String,
    pub key: String,
    pub column: String,
}

/// Hosted relational row store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Set `target.column` to `value` on the row where `key_column = key`
    async fn update(&self, target: &RecordRef, value: &str) -> Result<(), StoreError>;
}
