//! Shared test doubles for pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::Url;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use verity_uploadr::store::{ObjectEntry, ObjectStore, PutOptions, PutReceipt, StoreError};
use verity_uploadr::upload::{ProgressEnd, ProgressEvent, UploadRequest, MIB};

/// One scripted answer to `put`
#[derive(Debug, Clone)]
pub struct Step {
    pub delay: Duration,
    pub answer: Result<Option<PutReceipt>, StoreError>,
}

impl Step {
    pub fn ok(stored_path: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            answer: Ok(Some(PutReceipt {
                stored_path: stored_path.to_string(),
            })),
        }
    }

    pub fn empty() -> Self {
        Self {
            delay: Duration::ZERO,
            answer: Ok(None),
        }
    }

    pub fn status(status: u16, message: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            answer: Err(StoreError::with_status(status, message)),
        }
    }

    pub fn reset() -> Self {
        Self {
            delay: Duration::ZERO,
            answer: Err(StoreError::transport("connection reset by peer")),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Object store that plays back a script of `put` answers
pub struct ScriptedStore {
    script: Mutex<VecDeque<Step>>,
    put_started: Mutex<Vec<Instant>>,
    completed: AtomicU32,
    list_calls: AtomicU32,
    list_fails: bool,
    public_url_fails: bool,
}

impl ScriptedStore {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            put_started: Mutex::new(Vec::new()),
            completed: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            list_fails: false,
            public_url_fails: false,
        }
    }

    /// Same step for every call
    pub fn always(step: Step, times: usize) -> Self {
        Self::new(vec![step; times])
    }

    pub fn with_failing_list(mut self) -> Self {
        self.list_fails = true;
        self
    }

    pub fn with_failing_public_url(mut self) -> Self {
        self.public_url_fails = true;
        self
    }

    pub fn put_calls(&self) -> usize {
        self.put_started.lock().len()
    }

    pub fn put_instants(&self) -> Vec<Instant> {
        self.put_started.lock().clone()
    }

    /// Number of `put` calls that ran to completion, abandoned ones included
    pub fn completed_puts(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for ScriptedStore {
    async fn put(
        &self,
        _bucket: &str,
        _path: &str,
        _body: Bytes,
        _options: &PutOptions,
    ) -> Result<Option<PutReceipt>, StoreError> {
        self.put_started.lock().push(Instant::now());
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Step::status(500, "script exhausted"));

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        step.answer
    }

    fn public_url(&self, bucket: &str, path: &str) -> Result<Url, StoreError> {
        if self.public_url_fails {
            return Err(StoreError::transport("no public URL configured"));
        }
        Url::parse(&format!(
            "https://cdn.example.com/storage/v1/object/public/{}/{}",
            bucket, path
        ))
        .map_err(|e| StoreError::transport(e.to_string()))
    }

    async fn list(
        &self,
        _bucket: &str,
        _prefix: &str,
        _limit: usize,
    ) -> Result<Vec<ObjectEntry>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_fails {
            return Err(StoreError::with_status(403, "list not permitted"));
        }
        Ok(Vec::new())
    }
}

/// A small video request
pub fn video_request() -> UploadRequest {
    UploadRequest::new(
        Bytes::from_static(b"\x00\x00\x00\x18ftypmp42"),
        "m-1/1700000000000_intro.mp4",
        "video/mp4",
    )
}

/// Request declaring `declared_size` bytes without allocating them
pub fn sized_request(declared_size: u64, media_type: &str) -> UploadRequest {
    UploadRequest {
        content: Bytes::from_static(b"stub"),
        destination_path: "m-1/1700000000000_big.mp4".to_string(),
        declared_size,
        media_type: media_type.to_string(),
    }
}

/// 50.01 MiB
pub fn just_over_ceiling() -> u64 {
    50 * MIB + MIB / 100
}

pub fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn percents(events: &[ProgressEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Percent(p) => Some(*p),
            ProgressEvent::Finished(_) => None,
        })
        .collect()
}

pub fn finish_of(events: &[ProgressEvent]) -> Vec<ProgressEnd> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Finished(end) => Some(*end),
            ProgressEvent::Percent(_) => None,
        })
        .collect()
}
