//! reqwest-backed storage collaborators
//!
//! Speaks the hosted backend's REST dialect:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | put | `POST {endpoint}/storage/v1/object/{bucket}/{path}` |
//! | public URL | `{endpoint}/storage/v1/object/public/{bucket}/{path}` |
//! | list | `POST {endpoint}/storage/v1/object/list/{bucket}` |
//! | row update | `PATCH {endpoint}/rest/v1/{table}?{key_column}=eq.{key}` |
//!
//! Error bodies look like `{"statusCode": "404", "error": "...", "message": "..."}`.
//! The body's `statusCode` (string or number) wins over the HTTP status because
//! the storage gateway frequently wraps upstream errors in a 400.

use super::{ObjectEntry, ObjectStore, PutOptions, PutReceipt, RecordRef, RecordStore, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

/// Characters escaped inside a single path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Encode an object path, keeping `/` as the separator
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::transport(format!("request timed out: {}", err))
    } else if err.is_connect() {
        StoreError::transport(format!("network connection failed: {}", err))
    } else {
        StoreError::transport(err.to_string())
    }
}

/// Turn a non-2xx response body into a [`StoreError`]
fn error_from_body(http_status: u16, body: &str) -> StoreError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    let declared = parsed
        .as_ref()
        .and_then(|v| v.get("statusCode"))
        .and_then(|code| match code {
            Value::String(s) => s.trim().parse::<u16>().ok(),
            Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            _ => None,
        });

    let message = parsed
        .as_ref()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {}", http_status)
            } else {
                body.trim().to_string()
            }
        });

    StoreError::with_status(declared.unwrap_or(http_status), message)
}

fn build_client() -> Result<reqwest::Client, StoreError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| StoreError::transport(format!("failed to build HTTP client: {}", e)))
}

/// Hosted object storage over HTTP
pub struct HttpObjectStore {
    endpoint: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl HttpObjectStore {
    /// Create a client for `endpoint` (scheme + host, no trailing path)
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, StoreError> {
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http_client: build_client()?,
        })
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.endpoint,
            encode_segment(bucket),
            encode_path(path)
        )
    }
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    #[tracing::instrument(
        name = "store.put",
        skip(self, body, options),
        fields(
            store.bucket = %bucket,
            store.path = %path,
            http.content_type = %options.content_type,
            upload.bytes = body.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn put(
        &self,
        bucket: &str,
        path: &str,
        body: Bytes,
        options: &PutOptions,
    ) -> Result<Option<PutReceipt>, StoreError> {
        let response = self
            .http_client
            .post(self.object_url(bucket, path))
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header(CONTENT_TYPE, &options.content_type)
            .header("x-upsert", options.upsert.to_string())
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &text));
        }

        if text.trim().is_empty() {
            return Ok(None);
        }

        let stored_path = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("Key").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();

        tracing::debug!(stored_path = %stored_path, "object stored");

        Ok(Some(PutReceipt { stored_path }))
    }

    fn public_url(&self, bucket: &str, path: &str) -> Result<Url, StoreError> {
        let raw = format!(
            "{}/storage/v1/object/public/{}/{}",
            self.endpoint,
            encode_segment(bucket),
            encode_path(path)
        );
        Url::parse(&raw).map_err(|e| StoreError::transport(format!("invalid public URL {}: {}", raw, e)))
    }

    #[tracing::instrument(name = "store.list", skip(self), err)]
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<ObjectEntry>, StoreError> {
        let response = self
            .http_client
            .post(format!(
                "{}/storage/v1/object/list/{}",
                self.endpoint,
                encode_segment(bucket)
            ))
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "prefix": prefix, "limit": limit }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &text));
        }

        let listed: Vec<ListedObject> = serde_json::from_str(&text).map_err(|e| {
            StoreError::with_status(status.as_u16(), format!("malformed list response: {}", e))
        })?;

        Ok(listed
            .into_iter()
            .map(|o| ObjectEntry { name: o.name })
            .collect())
    }
}

/// Hosted row store over HTTP
pub struct HttpRecordStore {
    endpoint: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl HttpRecordStore {
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, StoreError> {
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http_client: build_client()?,
        })
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    #[tracing::instrument(
        name = "records.update",
        skip(self, value),
        fields(db.table = %target.table, db.key = %target.key, db.rows = tracing::field::Empty),
        err
    )]
    async fn update(&self, target: &RecordRef, value: &str) -> Result<(), StoreError> {
        let mut body = serde_json::Map::new();
        body.insert(target.column.clone(), Value::String(value.to_string()));

        let response = self
            .http_client
            .patch(format!(
                "{}/rest/v1/{}",
                self.endpoint,
                encode_segment(&target.table)
            ))
            .query(&[(target.key_column.as_str(), format!("eq.{}", target.key))])
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header("Prefer", "return=representation")
            .json(&Value::Object(body))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &text));
        }

        // the filter matching nothing is still a 2xx, with no rows echoed back
        let updated = serde_json::from_str::<Vec<Value>>(&text)
            .map(|rows| rows.len())
            .map_err(|e| {
                StoreError::with_status(status.as_u16(), format!("malformed update response: {}", e))
            })?;
        tracing::Span::current().record("db.rows", updated);

        if updated == 0 {
            return Err(StoreError::with_status(
                404,
                format!(
                    "no {} row where {} = {}",
                    target.table, target.key_column, target.key
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(
            encode_path("m-1/1700000000000_my clip.mp4"),
            "m-1/1700000000000_my%20clip.mp4"
        );
    }

    #[test]
    fn test_error_body_status_code_string_wins() {
        let err = error_from_body(
            400,
            r#"{"statusCode":"404","error":"Not found","message":"Bucket not found"}"#,
        );
        assert_eq!(err.status, Some(404));
        assert_eq!(err.message, "Bucket not found");
    }

    #[test]
    fn test_error_body_numeric_status_code() {
        let err = error_from_body(400, r#"{"statusCode":413,"error":"Payload too large"}"#);
        assert_eq!(err.status, Some(413));
        assert_eq!(err.message, "Payload too large");
    }

    #[test]
    fn test_error_body_not_json_falls_back_to_http_status() {
        let err = error_from_body(502, "Bad Gateway");
        assert_eq!(err.status, Some(502));
        assert_eq!(err.message, "Bad Gateway");
    }

    #[test]
    fn test_public_url_shape() {
        let store = HttpObjectStore::new("https://project.example.co/", "key").unwrap();
        let url = store.public_url("videos", "m-1/a.mp4").unwrap();
        assert_eq!(
            url.as_str(),
            "https://project.example.co/storage/v1/object/public/videos/m-1/a.mp4"
        );
    }
}
