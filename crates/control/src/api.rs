//! Control-plane endpoints and the HTTP client that drives them.
//!
//! The [`ControlPlane`] trait keeps the upload engine decoupled from the
//! transport and testable with scripted mocks; [`HttpControlPlane`] is
//! the production implementation over `reqwest`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use hoist_protocol::{CompletedPart, ListedPart};

use crate::retry::RetryPolicy;
use crate::ApiError;

/// A boxed future returned by control-plane methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// Request body for `/upload/multipart/initiate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUpload {
    pub file_name: String,
    pub file_type: String,
    pub size: u64,
    pub duration: f64,
    pub use_acceleration: bool,
}

/// The server-assigned content record reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRef {
    pub id: String,
}

/// Response body for `/upload/multipart/initiate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub upload_id: String,
    pub key: String,
    pub content: ContentRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration_endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedUrlRequest {
    part_number: u32,
    upload_id: String,
    key: String,
    use_acceleration: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUrlResponse {
    #[allow(dead_code)]
    part_number: u32,
    signed_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest {
    key: String,
    upload_id: String,
    content_id: String,
    parts: Vec<CompletedPart>,
    use_acceleration: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteResponse {
    location: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest {
    key: String,
    upload_id: String,
    content_id: String,
    use_acceleration: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListPartsRequest {
    key: String,
    upload_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPartsResponse {
    #[serde(default)]
    parts: Vec<ListedPart>,
}

// ---------------------------------------------------------------------------
// ControlPlane trait
// ---------------------------------------------------------------------------

/// Abstract control plane.
///
/// `upload_part` carries its own cancel token: firing it aborts the PUT
/// mid-flight and surfaces [`ApiError::Cancelled`], which is never
/// retried. All other operations are short-lived and run to completion.
pub trait ControlPlane: Send + Sync + 'static {
    /// Opens a multipart session; the server assigns the content id.
    fn initiate_multipart_upload(&self, req: InitiateUpload) -> ApiFuture<'_, InitiateResponse>;

    /// Returns a pre-signed PUT URL for one part.
    fn get_signed_url(
        &self,
        part_number: u32,
        upload_id: &str,
        key: &str,
        use_acceleration: bool,
    ) -> ApiFuture<'_, String>;

    /// PUTs one part's bytes to a signed URL and captures its ETag.
    fn upload_part(
        &self,
        url: &str,
        part_number: u32,
        body: Bytes,
        cancel: CancellationToken,
    ) -> ApiFuture<'_, CompletedPart>;

    /// Finalizes the session; returns the object's final location.
    fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        content_id: &str,
        parts: Vec<CompletedPart>,
        use_acceleration: bool,
    ) -> ApiFuture<'_, String>;

    /// Aborts the session server-side.
    fn cancel_upload(
        &self,
        key: &str,
        upload_id: &str,
        content_id: &str,
        use_acceleration: bool,
    ) -> ApiFuture<'_, ()>;

    /// Lists the parts the server has already accepted.
    fn list_uploaded_parts(&self, key: &str, upload_id: &str) -> ApiFuture<'_, Vec<ListedPart>>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Production control plane over HTTP.
pub struct HttpControlPlane {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpControlPlane {
    /// Creates a client rooted at `base_url` (no trailing slash).
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            timeout,
            retry,
        })
    }

    /// POSTs a JSON body, racing the request against the per-request
    /// timeout. A lost race is a retryable error; timeouts are an
    /// independent cancellation source, distinct from the caller's cancel
    /// token. Returns the response after the status check.
    async fn post_raw<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let send = self.http.post(&url).json(body).send();
        let resp = tokio::select! {
            res = send => res.map_err(transport_error)?,
            _ = tokio::time::sleep(self.timeout) => {
                return Err(ApiError::Retryable {
                    status: None,
                    message: format!("request to {path} timed out"),
                });
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), body));
        }
        Ok(resp)
    }

    /// `post_raw` plus JSON response decoding.
    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        self.post_raw(path, body)
            .await?
            .json::<R>()
            .await
            .map_err(|e| ApiError::Protocol(format!("undecodable response from {path}: {e}")))
    }

    /// `post_json` plus the client-side bounded retry used by operations
    /// classified retryable end-to-end (signed-url, cancel, list-parts).
    /// Part PUT retries live in the engine, which reports each attempt to
    /// clients.
    async fn post_json_with_retry<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let mut attempt = 0;
        loop {
            match self.post_json(path, body).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                    attempt += 1;
                    warn!(path, attempt, error = %e, "retrying control-plane request");
                    tokio::time::sleep(self.retry.jittered_delay(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn put_part_inner(
        &self,
        url: String,
        part_number: u32,
        body: Bytes,
        cancel: CancellationToken,
    ) -> Result<CompletedPart, ApiError> {
        let size = body.len() as u64;
        let send = self
            .http
            .put(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send();

        let resp = tokio::select! {
            res = send => res.map_err(transport_error)?,
            _ = tokio::time::sleep(self.timeout) => {
                return Err(ApiError::Retryable {
                    status: None,
                    message: format!("part {part_number} PUT timed out"),
                });
            }
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), body));
        }

        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let e_tag = strip_etag(etag.as_deref(), part_number)?;
        Ok(CompletedPart {
            part_number,
            e_tag,
            size,
        })
    }
}

impl ControlPlane for HttpControlPlane {
    fn initiate_multipart_upload(&self, req: InitiateUpload) -> ApiFuture<'_, InitiateResponse> {
        Box::pin(async move { self.post_json("/upload/multipart/initiate", &req).await })
    }

    fn get_signed_url(
        &self,
        part_number: u32,
        upload_id: &str,
        key: &str,
        use_acceleration: bool,
    ) -> ApiFuture<'_, String> {
        let req = SignedUrlRequest {
            part_number,
            upload_id: upload_id.to_string(),
            key: key.to_string(),
            use_acceleration,
        };
        Box::pin(async move {
            let resp: SignedUrlResponse = self
                .post_json_with_retry("/upload/multipart/signed-url", &req)
                .await?;
            Ok(resp.signed_url)
        })
    }

    fn upload_part(
        &self,
        url: &str,
        part_number: u32,
        body: Bytes,
        cancel: CancellationToken,
    ) -> ApiFuture<'_, CompletedPart> {
        let url = url.to_string();
        Box::pin(self.put_part_inner(url, part_number, body, cancel))
    }

    fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        content_id: &str,
        parts: Vec<CompletedPart>,
        use_acceleration: bool,
    ) -> ApiFuture<'_, String> {
        let req = CompleteRequest {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            content_id: content_id.to_string(),
            parts,
            use_acceleration,
        };
        Box::pin(async move {
            let resp: CompleteResponse = self.post_json("/upload/multipart/complete", &req).await?;
            Ok(resp.location)
        })
    }

    fn cancel_upload(
        &self,
        key: &str,
        upload_id: &str,
        content_id: &str,
        use_acceleration: bool,
    ) -> ApiFuture<'_, ()> {
        let req = CancelRequest {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            content_id: content_id.to_string(),
            use_acceleration,
        };
        // The cancel endpoint acknowledges with a bare 2xx; only the
        // status matters.
        Box::pin(async move {
            let path = "/upload/multipart/cancel";
            let mut attempt = 0;
            loop {
                match self.post_raw(path, &req).await {
                    Ok(_) => return Ok(()),
                    Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                        attempt += 1;
                        warn!(path, attempt, error = %e, "retrying control-plane request");
                        tokio::time::sleep(self.retry.jittered_delay(attempt)).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }

    fn list_uploaded_parts(&self, key: &str, upload_id: &str) -> ApiFuture<'_, Vec<ListedPart>> {
        let req = ListPartsRequest {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        };
        Box::pin(async move {
            let resp: ListPartsResponse = self
                .post_json_with_retry("/upload/multipart/list-parts", &req)
                .await?;
            Ok(resp.parts)
        })
    }
}

/// Strips the surrounding quotes S3 puts on ETag header values.
///
/// A missing or empty ETag is a protocol error for that part: the session
/// cannot be finalized without it.
fn strip_etag(header: Option<&str>, part_number: u32) -> Result<String, ApiError> {
    let etag = header
        .map(|v| v.trim_matches('"').to_string())
        .filter(|v| !v.is_empty());
    etag.ok_or_else(|| ApiError::Protocol(format!("part {part_number} response missing ETag")))
}

fn transport_error(e: reqwest::Error) -> ApiError {
    ApiError::Retryable {
        status: None,
        message: format!("transport error: {e}"),
    }
}
