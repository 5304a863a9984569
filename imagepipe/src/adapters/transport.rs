//! HTTP transport backed by `reqwest`.

use crate::error::TransportError;
use crate::image::ResponseInfo;
use crate::traits::{Transport, TransportEvent, TransportRequest, TransportStream};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, ACCEPT_RANGES, ETAG, IF_RANGE, LAST_MODIFIED, RANGE};
use std::time::Duration;
use tracing::{debug, trace, warn};

const DEFAULT_USER_AGENT: &str = concat!("imagepipe/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Streaming HTTP transport.
///
/// Partial downloads are resumed with `Range` and `If-Range` headers.
/// `reqwest` has no per-request priority, so priority changes are ignored
/// once a transfer has started.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(DEFAULT_USER_AGENT)
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn response_info(status: u16, headers: &HeaderMap, content_length: Option<u64>) -> ResponseInfo {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let mut info = ResponseInfo::new(status);
    info.expected_content_length = content_length;
    info.etag = header(ETAG);
    info.last_modified = header(LAST_MODIFIED);
    info.accepts_ranges = header(ACCEPT_RANGES).is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
    info
}

impl Transport for ReqwestTransport {
    fn fetch(&self, request: TransportRequest) -> TransportStream {
        let client = self.client.clone();

        let head = async move {
            let url = request.url;
            let priority = *request.priority.borrow();
            trace!(url = %url, priority = %priority, "HTTP GET request starting");

            let mut builder = client.get(&url);
            if let Some(resume) = &request.resume {
                builder = builder
                    .header(RANGE, format!("bytes={}-", resume.offset))
                    .header(IF_RANGE, resume.validator.as_str());
            }

            let response = builder.send().await.map_err(|e| {
                warn!(
                    url = %url,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "HTTP request failed"
                );
                TransportError::Request(e.to_string())
            })?;

            let status = response.status();
            if !status.is_success() {
                warn!(url = %url, status = status.as_u16(), "HTTP error status");
                return Err(TransportError::Validation {
                    status: status.as_u16(),
                });
            }

            let info = response_info(status.as_u16(), response.headers(), response.content_length());
            debug!(url = %url, status = info.status, length = ?info.expected_content_length, "HTTP response received");

            let body = response
                .bytes_stream()
                .map_ok(TransportEvent::Chunk)
                .map_err(|e| TransportError::Request(e.to_string()));
            Ok(stream::once(async move { Ok(TransportEvent::Response(info)) }).chain(body))
        };

        stream::once(head).try_flatten().boxed()
    }
}
