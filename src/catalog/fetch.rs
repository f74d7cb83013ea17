//! Conditional HTTP fetch of the upstream catalog

use crate::config::schema::CatalogConfig;
use crate::error::{KegError, KegResult};
use std::fmt;
use std::io::{self, Read};
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("keg/", env!("CARGO_PKG_VERSION"));

/// Response of one catalog request
pub struct FetchResponse {
    pub status: u16,
    /// Upstream validator, if the response carried one
    pub etag: Option<String>,
    /// Declared body size on the wire, if any
    pub content_length: Option<u64>,
    /// Body stream; only present for 200 responses
    pub body: Option<Box<dyn Read + Send>>,
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("etag", &self.etag)
            .field("content_length", &self.content_length)
            .field("body", &self.body.is_some())
            .finish()
    }
}

/// Carried inside an `io::Error` when a body runs past its byte limit
#[derive(Debug, thiserror::Error)]
#[error("body exceeds {limit} bytes")]
pub struct BodyLimitExceeded {
    pub seen: u64,
    pub limit: u64,
}

impl BodyLimitExceeded {
    /// The limit violation behind `err`, if that is what it is
    pub fn find(err: &io::Error) -> Option<&Self> {
        err.get_ref()?.downcast_ref::<Self>()
    }
}

/// Reader that fails with [`BodyLimitExceeded`] once more than `limit` bytes came through
pub struct CappedBody<R> {
    inner: R,
    seen: u64,
    limit: u64,
}

impl<R: Read> CappedBody<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            seen: 0,
            limit,
        }
    }
}

impl<R: Read> Read for CappedBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.seen += n as u64;
        if self.seen > self.limit {
            return Err(io::Error::other(BodyLimitExceeded {
                seen: self.seen,
                limit: self.limit,
            }));
        }
        Ok(n)
    }
}

/// Source of upstream catalog payloads
pub trait Fetcher: Send + Sync {
    /// Issue a GET for `url`, conditional on `if_none_match` when given.
    ///
    /// Non-2xx statuses are responses, not errors. Transport failures are errors.
    /// The body is the payload as sent on the wire (possibly gzip) and fails
    /// with [`BodyLimitExceeded`] past `max_bytes`; the declared length is
    /// checked by the caller before reading.
    fn fetch(&self, url: &str, if_none_match: Option<&str>, max_bytes: u64)
        -> KegResult<FetchResponse>;
}

/// Blocking fetcher over a shared `ureq` agent.
///
/// ureq is built without its gzip feature, so compressed bodies arrive
/// undecoded with their Content-Length intact and the builder unwraps them.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(config: &CatalogConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.request_deadline_secs)))
            .timeout_connect(Some(Duration::from_secs(config.connect_timeout_secs)))
            .timeout_recv_response(Some(Duration::from_secs(config.response_timeout_secs)))
            .http_status_as_error(false)
            .build();
        Self {
            agent: agent_config.into(),
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        if_none_match: Option<&str>,
        max_bytes: u64,
    ) -> KegResult<FetchResponse> {
        let mut request = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .header("Accept-Encoding", "gzip");
        if let Some(etag) = if_none_match.filter(|e| !e.is_empty()) {
            request = request.header("If-None-Match", etag);
        }

        debug!("GET {} (conditional: {})", url, if_none_match.is_some());
        let response = request
            .call()
            .map_err(|e| KegError::Fetch(format!("{}: {}", url, e)))?;

        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let body: Option<Box<dyn Read + Send>> = if status == 200 {
            // ureq's own cap is lifted; CappedBody reports overruns as a typed error
            let reader = response
                .into_body()
                .into_with_config()
                .limit(u64::MAX)
                .reader();
            Some(Box::new(CappedBody::new(reader, max_bytes)))
        } else {
            None
        };

        Ok(FetchResponse {
            status,
            etag,
            content_length,
            body,
        })
    }
}
