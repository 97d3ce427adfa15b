use std::fmt;
use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::Client;
use replicast_types::VersionId;
use tracing::debug;

use crate::config::RecoveryConfig;
use crate::error::{RecoveryError, RecoveryResult};

/// What to ask the upstream for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchRequest {
    /// Entire object: headers and body.
    Full,
    /// Headers only.
    Head,
    /// The given byte ranges of the payload.
    Ranges(Vec<Range<u64>>),
}

impl FetchRequest {
    /// `Range` header value, e.g. `bytes=0-99,150-199`.
    pub fn range_header(ranges: &[Range<u64>]) -> String {
        let specs: Vec<String> = ranges
            .iter()
            .filter(|r| r.end > r.start)
            .map(|r| format!("{}-{}", r.start, r.end - 1))
            .collect();
        format!("bytes={}", specs.join(","))
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchRequest::Full => f.write_str("GET"),
            FetchRequest::Head => f.write_str("HEAD"),
            FetchRequest::Ranges(r) => write!(f, "GET {}", Self::range_header(r)),
        }
    }
}

/// Raw upstream answer.
#[derive(Clone, Debug, Default)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Authoritative source for object versions.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, version: VersionId, request: &FetchRequest) -> RecoveryResult<FetchResponse>;
}

/// [`Upstream`] over HTTP: `{base}/download/{version}`.
#[derive(Clone)]
pub struct HttpUpstream {
    base: String,
    client: Client,
}

impl HttpUpstream {
    pub fn new(base: &str, connect_timeout: Duration, request_timeout: Duration) -> RecoveryResult<Self> {
        let base = base.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(RecoveryError::InvalidBaseUrl(base.to_string()));
        }
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        let mut base = base.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self { base, client })
    }

    /// Builds the client from config. `None` when recovery is disabled.
    pub fn from_config(config: &RecoveryConfig) -> RecoveryResult<Option<Self>> {
        match config.base_url.as_deref() {
            Some(url) if config.enabled() => {
                Self::new(url, config.connect_timeout(), config.request_timeout()).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url_for(&self, version: VersionId) -> String {
        format!("{}download/{}", self.base, version)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, version: VersionId, request: &FetchRequest) -> RecoveryResult<FetchResponse> {
        let url = self.url_for(version);
        let builder = match request {
            FetchRequest::Full => self.client.get(&url),
            FetchRequest::Head => self.client.head(&url),
            FetchRequest::Ranges(ranges) => self
                .client
                .get(&url)
                .header(RANGE, FetchRequest::range_header(ranges)),
        };
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await?;
        debug!(%url, %request, status, bytes = body.len(), "upstream responded");
        Ok(FetchResponse { status, headers, body })
    }
}
