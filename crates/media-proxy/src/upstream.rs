//! Authenticated client for the remote media origin.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::{debug, instrument};
use url::Url;

use crate::{ByteRange, CredentialHeaders, ProxyError, UpstreamConfig};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Status, headers and the not-yet-consumed body of an upstream response.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Validate that `input` is an absolute http(s) URL.
pub fn parse_media_url(input: &str) -> Result<Url, ProxyError> {
    let url = Url::parse(input).map_err(|e| ProxyError::invalid_url(input, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProxyError::invalid_url(
            input,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    config: UpstreamConfig,
    user_agent: HeaderValue,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, ProxyError> {
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| ProxyError::configuration(format!("invalid user agent: {e}")))?;

        // No overall request timeout: it would cut long media bodies short.
        // Decompression stays off so Content-Length matches the bytes we relay.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .tcp_nodelay(true)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()
            .map_err(|e| ProxyError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            user_agent,
        })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Issue a GET against the origin and return as soon as headers arrive.
    ///
    /// Non-success statuses are returned as-is; deciding what they mean is up
    /// to the caller.
    #[instrument(level = "debug", skip(self, credentials))]
    pub async fn fetch_stream(
        &self,
        url: &str,
        credentials: &CredentialHeaders,
        range: Option<ByteRange>,
    ) -> Result<UpstreamResponse, ProxyError> {
        let target = parse_media_url(url)?;

        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, self.user_agent.clone());
        credentials.apply_to(&mut headers);
        if let Some(range) = range {
            let value = HeaderValue::from_str(&range.to_string())
                .map_err(|_| ProxyError::invalid_range(range.to_string()))?;
            headers.insert(header::RANGE, value);
        }

        let request = self.client.get(target).headers(headers).send();
        let response = match tokio::time::timeout(self.config.header_timeout, request).await {
            Err(_) => {
                return Err(ProxyError::UpstreamTimeout {
                    url: url.to_owned(),
                    timeout: self.config.header_timeout,
                });
            }
            Ok(Err(e)) if e.is_timeout() => {
                return Err(ProxyError::UpstreamTimeout {
                    url: url.to_owned(),
                    timeout: self.config.header_timeout,
                });
            }
            Ok(Err(source)) => {
                return Err(ProxyError::UpstreamUnavailable {
                    url: url.to_owned(),
                    source,
                });
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let headers = response.headers().clone();
        debug!(
            status = status.as_u16(),
            content_length = ?response.content_length(),
            "Upstream responded"
        );

        let body: ByteStream = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
