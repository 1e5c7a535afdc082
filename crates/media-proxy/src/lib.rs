//! # media-proxy
//!
//! A loopback HTTP proxy for media that needs session credentials.
//!
//! The origin's media URLs are short-lived, refuse cross-origin reads and only
//! answer when cookies and a matching referer are present. An audio element cannot
//! send those. [`StreamingProxy::open_proxy`] binds a listener on an ephemeral
//! port that re-serves one remote URL over plain HTTP:
//!
//! - `OPTIONS` → `204` with CORS headers
//! - `GET` + `Range` → upstream range request, relayed as `206`
//! - `GET` → upstream plain request, relayed as `200`
//! - anything else → `405`
//!
//! Upstream failures are answered with `500` on that connection only; sibling
//! connections (for example a seek overlapping the initial read) are unaffected.

mod config;
mod credentials;
mod error;
mod range;
mod server;
mod session;
mod upstream;

pub use config::{
    DEFAULT_HEADER_TIMEOUT, DEFAULT_MAX_REDIRECTS, DEFAULT_USER_AGENT, ProxyConfig,
    SupersedePolicy, UpstreamConfig,
};
pub use credentials::CredentialHeaders;
pub use error::ProxyError;
pub use range::ByteRange;
pub use session::{ProxySessionInfo, StreamingProxy};
pub use upstream::{ByteStream, UpstreamClient, UpstreamResponse, parse_media_url};
