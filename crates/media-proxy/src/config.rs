use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Ceiling for receiving upstream response headers.
pub const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Options for the outbound client that talks to the media origin.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Maximum time to wait for response headers. The body itself is not
    /// bounded, media responses are long-lived.
    pub header_timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Redirect hops followed before giving up
    pub max_redirects: usize,

    /// User agent sent when the credential set does not provide one
    pub user_agent: String,

    /// Maximum idle connections to keep per host.
    /// Seeks open parallel range requests against the same CDN host.
    pub pool_max_idle_per_host: usize,

    /// Duration to keep idle connections alive before closing
    pub pool_idle_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            header_timeout: DEFAULT_HEADER_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            pool_max_idle_per_host: 8,
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// What happens to the previous session when a new one is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupersedePolicy {
    /// Stop accepting on the old listener. Responses already streaming
    /// are allowed to finish.
    #[default]
    CloseOnSupersede,
    /// Leave old listeners bound until `close_all` or drop.
    KeepAlive,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address each session binds to. Port 0 asks the OS for an ephemeral port.
    pub bind_addr: SocketAddr,

    /// Host name placed in the base URL handed back to callers
    pub advertised_host: String,

    pub supersede: SupersedePolicy,

    pub upstream: UpstreamConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            advertised_host: "localhost".to_owned(),
            supersede: SupersedePolicy::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl ProxyConfig {
    pub fn with_supersede(mut self, supersede: SupersedePolicy) -> Self {
        self.supersede = supersede;
        self
    }

    pub fn with_upstream(mut self, upstream: UpstreamConfig) -> Self {
        self.upstream = upstream;
        self
    }
}
