//! Session arena: one loopback listener per proxied track.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::server::{SessionState, router};
use crate::upstream::parse_media_url;
use crate::{CredentialHeaders, ProxyConfig, ProxyError, SupersedePolicy, UpstreamClient};

/// Public description of an open proxy session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySessionInfo {
    /// Monotonic per-proxy counter; larger means newer.
    pub generation: u64,
    pub port: u16,
    /// `http://<advertised host>:<port>/`
    pub base_url: Url,
    pub upstream_url: Url,
    pub created_at: DateTime<Utc>,
}

struct ProxySession {
    info: ProxySessionInfo,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ProxySession {
    fn close(&self) {
        self.shutdown.cancel();
    }
}

/// Opens and tracks proxy sessions.
///
/// Every [`open_proxy`](Self::open_proxy) call binds a fresh listener on an
/// OS-assigned port, so sessions never share sockets and need no cross-session
/// locking. Depending on [`SupersedePolicy`], older sessions are either closed
/// gracefully when a newer one opens or left to run until [`close_all`](Self::close_all).
pub struct StreamingProxy {
    config: ProxyConfig,
    client: UpstreamClient,
    generation: AtomicU64,
    sessions: Mutex<Vec<ProxySession>>,
}

impl StreamingProxy {
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let client = UpstreamClient::new(config.upstream.clone())?;
        Ok(Self {
            config,
            client,
            generation: AtomicU64::new(0),
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Bind a new session fronting `remote_url` and return its base URL.
    ///
    /// Returns once the listener is bound; nothing is fetched from the
    /// origin until the first request arrives.
    pub async fn open_proxy(
        &self,
        remote_url: &str,
        credentials: CredentialHeaders,
    ) -> Result<ProxySessionInfo, ProxyError> {
        let upstream_url = parse_media_url(remote_url)?;

        let bind_addr = self.config.bind_addr;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ProxyError::BindFailed {
                addr: bind_addr,
                source,
            })?;
        let port = listener
            .local_addr()
            .map_err(|source| ProxyError::BindFailed {
                addr: bind_addr,
                source,
            })?
            .port();

        let base_url = Url::parse(&format!("http://{}:{port}/", self.config.advertised_host))
            .map_err(|e| ProxyError::configuration(format!("invalid advertised host: {e}")))?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let info = ProxySessionInfo {
            generation,
            port,
            base_url,
            upstream_url: upstream_url.clone(),
            created_at: Utc::now(),
        };

        let app = router(Arc::new(SessionState {
            generation,
            upstream_url,
            credentials,
            client: self.client.clone(),
        }));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(listener, app, shutdown.clone(), generation));

        let superseded = {
            let mut sessions = self.sessions.lock();
            sessions.retain(|s| !s.task.is_finished());
            let superseded = match self.config.supersede {
                SupersedePolicy::CloseOnSupersede => std::mem::take(&mut *sessions),
                SupersedePolicy::KeepAlive => Vec::new(),
            };
            sessions.push(ProxySession {
                info: info.clone(),
                shutdown,
                task,
            });
            superseded
        };

        for old in &superseded {
            debug!(
                generation = old.info.generation,
                port = old.info.port,
                superseded_by = generation,
                "Closing superseded proxy session"
            );
            old.close();
        }

        info!(generation, port, "Proxy session listening");
        Ok(info)
    }

    /// Number of sessions whose listener task is still running.
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .iter()
            .filter(|s| !s.task.is_finished())
            .count()
    }

    /// Close one session by generation. Returns whether it was found.
    pub fn close(&self, generation: u64) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.iter().position(|s| s.info.generation == generation) {
            Some(index) => {
                sessions.remove(index).close();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock());
        if !sessions.is_empty() {
            info!(count = sessions.len(), "Closing all proxy sessions");
        }
        for session in &sessions {
            session.close();
        }
    }
}

impl Drop for StreamingProxy {
    fn drop(&mut self) {
        for session in self.sessions.get_mut().iter() {
            session.close();
        }
    }
}

async fn serve(
    listener: TcpListener,
    app: axum::Router,
    shutdown: CancellationToken,
    generation: u64,
) {
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;

    match result {
        Ok(()) => debug!(generation, "Proxy session closed"),
        Err(e) => warn!(generation, error = %e, "Proxy session terminated with error"),
    }
}
