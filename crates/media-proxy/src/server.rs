//! HTTP surface of a single proxy session.
//!
//! Media elements cannot attach cookies or a referer to their requests, and the
//! origin refuses cross-origin reads. Each session therefore fronts exactly one
//! upstream URL: whatever path is requested on the session listener, the same
//! remote resource is fetched with the session's credentials and piped back with
//! permissive CORS headers and Range support.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tracing::{debug, warn};
use url::Url;

use crate::{ByteRange, CredentialHeaders, ProxyError, UpstreamClient};

const ALLOWED_METHODS: &str = "GET, OPTIONS";
const ALLOWED_HEADERS: &str = "Range, Content-Type";
const EXPOSED_HEADERS: &str = "Content-Length, Content-Range, Accept-Ranges";

/// Everything one session needs to answer requests.
pub(crate) struct SessionState {
    pub(crate) generation: u64,
    pub(crate) upstream_url: Url,
    pub(crate) credentials: CredentialHeaders,
    pub(crate) client: UpstreamClient,
}

pub(crate) fn router(state: Arc<SessionState>) -> Router {
    Router::new()
        .route("/", any(handle_request))
        .route("/{*path}", any(handle_request))
        .layer(middleware::map_response(allow_any_origin))
        .with_state(state)
}

async fn allow_any_origin(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

async fn handle_request(
    State(state): State<Arc<SessionState>>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    match method {
        Method::OPTIONS => preflight(),
        Method::GET => forward(&state, &headers).await,
        other => {
            debug!(generation = state.generation, method = %other, "Rejecting unsupported method");
            (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, ALLOWED_METHODS)],
            )
                .into_response()
        }
    }
}

fn preflight() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );

    (StatusCode::NO_CONTENT, headers).into_response()
}

async fn forward(state: &SessionState, headers_in: &HeaderMap) -> Response {
    let range = match headers_in.get(header::RANGE) {
        None => None,
        Some(raw) => match raw.to_str().map(str::parse::<ByteRange>) {
            Ok(Ok(range)) => Some(range),
            _ => {
                debug!(generation = state.generation, range = ?raw, "Malformed Range header");
                return (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, "bytes */*")],
                )
                    .into_response();
            }
        },
    };

    let upstream = match state
        .client
        .fetch_stream(state.upstream_url.as_str(), &state.credentials, range)
        .await
    {
        Ok(upstream) if upstream.status.is_success() => upstream,
        Ok(upstream) => {
            return failure(
                state,
                ProxyError::UpstreamStatus {
                    status: upstream.status,
                    url: state.upstream_url.to_string(),
                },
            );
        }
        Err(e) => return failure(state, e),
    };

    // An origin that ignores Range answers 200 with the whole body; relay
    // that as-is rather than claiming a partial response we don't have.
    let partial = range.is_some() && upstream.status == StatusCode::PARTIAL_CONTENT;
    let status = if partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut out_headers = HeaderMap::new();
    let mut copied = vec![header::CONTENT_TYPE, header::CONTENT_LENGTH];
    if partial {
        copied.push(header::CONTENT_RANGE);
    }
    for key in copied {
        if let Some(value) = upstream.headers.get(&key) {
            out_headers.insert(key, value.clone());
        }
    }
    out_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    out_headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );

    debug!(
        generation = state.generation,
        status = status.as_u16(),
        range = ?range,
        "Streaming upstream body"
    );

    let body = Body::from_stream(upstream.body);
    (status, out_headers, body).into_response()
}

fn failure(state: &SessionState, err: ProxyError) -> Response {
    warn!(generation = state.generation, error = %err, "Proxy request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("proxy error: {err}"),
    )
        .into_response()
}
