//! Opaque credential header set forwarded to the media origin.

use std::fmt;
use std::str::FromStr;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

/// Headers that identify a session with the media origin.
///
/// The set is never parsed or interpreted. Cookie strings are stored verbatim and
/// the whole set is copied onto every upstream request, except hop-by-hop
/// headers which belong to the outbound connection itself.
///
/// ```rust
/// use media_proxy::CredentialHeaders;
///
/// let credentials = CredentialHeaders::new()
///     .with_cookies("SESSDATA=abc; bili_jct=xyz")
///     .with_origin_and_referer("https://www.bilibili.com");
/// assert_eq!(credentials.len(), 3);
/// ```
#[derive(Clone, Default)]
pub struct CredentialHeaders {
    headers: HeaderMap,
}

impl CredentialHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookies(mut self, cookies: impl AsRef<str>) -> Self {
        let cookies = cookies.as_ref().trim();
        if !cookies.is_empty() {
            self.insert_typed(header::COOKIE, cookies);
        }
        self
    }

    pub fn with_referer(mut self, referer: impl AsRef<str>) -> Self {
        self.insert_typed(header::REFERER, referer);
        self
    }

    pub fn with_origin(mut self, origin: impl AsRef<str>) -> Self {
        self.insert_typed(header::ORIGIN, origin);
        self
    }

    pub fn with_origin_and_referer(self, base_url: impl AsRef<str>) -> Self {
        let base_url = base_url.as_ref();
        self.with_origin(base_url).with_referer(base_url)
    }

    pub fn with_user_agent(mut self, user_agent: impl AsRef<str>) -> Self {
        self.insert_typed(header::USER_AGENT, user_agent);
        self
    }

    /// Insert an arbitrary header. Invalid names or values are skipped.
    pub fn insert<K: AsRef<str>, V: AsRef<str>>(&mut self, key: K, value: V) {
        match HeaderName::from_str(key.as_ref()) {
            Ok(name) => self.insert_typed(name, value),
            Err(e) => debug!(error = %e, "Invalid credential header name; skipping"),
        }
    }

    fn insert_typed<V: AsRef<str>>(&mut self, name: HeaderName, value: V) {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(e) => debug!(header = %name, error = %e, "Invalid credential header value; skipping"),
        }
    }

    pub fn get(&self, name: impl header::AsHeaderName) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Copy the set onto an outbound request header map, skipping hop-by-hop headers.
    pub fn apply_to(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            if name == header::HOST || name == header::CONNECTION {
                continue;
            }
            target.insert(name.clone(), value.clone());
        }
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for CredentialHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut credentials = Self::new();
        for (key, value) in iter {
            credentials.insert(key, value);
        }
        credentials
    }
}

// Values are secrets; only names are shown.
impl fmt::Debug for CredentialHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.headers.keys().map(HeaderName::as_str))
            .finish()
    }
}
