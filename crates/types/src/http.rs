//! Transport-level request and response values.
//!
//! These are deliberately small: the pipeline builds an [`HttpRequest`], a
//! [`crate::Transport`] turns it into an [`HttpResponse`] whose body is a
//! lazily pulled [`ByteStream`].

use crate::{ByteStream, ErnieError, Method, ResponseHeaders, Result};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt as _;
use std::fmt;
use url::Url;

/// A fully resolved request ready for the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    /// Final merged headers, in insertion order.
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Value of a query parameter in the final URL.
    #[must_use]
    pub fn query_param(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

/// A response whose status and headers have arrived; the body is pulled on demand.
pub struct HttpResponse {
    pub status: u16,
    /// Headers keyed by lowercase name.
    pub headers: ResponseHeaders,
    pub body: ByteStream,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16, headers: ResponseHeaders, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// A response with a body that is already fully in memory.
    #[must_use]
    pub fn from_bytes(status: u16, headers: ResponseHeaders, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self::new(
            status,
            headers,
            Box::pin(futures_util::stream::once(async move { Ok(body) })),
        )
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Drains the body into memory.
    ///
    /// # Errors
    ///
    /// Propagates the first error produced by the body stream.
    pub async fn bytes(self) -> Result<Bytes> {
        let mut body = self.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Drains the body and decodes it as UTF-8, replacing invalid sequences.
    ///
    /// # Errors
    ///
    /// Propagates the first error produced by the body stream.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Joins a base URL and a path by plain concatenation, or returns `path`
/// unchanged when it is already absolute.
///
/// # Errors
///
/// Returns [`ErnieError::InvalidArgument`] if the result is not a valid URL.
pub fn join_url(base: &str, path: &str) -> Result<Url> {
    let raw = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else if path.starts_with('/') {
        format!("{}{path}", base.trim_end_matches('/'))
    } else {
        format!("{}/{path}", base.trim_end_matches('/'))
    };
    Url::parse(&raw).map_err(|e| ErnieError::InvalidArgument(format!("invalid URL {raw}: {e}")))
}
