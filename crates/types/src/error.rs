//! Unified error type for the erniebot workspace.

use serde_json::Value;
use std::{collections::BTreeMap, fmt};
use thiserror::Error;

/// Response headers captured at the failure site, keyed by lowercase name.
pub type ResponseHeaders = BTreeMap<String, String>;

/// Enumerates all error kinds that can occur across erniebot crates.
///
/// The type is `Clone` so that a single token-endpoint failure can be handed
/// to every caller waiting on the same in-flight fetch.
#[derive(Debug, Clone, Error)]
pub enum ErnieError {
    /// Network, DNS or TLS failure, or a body that could not be read.
    #[error("connection error: {0}")]
    Connection(String),

    /// The request was aborted because its timeout elapsed.
    #[error("request timed out")]
    ConnectionTimeout,

    /// The request was aborted by the caller's cancellation token.
    #[error("request was aborted")]
    UserAbort,

    /// Non-success HTTP status, or a non-zero vendor error code.
    #[error(transparent)]
    Api(Box<ApiError>),

    /// The selected backend identifier is not registered.
    #[error("{0} cannot be recognized as an API type")]
    UnsupportedBackend(String),

    /// A request argument cannot be resolved (unknown model, bad URL).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The event stream ended in the middle of a record.
    #[error("stream truncated: {0}")]
    StreamTruncation(String),

    /// Missing credentials or unusable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON was required but could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<ApiError> for ErnieError {
    fn from(e: ApiError) -> Self {
        Self::Api(Box::new(e))
    }
}

impl From<serde_json::Error> for ErnieError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

// ── Feature-gated From impls ──────────────────────────────────────────────────

#[cfg(feature = "rquest")]
impl From<rquest::Error> for ErnieError {
    fn from(e: rquest::Error) -> Self {
        if e.is_timeout() {
            Self::ConnectionTimeout
        } else {
            Self::Connection(e.to_string())
        }
    }
}

impl ErnieError {
    /// HTTP status attached to the failure, if any.
    ///
    /// For vendor envelope errors this is the status classified from the
    /// vendor code (see [`vendor_status`]).
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(e) => e.status(),
            _ => None,
        }
    }

    /// Vendor error code attached to the failure, if any.
    #[must_use]
    pub fn vendor_code(&self) -> Option<i64> {
        match self {
            Self::Api(e) => e.code(),
            _ => None,
        }
    }

    /// Returns `true` if the error is likely transient and worth retrying.
    ///
    /// Nothing inside the client retries; this is for caller-side policies.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => matches!(e.status(), Some(408 | 429 | 500 | 502 | 503 | 504)),
            Self::Connection(_) | Self::ConnectionTimeout => true,
            _ => false,
        }
    }
}

/// Maps a vendor error code to the HTTP status it is classified as.
///
/// Unmapped codes carry no inferred status.
#[must_use]
pub fn vendor_status(code: i64) -> Option<u16> {
    match code {
        2 => Some(500),
        6 => Some(403),
        17 | 18 | 19 | 40407 => Some(429),
        // InvalidToken / TokenExpired
        110 | 111 | 40401 => Some(401),
        // InvalidParameter / TryAgain
        336_003 | 336_100 => Some(400),
        _ => None,
    }
}

/// A failed API call, built once at the failure site.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: Option<u16>,
    code: Option<i64>,
    message: Option<String>,
    headers: ResponseHeaders,
    body: Option<Value>,
}

impl ApiError {
    /// Creates an error with an optional status and a human message.
    pub fn new(status: Option<u16>, message: Option<String>) -> Self {
        Self {
            status,
            code: None,
            message,
            headers: ResponseHeaders::new(),
            body: None,
        }
    }

    /// Attach the vendor error code.
    #[must_use]
    pub fn with_code(mut self, code: Option<i64>) -> Self {
        self.code = code;
        self
    }

    /// Attach the response headers.
    #[must_use]
    pub fn with_headers(mut self, headers: ResponseHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Attach the decoded JSON error body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Inspects a successful JSON payload for a vendor error envelope.
    ///
    /// Two shapes are accepted, checked in order: `{error_code, error_msg}`
    /// then `{errorCode, errorMsg}`. The first non-null code wins and `0`
    /// means success. Returns `None` when the payload is not an error.
    #[must_use]
    pub fn from_envelope(body: &Value, headers: &ResponseHeaders) -> Option<Self> {
        let code = envelope_code(body)?;
        if code == 0 {
            return None;
        }
        let message = envelope_message(body).unwrap_or("unknown error").to_string();
        Some(
            Self::new(vendor_status(code), Some(message))
                .with_code(Some(code))
                .with_headers(headers.clone())
                .with_body(body.clone()),
        )
    }

    /// Builds the error for a non-success HTTP status.
    ///
    /// `text` is the raw body. When it parses as JSON the decoded value is
    /// kept and any envelope code/message is carried over; otherwise the
    /// raw text becomes the message.
    #[must_use]
    pub fn from_status(status: u16, text: &str, headers: ResponseHeaders) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(json) => {
                let code = envelope_code(&json);
                let message = envelope_message(&json).map(str::to_string);
                Self::new(Some(status), message)
                    .with_code(code)
                    .with_headers(headers)
                    .with_body(json)
            }
            Err(_) => {
                let message = (!text.is_empty()).then(|| text.to_string());
                Self::new(Some(status), message).with_headers(headers)
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    #[must_use]
    pub fn code(&self) -> Option<i64> {
        self.code
    }

    /// The vendor or transport message, if one was provided.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// The message rendered for display: the body's `error.message` when
    /// `error` is an object carrying one, else the stored message, else the
    /// `error` member itself.
    fn describe(&self) -> Option<String> {
        let error = self
            .body
            .as_ref()
            .and_then(|b| b.get("error"))
            .filter(|e| !e.is_null());
        let nested = error.and_then(|e| e.get("message")).filter(|m| !m.is_null());
        if let Some(m) = nested {
            return Some(m.as_str().map_or_else(|| m.to_string(), str::to_string));
        }
        if self.message.is_some() {
            return self.message.clone();
        }
        error.map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_string))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.describe()) {
            (Some(status), Some(msg)) => write!(f, "{status} {msg}"),
            (Some(status), None) => write!(f, "{status} status code (no body)"),
            (None, Some(msg)) => f.write_str(&msg),
            (None, None) => f.write_str("(no status code or body)"),
        }
    }
}

impl std::error::Error for ApiError {}

fn non_null<'a>(body: &'a Value, key: &str) -> Option<&'a Value> {
    body.get(key).filter(|v| !v.is_null())
}

fn envelope_code(body: &Value) -> Option<i64> {
    non_null(body, "error_code")
        .or_else(|| non_null(body, "errorCode"))
        .and_then(Value::as_i64)
}

fn envelope_message(body: &Value) -> Option<&str> {
    non_null(body, "error_msg")
        .or_else(|| non_null(body, "errorMsg"))
        .and_then(Value::as_str)
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ErnieError>;
