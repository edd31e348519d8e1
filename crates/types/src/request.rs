//! The request descriptor handed to the client pipeline.

use bon::Builder;
use serde_json::Value;
use std::{fmt, time::Duration};
use tokio_util::sync::CancellationToken;

/// Ordered `(key, value)` query parameters.
pub type Query = Vec<(String, String)>;

/// Ordered `(name, value)` header pairs.
pub type Headers = Vec<(String, String)>;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Uppercase method name as it appears on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the pipeline needs to issue one API call.
///
/// Built once with [`RequestDescriptor::builder`] and never mutated after
/// dispatch. Cloning shares the cancellation token.
///
/// ```ignore
/// let req = RequestDescriptor::builder()
///     .method(Method::Post)
///     .path("/chat/completions")
///     .body(json!({"model": "ernie-bot", "messages": []}))
///     .stream(true)
///     .build();
/// ```
#[derive(Debug, Clone, Builder)]
pub struct RequestDescriptor {
    #[builder(default)]
    method: Method,
    /// Logical path, e.g. `/chat/completions`, or an absolute URL.
    #[builder(into)]
    path: String,
    body: Option<Value>,
    /// Per-request query values; these win over backend defaults.
    #[builder(default)]
    query: Query,
    /// Caller headers; these win over default and auth headers.
    #[builder(default)]
    headers: Headers,
    /// Overrides the client-wide timeout.
    timeout: Option<Duration>,
    #[builder(default)]
    stream: bool,
    #[builder(default = CancellationToken::new())]
    cancel: CancellationToken,
}

impl RequestDescriptor {
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    #[must_use]
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.stream
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The `model` field of the JSON body, if present and a string.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.get("model"))
            .and_then(Value::as_str)
    }
}
