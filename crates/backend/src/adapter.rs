use crate::{registry::BackendKind, resources::ResourceMap};
use async_trait::async_trait;
use erniebot_types::{Headers, Method, Query, Result};
use serde_json::Value;
use url::Url;

/// The request as the pipeline has assembled it so far, handed to
/// [`BackendAdapter::auth_headers`].
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    pub method: Method,
    /// Final URL, including the merged query.
    pub url: &'a Url,
    /// Default headers merged with the caller's headers. These are the
    /// values sent on the wire, apart from the auth headers themselves.
    pub headers: &'a [(String, String)],
}

impl AuthContext<'_> {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Vendor-specific behavior of the request pipeline.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Base URL of mapped resources and the default base for unmapped paths.
    fn base_url(&self) -> &str;

    fn resources(&self) -> &ResourceMap;

    /// Resolves a logical path and model to a vendor URL.
    ///
    /// # Errors
    ///
    /// Returns [`erniebot_types::ErnieError::InvalidArgument`] if the path is
    /// mapped but the model is not.
    fn resolve_path(&self, path: &str, model: Option<&str>) -> Result<Option<String>> {
        self.resources().resolve(self.base_url(), path, model)
    }

    /// Query parameters merged under the request's own query.
    async fn default_query(&self) -> Result<Query>;

    /// Headers merged over the defaults and under the caller's headers.
    async fn auth_headers(&self, ctx: &AuthContext<'_>) -> Result<Headers>;

    /// Reshapes a successful JSON body before it reaches the caller.
    fn transform_response(&self, json: Value) -> Value {
        json
    }
}
