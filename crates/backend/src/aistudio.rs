//! AI Studio backend: a static bearer token in the `authorization` header.

use crate::{
    adapter::{AuthContext, BackendAdapter},
    registry::BackendKind,
    resources::ResourceMap,
};
use async_trait::async_trait;
use erniebot_types::{ErnieError, Headers, Query, Result};
use serde_json::Value;

pub const BASE_URL: &str = "https://aistudio.baidu.com/llm/lmapi/v1";

/// Environment variables consulted, in order, when no token is configured.
pub const TOKEN_ENV_VARS: [&str; 2] = ["AISTUDIO_ACCESS_TOKEN", "EB_ACCESS_TOKEN"];

pub struct TokenBackend {
    token: Option<String>,
    resources: ResourceMap,
}

impl TokenBackend {
    /// A backend using exactly `token`. A missing token fails at first use.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            resources: ResourceMap::ernie(),
        }
    }

    /// Like [`TokenBackend::new`], falling back to [`TOKEN_ENV_VARS`].
    #[must_use]
    pub fn from_env_fallback(token: Option<String>) -> Self {
        let token = token.or_else(|| {
            TOKEN_ENV_VARS.iter().find_map(|name| {
                let value = std::env::var(name).ok().filter(|v| !v.is_empty())?;
                tracing::debug!(var = name, "using access token from environment");
                Some(value)
            })
        });
        Self::new(token)
    }
}

#[async_trait]
impl BackendAdapter for TokenBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::AiStudio
    }

    fn base_url(&self) -> &str {
        BASE_URL
    }

    fn resources(&self) -> &ResourceMap {
        &self.resources
    }

    async fn default_query(&self) -> Result<Query> {
        Ok(Query::new())
    }

    async fn auth_headers(&self, _ctx: &AuthContext<'_>) -> Result<Headers> {
        let token = self.token.as_deref().ok_or_else(|| {
            ErnieError::Config(
                "no access token for aistudio; set access_token or AISTUDIO_ACCESS_TOKEN".into(),
            )
        })?;
        Ok(vec![("authorization".into(), format!("token {token}"))])
    }

    /// AI Studio wraps payloads in `{"result": ...}`.
    fn transform_response(&self, json: Value) -> Value {
        match json {
            Value::Object(mut map) => match map.remove("result") {
                Some(result) => result,
                None => Value::Object(map),
            },
            other => other,
        }
    }
}

impl std::fmt::Debug for TokenBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBackend")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}
