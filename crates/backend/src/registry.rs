//! Backend registry: identifier parsing and construction from config.

use crate::{
    adapter::{AuthContext, BackendAdapter},
    aistudio::TokenBackend,
    qianfan::SignedBackend,
    resources::ResourceMap,
};
use async_trait::async_trait;
use erniebot_auth::{ClientCredentialsFetcher, TokenCache};
use erniebot_config::{Config, QianfanConfig};
use erniebot_types::{Credentials, ErnieError, Headers, Query, Result, Transport};
use serde_json::Value;
use std::{fmt, str::FromStr, sync::Arc};

/// Registered backend identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    AiStudio,
    Qianfan,
}

impl BackendKind {
    pub const ALL: [Self; 2] = [Self::AiStudio, Self::Qianfan];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AiStudio => "aistudio",
            Self::Qianfan => "qianfan",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ErnieError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aistudio" => Ok(Self::AiStudio),
            "qianfan" => Ok(Self::Qianfan),
            _ => Err(ErnieError::UnsupportedBackend(s.to_string())),
        }
    }
}

/// The closed set of backends.
#[derive(Debug)]
pub enum Backend {
    AiStudio(TokenBackend),
    Qianfan(SignedBackend),
}

impl Backend {
    /// Builds the configured backend. The transport is used for the Qianfan
    /// token endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::UnsupportedBackend`] for an unknown `api_type`,
    /// or [`ErnieError::Config`] if only one of `ak`/`sk` is set or the
    /// token URL is invalid.
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let kind: BackendKind = config.api_type.parse()?;
        if config.ak.is_some() != config.sk.is_some() {
            return Err(ErnieError::Config("ak and sk must be set together".into()));
        }
        let credentials = match kind {
            BackendKind::AiStudio => config.token_credentials(),
            BackendKind::Qianfan => config.access_key_pair().map(Credentials::AccessKey),
        };
        Self::new(kind, credentials, transport, &config.qianfan)
    }

    /// Builds a backend of `kind` from explicit credentials, falling back to
    /// the backend's environment variables when `credentials` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::Config`] if the credential shape does not match
    /// the backend.
    pub fn new(
        kind: BackendKind,
        credentials: Option<Credentials>,
        transport: Arc<dyn Transport>,
        qianfan: &QianfanConfig,
    ) -> Result<Self> {
        match (kind, credentials) {
            (BackendKind::AiStudio, None) => Ok(Self::AiStudio(TokenBackend::from_env_fallback(None))),
            (BackendKind::AiStudio, Some(Credentials::Token(token))) => {
                Ok(Self::AiStudio(TokenBackend::new(Some(token))))
            }
            (BackendKind::Qianfan, credentials @ (None | Some(Credentials::AccessKey(_)))) => {
                let fetcher = match &qianfan.token_url {
                    Some(url) => ClientCredentialsFetcher::with_token_url(transport, url)?,
                    None => ClientCredentialsFetcher::new(transport),
                };
                let tokens = Arc::new(TokenCache::new(Arc::new(fetcher)));
                let pair = match credentials {
                    Some(Credentials::AccessKey(pair)) => Some(pair),
                    _ => None,
                };
                Ok(Self::Qianfan(
                    SignedBackend::from_env_fallback(pair, tokens)
                        .with_signing(qianfan.signing, &qianfan.headers_to_sign),
                ))
            }
            (kind, Some(_)) => Err(ErnieError::Config(format!(
                "{kind} does not accept this kind of credentials"
            ))),
        }
    }

    fn inner(&self) -> &dyn BackendAdapter {
        match self {
            Self::AiStudio(b) => b,
            Self::Qianfan(b) => b,
        }
    }
}

#[async_trait]
impl BackendAdapter for Backend {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    fn base_url(&self) -> &str {
        self.inner().base_url()
    }

    fn resources(&self) -> &ResourceMap {
        self.inner().resources()
    }

    async fn default_query(&self) -> Result<Query> {
        self.inner().default_query().await
    }

    async fn auth_headers(&self, ctx: &AuthContext<'_>) -> Result<Headers> {
        self.inner().auth_headers(ctx).await
    }

    fn transform_response(&self, json: Value) -> Value {
        self.inner().transform_response(json)
    }
}
