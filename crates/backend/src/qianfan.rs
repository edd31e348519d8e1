//! Qianfan backend: access-key/secret-key credentials, sent either as an
//! OAuth2 `access_token` query parameter or as a `bce-auth-v1` signature.

use crate::{
    adapter::{AuthContext, BackendAdapter},
    registry::BackendKind,
    resources::ResourceMap,
};
use async_trait::async_trait;
use erniebot_auth::{
    Clock, SignatureEngine, SystemClock, TokenCache,
    signature::{DEFAULT_EXPIRATION_SECS, ISO8601_FORMAT, iso8601},
};
use chrono::NaiveDateTime;
use erniebot_config::SigningMode;
use erniebot_types::{AccessKeyPair, ErnieError, Headers, Query, Result};
use std::sync::Arc;

pub const BASE_URL: &str = "https://aip.baidubce.com/rpc/2.0/ai_custom/v1/wenxinworkshop";

pub const ACCESS_KEY_ENV_VAR: &str = "QIANFAN_AK";
pub const SECRET_KEY_ENV_VAR: &str = "QIANFAN_SK";

/// Headers signed in IAM mode unless configured otherwise.
const IAM_SIGNED_HEADERS: [&str; 3] = ["host", "content-type", "x-bce-date"];

pub struct SignedBackend {
    credentials: Option<AccessKeyPair>,
    tokens: Arc<TokenCache>,
    mode: SigningMode,
    headers_to_sign: Vec<String>,
    clock: Arc<dyn Clock>,
    resources: ResourceMap,
}

impl SignedBackend {
    /// A backend in access-token mode. Missing credentials fail at first use.
    #[must_use]
    pub fn new(credentials: Option<AccessKeyPair>, tokens: Arc<TokenCache>) -> Self {
        Self {
            credentials,
            tokens,
            mode: SigningMode::AccessToken,
            headers_to_sign: IAM_SIGNED_HEADERS.iter().map(|h| (*h).to_string()).collect(),
            clock: Arc::new(SystemClock),
            resources: ResourceMap::ernie(),
        }
    }

    /// Like [`SignedBackend::new`], falling back to `QIANFAN_AK`/`QIANFAN_SK`.
    #[must_use]
    pub fn from_env_fallback(credentials: Option<AccessKeyPair>, tokens: Arc<TokenCache>) -> Self {
        let credentials = credentials.or_else(|| {
            let ak = std::env::var(ACCESS_KEY_ENV_VAR).ok().filter(|v| !v.is_empty())?;
            let sk = std::env::var(SECRET_KEY_ENV_VAR).ok().filter(|v| !v.is_empty())?;
            tracing::debug!("using access key pair from environment");
            Some(AccessKeyPair::new(ak, sk))
        });
        Self::new(credentials, tokens)
    }

    /// Selects the signing mode. A non-empty `headers_to_sign` replaces the
    /// IAM signed-header allow-list.
    #[must_use]
    pub fn with_signing(mut self, mode: SigningMode, headers_to_sign: &[String]) -> Self {
        self.mode = mode;
        if !headers_to_sign.is_empty() {
            self.headers_to_sign = headers_to_sign.to_vec();
        }
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn mode(&self) -> SigningMode {
        self.mode
    }

    fn credentials(&self) -> Result<&AccessKeyPair> {
        self.credentials.as_ref().ok_or_else(|| {
            ErnieError::Config("no access key pair for qianfan; set ak and sk or QIANFAN_AK and QIANFAN_SK".into())
        })
    }
}

#[async_trait]
impl BackendAdapter for SignedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Qianfan
    }

    fn base_url(&self) -> &str {
        BASE_URL
    }

    fn resources(&self) -> &ResourceMap {
        &self.resources
    }

    async fn default_query(&self) -> Result<Query> {
        match self.mode {
            SigningMode::AccessToken => {
                let token = self.tokens.get_access_token(self.credentials()?).await?;
                Ok(vec![("access_token".into(), token)])
            }
            SigningMode::Iam => Ok(Query::new()),
        }
    }

    async fn auth_headers(&self, ctx: &AuthContext<'_>) -> Result<Headers> {
        if self.mode == SigningMode::AccessToken {
            return Ok(Headers::new());
        }
        let signer = SignatureEngine::new(self.credentials()?.clone())
            .with_headers_to_sign(&self.headers_to_sign);

        // A caller-supplied host or date is what goes on the wire, so sign that.
        let now = match ctx.header("x-bce-date") {
            Some(date) => NaiveDateTime::parse_from_str(date.trim(), ISO8601_FORMAT)
                .map_err(|e| ErnieError::InvalidArgument(format!("invalid x-bce-date {date}: {e}")))?
                .and_utc(),
            None => self.clock.utc_now(),
        };
        let date = iso8601(now);
        let host = match (ctx.header("host"), ctx.url.host_str(), ctx.url.port()) {
            (Some(host), _, _) => host.trim().to_string(),
            (None, Some(host), Some(port)) => format!("{host}:{port}"),
            (None, Some(host), None) => host.to_string(),
            (None, None, _) => {
                return Err(ErnieError::InvalidArgument(format!("URL has no host: {}", ctx.url)));
            }
        };

        let mut signed: Headers = vec![("host".into(), host), ("x-bce-date".into(), date.clone())];
        signed.extend(
            ctx.headers
                .iter()
                .filter(|(k, _)| !k.eq_ignore_ascii_case("host") && !k.eq_ignore_ascii_case("x-bce-date"))
                .cloned(),
        );
        let query: Query = ctx.url.query_pairs().into_owned().collect();

        let authorization = signer.sign(
            ctx.method.as_str(),
            ctx.url.path(),
            &query,
            &signed,
            now,
            DEFAULT_EXPIRATION_SECS,
        );
        Ok(vec![
            ("x-bce-date".into(), date),
            ("authorization".into(), authorization),
        ])
    }
}

impl std::fmt::Debug for SignedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedBackend")
            .field("credentials", &self.credentials)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
