//! OAuth2 client-credentials grant against the Qianfan token endpoint.

use crate::token::{TokenFetcher, TokenGrant};
use async_trait::async_trait;
use erniebot_types::{
    AccessKeyPair, ApiError, ErnieError, HttpRequest, Method, Result, Transport,
};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// Qianfan OAuth2 token endpoint.
pub const TOKEN_URL: &str = "https://aip.baidubce.com/oauth/2.0/token";

/// Build the query parameters for a client-credentials token request.
#[must_use]
pub fn build_token_params<'a>(credentials: &'a AccessKeyPair) -> Vec<(&'static str, &'a str)> {
    vec![
        ("grant_type", "client_credentials"),
        ("client_id", credentials.access_key.as_str()),
        ("client_secret", credentials.secret_key.as_str()),
    ]
}

/// Parse the token endpoint JSON response.
///
/// A missing `expires_in` is treated as an already expired token, so the
/// next call fetches again.
///
/// # Errors
///
/// Returns an [`ErnieError::Api`] carrying `error_description` (or `error`)
/// when the response has no `access_token`.
pub fn parse_token_response(json: &Value, status: u16) -> Result<TokenGrant> {
    let Some(access_token) = json.get("access_token").and_then(Value::as_str) else {
        let message = json
            .get("error_description")
            .or_else(|| json.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("missing access_token")
            .to_string();
        let status = (!(200..300).contains(&status)).then_some(status);
        return Err(ApiError::new(status, Some(message))
            .with_body(json.clone())
            .into());
    };
    Ok(TokenGrant {
        access_token: access_token.to_string(),
        expires_in: json.get("expires_in").and_then(Value::as_u64).unwrap_or(0),
    })
}

/// Fetches tokens over a [`Transport`].
pub struct ClientCredentialsFetcher {
    transport: Arc<dyn Transport>,
    token_url: Url,
}

impl ClientCredentialsFetcher {
    /// Uses the default [`TOKEN_URL`].
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            token_url: Url::parse(TOKEN_URL).expect("TOKEN_URL is a valid URL"),
        }
    }

    /// Uses a custom token endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::Config`] if `token_url` is not a valid URL.
    pub fn with_token_url(transport: Arc<dyn Transport>, token_url: &str) -> Result<Self> {
        let token_url = Url::parse(token_url)
            .map_err(|e| ErnieError::Config(format!("invalid token URL {token_url}: {e}")))?;
        Ok(Self {
            transport,
            token_url,
        })
    }
}

#[async_trait]
impl TokenFetcher for ClientCredentialsFetcher {
    async fn fetch(&self, credentials: &AccessKeyPair) -> Result<TokenGrant> {
        let mut url = self.token_url.clone();
        url.query_pairs_mut()
            .extend_pairs(build_token_params(credentials));

        let request = HttpRequest {
            method: Method::Get,
            url,
            headers: vec![("accept".to_string(), "application/json".to_string())],
            body: None,
        };
        let response = self.transport.send(request).await?;
        let status = response.status;
        let headers = response.headers.clone();
        let text = response.text().await?;

        match serde_json::from_str::<Value>(&text) {
            Ok(json) => parse_token_response(&json, status),
            Err(_) if !(200..300).contains(&status) => {
                Err(ApiError::from_status(status, &text, headers).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
