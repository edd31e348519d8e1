use erniebot_types::{AccessKeyPair, Credentials};
use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Prefix of the environment variables merged over file configuration.
pub const ENV_PREFIX: &str = "EB_";

fn default_api_type() -> String {
    "aistudio".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

/// How the Qianfan backend authenticates requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMode {
    /// OAuth2 client-credentials token sent as the `access_token` query parameter.
    #[default]
    AccessToken,
    /// `bce-auth-v1` signature sent in the `authorization` header.
    Iam,
}

/// Settings specific to the Qianfan backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QianfanConfig {
    #[serde(default)]
    pub signing: SigningMode,
    /// Override of the OAuth2 token endpoint.
    #[serde(default)]
    pub token_url: Option<String>,
    /// Signed-header allow-list for IAM signing (empty = built-in default).
    #[serde(default)]
    pub headers_to_sign: Vec<String>,
}

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend identifier (`aistudio` or `qianfan`, defaults to `aistudio`).
    #[serde(default = "default_api_type")]
    pub api_type: String,
    /// Bearer token for the AI Studio backend.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Access key for the Qianfan backend.
    #[serde(default)]
    pub ak: Option<String>,
    /// Secret key for the Qianfan backend.
    #[serde(default)]
    pub sk: Option<String>,
    /// Base URL used for paths the backend does not map.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-request timeout in seconds (defaults to 600).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional upstream HTTP proxy.
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Override of the identifying `User-Agent` header.
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub qianfan: QianfanConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_type: default_api_type(),
            access_token: None,
            ak: None,
            sk: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
            proxy_url: None,
            user_agent: None,
            qianfan: QianfanConfig::default(),
        }
    }
}

impl Config {
    /// Builds the layered figment: defaults, then the optional YAML file,
    /// then `EB_*` environment variables (`__` separates nested keys, so
    /// `EB_QIANFAN__SIGNING=iam` sets `qianfan.signing`).
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads configuration from an optional file path and the environment.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the file cannot be parsed or a value
    /// has the wrong type.
    #[allow(clippy::result_large_err)]
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// Loads configuration from a YAML file merged with defaults, ignoring
    /// the environment.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the file cannot be read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn from_file(path: &Path) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .extract()
    }

    /// Parses configuration from a YAML string, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the YAML is invalid or extraction fails.
    #[allow(clippy::result_large_err)]
    pub fn from_yaml(yaml: &str) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::string(yaml))
            .extract()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The credential shape configured for token-based backends.
    #[must_use]
    pub fn token_credentials(&self) -> Option<Credentials> {
        self.access_token.clone().map(Credentials::Token)
    }

    /// The access-key pair, when both halves are configured.
    #[must_use]
    pub fn access_key_pair(&self) -> Option<AccessKeyPair> {
        match (&self.ak, &self.sk) {
            (Some(ak), Some(sk)) => Some(AccessKeyPair::new(ak, sk)),
            _ => None,
        }
    }
}
