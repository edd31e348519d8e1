//! Backend credentials.

use std::fmt;

/// An access-key / secret-key pair used for the client-credentials grant and
/// for request signing.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccessKeyPair {
    pub access_key: String,
    pub secret_key: String,
}

impl AccessKeyPair {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl fmt::Debug for AccessKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessKeyPair")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// The credential shape active for one backend instance.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A pre-issued bearer token.
    Token(String),
    /// An access-key / secret-key pair.
    AccessKey(AccessKeyPair),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::AccessKey(pair) => f.debug_tuple("AccessKey").field(pair).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let pair = AccessKeyPair::new("ak-1", "sk-very-secret");
        let s = format!("{pair:?}");
        assert!(s.contains("ak-1"));
        assert!(!s.contains("sk-very-secret"));

        let token = Credentials::Token("tok-secret".into());
        assert!(!format!("{token:?}").contains("tok-secret"));
        assert!(!format!("{:?}", Credentials::AccessKey(pair)).contains("sk-very-secret"));
    }
}
