//! `bce-auth-v1` request signing.
//!
//! The signature covers a canonical form of the request:
//!
//! ```text
//! METHOD \n CANONICAL_URI \n CANONICAL_QUERY \n CANONICAL_HEADERS
//! ```
//!
//! signed in two HMAC-SHA256 stages. The session key is
//! `hex(HMAC(sk, "bce-auth-v1/{ak}/{timestamp}/{expiration}"))`, and the
//! signature is `hex(HMAC(session_key, canonical_request))`.

use chrono::{DateTime, Utc};
use erniebot_types::AccessKeyPair;
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const AUTH_VERSION: &str = "bce-auth-v1";

/// Default validity window of a signature.
pub const DEFAULT_EXPIRATION_SECS: u32 = 1800;

/// Headers signed when the caller does not supply an allow-list.
pub const DEFAULT_HEADERS_TO_SIGN: [&str; 4] = ["host", "content-md5", "content-length", "content-type"];

/// Headers with this prefix are always signed.
const VENDOR_HEADER_PREFIX: &str = "x-bce-";

/// Query key never included in the canonical query string.
const RESERVED_QUERY_KEY: &str = "authorization";

/// Percent-encodes everything outside the RFC 3986 unreserved set.
///
/// This escapes `! ' ( ) *` too, which `encodeURIComponent`-style encoders
/// leave alone.
#[must_use]
pub fn normalize(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// `x-bce-date` layout, UTC at second precision.
pub const ISO8601_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// ISO 8601 timestamp at second precision, e.g. `2023-10-01T08:00:00Z`.
#[must_use]
pub fn iso8601(timestamp: DateTime<Utc>) -> String {
    timestamp.format(ISO8601_FORMAT).to_string()
}

fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = <Hmac<Sha256>>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// The normalized request a signature is computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    pub method: String,
    pub uri: String,
    pub query: String,
    /// Sorted `name:value` lines.
    pub headers: Vec<String>,
    /// Sorted header names matching `headers`.
    pub signed_headers: Vec<String>,
}

impl CanonicalRequest {
    /// The string fed to the second HMAC stage.
    #[must_use]
    pub fn signing_string(&self) -> String {
        [
            self.method.as_str(),
            self.uri.as_str(),
            self.query.as_str(),
            &self.headers.join("\n"),
        ]
        .join("\n")
    }
}

/// Computes `bce-auth-v1` authorization strings for one key pair.
#[derive(Debug, Clone)]
pub struct SignatureEngine {
    credentials: AccessKeyPair,
    headers_to_sign: Vec<String>,
}

impl SignatureEngine {
    #[must_use]
    pub fn new(credentials: AccessKeyPair) -> Self {
        Self {
            credentials,
            headers_to_sign: DEFAULT_HEADERS_TO_SIGN.iter().map(|h| (*h).to_string()).collect(),
        }
    }

    /// Replaces the signed-header allow-list. An empty list keeps the default.
    #[must_use]
    pub fn with_headers_to_sign<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers: Vec<String> = headers
            .into_iter()
            .map(|h| h.as_ref().to_ascii_lowercase())
            .collect();
        if !headers.is_empty() {
            self.headers_to_sign = headers;
        }
        self
    }

    /// Canonical query string: every key except `authorization`
    /// (case-insensitive), value normalized, `key=value` pairs sorted and
    /// joined with `&`.
    #[must_use]
    pub fn canonical_query(query: &[(String, String)]) -> String {
        let mut pairs: Vec<String> = query
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case(RESERVED_QUERY_KEY))
            .map(|(k, v)| format!("{k}={}", normalize(v)))
            .collect();
        pairs.sort();
        pairs.join("&")
    }

    /// Returns the sorted canonical header lines and the matching signed
    /// header names.
    #[must_use]
    pub fn canonical_headers(&self, headers: &[(String, String)]) -> (Vec<String>, Vec<String>) {
        let mut canonical: Vec<String> = headers
            .iter()
            .filter_map(|(name, value)| {
                let value = value.trim();
                if value.is_empty() {
                    return None;
                }
                let name = name.to_ascii_lowercase();
                let signed = name.starts_with(VENDOR_HEADER_PREFIX)
                    || self.headers_to_sign.iter().any(|h| *h == name);
                signed.then(|| format!("{}:{}", normalize(&name), normalize(value)))
            })
            .collect();
        canonical.sort();

        let signed = canonical
            .iter()
            .map(|line| line.split(':').next().unwrap_or_default().to_string())
            .collect();
        (canonical, signed)
    }

    #[must_use]
    pub fn canonicalize(
        &self,
        method: &str,
        uri: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
    ) -> CanonicalRequest {
        let (headers, signed_headers) = self.canonical_headers(headers);
        CanonicalRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            query: Self::canonical_query(query),
            headers,
            signed_headers,
        }
    }

    /// Produces the full authorization value:
    /// `{raw_session_key}/{signed_headers}/{signature}`.
    ///
    /// The output depends only on the arguments, so a fixed timestamp gives a
    /// byte-identical result.
    #[must_use]
    pub fn sign(
        &self,
        method: &str,
        uri: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
        timestamp: DateTime<Utc>,
        expiration_secs: u32,
    ) -> String {
        let raw_session_key = format!(
            "{AUTH_VERSION}/{}/{}/{expiration_secs}",
            self.credentials.access_key,
            iso8601(timestamp),
        );
        let session_key = hmac_sha256_hex(
            self.credentials.secret_key.as_bytes(),
            raw_session_key.as_bytes(),
        );

        let canonical = self.canonicalize(method, uri, query, headers);
        let signature = hmac_sha256_hex(
            session_key.as_bytes(),
            canonical.signing_string().as_bytes(),
        );

        tracing::trace!(
            signed_headers = %canonical.signed_headers.join(";"),
            canonical_query = %canonical.query,
            "signed request"
        );

        format!(
            "{raw_session_key}/{}/{signature}",
            canonical.signed_headers.join(";")
        )
    }
}
