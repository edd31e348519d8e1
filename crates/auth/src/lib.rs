//! Credential handling for the Qianfan backend.
//!
//! - [`token`]: per-credential access-token cache with single-flight refresh.
//! - [`oauth`]: the client-credentials fetcher that feeds the cache.
//! - [`signature`]: `bce-auth-v1` request signing.
//! - [`clock`]: injectable time source shared by all of the above.

pub mod clock;
pub mod oauth;
pub mod signature;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use oauth::{ClientCredentialsFetcher, TOKEN_URL};
pub use signature::{CanonicalRequest, SignatureEngine};
pub use token::{TokenCache, TokenFetcher, TokenGrant};
