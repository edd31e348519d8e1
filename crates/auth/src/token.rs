//! Access-token cache with single-flight refresh.
//!
//! Tokens are keyed by [`AccessKeyPair`]. A cached token is served until
//! [`SAFETY_MARGIN`] before its expiry. When a refresh is needed, the first
//! caller starts the fetch and every concurrent caller for the same key
//! awaits that same fetch.

use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use erniebot_types::{AccessKeyPair, Result};
use futures_util::{
    FutureExt as _,
    future::{BoxFuture, Shared},
};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

/// Tokens are treated as expired this long before the server says they are.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(120);

/// Upper bound on a cached token's lifetime, whatever `expires_in` says.
const MAX_LIFETIME: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// A freshly issued token as returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// Obtains a new token for a key pair.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch(&self, credentials: &AccessKeyPair) -> Result<TokenGrant>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

type SharedFetch = Shared<BoxFuture<'static, Result<CachedToken>>>;

#[derive(Default)]
struct Slot {
    token: Option<CachedToken>,
    in_flight: Option<(u64, SharedFetch)>,
}

/// Per-credential token cache.
pub struct TokenCache {
    fetcher: Arc<dyn TokenFetcher>,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<AccessKeyPair, Slot>>,
    generation: AtomicU64,
}

impl TokenCache {
    pub fn new(fetcher: Arc<dyn TokenFetcher>) -> Self {
        Self::with_clock(fetcher, Arc::new(SystemClock))
    }

    pub fn with_clock(fetcher: Arc<dyn TokenFetcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetcher,
            clock,
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AccessKeyPair, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a valid token for `credentials`, fetching one if needed.
    ///
    /// # Errors
    ///
    /// Returns the fetch error. Every caller that joined the failed fetch
    /// receives the same error, and the next call starts a new fetch.
    pub async fn get_access_token(&self, credentials: &AccessKeyPair) -> Result<String> {
        let (generation, fetch) = {
            let mut slots = self.lock();
            let slot = slots.entry(credentials.clone()).or_default();

            let now = self.clock.now();
            if let Some(token) = slot.token.as_ref().filter(|t| now < t.expires_at) {
                return Ok(token.access_token.clone());
            }

            match &slot.in_flight {
                Some((generation, fetch)) => (*generation, fetch.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let fetch = self.start_fetch(credentials.clone());
                    slot.in_flight = Some((generation, fetch.clone()));
                    (generation, fetch)
                }
            }
        };

        let result = fetch.await;
        self.settle(credentials, generation, &result);
        result.map(|t| t.access_token)
    }

    /// Drops the cached token so the next call refetches.
    pub fn invalidate(&self, credentials: &AccessKeyPair) {
        if let Some(slot) = self.lock().get_mut(credentials) {
            slot.token = None;
        }
    }

    fn start_fetch(&self, credentials: AccessKeyPair) -> SharedFetch {
        let fetcher = Arc::clone(&self.fetcher);
        let clock = Arc::clone(&self.clock);
        async move {
            tracing::debug!(access_key = %credentials.access_key, "fetching access token");
            let grant = fetcher.fetch(&credentials).await?;
            let lifetime = Duration::from_secs(grant.expires_in)
                .saturating_sub(SAFETY_MARGIN)
                .min(MAX_LIFETIME);
            let now = clock.now();
            Ok(CachedToken {
                access_token: grant.access_token,
                expires_at: now.checked_add(lifetime).unwrap_or(now),
            })
        }
        .boxed()
        .shared()
    }

    /// Clears the in-flight fetch that produced `result` and stores the
    /// token on success. A result from a superseded fetch is ignored.
    fn settle(&self, credentials: &AccessKeyPair, generation: u64, result: &Result<CachedToken>) {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(credentials) else {
            return;
        };
        if !matches!(&slot.in_flight, Some((g, _)) if *g == generation) {
            return;
        }
        slot.in_flight = None;
        match result {
            Ok(token) => slot.token = Some(token.clone()),
            Err(e) => tracing::warn!(access_key = %credentials.access_key, error = %e, "access token fetch failed"),
        }
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("keys", &self.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use erniebot_types::ErnieError;
    use std::sync::atomic::AtomicUsize;

    struct CountingFetcher {
        calls: AtomicUsize,
        delay: Duration,
        fail_first: bool,
        expires_in: u64,
    }

    impl CountingFetcher {
        fn new(expires_in: u64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail_first: false,
                expires_in,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenFetcher for CountingFetcher {
        async fn fetch(&self, credentials: &AccessKeyPair) -> Result<TokenGrant> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_first && n == 1 {
                return Err(ErnieError::Connection("token endpoint down".into()));
            }
            Ok(TokenGrant {
                access_token: format!("{}-token-{n}", credentials.access_key),
                expires_in: self.expires_in,
            })
        }
    }

    fn creds() -> AccessKeyPair {
        AccessKeyPair::new("ak", "sk")
    }

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(chrono::Utc::now()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_fetch() {
        let fetcher = Arc::new(CountingFetcher {
            delay: Duration::from_secs(1),
            ..CountingFetcher::new(3600)
        });
        let cache = TokenCache::new(fetcher.clone());
        let c = creds();

        let (a, b, d, e) = tokio::join!(
            cache.get_access_token(&c),
            cache.get_access_token(&c),
            cache.get_access_token(&c),
            cache.get_access_token(&c),
        );
        assert_eq!(fetcher.calls(), 1);
        for token in [a, b, d, e] {
            assert_eq!(token.unwrap(), "ak-token-1");
        }
    }

    #[tokio::test]
    async fn test_cached_token_reused_until_margin() {
        let fetcher = Arc::new(CountingFetcher::new(3600));
        let clock = manual_clock();
        let cache = TokenCache::with_clock(fetcher.clone(), clock.clone());
        let c = creds();

        assert_eq!(cache.get_access_token(&c).await.unwrap(), "ak-token-1");
        clock.advance(Duration::from_secs(3600 - 121));
        assert_eq!(cache.get_access_token(&c).await.unwrap(), "ak-token-1");
        assert_eq!(fetcher.calls(), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get_access_token(&c).await.unwrap(), "ak-token-2");
        assert_eq!(cache.get_access_token(&c).await.unwrap(), "ak-token-2");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refetched() {
        let fetcher = Arc::new(CountingFetcher::new(60));
        let cache = TokenCache::with_clock(fetcher.clone(), manual_clock());
        let c = creds();

        assert_eq!(cache.get_access_token(&c).await.unwrap(), "ak-token-1");
        assert_eq!(cache.get_access_token(&c).await.unwrap(), "ak-token-2");
    }

    #[tokio::test]
    async fn test_huge_expires_in_is_capped() {
        let fetcher = Arc::new(CountingFetcher::new(u64::MAX));
        let clock = manual_clock();
        let cache = TokenCache::with_clock(fetcher.clone(), clock.clone());
        let c = creds();

        assert_eq!(cache.get_access_token(&c).await.unwrap(), "ak-token-1");
        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert_eq!(cache.get_access_token(&c).await.unwrap(), "ak-token-1");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_shared_then_cleared() {
        let fetcher = Arc::new(CountingFetcher {
            delay: Duration::from_millis(10),
            fail_first: true,
            ..CountingFetcher::new(3600)
        });
        let cache = TokenCache::new(fetcher.clone());
        let c = creds();

        let (a, b) = tokio::join!(cache.get_access_token(&c), cache.get_access_token(&c));
        assert!(matches!(a, Err(ErnieError::Connection(_))));
        assert!(matches!(b, Err(ErnieError::Connection(_))));
        assert_eq!(fetcher.calls(), 1);

        assert_eq!(cache.get_access_token(&c).await.unwrap(), "ak-token-2");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let fetcher = Arc::new(CountingFetcher::new(3600));
        let cache = TokenCache::new(fetcher.clone());

        let a = cache.get_access_token(&AccessKeyPair::new("a", "s")).await.unwrap();
        let b = cache.get_access_token(&AccessKeyPair::new("b", "s")).await.unwrap();
        assert_eq!(a, "a-token-1");
        assert_eq!(b, "b-token-2");

        // Same access key, different secret: a distinct identity.
        cache.get_access_token(&AccessKeyPair::new("a", "other")).await.unwrap();
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let fetcher = Arc::new(CountingFetcher::new(3600));
        let cache = TokenCache::new(fetcher.clone());
        let c = creds();

        cache.get_access_token(&c).await.unwrap();
        cache.invalidate(&c);
        assert_eq!(cache.get_access_token(&c).await.unwrap(), "ak-token-2");
    }
}
