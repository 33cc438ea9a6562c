use super::AdapterError;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Tokens are refreshed this long before the provider says they expire.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// A token as returned by a provider's auth endpoint.
#[derive(Debug, Clone)]
pub struct FetchedToken {
    pub token: String,
    pub expires_in: Duration,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Bearer token cache for one provider account.
///
/// The lock is held across a refresh, so concurrent callers wait for the one
/// in-flight fetch and then reuse its result.
#[derive(Debug)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
    margin: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    pub fn new() -> Self {
        Self::with_margin(REFRESH_MARGIN)
    }

    pub fn with_margin(margin: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            margin,
        }
    }

    /// Returns the cached token, or fetches a new one when it is missing or
    /// inside the refresh margin.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<String, AdapterError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FetchedToken, AdapterError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if Instant::now() + self.margin < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let fetched = fetch().await?;
        let token = fetched.token.clone();
        *slot = Some(CachedToken {
            token: fetched.token,
            expires_at: Instant::now() + fetched.expires_in,
        });
        Ok(token)
    }

    /// Drops the cached token if it is still the one the provider rejected.
    pub async fn invalidate(&self, rejected: &str) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|cached| cached.token == rejected) {
            *slot = None;
        }
    }
}
