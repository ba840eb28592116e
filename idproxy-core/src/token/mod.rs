//! Bearer credential sources.
//!
//! The forwarder only knows the [`TokenProvider`] trait. Concrete providers
//! talk to an identity service; [`CachedTokenProvider`] sits in front of them
//! so most requests are served from memory.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::TokenError;

pub mod metadata;
pub mod service_account;

pub use metadata::MetadataTokenProvider;
pub use service_account::ServiceAccountTokenProvider;

/// Credentials expiring sooner than this are refreshed ahead of use.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Cache lifetime for credentials that carry no expiry of their own.
pub const DEFAULT_UNKNOWN_LIFETIME: Duration = Duration::from_secs(10 * 60);

/// Upper bound on one refresh against the identity service.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// An opaque bearer token and the instant it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<SystemTime>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Option<SystemTime>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Builds a credential from a JWT, reading the expiry from its `exp` claim.
    pub fn from_jwt(token: impl Into<String>) -> Self {
        let token = token.into();
        let expires_at = jwt_expiry(&token);
        Self { token, expires_at }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// Whether the credential stays valid for at least `margin` from now.
    /// Credentials without an expiry are always fresh.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => SystemTime::now()
                .checked_add(margin)
                .is_some_and(|deadline| expires_at > deadline),
            None => true,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of bearer credentials for a fixed audience.
///
/// Implementations must be safe to call from many requests at once.
pub trait TokenProvider: Send + Sync {
    /// Returns a credential that is currently valid.
    fn fetch(&self) -> BoxFuture<'_, Result<Credential, TokenError>>;
}

impl<P: TokenProvider + ?Sized> TokenProvider for Arc<P> {
    fn fetch(&self) -> BoxFuture<'_, Result<Credential, TokenError>> {
        (**self).fetch()
    }
}

impl<P: TokenProvider + ?Sized> TokenProvider for Box<P> {
    fn fetch(&self) -> BoxFuture<'_, Result<Credential, TokenError>> {
        (**self).fetch()
    }
}

/// Hands out the same credential forever.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    credential: Credential,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(token, None),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn fetch(&self) -> BoxFuture<'_, Result<Credential, TokenError>> {
        let credential = self.credential.clone();
        Box::pin(async move { Ok(credential) })
    }
}

/// Caches the credential of an inner provider until it is about to expire.
///
/// Refreshes are single-flight: while one caller fetches, the others wait for
/// its result instead of hitting the identity service themselves. A refresh
/// that takes longer than the fetch timeout fails, so a stalled identity
/// service cannot hold the waiters forever. Failed fetches are not cached.
pub struct CachedTokenProvider<P> {
    inner: P,
    cached: Mutex<Option<Credential>>,
    refresh_margin: Duration,
    unknown_lifetime: Duration,
    fetch_timeout: Duration,
}

impl<P: TokenProvider> CachedTokenProvider<P> {
    pub fn new(inner: P) -> Self {
        Self::with_margins(inner, DEFAULT_REFRESH_MARGIN, DEFAULT_UNKNOWN_LIFETIME)
    }

    /// # Arguments
    ///
    /// * `inner` - The provider that actually mints credentials
    /// * `refresh_margin` - How long before expiry a credential is replaced
    /// * `unknown_lifetime` - Cache lifetime for credentials without an expiry
    pub fn with_margins(inner: P, refresh_margin: Duration, unknown_lifetime: Duration) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
            refresh_margin,
            unknown_lifetime,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    async fn fetch_cached(&self) -> Result<Credential, TokenError> {
        let mut cached = self.cached.lock().await;
        if let Some(credential) = cached.as_ref().filter(|c| c.is_fresh(self.refresh_margin)) {
            return Ok(credential.clone());
        }

        debug!("Refreshing bearer credential");
        let mut credential = tokio::time::timeout(self.fetch_timeout, self.inner.fetch())
            .await
            .map_err(|_| {
                warn!("Identity service did not answer within {:?}", self.fetch_timeout);
                TokenError::Timeout(self.fetch_timeout)
            })??;
        // Credentials without an expiry are kept for a fixed lifetime.
        if credential.expires_at.is_none() {
            credential.expires_at = Some(SystemTime::now() + self.unknown_lifetime);
        }
        debug!("Obtained bearer credential valid until {:?}", credential.expires_at);

        *cached = Some(credential.clone());
        Ok(credential)
    }
}

impl<P: TokenProvider> TokenProvider for CachedTokenProvider<P> {
    fn fetch(&self) -> BoxFuture<'_, Result<Credential, TokenError>> {
        Box::pin(self.fetch_cached())
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<u64>,
}

/// Reads the `exp` claim of a JWT without verifying its signature.
///
/// Returns `None` for anything that does not look like a JWT with a numeric
/// `exp` claim.
pub fn jwt_expiry(token: &str) -> Option<SystemTime> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&decoded).ok()?;
    UNIX_EPOCH.checked_add(Duration::from_secs(claim.exp?))
}
