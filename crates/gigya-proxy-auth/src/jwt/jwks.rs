//! JWKS (JSON Web Key Set) fetching and caching
//!
//! Two levels of caching:
//!
//! - [`JwksClient`] caches one issuer's key set with a TTL and rate-limits
//!   forced refreshes (used when a token names an unknown `kid`)
//! - [`KeyResolver`] maps issuer URLs to clients in a bounded, time-aware
//!   cache, so a stream of distinct issuers cannot grow memory without limit
//!
//! Issuers come from unverified tokens, so every key-set URL passes the
//! [`SsrfPolicy`] in [`KeyResolverSettings::ssrf`] before it is fetched.
//! Redirects are never followed.

use jsonwebtoken::jwk::{Jwk, JwkSet};
use moka::future::Cache;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{AuthError, AuthResult};
use crate::ssrf::{SsrfPolicy, SsrfValidator};

/// Path appended to the issuer to locate its key set
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// JWKS cache entry with metadata
#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    cached_at: SystemTime,
    ttl: Duration,
}

impl CachedJwks {
    fn is_valid(&self) -> bool {
        match SystemTime::now().duration_since(self.cached_at) {
            Ok(age) => age < self.ttl,
            Err(_) => false, // Clock went backwards, invalidate
        }
    }
}

/// Key-set URL for an issuer
pub fn jwks_uri_for_issuer(issuer: &str) -> String {
    format!("{}{JWKS_PATH}", issuer.trim_end_matches('/'))
}

/// JWKS client for one key-set endpoint
#[derive(Debug)]
pub struct JwksClient {
    /// JWKS endpoint URL
    jwks_uri: String,
    /// Cached JWKS
    cache: RwLock<Option<CachedJwks>>,
    /// Shared HTTP client
    http_client: reqwest::Client,
    /// Cache TTL
    cache_ttl: Duration,
    /// Minimum interval between forced refreshes
    min_refresh_interval: Duration,
    /// Last fetch
    last_refresh: RwLock<Option<SystemTime>>,
    /// Outbound request policy
    ssrf: SsrfValidator,
}

impl JwksClient {
    /// Default key-set TTL
    pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

    /// Default minimum spacing of forced refreshes
    pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

    /// Create a client with default TTL and refresh spacing
    pub fn new(jwks_uri: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            cache: RwLock::new(None),
            http_client,
            cache_ttl: Self::DEFAULT_TTL,
            min_refresh_interval: Self::DEFAULT_MIN_REFRESH_INTERVAL,
            last_refresh: RwLock::new(None),
            ssrf: SsrfValidator::default(),
        }
    }

    /// Set the outbound request policy
    pub fn with_ssrf_policy(mut self, policy: SsrfPolicy) -> Self {
        self.ssrf = SsrfValidator::new(policy);
        self
    }

    /// Set the key-set TTL
    pub fn with_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// Set the minimum spacing of forced refreshes
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Get the key set, from cache when still fresh
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BlockedEndpoint`] if the endpoint fails the
    /// outbound policy, or [`AuthError::KeyResolution`] if it is unreachable,
    /// answers with a non-success status, or serves no JWKS document.
    pub async fn get_jwks(&self) -> AuthResult<JwkSet> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.is_valid()
            {
                debug!(jwks_uri = %self.jwks_uri, "Using cached JWKS");
                return Ok(cached.jwks.clone());
            }
        }

        self.fetch_and_cache().await
    }

    /// Force a refetch, unless one happened within the minimum interval
    ///
    /// # Errors
    ///
    /// Same as [`get_jwks`](Self::get_jwks).
    pub async fn refresh(&self) -> AuthResult<JwkSet> {
        {
            let last_refresh = self.last_refresh.read().await;
            if let Some(last) = *last_refresh
                && let Ok(since_last) = SystemTime::now().duration_since(last)
                && since_last < self.min_refresh_interval
            {
                warn!(
                    jwks_uri = %self.jwks_uri,
                    since_last_ms = since_last.as_millis(),
                    "JWKS refresh rate limited, using cache"
                );
                return self.get_jwks().await;
            }
        }

        self.fetch_and_cache().await
    }

    /// Find the key for `kid`, refreshing once if it is not in the cached set
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyResolution`] if no key carries `kid` after the
    /// refresh, or any fetch error.
    pub async fn signing_key(&self, kid: &str) -> AuthResult<Jwk> {
        let jwks = self.get_jwks().await?;
        if let Some(jwk) = jwks.find(kid) {
            return Ok(jwk.clone());
        }

        debug!(jwks_uri = %self.jwks_uri, kid, "Key ID not in cached JWKS, refreshing");
        let jwks = self.refresh().await?;
        jwks.find(kid).cloned().ok_or_else(|| {
            error!(jwks_uri = %self.jwks_uri, kid, "Key ID not found in JWKS");
            AuthError::key_resolution(format!("no public key for kid '{kid}'"))
        })
    }

    async fn fetch_and_cache(&self) -> AuthResult<JwkSet> {
        info!(jwks_uri = %self.jwks_uri, "Fetching JWKS from endpoint");

        let url = self.ssrf.validate_url(&self.jwks_uri)?;
        self.ssrf.validate_resolved(&url).await?;

        let response = self.http_client.get(url).send().await.map_err(|e| {
            error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to fetch JWKS");
            AuthError::key_resolution(format!("JWKS fetch failed: {e}"))
        })?;

        // Record the attempt so refresh() rate-limits even on failure
        *self.last_refresh.write().await = Some(SystemTime::now());

        if !response.status().is_success() {
            error!(
                jwks_uri = %self.jwks_uri,
                status = %response.status(),
                "JWKS endpoint returned error status"
            );
            return Err(AuthError::key_resolution(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        let jwks: JwkSet = response.json().await.map_err(|e| {
            error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to parse JWKS JSON");
            AuthError::key_resolution(format!("Invalid JWKS format: {e}"))
        })?;

        info!(
            jwks_uri = %self.jwks_uri,
            key_count = jwks.keys.len(),
            "Successfully fetched JWKS"
        );

        *self.cache.write().await = Some(CachedJwks {
            jwks: jwks.clone(),
            cached_at: SystemTime::now(),
            ttl: self.cache_ttl,
        });

        Ok(jwks)
    }

    /// Get the JWKS endpoint URI
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Clear the cached key set
    pub async fn clear_cache(&self) {
        *self.cache.write().await = None;
        debug!(jwks_uri = %self.jwks_uri, "JWKS cache cleared");
    }
}

/// Sizing and timing for [`KeyResolver`]
#[derive(Debug, Clone)]
pub struct KeyResolverSettings {
    /// Most issuers kept at once
    pub max_issuers: u64,
    /// How long an issuer's client is kept before being rebuilt
    pub issuer_ttl: Duration,
    /// Key-set TTL inside each client
    pub jwks_ttl: Duration,
    /// Timeout for key-set HTTP requests
    pub http_timeout: Duration,
    /// Which key-set endpoints may be fetched
    pub ssrf: SsrfPolicy,
}

impl Default for KeyResolverSettings {
    fn default() -> Self {
        Self {
            max_issuers: 64,
            issuer_ttl: Duration::from_secs(3600),
            jwks_ttl: JwksClient::DEFAULT_TTL,
            http_timeout: Duration::from_secs(10),
            ssrf: SsrfPolicy::default(),
        }
    }
}

/// Issuer-keyed cache of [`JwksClient`]s
///
/// Clients are created on first use. Concurrent first uses of one issuer
/// share a single initialisation.
#[derive(Clone)]
pub struct KeyResolver {
    clients: Cache<String, Arc<JwksClient>>,
    http_client: reqwest::Client,
    validator: SsrfValidator,
    settings: KeyResolverSettings,
}

impl std::fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResolver")
            .field("issuers", &self.clients.entry_count())
            .field("settings", &self.settings)
            .finish()
    }
}

impl KeyResolver {
    /// Create a resolver
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Http`] if the HTTP client cannot be built.
    pub fn new(settings: KeyResolverSettings) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let clients = Cache::builder()
            .max_capacity(settings.max_issuers)
            .time_to_live(settings.issuer_ttl)
            .build();

        Ok(Self {
            clients,
            http_client,
            validator: SsrfValidator::new(settings.ssrf.clone()),
            settings,
        })
    }

    /// Get or create the client for `issuer`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BlockedEndpoint`] if the issuer's key-set URL
    /// fails the outbound policy, or [`AuthError::KeyResolution`] if it does
    /// not parse. Nothing is cached in either case.
    pub async fn client_for_issuer(&self, issuer: &str) -> AuthResult<Arc<JwksClient>> {
        let jwks_uri = jwks_uri_for_issuer(issuer);
        self.validator
            .validate_url(&jwks_uri)
            .map_err(|e| match e {
                AuthError::KeyResolution { message, .. } => {
                    AuthError::key_resolution_for(message, issuer)
                }
                other => other,
            })?;

        let http_client = self.http_client.clone();
        let jwks_ttl = self.settings.jwks_ttl;
        let policy = self.settings.ssrf.clone();
        let client = self
            .clients
            .get_with(issuer.to_string(), async move {
                debug!(jwks_uri = %jwks_uri, "Creating JWKS client for issuer");
                Arc::new(
                    JwksClient::new(jwks_uri, http_client)
                        .with_ttl(jwks_ttl)
                        .with_ssrf_policy(policy),
                )
            })
            .await;

        Ok(client)
    }

    /// Resolve the signing key `kid` published by `issuer`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyResolution`] if the key set cannot be fetched
    /// or holds no such key.
    pub async fn signing_key(&self, issuer: &str, kid: &str) -> AuthResult<Jwk> {
        let client = self.client_for_issuer(issuer).await?;
        client.signing_key(kid).await.map_err(|e| match e {
            AuthError::KeyResolution { message, .. } => {
                AuthError::key_resolution_for(message, issuer)
            }
            other => other,
        })
    }

    /// Approximate number of cached issuers
    pub fn cached_issuers(&self) -> u64 {
        self.clients.entry_count()
    }

    /// Apply pending evictions (mostly useful before reading counts)
    pub async fn run_pending_tasks(&self) {
        self.clients.run_pending_tasks().await;
    }

    /// Resolver settings
    pub fn settings(&self) -> &KeyResolverSettings {
        &self.settings
    }
}
