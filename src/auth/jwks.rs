//! Issuer key-set retrieval.
//!
//! The issuer publishes its public signing keys at
//! `https://{domain}/.well-known/jwks.json`. [`KeySetCache`] keeps the last
//! fetched set for its TTL and refetches on the first request after expiry.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::AuthError;

/// A JSON Web Key Set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Jwks {
    /// List of keys.
    pub keys: Vec<Jwk>,
}

/// A JSON Web Key. Fields other than these (`x5c`, `x5t`, ...) are ignored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA").
    pub kty: String,
    /// Key ID.
    pub kid: String,
    /// Modulus (Base64URL encoded). RSA keys only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// Exponent (Base64URL encoded). RSA keys only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Algorithm (e.g., "RS256").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key use (e.g., "sig").
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
}

/// A key set as fetched, stamped with the fetch time.
#[derive(Clone, Debug)]
pub struct KeySet {
    pub jwks: Jwks,
    pub fetched_at: SystemTime,
}

impl KeySet {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.jwks.keys.iter().find(|k| k.kid == kid)
    }

    fn is_fresh(&self, now: SystemTime, ttl: Duration) -> bool {
        self.fetched_at
            .checked_add(ttl)
            .is_some_and(|expires_at| now < expires_at)
    }
}

/// Source of the current time for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Retrieves a key set document from a URL.
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    /// Any failure, including a non-200 answer, is reported as
    /// [`AuthError::KeySetUnavailable`].
    async fn fetch(&self, url: &str) -> Result<Jwks, AuthError>;
}

/// Plain HTTPS GET with a bounded timeout. No retries.
#[derive(Debug, Clone)]
pub struct HttpKeySetFetcher {
    client: reqwest::Client,
}

impl HttpKeySetFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Jwks, AuthError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            error!(error = %e, "Failed to fetch JWKS");
            AuthError::KeySetUnavailable(format!("request failed: {e}"))
        })?;

        if response.status() != StatusCode::OK {
            error!(status = %response.status(), "JWKS endpoint returned error status");
            return Err(AuthError::KeySetUnavailable(format!(
                "endpoint returned status {}",
                response.status()
            )));
        }

        response.json::<Jwks>().await.map_err(|e| {
            error!(error = %e, "Failed to parse JWKS document");
            AuthError::KeySetUnavailable(format!("invalid key set document: {e}"))
        })
    }
}

pub fn jwks_url(issuer_domain: &str) -> String {
    format!("https://{issuer_domain}/.well-known/jwks.json")
}

/// Single-slot cache of the issuer's key set.
///
/// Freshness is judged against the injected [`Clock`]; the moka cache only
/// provides the slot and coalesces concurrent misses into one fetch.
pub struct KeySetCache {
    issuer_domain: Option<String>,
    ttl: Duration,
    fetcher: Arc<dyn KeySetFetcher>,
    clock: Arc<dyn Clock>,
    slot: Cache<String, Arc<KeySet>>,
}

impl KeySetCache {
    pub fn new(
        issuer_domain: Option<String>,
        ttl: Duration,
        fetcher: Arc<dyn KeySetFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer_domain,
            ttl,
            fetcher,
            clock,
            slot: Cache::builder().max_capacity(1).build(),
        }
    }

    /// Returns the cached key set, or fetches a new one if the cached set is
    /// missing or older than the TTL.
    pub async fn get_key_set(&self) -> Result<Arc<KeySet>, AuthError> {
        let domain = self
            .issuer_domain
            .as_deref()
            .ok_or_else(|| AuthError::Configuration("AUTH0_DOMAIN is not set".to_string()))?;
        let url = jwks_url(domain);

        if let Some(cached) = self.slot.get(&url).await {
            if cached.is_fresh(self.clock.now(), self.ttl) {
                debug!(jwks_uri = %url, "Using cached JWKS");
                return Ok(cached);
            }
            debug!(jwks_uri = %url, "Cached JWKS expired");
            self.evict_if_stale(&url).await;
        }

        self.slot
            .try_get_with(url.clone(), async {
                info!(jwks_uri = %url, "Fetching JWKS");
                let jwks = self.fetcher.fetch(&url).await?;
                info!(jwks_uri = %url, key_count = jwks.keys.len(), "Fetched JWKS");
                Ok::<_, AuthError>(Arc::new(KeySet {
                    jwks,
                    fetched_at: self.clock.now(),
                }))
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Drops the cached set only if it is still expired, leaving a set that
    /// a concurrent refresh stored in the meantime in place.
    async fn evict_if_stale(&self, url: &str) {
        let now = self.clock.now();
        let ttl = self.ttl;
        let result = self
            .slot
            .entry(url.to_string())
            .and_compute_with(|entry| async move {
                match entry {
                    Some(entry) if !entry.value().is_fresh(now, ttl) => Op::Remove,
                    _ => Op::Nop,
                }
            })
            .await;
        if let CompResult::Removed(_) = result {
            debug!(jwks_uri = %url, "Evicted expired JWKS");
        }
    }
}
