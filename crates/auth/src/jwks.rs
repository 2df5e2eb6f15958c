//! Per-issuer JWKS cache for OIDC token validation.

use crate::{Error, Result};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

const CACHE_TTL: Duration = Duration::from_secs(600);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct OidcDiscovery {
    jwks_uri: String,
}

#[derive(Deserialize)]
struct JwksResponse {
    keys: Vec<JwkKey>,
}

#[derive(Deserialize)]
struct JwkKey {
    #[serde(default)]
    kty: String,
    #[serde(default)]
    kid: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
}

struct CachedKeys {
    keys: Arc<HashMap<String, DecodingKey>>,
    fetched_at: Instant,
}

/// Caches the signing keys of each OIDC issuer for ten minutes so repeated
/// validations do not refetch the discovery document.
pub struct JwksCache {
    client: reqwest::Client,
    entries: RwLock<HashMap<String, CachedKeys>>,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksCache {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .expect("reqwest client"),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Signing keys for `issuer_uri`, keyed by `kid`.
    pub async fn keys_for(&self, issuer_uri: &str) -> Result<Arc<HashMap<String, DecodingKey>>> {
        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(issuer_uri) {
                if cached.fetched_at.elapsed() < CACHE_TTL {
                    return Ok(cached.keys.clone());
                }
            }
        }

        let keys = Arc::new(self.fetch(issuer_uri).await?);

        let mut entries = self.entries.write().await;
        entries.insert(
            issuer_uri.to_string(),
            CachedKeys {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(keys)
    }

    async fn fetch(&self, issuer_uri: &str) -> Result<HashMap<String, DecodingKey>> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer_uri.trim_end_matches('/')
        );
        let discovery: OidcDiscovery = self
            .client
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| Error::Jwks(format!("failed to fetch OIDC discovery: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Jwks(format!("failed to decode OIDC discovery: {e}")))?;

        if discovery.jwks_uri.is_empty() {
            return Err(Error::Jwks(
                "no jwks_uri in OIDC discovery response".to_string(),
            ));
        }

        let jwks: JwksResponse = self
            .client
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(|e| Error::Jwks(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::Jwks(format!("failed to decode JWKS: {e}")))?;

        let mut keys = HashMap::new();
        for key in jwks.keys {
            if key.kty != "RSA" {
                continue;
            }
            match DecodingKey::from_rsa_components(&key.n, &key.e) {
                Ok(decoding_key) => {
                    keys.insert(key.kid.clone(), decoding_key);
                }
                Err(e) => warn!(kid = %key.kid, "failed to parse JWKS key: {e}"),
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_cache_miss_is_a_fetch_error() {
        let cache = JwksCache::new();
        // No server behind this issuer; the miss surfaces as a JWKS error,
        // never a panic.
        let result = cache.keys_for("http://127.0.0.1:1/dex").await;
        assert!(matches!(result, Err(Error::Jwks(_))));
    }
}
