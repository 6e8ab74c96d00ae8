//! Resolver → subdomain suffix cache, backed by moka.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::error::IndexerError;
use crate::label::ROOT_DOMAIN;
use crate::storage::NamingStorage;

/// Maximum number of cached resolvers.
pub const DEFAULT_CACHE_CAPACITY: u64 = 1000;

/// Lifetime of a cached suffix.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Maps a resolver contract's address id to the suffix appended to names it
/// resolves: `"<subdomain>.stark"`, or `"stark"` for the default registry.
///
/// Misses fall back to [`NamingStorage::subdomain_by_resolver`] and populate
/// the cache with the result.
pub struct ResolverCache {
    cache: Cache<u64, String>,
    storage: Arc<dyn NamingStorage>,
}

impl ResolverCache {
    pub fn new(storage: Arc<dyn NamingStorage>) -> Self {
        Self::with_settings(storage, DEFAULT_CACHE_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_settings(storage: Arc<dyn NamingStorage>, capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).time_to_live(ttl).build(),
            storage,
        }
    }

    pub async fn get_subdomain_suffix(&self, resolver_id: u64) -> Result<String, IndexerError> {
        if let Some(suffix) = self.cache.get(&resolver_id).await {
            debug!(resolver_id, suffix = %suffix, "resolver cache hit");
            return Ok(suffix);
        }

        let suffix = match self.storage.subdomain_by_resolver(resolver_id).await? {
            Some(sub) => format!("{}.{ROOT_DOMAIN}", sub.subdomain),
            None => ROOT_DOMAIN.to_string(),
        };
        self.cache.insert(resolver_id, suffix.clone()).await;
        Ok(suffix)
    }

    /// Seed the cache with a freshly bound subdomain label.
    pub async fn set_subdomain_suffix(&self, resolver_id: u64, label: &str) {
        self.cache
            .insert(resolver_id, format!("{label}.{ROOT_DOMAIN}"))
            .await;
    }
}
