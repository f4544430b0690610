//! Caching geolocator

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use tracing::warn;

use crate::domain::geolocation::{GeoLocation, GeoLocator};
use crate::domain::DomainError;

/// Whether an address never leaves the host or the private network
pub fn is_local_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_local_address(&IpAddr::V4(v4)),
            None => {
                v6.is_loopback()
                    || v6.is_unspecified()
                    || v6.is_unique_local()
                    || v6.is_unicast_link_local()
            }
        },
    }
}

/// Wraps a locator with a TTL cache keyed by IP
///
/// Local addresses resolve to `LOCAL` without a lookup. Lookup failures
/// yield an empty location and are not cached.
#[derive(Debug, Clone)]
pub struct CachingGeoLocator {
    inner: Arc<dyn GeoLocator>,
    cache: MokaCache<String, GeoLocation>,
}

impl CachingGeoLocator {
    pub fn new(inner: Arc<dyn GeoLocator>, ttl: Duration, max_capacity: u64) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { inner, cache }
    }
}

#[async_trait]
impl GeoLocator for CachingGeoLocator {
    async fn lookup(&self, ip: &str) -> Result<Option<GeoLocation>, DomainError> {
        let ip = ip.trim();

        let Ok(address) = ip.parse::<IpAddr>() else {
            return Ok(None);
        };

        if is_local_address(&address) {
            return Ok(Some(GeoLocation::local()));
        }

        if let Some(cached) = self.cache.get(ip).await {
            return Ok(Some(cached));
        }

        match self.inner.lookup(ip).await {
            Ok(location) => {
                let location = location.unwrap_or_default();
                self.cache.insert(ip.to_string(), location.clone()).await;
                Ok(Some(location))
            }
            Err(e) => {
                warn!(ip = %ip, error = %e, "Geolocation lookup failed");
                Ok(None)
            }
        }
    }
}
