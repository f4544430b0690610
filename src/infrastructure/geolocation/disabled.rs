//! Geolocator used when lookups are turned off

use async_trait::async_trait;

use crate::domain::geolocation::{GeoLocation, GeoLocator};
use crate::domain::DomainError;

/// Resolves nothing
#[derive(Debug, Default, Clone)]
pub struct DisabledGeoLocator;

#[async_trait]
impl GeoLocator for DisabledGeoLocator {
    async fn lookup(&self, _ip: &str) -> Result<Option<GeoLocation>, DomainError> {
        Ok(None)
    }
}
