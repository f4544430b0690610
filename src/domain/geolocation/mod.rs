//! IP geolocation contract

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Country marker used for loopback and private addresses
pub const LOCAL_COUNTRY_CODE: &str = "LOCAL";

/// Location resolved for an IP address
///
/// Every field is optional. An empty location means "no geo data".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl GeoLocation {
    /// Empty location
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Location for addresses that never leave the host or private network
    pub fn local() -> Self {
        Self {
            country_code: Some(LOCAL_COUNTRY_CODE.to_string()),
            ..Self::default()
        }
    }

    pub fn with_country(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = Some(country_code.into());
        self
    }

    pub fn is_unknown(&self) -> bool {
        self == &Self::default()
    }
}

/// Resolves an IP address to a location
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GeoLocator: Send + Sync + Debug {
    /// Look up an address. `Ok(None)` means the provider had no data.
    async fn lookup(&self, ip: &str) -> Result<Option<GeoLocation>, DomainError>;
}
