//! ipapi.co client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::domain::geolocation::{GeoLocation, GeoLocator};
use crate::domain::DomainError;

pub const DEFAULT_IPAPI_URL: &str = "http://ipapi.co";

/// Response body of `GET /{ip}/json/`
#[derive(Debug, Default, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: Option<String>,
    country_code: Option<String>,
    city: Option<String>,
    region: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl From<IpApiResponse> for GeoLocation {
    fn from(response: IpApiResponse) -> Self {
        Self {
            country_code: response.country_code,
            city: response.city,
            region: response.region,
            latitude: response.latitude,
            longitude: response.longitude,
        }
    }
}

/// Geolocator backed by the ipapi.co JSON API
#[derive(Debug, Clone)]
pub struct IpApiLocator {
    client: Client,
    base_url: String,
}

impl IpApiLocator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                DomainError::configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, ip: &str) -> String {
        format!("{}/{}/json/", self.base_url, ip)
    }
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    async fn lookup(&self, ip: &str) -> Result<Option<GeoLocation>, DomainError> {
        let response = self
            .client
            .get(self.url_for(ip))
            .send()
            .await
            .map_err(|e| DomainError::transient("geolocation", format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DomainError::transient(
                "geolocation",
                format!("HTTP {}", response.status()),
            ));
        }

        let body: IpApiResponse = response.json().await.map_err(|e| {
            DomainError::transient("geolocation", format!("Failed to parse response: {}", e))
        })?;

        if body.error {
            debug!(
                ip = %ip,
                reason = body.reason.as_deref().unwrap_or("-"),
                "No geolocation data"
            );
            return Ok(None);
        }

        let location = GeoLocation::from(body);
        Ok((!location.is_unknown()).then_some(location))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn locator_for(server: &MockServer) -> IpApiLocator {
        IpApiLocator::new(server.uri(), Duration::from_millis(500)).unwrap()
    }

    #[tokio::test]
    async fn test_lookup_maps_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/41.202.219.10/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip": "41.202.219.10",
                "country_code": "CM",
                "city": "Douala",
                "region": "Littoral",
                "latitude": 4.0483,
                "longitude": 9.7043
            })))
            .expect(1)
            .mount(&server)
            .await;

        let location = locator_for(&server)
            .await
            .lookup("41.202.219.10")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(location.country_code.as_deref(), Some("CM"));
        assert_eq!(location.city.as_deref(), Some("Douala"));
        assert_eq!(location.region.as_deref(), Some("Littoral"));
        assert_eq!(location.latitude, Some(4.0483));
    }

    #[tokio::test]
    async fn test_reserved_address_has_no_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip": "127.0.0.1",
                "error": true,
                "reason": "Reserved IP Address"
            })))
            .mount(&server)
            .await;

        let location = locator_for(&server).await.lookup("127.0.0.1").await.unwrap();
        assert!(location.is_none());
    }

    #[tokio::test]
    async fn test_http_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let error = locator_for(&server).await.lookup("8.8.8.8").await.unwrap_err();
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let error = locator_for(&server).await.lookup("8.8.8.8").await.unwrap_err();
        assert!(error.is_transient());
    }
}
