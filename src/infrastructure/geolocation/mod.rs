//! IP geolocation

mod cached;
mod disabled;
mod ipapi;

pub use cached::{is_local_address, CachingGeoLocator};
pub use disabled::DisabledGeoLocator;
pub use ipapi::{IpApiLocator, DEFAULT_IPAPI_URL};
