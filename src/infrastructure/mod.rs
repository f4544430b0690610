//! Infrastructure layer - Store, cache and external service implementations

pub mod api_key;
pub mod cache;
pub mod geolocation;
pub mod logging;
pub mod notification;
pub mod storage;
pub mod sweeper;
pub mod usage;
