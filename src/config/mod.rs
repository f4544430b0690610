//! Application configuration

mod app_config;

pub use app_config::{
    AppConfig, CacheSettings, CredentialSettings, GeolocationSettings, LogFormat, LoggingConfig,
    NotificationSettings, StorageSettings, SweeperSettings,
};
