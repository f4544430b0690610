//! Domain layer - Core business logic and entities

pub mod api_key;
pub mod cache;
pub mod error;
pub mod geolocation;
pub mod notification;
pub mod usage;

pub use api_key::{
    Credential, CredentialError, CredentialId, CredentialRepository, CredentialStatus,
    CredentialTransaction, CredentialUpdate, Environment, KeyType, Permissions, Whitelist,
};
pub use cache::{Cache, JsonCache};
pub use error::DomainError;
pub use geolocation::{GeoLocation, GeoLocator};
pub use notification::{CredentialEvent, CredentialEventKind, CredentialNotifier};
pub use usage::{LogStatus, UsageLogEntry, UsageLogId, UsageLogQuery, UsageLogRepository};
