//! PMP API Credentials
//!
//! Lifecycle and usage accounting for public/private API key pairs:
//! - Issuing, rotating, verifying and revoking key pairs
//! - Per-minute rate limiting over a shared cache
//! - Usage logging with a suspicious-activity heuristic and statistics
//! - Scheduled expiry sweeps and log retention

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;
use std::time::Duration;

use domain::cache::Cache;
use domain::geolocation::GeoLocator;
use domain::notification::CredentialNotifier;
use infrastructure::{
    api_key::{Argon2SecretHasher, CredentialService, KeyPairGenerator},
    cache::CacheFactory,
    geolocation::{CachingGeoLocator, DisabledGeoLocator, IpApiLocator},
    notification::{CompositeNotifier, LogNotifier, WebhookNotifier},
    storage::{StorageFactory, Stores},
    sweeper::ExpirySweeper,
    usage::UsageAnalyticsEngine,
};
use tracing::info;

/// Every service wired from one configuration
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub cache: Arc<dyn Cache>,
    pub stores: Stores,
    pub credentials: Arc<CredentialService>,
    pub analytics: Arc<UsageAnalyticsEngine>,
    pub sweeper: ExpirySweeper,
}

impl AppContext {
    /// Build the context with configuration from files and environment
    pub async fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = AppConfig::load().unwrap_or_default();
        Self::from_config(config).await
    }

    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let cache = CacheFactory::create(&config.cache.to_cache_config()?).await?;

        let storage_config = config.storage.to_storage_config()?;
        let stores = StorageFactory::create(&storage_config).await?;
        info!(backend = ?storage_config.storage_type(), "Storage ready");

        let hasher = Arc::new(Argon2SecretHasher::new(config.credentials.hash_cost())?);
        let credentials = Arc::new(
            CredentialService::new(
                stores.credentials.clone(),
                cache.clone(),
                KeyPairGenerator::new(hasher),
                create_notifier(&config)?,
            )
            .with_config(config.credentials.to_service_config()),
        );

        let analytics = Arc::new(
            UsageAnalyticsEngine::new(stores.usage_logs.clone(), create_geolocator(&config)?)
                .with_credentials(stores.credentials.clone()),
        );

        let sweeper = ExpirySweeper::new(credentials.clone(), analytics.clone())
            .with_config(config.sweeper.to_sweeper_config());

        Ok(Self {
            config,
            cache,
            stores,
            credentials,
            analytics,
            sweeper,
        })
    }
}

fn create_geolocator(config: &AppConfig) -> anyhow::Result<Arc<dyn GeoLocator>> {
    let settings = &config.geolocation;

    if !settings.enabled {
        info!("Geolocation disabled");
        return Ok(Arc::new(DisabledGeoLocator));
    }

    let provider = IpApiLocator::new(
        settings.base_url.clone(),
        Duration::from_millis(settings.timeout_ms),
    )?;

    Ok(Arc::new(CachingGeoLocator::new(
        Arc::new(provider),
        Duration::from_secs(settings.cache_ttl_secs),
        settings.cache_capacity,
    )))
}

fn create_notifier(config: &AppConfig) -> anyhow::Result<Arc<dyn CredentialNotifier>> {
    let settings = &config.notifications;
    let mut notifier = CompositeNotifier::new().with_notifier(Arc::new(LogNotifier::new()));

    if let Some(url) = settings.webhook_url.as_ref().filter(|u| !u.is_empty()) {
        info!(url = %url, "Webhook notifications enabled");
        notifier = notifier.with_notifier(Arc::new(WebhookNotifier::new(
            url.clone(),
            settings.webhook_secret.clone(),
            Duration::from_secs(settings.timeout_secs),
        )?));
    }

    Ok(Arc::new(notifier))
}
