//! Scheduled maintenance
//!
//! Expires overdue credentials, reclaims abandoned rate-limit buckets,
//! prunes old usage logs and logs a periodic statistics report.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::domain::usage::{GlobalStatistics, StatisticsPeriod};
use crate::domain::DomainError;
use crate::infrastructure::api_key::{CredentialService, SweepReport};
use crate::infrastructure::usage::{PruneReport, UsageAnalytics};

/// Schedule and retention settings
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Period of the expiry sweep and bucket janitor
    pub interval: Duration,
    /// Buckets older than this are reclaimed
    pub stale_bucket_age: Duration,
    pub log_retention_days: u32,
    pub prune_batch_size: usize,
    pub prune_interval: Duration,
    pub report_interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(86_400),
            stale_bucket_age: Duration::from_secs(120),
            log_retention_days: 90,
            prune_batch_size: 1000,
            prune_interval: Duration::from_secs(86_400),
            report_interval: Duration::from_secs(604_800),
        }
    }
}

/// Outcome of one sweep-and-janitor pass
///
/// The two halves run independently; either may fail alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceRun {
    pub expiry: Option<SweepReport>,
    pub reclaimed_buckets: Option<usize>,
    pub failures: Vec<String>,
}

impl MaintenanceRun {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
            && self.expiry.as_ref().is_none_or(|report| report.errors.is_empty())
    }
}

/// Runs maintenance jobs once or on a schedule
#[derive(Debug, Clone)]
pub struct ExpirySweeper {
    credentials: Arc<CredentialService>,
    analytics: Arc<dyn UsageAnalytics>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(credentials: Arc<CredentialService>, analytics: Arc<dyn UsageAnalytics>) -> Self {
        Self {
            credentials,
            analytics,
            config: SweeperConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SweeperConfig) -> Self {
        self.config = config;
        self
    }

    /// Expire overdue credentials, then reclaim stale rate-limit buckets
    pub async fn run_once(&self) -> MaintenanceRun {
        let mut run = MaintenanceRun::default();

        match self.credentials.sweep_expired(None).await {
            Ok(report) => run.expiry = Some(report),
            Err(e) => {
                error!(error = %e, "Expiry sweep failed");
                run.failures.push(format!("expiry sweep: {}", e));
            }
        }

        match self
            .credentials
            .rate_limiter()
            .reclaim_stale(Utc::now(), self.config.stale_bucket_age)
            .await
        {
            Ok(removed) => {
                info!(removed = removed, "Rate-limit buckets reclaimed");
                run.reclaimed_buckets = Some(removed);
            }
            Err(e) => {
                error!(error = %e, "Rate-limit janitor failed");
                run.failures.push(format!("bucket janitor: {}", e));
            }
        }

        run
    }

    /// Apply the log retention policy
    pub async fn prune_logs(&self) -> Result<PruneReport, DomainError> {
        self.analytics
            .prune_older_than(
                self.config.log_retention_days,
                self.config.prune_batch_size,
                false,
            )
            .await
    }

    /// Statistics for the current week, logged at info
    pub async fn report(&self) -> Result<GlobalStatistics, DomainError> {
        let statistics = self
            .analytics
            .global_statistics(StatisticsPeriod::Week, None)
            .await?;

        let payload = serde_json::to_string(&statistics)
            .map_err(|e| DomainError::internal(format!("Failed to serialize report: {}", e)))?;

        info!(
            total_requests = statistics.basic.total_requests,
            suspicious_requests = statistics.basic.suspicious_requests,
            report = %payload,
            "Weekly usage report"
        );

        Ok(statistics)
    }

    /// Run every job on its interval until `shutdown` resolves
    ///
    /// Each job also runs once at startup.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut sweep_tick = interval(self.config.interval);
        let mut prune_tick = interval(self.config.prune_interval);
        let mut report_tick = interval(self.config.report_interval);

        for tick in [&mut sweep_tick, &mut prune_tick, &mut report_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!(
            interval_secs = self.config.interval.as_secs(),
            retention_days = self.config.log_retention_days,
            "Scheduler started"
        );

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler stopping");
                    break;
                }
                _ = sweep_tick.tick() => {
                    self.run_once().await;
                }
                _ = prune_tick.tick() => {
                    if let Err(e) = self.prune_logs().await {
                        error!(error = %e, "Usage log prune failed");
                    }
                }
                _ = report_tick.tick() => {
                    if let Err(e) = self.report().await {
                        error!(error = %e, "Weekly report failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::domain::api_key::{
        Credential, CredentialRepository, CredentialStatus, CredentialTransaction, Environment,
        KeyType,
    };
    use crate::domain::cache::Cache;
    use crate::domain::notification::MockCredentialNotifier;
    use crate::domain::usage::{UsageLogQuery, UsageLogRepository};
    use crate::infrastructure::api_key::{
        bucket_key, Argon2SecretHasher, HashCost, InMemoryCredentialRepository, KeyPairGenerator,
    };
    use crate::infrastructure::cache::InMemoryCache;
    use crate::infrastructure::usage::{MockUsageAnalytics, UsageAnalyticsEngine};

    struct Fixture {
        sweeper: ExpirySweeper,
        repository: Arc<InMemoryCredentialRepository>,
        cache: Arc<InMemoryCache>,
    }

    fn fixture(analytics: Arc<dyn UsageAnalytics>) -> Fixture {
        let repository = Arc::new(InMemoryCredentialRepository::new());
        let cache = Arc::new(InMemoryCache::new());
        let mut notifier = MockCredentialNotifier::new();
        notifier.expect_notify().returning(|_| Ok(()));

        let service = CredentialService::new(
            repository.clone(),
            cache.clone(),
            KeyPairGenerator::new(Arc::new(
                Argon2SecretHasher::new(HashCost::minimal()).unwrap(),
            )),
            Arc::new(notifier),
        );

        Fixture {
            sweeper: ExpirySweeper::new(Arc::new(service), analytics),
            repository,
            cache,
        }
    }

    fn idle_analytics() -> Arc<dyn UsageAnalytics> {
        Arc::new(MockUsageAnalytics::new())
    }

    async fn seed(repository: &InMemoryCredentialRepository, credential: Credential) {
        let mut tx = repository.begin().await.unwrap();
        tx.insert(credential).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_once_expires_and_reclaims() {
        let Fixture {
            sweeper,
            repository,
            cache,
        } = fixture(idle_analytics());
        let now = Utc::now();

        seed(
            &repository,
            Credential::new(
                KeyType::Public,
                Environment::Test,
                "user-1",
                "company-1",
                "pk_test_overdue",
                "hash",
            )
            .with_expiration(now - ChronoDuration::hours(1)),
        )
        .await;

        let stale = bucket_key("pk_test_overdue", now - ChronoDuration::minutes(5));
        let fresh = bucket_key("pk_test_overdue", now);
        cache.increment(&stale, 1, Duration::from_secs(60)).await.unwrap();
        cache.increment(&fresh, 1, Duration::from_secs(60)).await.unwrap();

        let run = sweeper.run_once().await;

        assert!(run.is_clean());
        assert_eq!(run.expiry.as_ref().unwrap().expired_count, 1);
        assert_eq!(run.reclaimed_buckets, Some(1));
        assert!(!cache.exists(&stale).await.unwrap());
        assert!(cache.exists(&fresh).await.unwrap());

        let stored = repository
            .find_by_key_id("pk_test_overdue")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), CredentialStatus::Expired);

        let again = sweeper.run_once().await;
        assert!(again.is_clean());
        assert_eq!(again.expiry.unwrap().expired_count, 0);
        assert_eq!(again.reclaimed_buckets, Some(0));
    }

    #[tokio::test]
    async fn test_prune_uses_retention_settings() {
        let mut analytics = MockUsageAnalytics::new();
        analytics
            .expect_prune_older_than()
            .withf(|days, batch, dry_run| *days == 30 && *batch == 50 && !*dry_run)
            .times(1)
            .returning(|_, _, _| {
                Ok(PruneReport {
                    cutoff: Utc::now(),
                    deleted: 7,
                    dry_run: false,
                })
            });

        let sweeper = fixture(Arc::new(analytics)).sweeper.with_config(SweeperConfig {
            log_retention_days: 30,
            prune_batch_size: 50,
            ..SweeperConfig::default()
        });

        assert_eq!(sweeper.prune_logs().await.unwrap().deleted, 7);
    }

    #[tokio::test]
    async fn test_report_on_empty_store() {
        let logs = Arc::new(crate::infrastructure::usage::InMemoryUsageLogRepository::default());
        let mut locator = crate::domain::geolocation::MockGeoLocator::new();
        locator.expect_lookup().returning(|_| Ok(None));
        let engine = UsageAnalyticsEngine::new(logs.clone(), Arc::new(locator));

        let sweeper = fixture(Arc::new(engine)).sweeper;
        let report = sweeper.report().await.unwrap();

        assert_eq!(report.period, StatisticsPeriod::Week);
        assert_eq!(report.basic.total_requests, 0);
        assert_eq!(logs.count(&UsageLogQuery::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        // Every interval fires at startup; job failures are only logged
        let mut analytics = MockUsageAnalytics::new();
        analytics
            .expect_prune_older_than()
            .returning(|_, _, _| Err(DomainError::storage("down")));
        analytics
            .expect_global_statistics()
            .returning(|_, _| Err(DomainError::storage("down")));

        let sweeper = fixture(Arc::new(analytics)).sweeper.with_config(SweeperConfig {
            interval: Duration::from_secs(3600),
            prune_interval: Duration::from_secs(3600),
            report_interval: Duration::from_secs(3600),
            ..SweeperConfig::default()
        });

        tokio::time::timeout(
            Duration::from_secs(5),
            sweeper.run_until(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .unwrap();
    }
}
