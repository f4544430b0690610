//! Usage accounting domain
//!
//! Append-only call records, the suspicious-activity heuristic and the
//! aggregate statistics computed over them.

mod entry;
mod query;
mod repository;
mod statistics;
mod suspicion;

pub use entry::{suspicion_message, LogStatus, UsageLogEntry, UsageLogId};
pub use query::{UsageLogQuery, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use repository::UsageLogRepository;
pub use statistics::{
    performance_series_from, start_of_day, BasicCounts, BreakdownEntry, DailyCount, DateRange,
    GlobalStatistics, PerformancePoint, PerformanceStats, StatisticsAccumulator,
    StatisticsPeriod, TimelineBucket, TimelineGranularity, UsageAggregate, UserStatistics,
    MAX_SERIES_DAYS, SLOW_REQUEST_THRESHOLD_MS, TOP_BREAKDOWN_SIZE,
};
pub use suspicion::{
    is_unusual_hour, SuspicionAssessment, SuspicionEvidence, SuspicionIndicator,
    SuspicionWindows, GEO_ANOMALY_WINDOW_MINUTES, HIGH_FREQUENCY_MAX_REQUESTS,
    HIGH_FREQUENCY_WINDOW_MINUTES, MIN_USER_AGENT_LENGTH, SUSPICION_THRESHOLD, UNUSUAL_HOURS,
    UNUSUAL_HOUR_HISTORY_DAYS, UNUSUAL_HOUR_MIN_HISTORY,
};
