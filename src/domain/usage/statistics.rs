//! Aggregate statistics over usage logs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::entry::{LogStatus, UsageLogEntry};
use crate::domain::DomainError;

/// Requests slower than this count as slow
pub const SLOW_REQUEST_THRESHOLD_MS: u64 = 5000;

/// Number of entries kept in the top-N breakdowns
pub const TOP_BREAKDOWN_SIZE: usize = 10;

/// Longest window accepted by the performance and suspicious listings
pub const MAX_SERIES_DAYS: u32 = 30;

/// Calendar period for global statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatisticsPeriod {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl StatisticsPeriod {
    /// Half-open calendar range containing `now`
    pub fn range(&self, now: DateTime<Utc>) -> DateRange {
        let today = now.date_naive();

        let (from, to) = match self {
            Self::Day => (today, today + Duration::days(1)),
            Self::Week => {
                let monday =
                    today - Duration::days(today.weekday().num_days_from_monday() as i64);
                (monday, monday + Duration::days(7))
            }
            Self::Month => {
                let first = today.with_day(1).unwrap_or(today);
                (first, first_of_next_month(first))
            }
            Self::Year => {
                let first = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today);
                let next = NaiveDate::from_ymd_opt(today.year() + 1, 1, 1).unwrap_or(today);
                (first, next)
            }
        };

        DateRange {
            from: start_of_day(from),
            to: start_of_day(to),
        }
    }

    /// Timeline resolution used for this period
    pub fn granularity(&self) -> TimelineGranularity {
        match self {
            Self::Day => TimelineGranularity::Hourly,
            _ => TimelineGranularity::Daily,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for StatisticsPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatisticsPeriod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            other => Err(DomainError::validation(format!(
                "Unknown statistics period: {}. Valid periods: day, week, month, year",
                other
            ))),
        }
    }
}

fn first_of_next_month(first: NaiveDate) -> NaiveDate {
    let (year, month) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(first)
}

/// Midnight UTC of a calendar day
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Half-open time range `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// Trailing window of `days` ending at `now`
    pub fn trailing_days(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            from: now - Duration::days(days as i64),
            to: now,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at < self.to
    }
}

/// Timeline bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineGranularity {
    Hourly,
    Daily,
}

impl TimelineGranularity {
    /// Start of the bucket containing `at`
    pub fn bucket_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let day = start_of_day(at.date_naive());

        match self {
            Self::Daily => day,
            Self::Hourly => day + Duration::hours(at.hour() as i64),
        }
    }

    /// Display label for a bucket
    pub fn label(&self, bucket_start: DateTime<Utc>) -> String {
        match self {
            Self::Daily => bucket_start.format("%Y-%m-%d").to_string(),
            Self::Hourly => bucket_start.format("%Y-%m-%d %H:00:00").to_string(),
        }
    }
}

/// Request counts over a range
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicCounts {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub blocked_requests: u64,
    pub rate_limited_requests: u64,
    pub suspicious_requests: u64,
    pub unique_users: u64,
    pub unique_ips: u64,
    pub unique_countries: u64,
}

/// Latency and payload-size figures
///
/// Averages over an empty set are 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub avg_response_time_ms: u64,
    pub max_response_time_ms: u64,
    pub slow_requests_count: u64,
    pub avg_request_size_bytes: u64,
    pub avg_response_size_bytes: u64,
}

/// One row of a grouped count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub key: String,
    pub count: u64,
}

/// One timeline bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineBucket {
    pub period: String,
    pub starts_at: DateTime<Utc>,
    pub requests: u64,
    pub successful: u64,
    pub failed: u64,
}

/// Everything the store computes for one range and filter set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageAggregate {
    pub basic: BasicCounts,
    pub performance: PerformanceStats,
    /// All actions, most frequent first
    pub actions: Vec<BreakdownEntry>,
    /// All non-null countries, most frequent first
    pub countries: Vec<BreakdownEntry>,
    pub environments: Vec<BreakdownEntry>,
    /// Chronological
    pub timeline: Vec<TimelineBucket>,
}

/// Statistics over a calendar period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStatistics {
    pub period: StatisticsPeriod,
    pub basic: BasicCounts,
    pub performance: PerformanceStats,
    pub top_actions: Vec<BreakdownEntry>,
    pub top_countries: Vec<BreakdownEntry>,
    pub environment_breakdown: Vec<BreakdownEntry>,
    pub timeline: Vec<TimelineBucket>,
    pub date_range: DateRange,
}

/// Requests on one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub requests: u64,
}

/// Statistics for one user over a trailing window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatistics {
    pub user_id: String,
    pub days: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub suspicious_requests: u64,
    pub unique_ips: u64,
    pub countries_used: u64,
    pub avg_response_time_ms: u64,
    pub actions_breakdown: Vec<BreakdownEntry>,
    pub environments_breakdown: Vec<BreakdownEntry>,
    /// Newest day first
    pub daily_usage: Vec<DailyCount>,
    pub date_range: DateRange,
}

/// One day of the performance series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformancePoint {
    pub date: NaiveDate,
    pub avg_response_time_ms: f64,
    pub max_response_time_ms: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
}

fn rounded_average(sum: u64, count: u64) -> u64 {
    if count == 0 {
        return 0;
    }

    (sum as f64 / count as f64).round() as u64
}

fn sorted_breakdown(counts: HashMap<String, u64>) -> Vec<BreakdownEntry> {
    let mut entries: Vec<BreakdownEntry> = counts
        .into_iter()
        .map(|(key, count)| BreakdownEntry { key, count })
        .collect();

    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    entries
}

/// Fold of usage log entries into a [`UsageAggregate`]
#[derive(Debug)]
pub struct StatisticsAccumulator {
    granularity: TimelineGranularity,
    basic: BasicCounts,
    users: HashSet<String>,
    ips: HashSet<String>,
    countries_seen: HashSet<String>,
    response_time_sum: u64,
    response_time_count: u64,
    response_time_max: u64,
    slow_requests: u64,
    request_size_sum: u64,
    request_size_count: u64,
    response_size_sum: u64,
    response_size_count: u64,
    actions: HashMap<String, u64>,
    countries: HashMap<String, u64>,
    environments: HashMap<String, u64>,
    timeline: BTreeMap<DateTime<Utc>, (u64, u64, u64)>,
}

impl StatisticsAccumulator {
    pub fn new(granularity: TimelineGranularity) -> Self {
        Self {
            granularity,
            basic: BasicCounts::default(),
            users: HashSet::new(),
            ips: HashSet::new(),
            countries_seen: HashSet::new(),
            response_time_sum: 0,
            response_time_count: 0,
            response_time_max: 0,
            slow_requests: 0,
            request_size_sum: 0,
            request_size_count: 0,
            response_size_sum: 0,
            response_size_count: 0,
            actions: HashMap::new(),
            countries: HashMap::new(),
            environments: HashMap::new(),
            timeline: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, entry: &UsageLogEntry) {
        self.basic.total_requests += 1;

        match entry.status() {
            LogStatus::Success => self.basic.successful_requests += 1,
            LogStatus::Failed => self.basic.failed_requests += 1,
            LogStatus::Blocked => self.basic.blocked_requests += 1,
            LogStatus::RateLimited => self.basic.rate_limited_requests += 1,
        }

        if entry.is_suspicious() {
            self.basic.suspicious_requests += 1;
        }

        if let Some(user_id) = &entry.user_id {
            self.users.insert(user_id.clone());
        }

        self.ips.insert(entry.ip_address.clone());

        if let Some(country) = &entry.geo.country_code {
            self.countries_seen.insert(country.clone());
            *self.countries.entry(country.clone()).or_insert(0) += 1;
        }

        if let Some(ms) = entry.response_time_ms {
            self.response_time_sum += ms;
            self.response_time_count += 1;
            self.response_time_max = self.response_time_max.max(ms);

            if ms > SLOW_REQUEST_THRESHOLD_MS {
                self.slow_requests += 1;
            }
        }

        if let Some(bytes) = entry.request_size_bytes {
            self.request_size_sum += bytes;
            self.request_size_count += 1;
        }

        if let Some(bytes) = entry.response_size_bytes {
            self.response_size_sum += bytes;
            self.response_size_count += 1;
        }

        if let Some(action) = &entry.action {
            *self.actions.entry(action.clone()).or_insert(0) += 1;
        }

        *self
            .environments
            .entry(entry.environment.as_str().to_string())
            .or_insert(0) += 1;

        let bucket = self
            .timeline
            .entry(self.granularity.bucket_start(entry.created_at()))
            .or_insert((0, 0, 0));
        bucket.0 += 1;

        match entry.status() {
            LogStatus::Success => bucket.1 += 1,
            LogStatus::Failed => bucket.2 += 1,
            _ => {}
        }
    }

    pub fn finish(self) -> UsageAggregate {
        let mut basic = self.basic;
        basic.unique_users = self.users.len() as u64;
        basic.unique_ips = self.ips.len() as u64;
        basic.unique_countries = self.countries_seen.len() as u64;

        let performance = PerformanceStats {
            avg_response_time_ms: rounded_average(self.response_time_sum, self.response_time_count),
            max_response_time_ms: self.response_time_max,
            slow_requests_count: self.slow_requests,
            avg_request_size_bytes: rounded_average(self.request_size_sum, self.request_size_count),
            avg_response_size_bytes: rounded_average(
                self.response_size_sum,
                self.response_size_count,
            ),
        };

        let granularity = self.granularity;
        let timeline = self
            .timeline
            .into_iter()
            .map(|(starts_at, (requests, successful, failed))| TimelineBucket {
                period: granularity.label(starts_at),
                starts_at,
                requests,
                successful,
                failed,
            })
            .collect();

        UsageAggregate {
            basic,
            performance,
            actions: sorted_breakdown(self.actions),
            countries: sorted_breakdown(self.countries),
            environments: sorted_breakdown(self.environments),
            timeline,
        }
    }
}

/// Fold of entries into a daily performance series, newest day first
///
/// Entries without a response time are ignored.
pub fn performance_series_from<'a>(
    entries: impl IntoIterator<Item = &'a UsageLogEntry>,
) -> Vec<PerformancePoint> {
    let mut days: BTreeMap<NaiveDate, (u64, u64, u64, u64)> = BTreeMap::new();

    for entry in entries {
        let Some(ms) = entry.response_time_ms else {
            continue;
        };

        let day = days
            .entry(entry.created_at().date_naive())
            .or_insert((0, 0, 0, 0));
        day.0 += ms;
        day.1 = day.1.max(ms);
        day.2 += 1;

        if entry.status() == LogStatus::Success {
            day.3 += 1;
        }
    }

    days.into_iter()
        .rev()
        .map(|(date, (sum, max, total, successful))| PerformancePoint {
            date,
            avg_response_time_ms: if total == 0 {
                0.0
            } else {
                sum as f64 / total as f64
            },
            max_response_time_ms: max,
            total_requests: total,
            successful_requests: successful,
        })
        .collect()
}
