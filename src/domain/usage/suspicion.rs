//! Suspicious-activity heuristic
//!
//! Each indicator is an independent boolean signal computed from the entry
//! being ingested and the committed history of its public key. An entry is
//! suspicious when at least [`SUSPICION_THRESHOLD`] indicators fire.

use std::fmt;
use std::ops::Range;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::entry::UsageLogEntry;

/// Look-back for the geographic anomaly check
pub const GEO_ANOMALY_WINDOW_MINUTES: i64 = 30;

/// Look-back for the high-frequency check
pub const HIGH_FREQUENCY_WINDOW_MINUTES: i64 = 5;

/// More entries than this in the high-frequency window fires the indicator
pub const HIGH_FREQUENCY_MAX_REQUESTS: u64 = 100;

/// User agents shorter than this are suspicious
pub const MIN_USER_AGENT_LENGTH: usize = 10;

/// UTC hours considered unusual
pub const UNUSUAL_HOURS: Range<u32> = 2..6;

/// History window for the unusual-hour baseline
pub const UNUSUAL_HOUR_HISTORY_DAYS: i64 = 30;

/// Fewer prior entries than this in unusual hours fires the indicator
pub const UNUSUAL_HOUR_MIN_HISTORY: u64 = 5;

/// Number of indicators needed to flag an entry
pub const SUSPICION_THRESHOLD: usize = 2;

/// One heuristic signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionIndicator {
    GeographicAnomaly,
    HighFrequency,
    SuspiciousUserAgent,
    UnusualTime,
}

impl SuspicionIndicator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeographicAnomaly => "geographic_anomaly",
            Self::HighFrequency => "high_frequency",
            Self::SuspiciousUserAgent => "suspicious_user_agent",
            Self::UnusualTime => "unusual_time",
        }
    }
}

impl fmt::Display for SuspicionIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// History facts gathered from the log store before assessment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuspicionEvidence {
    /// Country of the latest prior entry for the key in the geo window
    pub previous_country: Option<String>,
    /// Entries for the key in the high-frequency window
    pub recent_requests: u64,
    /// Entries for the key in unusual hours over the history window.
    /// `None` when the current hour is not unusual and the count was skipped.
    pub unusual_hour_history: Option<u64>,
}

/// Window boundaries for the evidence queries anchored at `now`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspicionWindows {
    pub geo_since: DateTime<Utc>,
    pub frequency_since: DateTime<Utc>,
    pub history_since: DateTime<Utc>,
}

impl SuspicionWindows {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            geo_since: now - Duration::minutes(GEO_ANOMALY_WINDOW_MINUTES),
            frequency_since: now - Duration::minutes(HIGH_FREQUENCY_WINDOW_MINUTES),
            history_since: now - Duration::days(UNUSUAL_HOUR_HISTORY_DAYS),
        }
    }
}

/// Whether `at` falls in the unusual-hours window
pub fn is_unusual_hour(at: DateTime<Utc>) -> bool {
    UNUSUAL_HOURS.contains(&at.hour())
}

/// Outcome of the heuristic for one entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspicionAssessment {
    pub indicators: Vec<SuspicionIndicator>,
}

impl SuspicionAssessment {
    /// Evaluate every indicator for an entry
    pub fn assess(entry: &UsageLogEntry, evidence: &SuspicionEvidence) -> Self {
        let mut indicators = Vec::new();

        if let (Some(previous), Some(current)) =
            (&evidence.previous_country, &entry.geo.country_code)
        {
            if previous != current {
                indicators.push(SuspicionIndicator::GeographicAnomaly);
            }
        }

        if evidence.recent_requests > HIGH_FREQUENCY_MAX_REQUESTS {
            indicators.push(SuspicionIndicator::HighFrequency);
        }

        let agent_too_short = entry
            .user_agent
            .as_deref()
            .map_or(true, |ua| ua.chars().count() < MIN_USER_AGENT_LENGTH);
        if agent_too_short {
            indicators.push(SuspicionIndicator::SuspiciousUserAgent);
        }

        if is_unusual_hour(entry.created_at()) {
            if let Some(history) = evidence.unusual_hour_history {
                if history < UNUSUAL_HOUR_MIN_HISTORY {
                    indicators.push(SuspicionIndicator::UnusualTime);
                }
            }
        }

        Self { indicators }
    }

    pub fn is_suspicious(&self) -> bool {
        self.indicators.len() >= SUSPICION_THRESHOLD
    }

    pub fn fired(&self, indicator: SuspicionIndicator) -> bool {
        self.indicators.contains(&indicator)
    }
}
