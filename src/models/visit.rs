//! Visit counters, event log and the payloads built from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::buckets::{bucket_keys, BucketKeys, Resolution, UtcOffset};

/// Bucket key -> visit count
pub type BucketMap = BTreeMap<String, i64>;

/// Site id -> total visit count
pub type SiteLinks = BTreeMap<String, i64>;

/// Visit counts in the four fixed resolutions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedVisits {
    pub day: BucketMap,
    pub month: BucketMap,
    pub year: BucketMap,
    pub all: BucketMap,
}

impl TimedVisits {
    pub fn bucket(&self, resolution: Resolution) -> &BucketMap {
        match resolution {
            Resolution::Day => &self.day,
            Resolution::Month => &self.month,
            Resolution::Year => &self.year,
            Resolution::All => &self.all,
        }
    }

    pub fn bucket_mut(&mut self, resolution: Resolution) -> &mut BucketMap {
        match resolution {
            Resolution::Day => &mut self.day,
            Resolution::Month => &mut self.month,
            Resolution::Year => &mut self.year,
            Resolution::All => &mut self.all,
        }
    }

    /// Count one visit in every resolution
    pub fn increment(&mut self, keys: &BucketKeys) {
        for resolution in Resolution::ALL {
            *self
                .bucket_mut(resolution)
                .entry(keys.key(resolution).to_string())
                .or_insert(0) += 1;
        }
    }

    /// Rebuild the counters from a log as seen from `offset`
    pub fn from_log(log: &[LogEntry], offset: UtcOffset) -> Self {
        let mut visits = Self::default();
        for instant in log.iter().filter_map(LogEntry::instant) {
            visits.increment(&bucket_keys(instant, offset));
        }
        visits
    }

    /// Sum of the all-time resolution
    pub fn total(&self) -> i64 {
        self.all.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        Resolution::ALL
            .iter()
            .all(|resolution| self.bucket(*resolution).is_empty())
    }
}

/// One recorded ping, in arrival order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Arrival instant (Unix timestamp)
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl LogEntry {
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

pub type LogData = Vec<LogEntry>;

/// A visit as it arrives at the tracker
#[derive(Debug, Clone)]
pub struct Visit {
    pub at: DateTime<Utc>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
}

impl Visit {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            at,
            referrer: None,
            user_agent: None,
        }
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn log_entry(&self) -> LogEntry {
        LogEntry {
            timestamp: self.at.timestamp(),
            referrer: self.referrer.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Full stored state of one site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteSnapshot {
    pub count: i64,
    pub log: LogData,
    pub visits: TimedVisits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub visits: TimedVisits,
    pub logs: LogData,
    pub site_links: SiteLinks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDump {
    pub id: String,
    pub token: String,
    pub prefs: super::Prefs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteDump {
    pub count: i64,
    pub logs: LogData,
    pub visits: TimedVisits,
}

/// Export of everything stored for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dump {
    pub sites: BTreeMap<String, SiteDump>,
    pub user: UserDump,
}
