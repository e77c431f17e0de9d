//! Time bucketing for visit counters
//!
//! Every visit is counted in four fixed resolutions. The calendar fields of
//! the day, month and year keys are read from the visit instant shifted into
//! the viewer's local time, so a single shifted instant yields all three keys
//! and containment (day inside month inside year) holds by construction.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::str::FromStr;

use crate::error::AppError;

/// Westernmost real-world UTC offset (UTC-12:00), in minutes
pub const MIN_UTC_OFFSET_MINUTES: i32 = -720;

/// Easternmost real-world UTC offset (UTC+14:00), in minutes
pub const MAX_UTC_OFFSET_MINUTES: i32 = 840;

/// Key of the single bucket in the all-time resolution
pub const ALL_BUCKET_KEY: &str = "all";

/// Counter resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Day,
    Month,
    Year,
    All,
}

impl Resolution {
    pub const ALL: [Resolution; 4] = [
        Resolution::Day,
        Resolution::Month,
        Resolution::Year,
        Resolution::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Day => "day",
            Resolution::Month => "month",
            Resolution::Year => "year",
            Resolution::All => "all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Resolution::Day),
            "month" => Some(Resolution::Month),
            "year" => Some(Resolution::Year),
            "all" => Some(Resolution::All),
            _ => None,
        }
    }
}

/// A validated UTC offset in minutes (local = UTC + offset)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcOffset {
    minutes: i32,
    fixed: FixedOffset,
}

impl UtcOffset {
    /// The canonical offset stored counters are keyed by
    pub fn utc() -> Self {
        Self {
            minutes: 0,
            fixed: Utc.fix(),
        }
    }

    pub fn from_minutes(minutes: i32) -> Result<Self, AppError> {
        if !(MIN_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&minutes) {
            return Err(AppError::InvalidOffset(format!(
                "{minutes} is outside {MIN_UTC_OFFSET_MINUTES}..={MAX_UTC_OFFSET_MINUTES}"
            )));
        }

        let fixed = FixedOffset::east_opt(minutes * 60)
            .ok_or_else(|| AppError::InvalidOffset(minutes.to_string()))?;

        Ok(Self { minutes, fixed })
    }

    /// Parse an optional query value; absent or blank means UTC
    pub fn parse_optional(raw: Option<&str>) -> Result<Self, AppError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::utc()),
            Some(value) => value.parse(),
        }
    }

    pub fn minutes(&self) -> i32 {
        self.minutes
    }

    pub fn is_utc(&self) -> bool {
        self.minutes == 0
    }
}

impl Default for UtcOffset {
    fn default() -> Self {
        Self::utc()
    }
}

impl FromStr for UtcOffset {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let minutes = s
            .trim()
            .parse::<i32>()
            .map_err(|_| AppError::InvalidOffset(format!("'{s}' is not an integer")))?;
        Self::from_minutes(minutes)
    }
}

/// Calendar bucket keys for one instant under one offset
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKeys {
    pub day: String,
    pub month: String,
    pub year: String,
}

impl BucketKeys {
    pub fn key(&self, resolution: Resolution) -> &str {
        match resolution {
            Resolution::Day => &self.day,
            Resolution::Month => &self.month,
            Resolution::Year => &self.year,
            Resolution::All => ALL_BUCKET_KEY,
        }
    }
}

/// Derive the day, month and year keys of `instant` seen from `offset`
pub fn bucket_keys(instant: DateTime<Utc>, offset: UtcOffset) -> BucketKeys {
    let local = instant.with_timezone(&offset.fixed);

    BucketKeys {
        day: local.format("%Y-%m-%d").to_string(),
        month: local.format("%Y-%m").to_string(),
        year: local.format("%Y").to_string(),
    }
}
