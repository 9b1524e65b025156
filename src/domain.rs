use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BagitifyError;

/// Timestamp format used by ERDDAP queries and responses.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, BagitifyError> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| BagitifyError::InvalidTimestamp(value.to_string()))
}

/// Accepts either a full timestamp or a bare date (midnight UTC).
pub fn parse_user_timestamp(value: &str) -> Result<DateTime<Utc>, BagitifyError> {
    let trimmed = value.trim();
    if let Ok(timestamp) = parse_timestamp(trimmed) {
        return Ok(timestamp);
    }
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| BagitifyError::InvalidTimestamp(value.to_string()))
}

/// Normalized ERDDAP tabledap dataset url, e.g.
/// `https://erddap.example.org/erddap/tabledap/station_42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabledapUrl(String);

impl TabledapUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn dataset_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn time_range_url(&self) -> String {
        format!("{}.csv0?time&orderByMinMax(%22time%22)", self.0)
    }

    pub fn metadata_url(&self) -> String {
        format!("{}/index.json", self.0.replace("/tabledap/", "/info/"))
    }

    pub fn chunk_url(&self, start: &DateTime<Utc>, end: &DateTime<Utc>) -> String {
        format!(
            "{}.ncCFMA?&time>={}&time<{}",
            self.0,
            format_timestamp(start),
            format_timestamp(end)
        )
    }
}

impl fmt::Display for TabledapUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TabledapUrl {
    type Err = BagitifyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_lowercase();
        let normalized = lowered.strip_suffix(".html").unwrap_or(lowered.as_str());
        let normalized = normalized.trim_end_matches('/');

        let dataset = normalized
            .split_once("/tabledap/")
            .map(|(_, rest)| rest)
            .unwrap_or_default();
        if dataset.is_empty() || dataset.contains('/') {
            return Err(BagitifyError::InvalidUrl(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}
