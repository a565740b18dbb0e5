//! Deterministic digest identities.
//!
//! A digest is addressed by the minute-truncated (start, stop) pair it covers.
//! The id is a version 5 UUID over the canonical RFC3339 form of both
//! instants, so every instance of the service derives the same id for the
//! same window without coordinating.

use crate::errors::InvalidInput;
use chrono::{DateTime, Duration, SecondsFormat, Timelike, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Derives the id for a time window. Both instants are truncated to the
    /// minute first, and the order of the arguments matters.
    pub fn derive(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        let name = format!(
            "{}{}",
            canonical(truncate_to_minute(start)),
            canonical(truncate_to_minute(stop))
        );
        JobId(Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string())
    }

    /// Accepts an id handed back to us by the dispatch appliance.
    pub fn from_external(id: String) -> Result<Self, InvalidInput> {
        if id.trim().is_empty() {
            return Err(InvalidInput("missing id field".into()));
        }
        Ok(JobId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t - Duration::seconds(i64::from(t.second())) - Duration::nanoseconds(i64::from(t.nanosecond()))
}

/// RFC3339 in UTC with as many fractional digits as needed.
pub fn canonical(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// A validated, minute-truncated window with `start <= stop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Result<Self, InvalidInput> {
        if start > stop {
            return Err(InvalidInput("start should be before stop".into()));
        }
        Ok(TimeRange {
            start: truncate_to_minute(start),
            stop: truncate_to_minute(stop),
        })
    }

    /// Parses the `start` and `stop` request values. Any RFC3339 precision is
    /// accepted, and the range is validated before truncation.
    pub fn parse(start: &str, stop: &str) -> Result<Self, InvalidInput> {
        let start = parse_timestamp("start", start)?;
        let stop = parse_timestamp("stop", stop)?;
        TimeRange::new(start, stop)
    }

    pub fn id(&self) -> JobId {
        JobId::derive(self.start, self.stop)
    }
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, InvalidInput> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| InvalidInput(format!("invalid {field} {value:?}: {e}")))
}
