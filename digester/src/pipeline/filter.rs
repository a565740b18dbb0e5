use super::PipelineError;
use crate::id::TimeRange;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt, future};
use object_store::ObjectMeta;
use object_store::path::Path;

const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%MZ";

/// Extracts the delivery timestamp from a flow log object key, e.g.
/// `123456789012_vpcflowlogs_us-east-1_fl-1234abcd_20180620T0620Z_fe123456.log.gz`.
pub fn key_timestamp(key: &Path) -> Option<DateTime<Utc>> {
    let file_name = key.filename()?;
    file_name
        .split('_')
        .find_map(|segment| NaiveDateTime::parse_from_str(segment, KEY_TIMESTAMP_FORMAT).ok())
        .map(|naive| naive.and_utc())
}

/// Inclusive `[start, stop]` window over source key timestamps.
#[derive(Clone, Copy, Debug)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(range: &TimeRange) -> Self {
        TimeWindow {
            start: range.start,
            stop: range.stop,
        }
    }

    pub fn contains(&self, key: &Path) -> bool {
        match key_timestamp(key) {
            Some(at) => self.start <= at && at <= self.stop,
            None => {
                tracing::debug!(%key, "Skipping source object without a timestamp");
                false
            }
        }
    }

    pub fn apply<'a>(
        self,
        objects: BoxStream<'a, Result<ObjectMeta, PipelineError>>,
    ) -> BoxStream<'a, Result<ObjectMeta, PipelineError>> {
        objects
            .try_filter(move |meta| future::ready(self.contains(&meta.location)))
            .boxed()
    }
}
