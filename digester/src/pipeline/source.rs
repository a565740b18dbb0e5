use super::PipelineError;
use crate::config::SourceConfig;
use crate::id::TimeRange;
use chrono::NaiveDate;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore};

/// Lists raw flow log objects that may cover a time window.
///
/// With both accounts and regions configured, listing is narrowed to one
/// `AWSLogs/<account>/vpcflowlogs/<region>/<yyyy>/<mm>/<dd>` prefix per
/// account, region and UTC day touched by the window. Otherwise the whole
/// bucket is listed and the time filter does all the work.
#[derive(Clone, Debug, Default)]
pub struct SourceEnumerator {
    accounts: Vec<String>,
    regions: Vec<String>,
}

impl SourceEnumerator {
    pub fn new(config: &SourceConfig) -> Self {
        SourceEnumerator {
            accounts: config.accounts.clone(),
            regions: config.regions.clone(),
        }
    }

    /// `None` stands for the bucket root.
    pub fn prefixes(&self, range: &TimeRange) -> Vec<Option<Path>> {
        if self.accounts.is_empty() || self.regions.is_empty() {
            return vec![None];
        }

        let days = days_between(range.start.date_naive(), range.stop.date_naive());
        let mut prefixes = Vec::with_capacity(self.accounts.len() * self.regions.len() * days.len());
        for account in &self.accounts {
            for region in &self.regions {
                for day in &days {
                    prefixes.push(Some(Path::from(prefix(account, region, *day))));
                }
            }
        }
        prefixes
    }

    /// Lazily lists every object under the window's prefixes, one prefix
    /// after the other.
    pub fn list<'a>(
        &self,
        client: &'a dyn ObjectStore,
        range: &TimeRange,
    ) -> BoxStream<'a, Result<ObjectMeta, PipelineError>> {
        stream::iter(self.prefixes(range))
            .flat_map(move |prefix| client.list(prefix.as_ref()))
            .map_err(PipelineError::List)
            .boxed()
    }
}

fn prefix(account: &str, region: &str, day: NaiveDate) -> String {
    format!(
        "AWSLogs/{account}/vpcflowlogs/{region}/{}",
        day.format("%Y/%m/%d")
    )
}

fn days_between(first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
    first.iter_days().take_while(|day| *day <= last).collect()
}
