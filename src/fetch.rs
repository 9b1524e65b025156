use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{TabledapUrl, format_timestamp};
use crate::erddap::{ChunkResponse, TabledapClient};
use crate::error::BagitifyError;
use crate::freshness::{self, Freshness};
use crate::months::MonthChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkAction {
    /// Existing archive file is current, no request made.
    Skipped,
    /// ERDDAP has no rows for the month.
    Empty,
    Downloaded { bytes: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkOutcome {
    pub month: String,
    pub file_name: String,
    pub freshness: Freshness,
    pub action: ChunkAction,
}

/// Fetches month files into `destination`, judging freshness against
/// `existing` (the payload of an existing bag, if any).
pub struct ChunkFetcher<'a, C: TabledapClient> {
    pub client: &'a C,
    pub url: &'a TabledapUrl,
    pub destination: &'a Path,
    pub existing: Option<&'a Path>,
    pub force: bool,
}

impl<C: TabledapClient> ChunkFetcher<'_, C> {
    pub fn fetch_range(
        &self,
        chunks: &[MonthChunk],
        sink: &dyn ProgressSink,
    ) -> Result<Vec<ChunkOutcome>, BagitifyError> {
        chunks
            .iter()
            .map(|chunk| self.fetch_chunk(chunk, sink))
            .collect()
    }

    pub fn fetch_chunk(
        &self,
        chunk: &MonthChunk,
        sink: &dyn ProgressSink,
    ) -> Result<ChunkOutcome, BagitifyError> {
        let file_name = chunk.file_name(self.url);
        let destination = self.destination.join(&file_name);
        let existing = self.existing.map(|dir| dir.join(&file_name));

        let freshness = freshness::assess(existing.as_deref(), self.force, &chunk.end);
        let outcome = |action| ChunkOutcome {
            month: chunk.label(),
            file_name: file_name.clone(),
            freshness,
            action,
        };
        let existing_display = existing
            .as_deref()
            .map(|path| path.display().to_string())
            .unwrap_or_default();

        match freshness {
            Freshness::Current => {
                sink.event(ProgressEvent::detail(format!(
                    "Skipping download. File '{existing_display}' already exists."
                )));
                return Ok(outcome(ChunkAction::Skipped));
            }
            Freshness::Forced => sink.event(ProgressEvent::detail(format!(
                "File '{existing_display}' exists but downloads are forced. Will re-download and overwrite."
            ))),
            Freshness::Stale { .. } => sink.event(ProgressEvent::detail(format!(
                "File '{existing_display}' exists but was written before chunk ending {}, re-downloading.",
                format_timestamp(&chunk.end)
            ))),
            Freshness::Missing => {}
        }

        sink.event(ProgressEvent::detail(format!(
            "Downloading nc for {} - {} to '{}'.",
            format_timestamp(&chunk.start),
            format_timestamp(&chunk.end),
            destination.display()
        )));

        match self.client.fetch_chunk(self.url, chunk)? {
            ChunkResponse::NoData => {
                sink.event(ProgressEvent::notice(format!(
                    "No data found for month {}.",
                    format_timestamp(&chunk.start)
                )));
                Ok(outcome(ChunkAction::Empty))
            }
            ChunkResponse::Data(body) => {
                fs::write(&destination, &body).map_err(|err| {
                    BagitifyError::Filesystem(format!("write {}: {err}", destination.display()))
                })?;
                Ok(outcome(ChunkAction::Downloaded { bytes: body.len() }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::time::{Duration, SystemTime};

    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    use super::*;
    use crate::erddap::TimeRange;

    struct NoopSink;

    impl ProgressSink for NoopSink {
        fn event(&self, _event: ProgressEvent) {}
    }

    #[derive(Default)]
    struct ScriptedClient {
        empty_months: Vec<String>,
        failing_months: Vec<String>,
        requested: RefCell<Vec<String>>,
    }

    impl TabledapClient for ScriptedClient {
        fn time_range(&self, _url: &TabledapUrl) -> Result<TimeRange, BagitifyError> {
            Err(BagitifyError::RemoteHttp("not used".to_string()))
        }

        fn fetch_chunk(
            &self,
            _url: &TabledapUrl,
            chunk: &MonthChunk,
        ) -> Result<ChunkResponse, BagitifyError> {
            let label = chunk.label();
            self.requested.borrow_mut().push(label.clone());
            if self.failing_months.contains(&label) {
                return Err(BagitifyError::RemoteStatus {
                    status: 500,
                    url: label,
                    message: "Internal Server Error".to_string(),
                });
            }
            if self.empty_months.contains(&label) {
                return Ok(ChunkResponse::NoData);
            }
            Ok(ChunkResponse::Data(format!("nc {label}").into_bytes()))
        }

        fn metadata(&self, _url: &TabledapUrl) -> Result<Value, BagitifyError> {
            Err(BagitifyError::RemoteHttp("not used".to_string()))
        }
    }

    fn url() -> TabledapUrl {
        "https://example.org/erddap/tabledap/station".parse().unwrap()
    }

    fn month(year: i32, month: u32) -> MonthChunk {
        MonthChunk::containing(&Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn downloads_into_destination() {
        let staging = tempfile::tempdir().unwrap();
        let client = ScriptedClient::default();
        let url = url();
        let fetcher = ChunkFetcher {
            client: &client,
            url: &url,
            destination: staging.path(),
            existing: None,
            force: false,
        };

        let outcome = fetcher.fetch_chunk(&month(2022, 7), &NoopSink).unwrap();
        assert_eq!(outcome.action, ChunkAction::Downloaded { bytes: 10 });
        assert_eq!(outcome.freshness, Freshness::Missing);
        let written = fs::read(staging.path().join("station_2022-07.nc")).unwrap();
        assert_eq!(written, b"nc 2022-07");
    }

    #[test]
    fn empty_month_writes_nothing() {
        let staging = tempfile::tempdir().unwrap();
        let client = ScriptedClient {
            empty_months: vec!["2022-08".to_string()],
            ..Default::default()
        };
        let url = url();
        let fetcher = ChunkFetcher {
            client: &client,
            url: &url,
            destination: staging.path(),
            existing: None,
            force: false,
        };

        let outcomes = fetcher
            .fetch_range(&[month(2022, 7), month(2022, 8), month(2022, 9)], &NoopSink)
            .unwrap();
        assert_eq!(outcomes[1].action, ChunkAction::Empty);
        assert!(!staging.path().join("station_2022-08.nc").exists());
        assert_eq!(fs::read_dir(staging.path()).unwrap().count(), 2);
    }

    #[test]
    fn remote_error_aborts_the_range() {
        let staging = tempfile::tempdir().unwrap();
        let client = ScriptedClient {
            failing_months: vec!["2022-08".to_string()],
            ..Default::default()
        };
        let url = url();
        let fetcher = ChunkFetcher {
            client: &client,
            url: &url,
            destination: staging.path(),
            existing: None,
            force: false,
        };

        let err = fetcher
            .fetch_range(&[month(2022, 7), month(2022, 8), month(2022, 9)], &NoopSink)
            .unwrap_err();
        assert_matches!(err, BagitifyError::RemoteStatus { status: 500, .. });
        assert_eq!(*client.requested.borrow(), vec!["2022-07", "2022-08"]);
    }

    #[test]
    fn fresh_archive_file_is_not_requested() {
        let staging = tempfile::tempdir().unwrap();
        let payload = tempfile::tempdir().unwrap();
        let chunk = month(2022, 7);
        let existing = payload.path().join("station_2022-07.nc");
        let file = fs::File::create(&existing).unwrap();
        file.set_modified(SystemTime::from(chunk.end) + Duration::from_secs(86_400))
            .unwrap();

        let client = ScriptedClient::default();
        let url = url();
        let fetcher = ChunkFetcher {
            client: &client,
            url: &url,
            destination: staging.path(),
            existing: Some(payload.path()),
            force: false,
        };
        let outcome = fetcher.fetch_chunk(&chunk, &NoopSink).unwrap();
        assert_eq!(outcome.action, ChunkAction::Skipped);
        assert!(client.requested.borrow().is_empty());

        let forced = ChunkFetcher {
            force: true,
            ..fetcher
        };
        let outcome = forced.fetch_chunk(&chunk, &NoopSink).unwrap();
        assert_eq!(outcome.freshness, Freshness::Forced);
        assert_eq!(*client.requested.borrow(), vec!["2022-07"]);
        assert!(staging.path().join("station_2022-07.nc").exists());
    }
}
