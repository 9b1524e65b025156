use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::bag::Bag;
use crate::config::MetadataConfig;
use crate::domain::{TabledapUrl, format_timestamp};
use crate::erddap::{TabledapClient, TimeRange};
use crate::error::BagitifyError;
use crate::fetch::{ChunkFetcher, ChunkOutcome};
use crate::metadata::{parse_tabledap_metadata, prep_bag_info};
use crate::months::month_chunks;
use crate::store::{ArchiveState, MergeReport, Store};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub url: TabledapUrl,
    pub bag_directory: Option<Utf8PathBuf>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub tmp_parent: Option<Utf8PathBuf>,
    pub force: bool,
}

impl RunOptions {
    pub fn new(url: TabledapUrl) -> Self {
        Self {
            url,
            bag_directory: None,
            start: None,
            end: None,
            tmp_parent: None,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub dataset: String,
    pub bag_directory: String,
    pub available_start: String,
    pub available_end: String,
    pub start: String,
    pub end: String,
    pub previous_state: ArchiveState,
    pub chunks: Vec<ChunkOutcome>,
    pub merge: MergeReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    /// Printed only in verbose mode.
    Detail,
    Notice,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub level: EventLevel,
    pub message: String,
}

impl ProgressEvent {
    pub fn detail(message: impl Into<String>) -> Self {
        Self {
            level: EventLevel::Detail,
            message: message.into(),
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            level: EventLevel::Notice,
            message: message.into(),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Clamps the requested range to what the dataset actually holds.
pub fn effective_range(
    requested_start: Option<DateTime<Utc>>,
    requested_end: Option<DateTime<Utc>>,
    available: TimeRange,
) -> TimeRange {
    TimeRange {
        start: requested_start.map_or(available.start, |start| start.max(available.start)),
        end: requested_end.map_or(available.end, |end| end.min(available.end)),
    }
}

pub struct Archiver<C: TabledapClient> {
    client: C,
}

impl<C: TabledapClient> Archiver<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn run(
        &self,
        options: &RunOptions,
        config: &MetadataConfig,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, BagitifyError> {
        let url = &options.url;
        let store = Store::new(
            url,
            options.bag_directory.clone(),
            options.tmp_parent.clone(),
        )?;
        store.ensure_dirs()?;
        store.check_same_filesystem()?;

        let available = self.client.time_range(url)?;
        sink.event(ProgressEvent::notice(format!(
            "Dataset has time range {} - {}",
            format_timestamp(&available.start),
            format_timestamp(&available.end)
        )));

        let range = effective_range(options.start, options.end, available);
        let chunks = if range.start <= range.end {
            month_chunks(&range.start, &range.end)
        } else {
            Vec::new()
        };
        debug!(
            start = %format_timestamp(&range.start),
            end = %format_timestamp(&range.end),
            months = chunks.len(),
            "effective range"
        );

        let state = store.state();
        let staging = store.create_staging(url.dataset_name())?;
        sink.event(ProgressEvent::detail(format!(
            "Using bag directory '{}'",
            store.archive_dir()
        )));
        sink.event(ProgressEvent::detail(format!(
            "Using temp directory '{}'",
            staging.path().display()
        )));

        let payload = store.payload_dir();
        let fetcher = ChunkFetcher {
            client: &self.client,
            url,
            destination: staging.path(),
            existing: matches!(state, ArchiveState::ExistingArchive)
                .then_some(payload.as_std_path()),
            force: options.force,
        };
        let outcomes = fetcher.fetch_range(&chunks, sink)?;

        let merge = store.merge_staging(staging.path(), state, options.force)?;
        sink.event(ProgressEvent::detail(format!(
            "Merged {} file(s) from '{}' into '{}' ({:?}, {} removed)",
            merge.moved,
            staging.path().display(),
            payload,
            merge.mode,
            merge.removed
        )));
        drop(staging);

        let metadata = parse_tabledap_metadata(&self.client.metadata(url)?)?;
        let info = prep_bag_info(url, config, &metadata)?;
        match state {
            ArchiveState::NotYetArchive => {
                Bag::create(store.archive_dir(), &info)?;
                sink.event(ProgressEvent::detail(format!(
                    "Created bag at '{}'",
                    store.archive_dir()
                )));
            }
            ArchiveState::ExistingArchive => {
                Bag::open(store.archive_dir())?.update(&info)?;
                sink.event(ProgressEvent::detail(format!(
                    "Updated bag at '{}'",
                    store.archive_dir()
                )));
            }
        }

        Ok(RunSummary {
            dataset: url.dataset_name().to_string(),
            bag_directory: store.archive_dir().to_string(),
            available_start: format_timestamp(&available.start),
            available_end: format_timestamp(&available.end),
            start: format_timestamp(&range.start),
            end: format_timestamp(&range.end),
            previous_state: state,
            chunks: outcomes,
            merge,
        })
    }
}
