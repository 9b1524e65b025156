use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Verdict on a month file already present in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Missing,
    Forced,
    /// Written before the month closed, so it cannot hold the whole month.
    Stale { modified: DateTime<Utc> },
    Current,
}

impl Freshness {
    pub fn needs_fetch(&self) -> bool {
        !matches!(self, Freshness::Current)
    }
}

pub fn assess(existing: Option<&Path>, force: bool, chunk_end: &DateTime<Utc>) -> Freshness {
    let Some(metadata) = existing.and_then(|path| fs::metadata(path).ok()) else {
        return Freshness::Missing;
    };
    if !metadata.is_file() {
        return Freshness::Missing;
    }
    if force {
        return Freshness::Forced;
    }
    // an unreadable mtime can't prove freshness
    let Ok(modified) = metadata.modified() else {
        return Freshness::Stale {
            modified: DateTime::<Utc>::MIN_UTC,
        };
    };
    let modified = DateTime::<Utc>::from(modified);
    if modified < *chunk_end {
        return Freshness::Stale { modified };
    }
    Freshness::Current
}

pub fn needs_fetch(existing: Option<&Path>, force: bool, chunk_end: &DateTime<Utc>) -> bool {
    assess(existing, force, chunk_end).needs_fetch()
}
