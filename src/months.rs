//! Calendar-month partitioning of a time range.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;

use crate::domain::TabledapUrl;

/// One calendar month `[start, end)` of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthChunk {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MonthChunk {
    pub fn containing(instant: &DateTime<Utc>) -> Self {
        let start = start_of_month(instant);
        Self {
            start,
            end: start_of_next_month(&start),
        }
    }

    /// `<dataset>_<YYYY-MM>.nc`
    pub fn file_name(&self, url: &TabledapUrl) -> String {
        format!("{}_{}.nc", url.dataset_name(), self.start.format("%Y-%m"))
    }

    pub fn label(&self) -> String {
        self.start.format("%Y-%m").to_string()
    }
}

pub fn start_of_month(instant: &DateTime<Utc>) -> DateTime<Utc> {
    month_start(instant.year(), instant.month())
}

pub fn start_of_next_month(instant: &DateTime<Utc>) -> DateTime<Utc> {
    if instant.month() == 12 {
        month_start(instant.year() + 1, 1)
    } else {
        month_start(instant.year(), instant.month() + 1)
    }
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Months covering `[start, end]`. A partial final month is included, an `end`
/// sitting exactly on a month boundary is not rounded further.
pub fn month_chunks(start: &DateTime<Utc>, end: &DateTime<Utc>) -> Vec<MonthChunk> {
    let mut last = *end;
    if last != start_of_month(&last) {
        last = start_of_next_month(&last);
    }

    let mut chunks = Vec::new();
    let mut current = MonthChunk::containing(start);
    while current.end <= last {
        chunks.push(current);
        if current.end == DateTime::<Utc>::MAX_UTC {
            break;
        }
        current = MonthChunk::containing(&current.end);
    }
    chunks
}
