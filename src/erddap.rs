use std::io::Read;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::domain::{TabledapUrl, parse_timestamp};
use crate::error::BagitifyError;
use crate::months::MonthChunk;

/// Body fragment ERDDAP sends with a 404 when a query matched no rows.
pub const NO_MATCHING_RESULTS: &str = "Your query produced no matching results";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResponse {
    Data(Vec<u8>),
    /// The month exists in the dataset's range but holds no rows.
    NoData,
}

/// Read-only view of a tabledap dataset.
pub trait TabledapClient {
    fn time_range(&self, url: &TabledapUrl) -> Result<TimeRange, BagitifyError>;
    fn fetch_chunk(
        &self,
        url: &TabledapUrl,
        chunk: &MonthChunk,
    ) -> Result<ChunkResponse, BagitifyError>;
    fn metadata(&self, url: &TabledapUrl) -> Result<Value, BagitifyError>;
}

#[derive(Clone)]
pub struct ErddapHttpClient {
    client: Client,
}

impl ErddapHttpClient {
    pub fn new() -> Result<Self, BagitifyError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bagitify/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| BagitifyError::RemoteHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| BagitifyError::RemoteHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn get(&self, url: &str) -> Result<(StatusCode, Vec<u8>), BagitifyError> {
        debug!(url, "erddap.request");
        let start = std::time::Instant::now();
        let response = self.send_with_retries(|| self.client.get(url))?;
        let status = response.status();
        let size_hint = response.content_length();
        let body = read_body(response, size_hint)?;
        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "erddap.response"
        );
        Ok((status, body))
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, BagitifyError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            // a status reply, even a failing one, is final
            match make_req().send() {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(BagitifyError::RemoteHttp(err.to_string()));
                }
            }
        }
    }
}

impl TabledapClient for ErddapHttpClient {
    fn time_range(&self, url: &TabledapUrl) -> Result<TimeRange, BagitifyError> {
        let query = url.time_range_url();
        let (status, body) = self.get(&query)?;
        let body = ensure_success(status, &query, body)?;
        parse_time_range(&String::from_utf8_lossy(&body))
    }

    fn fetch_chunk(
        &self,
        url: &TabledapUrl,
        chunk: &MonthChunk,
    ) -> Result<ChunkResponse, BagitifyError> {
        let query = url.chunk_url(&chunk.start, &chunk.end);
        let (status, body) = self.get(&query)?;
        classify_chunk_response(status.as_u16(), &query, body)
    }

    fn metadata(&self, url: &TabledapUrl) -> Result<Value, BagitifyError> {
        let query = url.metadata_url();
        let (status, body) = self.get(&query)?;
        let body = ensure_success(status, &query, body)?;
        serde_json::from_slice(&body)
            .map_err(|err| BagitifyError::UnexpectedResponse(format!("{query}: {err}")))
    }
}

/// Reads a response body into one buffer, sized up front when the length is known.
fn read_body<R: Read>(mut reader: R, size_hint: Option<u64>) -> Result<Vec<u8>, BagitifyError> {
    let capacity = size_hint
        .and_then(|size| usize::try_from(size).ok())
        .unwrap_or_default();
    let mut body = Vec::with_capacity(capacity);
    reader
        .read_to_end(&mut body)
        .map_err(|err| BagitifyError::RemoteHttp(err.to_string()))?;
    Ok(body)
}

fn ensure_success(status: StatusCode, url: &str, body: Vec<u8>) -> Result<Vec<u8>, BagitifyError> {
    if status.is_success() {
        return Ok(body);
    }
    Err(status_error(status.as_u16(), url, &body))
}

fn status_error(status: u16, url: &str, body: &[u8]) -> BagitifyError {
    let message = String::from_utf8_lossy(body).trim().to_string();
    BagitifyError::RemoteStatus {
        status,
        url: url.to_string(),
        message: if message.is_empty() {
            "ERDDAP request failed".to_string()
        } else {
            message
        },
    }
}

pub fn is_no_data_response(status: u16, body: &[u8]) -> bool {
    status == 404 && String::from_utf8_lossy(body).contains(NO_MATCHING_RESULTS)
}

pub fn classify_chunk_response(
    status: u16,
    url: &str,
    body: Vec<u8>,
) -> Result<ChunkResponse, BagitifyError> {
    if (200..300).contains(&status) {
        return Ok(ChunkResponse::Data(body));
    }
    if is_no_data_response(status, &body) {
        return Ok(ChunkResponse::NoData);
    }
    Err(status_error(status, url, &body))
}

/// Parses the two-line `orderByMinMax` csv0 body.
pub fn parse_time_range(body: &str) -> Result<TimeRange, BagitifyError> {
    let mut lines = body.trim().lines().map(str::trim).filter(|line| !line.is_empty());
    let (Some(start), Some(end)) = (lines.next(), lines.next()) else {
        return Err(BagitifyError::UnexpectedResponse(format!(
            "expected two timestamps, got {body:?}"
        )));
    };
    let start = parse_timestamp(start)
        .map_err(|_| BagitifyError::UnexpectedResponse(format!("bad start time {start:?}")))?;
    let end = parse_timestamp(end)
        .map_err(|_| BagitifyError::UnexpectedResponse(format!("bad end time {end:?}")))?;
    Ok(TimeRange { start, end })
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
