//! ListenBrainz API client
//!
//! Builds "submit listens" and "fetch listen history" requests and decodes
//! the responses. Knows nothing about the listen store or about retry and
//! reconciliation policy; those belong to the synchronizer.

use crate::models::TrackInfo;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scrobsync_common::time::{from_unix_seconds, to_unix_seconds};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

const SUBMISSION_CLIENT: &str = "scrobsync";
const SUBMISSION_CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const USER_AGENT: &str = concat!("scrobsync/", env!("CARGO_PKG_VERSION"));

/// Remote client errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error {0}: {1}")]
    Status(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Token rejected by remote service")]
    InvalidToken,
}

impl SyncClientError {
    /// Connection failures, timeouts and non-2xx replies
    ///
    /// These are worth retrying; an unreadable body or a rejected token is not.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncClientError::Network(_) | SyncClientError::Timeout(_) | SyncClientError::Status(..)
        )
    }
}

/// Kind of submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenType {
    /// One finished listen
    Single,
    /// Track currently playing; carries no timestamp
    PlayingNow,
    /// Batch of historical listens
    Import,
}

/// Listen to submit
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingListen {
    pub listened_at: Option<DateTime<Utc>>,
    pub track: TrackInfo,
}

/// Listen decoded from the remote history
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteListen {
    pub listened_at: DateTime<Utc>,
    pub track: TrackInfo,
}

/// One page of remote history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListensPage {
    /// Entries that decoded cleanly, in the order the service returned them
    pub listens: Vec<RemoteListen>,
    /// Entries skipped because they could not be decoded
    pub malformed: usize,
    /// Timestamps of skipped entries whose `listened_at` was still readable
    pub malformed_at: Vec<DateTime<Utc>>,
    /// The service returned as many entries as requested
    pub has_more: bool,
}

impl ListensPage {
    /// Oldest and newest timestamp on the page, skipped entries included
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let mut stamps = self
            .listens
            .iter()
            .map(|listen| listen.listened_at)
            .chain(self.malformed_at.iter().copied());

        let first = stamps.next()?;
        Some(stamps.fold((first, first), |(oldest, newest), at| {
            (oldest.min(at), newest.max(at))
        }))
    }
}

/// Remote listen-history service
#[async_trait]
pub trait ListenHistoryClient: Send + Sync {
    async fn submit_listens(
        &self,
        token: &str,
        listen_type: ListenType,
        listens: &[OutgoingListen],
    ) -> Result<(), SyncClientError>;

    /// Listens strictly newer than `since` (all history when absent)
    async fn fetch_listens(
        &self,
        token: &str,
        user_name: &str,
        since: Option<DateTime<Utc>>,
        count: u32,
    ) -> Result<ListensPage, SyncClientError>;

    /// Remote user name owning `token`, or `None` if the token is not valid
    async fn validate_token(&self, token: &str) -> Result<Option<String>, SyncClientError>;
}

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub min_request_interval: Duration,
}

/// Enforces a minimum spacing between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// `reqwest`-based ListenBrainz client
pub struct ListenBrainzClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    base_url: String,
    timeout: Duration,
}

impl ListenBrainzClient {
    pub fn new(settings: ClientSettings) -> Result<Self, SyncClientError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| SyncClientError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(settings.min_request_interval)),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            timeout: settings.timeout,
        })
    }

    fn map_send_error(&self, err: reqwest::Error) -> SyncClientError {
        if err.is_timeout() {
            SyncClientError::Timeout(self.timeout)
        } else {
            SyncClientError::Network(err.to_string())
        }
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<String, SyncClientError> {
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SyncClientError::InvalidToken);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SyncClientError::Status(status.as_u16(), error_text));
        }

        response.text().await.map_err(|e| self.map_send_error(e))
    }
}

#[async_trait]
impl ListenHistoryClient for ListenBrainzClient {
    async fn submit_listens(
        &self,
        token: &str,
        listen_type: ListenType,
        listens: &[OutgoingListen],
    ) -> Result<(), SyncClientError> {
        self.rate_limiter.wait().await;

        let url = format!("{}/1/submit-listens", self.base_url);
        let body = submission_body(listen_type, listens);

        tracing::debug!(url = %url, listen_type = ?listen_type, count = listens.len(), "Submitting listens");

        let response = self
            .http_client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", token))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.read_body(response).await?;
        Ok(())
    }

    async fn fetch_listens(
        &self,
        token: &str,
        user_name: &str,
        since: Option<DateTime<Utc>>,
        count: u32,
    ) -> Result<ListensPage, SyncClientError> {
        self.rate_limiter.wait().await;

        let url = format!("{}/1/user/{}/listens", self.base_url, user_name);
        let mut query = vec![("count", count.to_string())];
        if let Some(since) = since {
            query.push(("min_ts", to_unix_seconds(since).to_string()));
        }

        tracing::debug!(url = %url, since = ?since, count, "Fetching listen history page");

        let response = self
            .http_client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", token))
            .query(&query)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let body = self.read_body(response).await?;
        parse_listens_page(&body, count)
    }

    async fn validate_token(&self, token: &str) -> Result<Option<String>, SyncClientError> {
        self.rate_limiter.wait().await;

        let url = format!("{}/1/validate-token", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", token))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let body = match self.read_body(response).await {
            Err(SyncClientError::InvalidToken) => return Ok(None),
            other => other?,
        };

        parse_token_validation(&body)
    }
}

#[derive(Debug, Serialize)]
struct SubmissionBody<'a> {
    listen_type: ListenType,
    payload: Vec<SubmissionEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct SubmissionEntry<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    listened_at: Option<i64>,
    track_metadata: SubmissionMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct SubmissionMetadata<'a> {
    artist_name: &'a str,
    track_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    release_name: Option<&'a str>,
    additional_info: AdditionalInfo,
}

#[derive(Debug, Serialize)]
struct AdditionalInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    recording_mbid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    submission_client: &'static str,
    submission_client_version: &'static str,
}

/// JSON body of a submission
///
/// `playing_now` entries never carry a timestamp.
pub fn submission_body(listen_type: ListenType, listens: &[OutgoingListen]) -> Value {
    let payload = listens
        .iter()
        .map(|listen| SubmissionEntry {
            listened_at: match listen_type {
                ListenType::PlayingNow => None,
                _ => listen.listened_at.map(to_unix_seconds),
            },
            track_metadata: SubmissionMetadata {
                artist_name: &listen.track.artist_name,
                track_name: &listen.track.title,
                release_name: listen.track.release_name.as_deref(),
                additional_info: AdditionalInfo {
                    recording_mbid: listen.track.recording_mbid.map(|m| m.to_string()),
                    duration_ms: listen
                        .track
                        .duration
                        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                    submission_client: SUBMISSION_CLIENT,
                    submission_client_version: SUBMISSION_CLIENT_VERSION,
                },
            },
        })
        .collect();

    serde_json::to_value(SubmissionBody {
        listen_type,
        payload,
    })
    .unwrap_or(Value::Null)
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    payload: HistoryPayload,
}

#[derive(Debug, Deserialize)]
struct HistoryPayload {
    #[serde(default)]
    listens: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    listened_at: i64,
    track_metadata: HistoryMetadata,
}

#[derive(Debug, Deserialize)]
struct HistoryMetadata {
    artist_name: String,
    track_name: String,
    release_name: Option<String>,
    #[serde(default)]
    additional_info: Option<HistoryAdditionalInfo>,
    #[serde(default)]
    mbid_mapping: Option<MbidMapping>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryAdditionalInfo {
    recording_mbid: Option<String>,
    duration_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MbidMapping {
    recording_mbid: Option<String>,
}

fn decode_entry(raw: Value) -> Result<RemoteListen, String> {
    let entry: HistoryEntry = serde_json::from_value(raw).map_err(|e| e.to_string())?;

    let listened_at = from_unix_seconds(entry.listened_at)
        .ok_or_else(|| format!("timestamp out of range: {}", entry.listened_at))?;

    let metadata = entry.track_metadata;
    let additional = metadata.additional_info.unwrap_or_default();

    // The mapped MBID is authoritative; the submitted one is a fallback
    let raw_mbid = metadata
        .mbid_mapping
        .and_then(|m| m.recording_mbid)
        .or(additional.recording_mbid);
    let recording_mbid = raw_mbid
        .map(|raw| Uuid::parse_str(&raw).map_err(|e| format!("bad recording MBID {}: {}", raw, e)))
        .transpose()?;

    Ok(RemoteListen {
        listened_at,
        track: TrackInfo {
            title: metadata.track_name,
            artist_name: metadata.artist_name,
            release_name: metadata.release_name.filter(|r| !r.is_empty()),
            recording_mbid,
            duration: additional.duration_ms.map(Duration::from_millis),
        },
    })
}

/// Decode a history page body
///
/// The envelope must parse; individual entries are decoded one by one and a
/// broken entry is skipped with a warning instead of failing the page.
pub fn parse_listens_page(body: &str, requested: u32) -> Result<ListensPage, SyncClientError> {
    let response: HistoryResponse =
        serde_json::from_str(body).map_err(|e| SyncClientError::Parse(e.to_string()))?;

    let raw_count = response.payload.listens.len();
    let mut page = ListensPage {
        listens: Vec::with_capacity(raw_count),
        malformed: 0,
        malformed_at: Vec::new(),
        has_more: requested > 0 && raw_count >= requested as usize,
    };

    for (index, raw) in response.payload.listens.into_iter().enumerate() {
        let raw_listened_at = raw
            .get("listened_at")
            .and_then(Value::as_i64)
            .and_then(from_unix_seconds);

        match decode_entry(raw) {
            Ok(listen) => page.listens.push(listen),
            Err(reason) => {
                tracing::warn!(index, reason = %reason, "Skipping malformed history entry");
                page.malformed += 1;
                page.malformed_at.extend(raw_listened_at);
            }
        }
    }

    Ok(page)
}

#[derive(Debug, Deserialize)]
struct TokenValidation {
    valid: bool,
    user_name: Option<String>,
}

fn parse_token_validation(body: &str) -> Result<Option<String>, SyncClientError> {
    let validation: TokenValidation =
        serde_json::from_str(body).map_err(|e| SyncClientError::Parse(e.to_string()))?;

    Ok(if validation.valid {
        validation.user_name
    } else {
        None
    })
}
