//! Scripted in-process listen-history service

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scrobsync::models::TrackInfo;
use scrobsync::services::{
    ListenHistoryClient, ListenType, ListensPage, OutgoingListen, RemoteListen, SyncClientError,
};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct FakeState {
    /// Remote history, any order; `None` marks an entry that fails to decode
    history: Vec<(DateTime<Utc>, Option<RemoteListen>)>,
    user_name: Option<String>,
    /// Fetch call numbers (1-based) that fail with a network error
    failing_fetches: Vec<usize>,
    fetch_calls: usize,
    fetch_delay: Option<Duration>,
    /// Next N submissions fail with 503
    submit_failures: usize,
    submit_calls: usize,
    submissions: Vec<(ListenType, Vec<OutgoingListen>)>,
}

pub struct FakeListenHistoryClient {
    state: Mutex<FakeState>,
}

impl FakeListenHistoryClient {
    /// Service accepting every token as `user_name`
    pub fn new(user_name: &str) -> Self {
        Self {
            state: Mutex::new(FakeState {
                user_name: Some(user_name.to_string()),
                ..Default::default()
            }),
        }
    }

    /// Service rejecting every token
    pub fn rejecting_tokens() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn add_remote_listen(&self, listened_at: DateTime<Utc>, title: &str, artist: &str) {
        let listen = RemoteListen {
            listened_at,
            track: TrackInfo {
                title: title.to_string(),
                artist_name: artist.to_string(),
                release_name: None,
                recording_mbid: None,
                duration: None,
            },
        };
        self.state.lock().unwrap().history.push((listened_at, Some(listen)));
    }

    /// Entry that the service returns but that fails to decode (bad MBID)
    pub fn add_malformed_listen(&self, listened_at: DateTime<Utc>) {
        self.state.lock().unwrap().history.push((listened_at, None));
    }

    pub fn fail_fetch_call(&self, call: usize) {
        self.state.lock().unwrap().failing_fetches.push(call);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state.lock().unwrap().fetch_delay = Some(delay);
    }

    pub fn fail_next_submits(&self, count: usize) {
        self.state.lock().unwrap().submit_failures = count;
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().unwrap().fetch_calls
    }

    pub fn submit_calls(&self) -> usize {
        self.state.lock().unwrap().submit_calls
    }

    /// Successful submissions in arrival order
    pub fn submissions(&self) -> Vec<(ListenType, Vec<OutgoingListen>)> {
        self.state.lock().unwrap().submissions.clone()
    }

    /// Titles of successfully submitted single listens, in arrival order
    pub fn submitted_titles(&self) -> Vec<String> {
        self.submissions()
            .into_iter()
            .filter(|(kind, _)| *kind == ListenType::Single)
            .flat_map(|(_, listens)| listens.into_iter().map(|l| l.track.title))
            .collect()
    }
}

#[async_trait]
impl ListenHistoryClient for FakeListenHistoryClient {
    async fn submit_listens(
        &self,
        _token: &str,
        listen_type: ListenType,
        listens: &[OutgoingListen],
    ) -> Result<(), SyncClientError> {
        let mut state = self.state.lock().unwrap();
        state.submit_calls += 1;

        if state.submit_failures > 0 {
            state.submit_failures -= 1;
            return Err(SyncClientError::Status(503, "unavailable".to_string()));
        }

        state.submissions.push((listen_type, listens.to_vec()));
        Ok(())
    }

    async fn fetch_listens(
        &self,
        _token: &str,
        _user_name: &str,
        since: Option<DateTime<Utc>>,
        count: u32,
    ) -> Result<ListensPage, SyncClientError> {
        let (delay, result) = {
            let mut state = self.state.lock().unwrap();
            state.fetch_calls += 1;

            let result = if state.failing_fetches.contains(&state.fetch_calls) {
                Err(SyncClientError::Network("connection reset".to_string()))
            } else {
                // Oldest `count` entries strictly newer than `since`, newest first
                let mut newer: Vec<(DateTime<Utc>, Option<RemoteListen>)> = state
                    .history
                    .iter()
                    .filter(|(at, _)| since.map_or(true, |s| *at > s))
                    .cloned()
                    .collect();
                newer.sort_by_key(|(at, _)| *at);
                newer.truncate(count as usize);
                newer.reverse();

                let mut page = ListensPage {
                    has_more: newer.len() == count as usize,
                    ..Default::default()
                };
                for (at, entry) in newer {
                    match entry {
                        Some(listen) => page.listens.push(listen),
                        None => {
                            page.malformed += 1;
                            page.malformed_at.push(at);
                        }
                    }
                }
                Ok(page)
            };

            (state.fetch_delay, result)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn validate_token(&self, _token: &str) -> Result<Option<String>, SyncClientError> {
        Ok(self.state.lock().unwrap().user_name.clone())
    }
}
