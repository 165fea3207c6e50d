use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::ACCEPT;
use http::HeaderMap;
use serde_json::Value;

use super::WebService;
use crate::error::WebError;

type ResponseKey = (String, Option<String>);

/// Web service answering from canned responses.
///
/// Responses are keyed by URI, optionally narrowed by the `Accept` header of
/// the request. Every request is counted, whether it succeeds or not. Used by
/// the tests and for offline demos.
#[derive(Default)]
pub struct InMemoryWebService {
    responses: HashMap<ResponseKey, Bytes>,
    failures: HashMap<String, WebError>,
    latency: Option<Duration>,
    request_counts: Mutex<HashMap<String, usize>>,
}

impl InMemoryWebService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `uri`, whatever the `Accept` header.
    pub fn with_response(mut self, uri: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.responses.insert((uri.into(), None), body.into());
        self
    }

    /// Serve `body` for `uri` when requested with `Accept: accept`.
    pub fn with_response_for(
        mut self,
        uri: impl Into<String>,
        accept: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        self.responses
            .insert((uri.into(), Some(accept.into())), body.into());
        self
    }

    /// Serve a JSON document for `uri`.
    pub fn with_json(self, uri: impl Into<String>, json: &Value) -> Self {
        self.with_response(uri, json.to_string())
    }

    /// Fail every request to `uri` with `error`.
    pub fn with_failure(mut self, uri: impl Into<String>, error: WebError) -> Self {
        self.failures.insert(uri.into(), error);
        self
    }

    /// Delay every answer, so that requests overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of requests received for `uri`.
    pub fn request_count(&self, uri: &str) -> usize {
        self.counts().get(uri).copied().unwrap_or(0)
    }

    /// Number of requests received overall.
    pub fn total_requests(&self) -> usize {
        self.counts().values().sum()
    }

    fn counts(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.request_counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WebService for InMemoryWebService {
    async fn get_binary(&self, uri: &str, headers: &HeaderMap) -> Result<Bytes, WebError> {
        *self.counts().entry(uri.to_string()).or_insert(0) += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.failures.get(uri) {
            return Err(error.clone());
        }

        let accept = headers
            .get(ACCEPT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        accept
            .and_then(|accept| self.responses.get(&(uri.to_string(), Some(accept))))
            .or_else(|| self.responses.get(&(uri.to_string(), None)))
            .cloned()
            .ok_or_else(|| WebError::NotFound(uri.to_string()))
    }

    fn identifier(&self) -> &str {
        "memory"
    }
}
