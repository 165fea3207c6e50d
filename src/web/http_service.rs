use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use super::WebService;
use crate::error::WebError;

/// HTTP client for a live Orthanc server.
///
/// Relative URIs are resolved against the base URL, which may include a path
/// prefix when Orthanc sits behind a reverse proxy
/// (`https://pacs.example.org/orthanc/`).
#[derive(Clone)]
pub struct OrthancHttpService {
    client: Client,
    base_url: Url,
    credentials: Option<(String, Option<String>)>,
    identifier: String,
}

impl OrthancHttpService {
    /// Create a client for the server at `base_url`.
    ///
    /// # Arguments
    /// * `base_url` - Root of the Orthanc REST API
    /// * `username` / `password` - HTTP basic credentials, if any
    /// * `timeout` - Timeout applied to every request
    pub fn new(
        base_url: &str,
        username: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self, WebError> {
        let mut url =
            Url::parse(base_url).map_err(|e| WebError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        // Joining replaces the last path segment unless the base ends with '/'
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WebError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            identifier: url.as_str().trim_end_matches('/').to_string(),
            base_url: url,
            credentials: username.map(|user| (user, password)),
        })
    }

    /// Absolute URL of a relative Orthanc URI.
    pub fn resolve(&self, uri: &str) -> Result<Url, WebError> {
        self.base_url
            .join(uri.trim_start_matches('/'))
            .map_err(|e| WebError::InvalidUrl(format!("{}: {}", uri, e)))
    }
}

#[async_trait]
impl WebService for OrthancHttpService {
    async fn get_binary(&self, uri: &str, headers: &HeaderMap) -> Result<Bytes, WebError> {
        let url = self.resolve(uri)?;
        debug!("GET {}", url);

        let mut request = self.client.get(url).headers(headers.clone());
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| WebError::Connection(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .bytes()
                .await
                .map_err(|e| WebError::Connection(e.to_string())),
            StatusCode::NOT_FOUND => Err(WebError::NotFound(uri.to_string())),
            status => Err(WebError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
