use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::WebError;

/// Answer of `/system`, used to check connectivity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub api_version: Option<u32>,
    #[serde(rename = "DicomAet", default)]
    pub dicom_aet: Option<String>,
}

/// Trait for fetching resources from the Orthanc REST API.
///
/// URIs are relative to the server root (`/series/{id}/instances-tags`).
/// Implementations must be thread-safe: requests are issued from spawned
/// tasks.
#[async_trait]
pub trait WebService: Send + Sync {
    /// GET `uri` with extra request `headers` and return the raw body.
    async fn get_binary(&self, uri: &str, headers: &HeaderMap) -> Result<Bytes, WebError>;

    /// GET `uri` and parse the body as JSON.
    async fn get_json(&self, uri: &str) -> Result<Value, WebError> {
        let body = self.get_binary(uri, &HeaderMap::new()).await?;
        serde_json::from_slice(&body).map_err(|e| WebError::InvalidBody {
            uri: uri.to_string(),
            message: e.to_string(),
        })
    }

    /// Name and version of the server.
    async fn get_system(&self) -> Result<SystemInfo, WebError> {
        let json = self.get_json("/system").await?;
        serde_json::from_value(json).map_err(|e| WebError::InvalidBody {
            uri: "/system".to_string(),
            message: e.to_string(),
        })
    }

    /// Identifier of the remote server (for logging).
    fn identifier(&self) -> &str;
}
