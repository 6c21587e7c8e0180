//! Sync Client: the extension's view of the Sync API.
//!
//! Every call is bounded by a timeout and cancelled when it runs out, so a hung
//! network never holds up the local path.

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

use crate::api::{CreateHighlightRequest, DeletedResponse};
use crate::config;
use crate::error::NetworkError;
use crate::model::Highlight;

#[derive(Debug, Clone)]
pub struct SyncClient {
    http: Client,
    base_url: String,
    write_timeout: Duration,
    read_timeout: Duration,
}

impl SyncClient {
    pub fn new(base_url: &str, write_timeout: Duration, read_timeout: Duration) -> Self {
        SyncClient {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            write_timeout,
            read_timeout,
        }
    }

    /// `None` when no API base url is configured; the extension then runs offline only.
    pub fn from_config(cfg: &config::Client) -> Option<Self> {
        cfg.api_base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .map(|url| SyncClient::new(url, cfg.write_timeout(), cfg.read_timeout()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub async fn create(&self, highlight: &Highlight) -> Result<Highlight, NetworkError> {
        let body = CreateHighlightRequest {
            user_id: Some(highlight.user_id.clone()),
            url: Some(highlight.url.clone()),
            text: Some(highlight.text.clone()),
            color: Some(highlight.color.as_str().to_string()),
        };
        let request = self
            .http
            .post(format!("{}/highlights", self.base_url))
            .json(&body)
            .send();

        let response = bounded(self.write_timeout, request).await?;
        decode(response).await
    }

    pub async fn list(&self, user_id: &str, url: &str) -> Result<Vec<Highlight>, NetworkError> {
        let request = self
            .http
            .get(format!("{}/highlights", self.base_url))
            .query(&[("userId", user_id), ("url", url)])
            .send();

        let response = bounded(self.read_timeout, request).await?;
        decode(response).await
    }

    pub async fn delete(&self, store_id: &str) -> Result<DeletedResponse, NetworkError> {
        let request = self
            .http
            .delete(format!(
                "{}/highlights/{}",
                self.base_url,
                urlencoding::encode(store_id)
            ))
            .send();

        let response = bounded(self.write_timeout, request).await?;
        decode(response).await
    }
}

/// Runs `fut`, giving up after `limit`.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, NetworkError>
where
    F: Future<Output = Result<T, reqwest::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(NetworkError::Timeout(limit.as_millis())),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, NetworkError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(NetworkError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<T>().await?)
}
