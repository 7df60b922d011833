//! reqwest implementation of the analytics server contract

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::AnalyticsApi;
use crate::error::SyncError;
use crate::types::{AnalyticModule, OptionChainResponse, PrimaryDataset, SessionKey};

const OPTION_CHAIN_PATH: &str = "/option-chain";
const CLEAR_ANALYTICS_PATH: &str = "/clear-analytics";

/// HTTP client for the analytics server
#[derive(Debug, Clone)]
pub struct HttpAnalyticsClient {
    client: Client,
    base_url: String,
}

impl HttpAnalyticsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SyncError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &SessionKey,
    ) -> Result<T, SyncError> {
        let response = self
            .client
            .get(self.url(path))
            .query(&key.query())
            .send()
            .await
            .map_err(|source| SyncError::Transport {
                endpoint: path.to_string(),
                source,
            })?;

        let response = check_status(path, response).await?;

        response.json::<T>().await.map_err(|e| SyncError::Decode {
            endpoint: path.to_string(),
            message: e.to_string(),
        })
    }
}

async fn check_status(path: &str, response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(endpoint = path, status = status.as_u16(), body = %body, "Analytics server error");
    Err(SyncError::Status {
        endpoint: path.to_string(),
        status: status.as_u16(),
    })
}

#[async_trait]
impl AnalyticsApi for HttpAnalyticsClient {
    async fn fetch_option_chain(&self, key: &SessionKey) -> Result<PrimaryDataset, SyncError> {
        let body: OptionChainResponse = self.get_json(OPTION_CHAIN_PATH, key).await?;
        debug!(key = %key, strikes = body.strikes.len(), "Fetched option chain");
        Ok(body.strikes)
    }

    async fn fetch_module(
        &self,
        key: &SessionKey,
        module: AnalyticModule,
    ) -> Result<serde_json::Value, SyncError> {
        self.get_json(module.endpoint(), key).await
    }

    async fn clear_analytics(&self, key: &SessionKey) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.url(CLEAR_ANALYTICS_PATH))
            .query(&key.query())
            .send()
            .await
            .map_err(|source| SyncError::Transport {
                endpoint: CLEAR_ANALYTICS_PATH.to_string(),
                source,
            })?;

        check_status(CLEAR_ANALYTICS_PATH, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpAnalyticsClient::new("http://localhost:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(
            client.url(OPTION_CHAIN_PATH),
            "http://localhost:8000/option-chain"
        );
    }

    #[test]
    fn test_client_builds_with_timeout() {
        assert!(HttpAnalyticsClient::new("http://analytics", Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_module_urls() {
        let client = HttpAnalyticsClient::new("http://analytics", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.url(AnalyticModule::SupportResistance.endpoint()),
            "http://analytics/support-resistance-guard"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let client =
            HttpAnalyticsClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let key = SessionKey::parse("emperor", "2025-01-30").unwrap();

        let err = client.fetch_option_chain(&key).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.endpoint(), Some(OPTION_CHAIN_PATH));
    }
}
