//! Analytics server client
//!
//! The orchestrator talks to the server only through [`AnalyticsApi`], so
//! tests can substitute scripted implementations.

mod http;

pub use http::HttpAnalyticsClient;

use crate::error::SyncError;
use crate::types::{AnalyticModule, PrimaryDataset, SessionKey};
use async_trait::async_trait;

/// Server endpoints consumed by the orchestrator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalyticsApi: Send + Sync {
    /// `GET /option-chain?user=&expiry=`
    async fn fetch_option_chain(&self, key: &SessionKey) -> Result<PrimaryDataset, SyncError>;

    /// `GET /<module endpoint>?user=&expiry=`
    async fn fetch_module(
        &self,
        key: &SessionKey,
        module: AnalyticModule,
    ) -> Result<serde_json::Value, SyncError>;

    /// `POST /clear-analytics?user=&expiry=`
    async fn clear_analytics(&self, key: &SessionKey) -> Result<(), SyncError>;
}
