//! Aggregate Fetcher - concurrent fan-out to the analytic modules
//!
//! Every module is requested at once and failures are isolated per module:
//! a failed module is simply absent from the result. The caller replaces the
//! previous aggregate wholesale, so a module that fails this round reverts to
//! absent even if it had a value before.

use futures_util::future::join_all;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

use super::events::SyncEvent;
use super::SyncInner;
use crate::client::AnalyticsApi;
use crate::types::{AggregateResult, AnalyticModule, SessionKey};

/// Modules that failed in an otherwise completed fan-out. Informational only.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialAggregateFailure {
    pub failed: Vec<(AnalyticModule, String)>,
}

impl PartialAggregateFailure {
    pub fn modules(&self) -> Vec<AnalyticModule> {
        self.failed.iter().map(|(m, _)| *m).collect()
    }
}

/// Result of one fan-out
#[derive(Debug, Clone)]
pub struct AggregateFetch {
    pub result: AggregateResult,
    pub failure: Option<PartialAggregateFailure>,
}

/// Request every analytic module concurrently and collect what succeeded
pub async fn fetch_aggregate(api: &dyn AnalyticsApi, key: &SessionKey) -> AggregateFetch {
    let requests = AnalyticModule::ALL.iter().map(|&module| async move {
        let response = api.fetch_module(key, module).await;
        (module, response)
    });

    let mut result = AggregateResult::new();
    let mut failed = Vec::new();

    for (module, response) in join_all(requests).await {
        match response {
            Ok(value) => result.insert(module, value),
            Err(e) => {
                warn!(module = %module, key = %key, error = %e, "Analytic module fetch failed");
                failed.push((module, e.to_string()));
            }
        }
    }

    AggregateFetch {
        result,
        failure: if failed.is_empty() {
            None
        } else {
            Some(PartialAggregateFailure { failed })
        },
    }
}

impl SyncInner {
    /// Fetch the aggregate for `key` and store it if `generation` is still current.
    ///
    /// Returns the stored aggregate, or `None` when the result was discarded.
    /// A discarded result leaves `analytics_pending` set on the record.
    pub(crate) async fn refresh_aggregate(
        &self,
        key: &SessionKey,
        generation: u64,
    ) -> Option<AggregateResult> {
        let fetch = fetch_aggregate(self.api.as_ref(), key).await;
        self.aggregate_fetches.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write().await;
        if !self.is_current(generation) || state.record.key.as_ref() != Some(key) {
            debug!(key = %key, generation, "Discarding stale aggregate");
            return None;
        }

        match &fetch.failure {
            None => info!(key = %key, modules = fetch.result.len(), "📊 Analytics updated"),
            Some(failure) => info!(
                key = %key,
                modules = fetch.result.len(),
                failed = ?failure.modules(),
                "📊 Analytics partially updated"
            ),
        }

        state.record.aggregate = fetch.result.clone();
        state.record.analytics_pending = false;
        self.persist(&mut state);
        drop(state);

        self.events.send(SyncEvent::AggregateUpdated(fetch.result.clone()));
        Some(fetch.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockAnalyticsApi;
    use crate::error::SyncError;
    use serde_json::json;

    fn key() -> SessionKey {
        SessionKey::parse("emperor", "2025-01-30").unwrap()
    }

    #[tokio::test]
    async fn test_all_modules_succeed() {
        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_module()
            .times(6)
            .returning(|_, module| Ok(json!({ "module": module.key() })));

        let fetch = fetch_aggregate(&api, &key()).await;
        assert!(fetch.failure.is_none());
        assert_eq!(fetch.result.len(), 6);
        assert_eq!(
            fetch.result.get(AnalyticModule::SupportResistance),
            Some(&json!({"module": "sr"}))
        );
    }

    #[tokio::test]
    async fn test_one_failed_module_is_absent() {
        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_module().times(6).returning(|_, module| {
            if module == AnalyticModule::Trap {
                Err(SyncError::Status {
                    endpoint: module.endpoint().to_string(),
                    status: 500,
                })
            } else {
                Ok(json!(1))
            }
        });

        let fetch = fetch_aggregate(&api, &key()).await;
        assert_eq!(fetch.result.len(), 5);
        assert_eq!(fetch.result.absent(), vec![AnalyticModule::Trap]);

        let failure = fetch.failure.expect("partial failure expected");
        assert_eq!(failure.modules(), vec![AnalyticModule::Trap]);
        assert!(failure.failed[0].1.contains("500"));
    }

    #[tokio::test]
    async fn test_all_modules_fail_yields_empty_aggregate() {
        let mut api = MockAnalyticsApi::new();
        api.expect_fetch_module().returning(|_, module| {
            Err(SyncError::Decode {
                endpoint: module.endpoint().to_string(),
                message: "expected value".to_string(),
            })
        });

        let fetch = fetch_aggregate(&api, &key()).await;
        assert!(fetch.result.is_empty());
        assert_eq!(fetch.failure.unwrap().failed.len(), 6);
    }
}
