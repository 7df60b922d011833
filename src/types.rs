//! Core types used throughout OptionSync
//!
//! Defines the session key, option-chain dataset, analytics aggregate and
//! the persisted session record.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::SyncError;

/// Date format accepted for expiries (matches the dashboard date picker)
pub const EXPIRY_FORMAT: &str = "%Y-%m-%d";

/// Identifies the dataset being polled: whose token and which expiry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user: String,
    pub expiry: String,
}

impl SessionKey {
    /// Build a validated key. Blank users and non-date expiries are rejected.
    pub fn parse(user: impl Into<String>, expiry: impl Into<String>) -> Result<Self, SyncError> {
        let user = user.into().trim().to_string();
        let expiry = expiry.into().trim().to_string();

        if user.is_empty() {
            return Err(SyncError::InvalidKey("user is required".to_string()));
        }
        if expiry.is_empty() {
            return Err(SyncError::InvalidKey("expiry is required".to_string()));
        }
        if NaiveDate::parse_from_str(&expiry, EXPIRY_FORMAT).is_err() {
            return Err(SyncError::InvalidKey(format!(
                "expiry '{}' is not a YYYY-MM-DD date",
                expiry
            )));
        }

        Ok(Self { user, expiry })
    }

    /// Whether a key (typically one restored from disk) is usable for fetching
    pub fn is_valid(&self) -> bool {
        Self::parse(self.user.as_str(), self.expiry.as_str()).is_ok()
    }

    /// Query parameters shared by every server endpoint
    pub fn query(&self) -> [(&'static str, &str); 2] {
        [("user", self.user.as_str()), ("expiry", self.expiry.as_str())]
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.expiry)
    }
}

/// One strike of the option chain. The schema belongs to the server.
pub type StrikeRow = serde_json::Map<String, serde_json::Value>;

/// Ordered option-chain rows, one per strike
pub type PrimaryDataset = Vec<StrikeRow>;

/// Body of `GET /option-chain`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionChainResponse {
    #[serde(default)]
    pub strikes: PrimaryDataset,
}

/// The fixed set of derived-analytics resources fetched as a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnalyticModule {
    #[serde(rename = "bias")]
    Bias,
    #[serde(rename = "style")]
    Style,
    #[serde(rename = "reversal")]
    Reversal,
    #[serde(rename = "trap")]
    Trap,
    #[serde(rename = "sr")]
    SupportResistance,
    #[serde(rename = "entry")]
    Entry,
}

impl AnalyticModule {
    pub const ALL: [AnalyticModule; 6] = [
        AnalyticModule::Bias,
        AnalyticModule::Style,
        AnalyticModule::Reversal,
        AnalyticModule::Trap,
        AnalyticModule::SupportResistance,
        AnalyticModule::Entry,
    ];

    /// Server path serving this module
    pub fn endpoint(&self) -> &'static str {
        match self {
            AnalyticModule::Bias => "/bias-identifier",
            AnalyticModule::Style => "/market-style-identifier",
            AnalyticModule::Reversal => "/reversal-probability-finder",
            AnalyticModule::Trap => "/trap-detector",
            AnalyticModule::SupportResistance => "/support-resistance-guard",
            AnalyticModule::Entry => "/entry-logic-engine",
        }
    }

    /// Key used for this module in the aggregate
    pub fn key(&self) -> &'static str {
        match self {
            AnalyticModule::Bias => "bias",
            AnalyticModule::Style => "style",
            AnalyticModule::Reversal => "reversal",
            AnalyticModule::Trap => "trap",
            AnalyticModule::SupportResistance => "sr",
            AnalyticModule::Entry => "entry",
        }
    }
}

impl fmt::Display for AnalyticModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Latest result per analytic module. A module without an entry is absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateResult {
    modules: BTreeMap<AnalyticModule, serde_json::Value>,
}

impl AggregateResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, module: AnalyticModule, value: serde_json::Value) {
        self.modules.insert(module, value);
    }

    pub fn get(&self, module: AnalyticModule) -> Option<&serde_json::Value> {
        self.modules.get(&module)
    }

    pub fn is_present(&self, module: AnalyticModule) -> bool {
        self.modules.contains_key(&module)
    }

    /// Modules with a value
    pub fn populated(&self) -> Vec<AnalyticModule> {
        self.modules.keys().copied().collect()
    }

    /// Modules without a value
    pub fn absent(&self) -> Vec<AnalyticModule> {
        AnalyticModule::ALL
            .iter()
            .copied()
            .filter(|m| !self.modules.contains_key(m))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Unit of persistence and restoration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    pub key: Option<SessionKey>,
    #[serde(default)]
    pub polling: bool,
    #[serde(default)]
    pub dataset: PrimaryDataset,
    #[serde(default)]
    pub aggregate: AggregateResult,
    /// The dataset changed and its aggregate has not been stored yet
    #[serde(default)]
    pub analytics_pending: bool,
    /// Last save time in unix millis (informational)
    #[serde(default)]
    pub saved_at: i64,
}

impl SessionRecord {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The key, if present and usable for fetching
    pub fn valid_key(&self) -> Option<&SessionKey> {
        self.key.as_ref().filter(|k| k.is_valid())
    }

    /// Polling is only meaningful with a valid key
    pub fn should_resume(&self) -> bool {
        self.polling && self.valid_key().is_some()
    }

    /// Drop the cached dataset and aggregate, keeping key and polling flag
    pub fn clear_data(&mut self) {
        self.dataset.clear();
        self.aggregate = AggregateResult::default();
        self.analytics_pending = false;
    }
}
