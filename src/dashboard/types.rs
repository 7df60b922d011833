//! Dashboard API Types
//!
//! DTOs for HTTP/WebSocket communication with the browser dashboard.

use serde::{Deserialize, Serialize};

use crate::sync::{SyncEvent, SyncSnapshot};

/// Body of start/key/clear requests
#[derive(Debug, Clone, Deserialize)]
pub struct KeyRequest {
    pub user: String,
    pub expiry: String,
}

// ─────────────────────────────────────────────────────────────────
// WebSocket Message Types
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// Full session state (sent on connect)
    FullState(SyncSnapshot),
    /// Incremental change
    Update(SyncEvent),
}

// ─────────────────────────────────────────────────────────────────
// API Response Wrapper
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
