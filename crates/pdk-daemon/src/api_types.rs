//! Request and response types for pdk-daemon endpoints that have no
//! counterpart in `pdk-reconcile`.
//!
//! Workflow requests and reports are the engine's own types; only the small
//! envelopes live here.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    /// True when workflow invocations are written to an operation log.
    pub operation_log: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response produced by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable tag, e.g. "shop_not_found" | "invalid_input" | "store_failure".
    pub kind: String,
}

// ---------------------------------------------------------------------------
// Shop-scoped bodies and queries
// ---------------------------------------------------------------------------

/// Body for shop-wide operations (`sync-actions`, `sweep-pending`, `products/sync`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopBody {
    pub shop_id: i64,
}

/// `?shop_id=` query string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopQuery {
    pub shop_id: i64,
}

/// Response for disable / delete of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionChangeResponse {
    pub shop_id: i64,
    pub action_id: i64,
    /// "disabled" | "deleted"
    pub result: String,
}
