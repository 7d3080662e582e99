//! Marketplace gateway contract.
//!
//! Every remote operation the reconciliation engine performs goes through
//! [`MarketplaceGateway`]. One gateway instance is bound to one shop's
//! credentials; [`GatewayFactory`] builds it from the credentials stored in
//! the mirror.
//!
//! Implementations:
//! - [`ozon::OzonClient`]: HTTP client for the seller API.
//! - `pdk-market-paper::PaperMarketplace`: deterministic in-memory double.
//!
//! Transport failures and API-level error payloads are both surfaced as
//! [`GatewayError`]; callers treat every variant as "this item failed".

use std::sync::Arc;

use pdk_schemas::{Price, RemoteCampaign};
use serde::{Deserialize, Serialize};

pub mod ozon;

pub use ozon::{HttpGatewayFactory, OzonClient};

/// Page size used by catalog sync when listing products.
pub const LIST_PAGE_LIMIT: u32 = 1000;

/// Maximum ids per product-details request.
pub const DETAILS_BATCH: usize = 100;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Connection, TLS, timeout or body read failure.
    Transport(String),
    /// HTTP status >= 400. `body` is truncated.
    Api { status: u16, body: String },
    /// 2xx response that did not accept the item.
    Rejected(String),
    /// 2xx response whose body could not be decoded.
    Decode(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Transport(m) => write!(f, "transport error: {m}"),
            GatewayError::Api { status, body } => write!(f, "API error (status {status}): {body}"),
            GatewayError::Rejected(m) => write!(f, "rejected: {m}"),
            GatewayError::Decode(m) => write!(f, "decode error: {m}"),
        }
    }
}

impl std::error::Error for GatewayError {}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

// ---------------------------------------------------------------------------
// Wire-neutral types
// ---------------------------------------------------------------------------

/// Credentials for one shop. The API key is redacted in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct ShopCredentials {
    pub shop_id: i64,
    pub client_id: String,
    pub api_key: String,
}

impl std::fmt::Debug for ShopCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopCredentials")
            .field("shop_id", &self.shop_id)
            .field("client_id", &self.client_id)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProductRef {
    pub remote_product_id: i64,
    pub source_sku: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductListPage {
    pub items: Vec<RemoteProductRef>,
    /// Opaque cursor for the next page; `None` or empty when exhausted.
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProductDetails {
    pub remote_product_id: i64,
    pub remote_sku: i64,
    pub source_sku: String,
    pub name: String,
    pub price: Price,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait MarketplaceGateway: Send + Sync {
    async fn list_products(&self, cursor: Option<&str>, limit: u32) -> GatewayResult<ProductListPage>;

    async fn product_details(&self, remote_ids: &[i64]) -> GatewayResult<Vec<RemoteProductDetails>>;

    async fn update_price(&self, remote_id: i64, new_price: Price) -> GatewayResult<()>;

    async fn list_campaigns(&self) -> GatewayResult<Vec<RemoteCampaign>>;

    async fn enroll_product(&self, action_id: i64, remote_id: i64, action_price: Price) -> GatewayResult<()>;

    async fn remove_product(&self, action_id: i64, remote_id: i64) -> GatewayResult<()>;

    /// Remote ids currently participating in `action_id`. Used by the
    /// pending-enrollment sweep.
    async fn campaign_products(&self, action_id: i64) -> GatewayResult<Vec<i64>>;
}

/// Builds a shop-bound gateway.
pub trait GatewayFactory: Send + Sync {
    fn for_shop(&self, creds: &ShopCredentials) -> GatewayResult<Arc<dyn MarketplaceGateway>>;
}
