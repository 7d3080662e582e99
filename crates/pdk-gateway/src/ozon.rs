//! HTTP client for the Ozon seller API.
//!
//! Every request is a JSON call authenticated with the shop's `Client-Id` and
//! `Api-Key` headers. HTTP status >= 400 becomes [`GatewayError::Api`]; a 2xx
//! response that does not list the product as accepted becomes
//! [`GatewayError::Rejected`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use pdk_schemas::{Price, RemoteCampaign};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    GatewayError, GatewayFactory, GatewayResult, MarketplaceGateway, ProductListPage,
    RemoteProductDetails, RemoteProductRef, ShopCredentials,
};

const ERROR_BODY_MAX: usize = 512;
const CAMPAIGN_PRODUCTS_PAGE: u32 = 100;

/// Shared HTTP client plus endpoint settings; hands out shop-bound clients.
#[derive(Debug, Clone)]
pub struct HttpGatewayFactory {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGatewayFactory {
    pub fn new(base_url: &str, timeout: Duration) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl GatewayFactory for HttpGatewayFactory {
    fn for_shop(&self, creds: &ShopCredentials) -> GatewayResult<Arc<dyn MarketplaceGateway>> {
        if creds.client_id.trim().is_empty() || creds.api_key.trim().is_empty() {
            return Err(GatewayError::Rejected(format!(
                "shop {} has empty marketplace credentials",
                creds.shop_id
            )));
        }
        Ok(Arc::new(OzonClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            creds: creds.clone(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct OzonClient {
    http: reqwest::Client,
    base_url: String,
    creds: ShopCredentials,
}

impl OzonClient {
    pub fn new(http: reqwest::Client, base_url: &str, creds: ShopCredentials) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            creds,
        }
    }

    async fn call<B, R>(&self, method: Method, path: &str, body: Option<&B>) -> GatewayResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(shop_id = self.creds.shop_id, %method, path, "marketplace call");

        let mut req = self
            .http
            .request(method, url)
            .header("Client-Id", &self.creds.client_id)
            .header("Api-Key", &self.creds.api_key);
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("{path}: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transport(format!("{path}: body read failed: {e}")))?;

        if status.as_u16() >= 400 {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body: truncate(&text, ERROR_BODY_MAX),
            });
        }

        serde_json::from_str(&text).map_err(|e| GatewayError::Decode(format!("{path}: {e}")))
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> GatewayResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        self.call(Method::POST, path, Some(body)).await
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Marketplace timestamps arrive as RFC 3339 or bare dates; blank means unset.
pub(crate) fn parse_remote_date(raw: &str) -> Option<DateTime<Utc>> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}

fn price_field(raw: &str, remote_id: i64) -> GatewayResult<Price> {
    if raw.trim().is_empty() {
        return Ok(Price::ZERO);
    }
    Price::parse(raw).map_err(|e| GatewayError::Decode(format!("product {remote_id}: {e}")))
}

fn as_wire_number(p: Price) -> f64 {
    p.minor() as f64 / pdk_schemas::MINOR_PER_UNIT as f64
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ListFilter {
    visibility: &'static str,
}

#[derive(Debug, Serialize)]
struct ListRequest<'a> {
    filter: ListFilter,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_id: Option<&'a str>,
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    result: ListResult,
}

#[derive(Debug, Deserialize)]
struct ListResult {
    #[serde(default)]
    items: Vec<ListItem>,
    #[serde(default)]
    last_id: String,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    product_id: i64,
    #[serde(default)]
    offer_id: String,
}

#[derive(Debug, Serialize)]
struct InfoRequest<'a> {
    product_id: &'a [i64],
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(default)]
    items: Option<Vec<InfoItem>>,
    #[serde(default)]
    result: Option<InfoResult>,
}

#[derive(Debug, Deserialize)]
struct InfoResult {
    #[serde(default)]
    items: Vec<InfoItem>,
}

#[derive(Debug, Deserialize)]
struct InfoItem {
    id: i64,
    #[serde(default)]
    offer_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    sku: i64,
    #[serde(default)]
    price: String,
}

#[derive(Debug, Serialize)]
struct PriceItem {
    product_id: i64,
    price: String,
}

#[derive(Debug, Serialize)]
struct PriceRequest {
    prices: Vec<PriceItem>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(default)]
    result: Vec<PriceResult>,
}

#[derive(Debug, Deserialize)]
struct PriceResult {
    #[serde(default)]
    updated: bool,
    #[serde(default)]
    errors: Vec<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ActionsResponse {
    #[serde(default)]
    result: Vec<WireAction>,
}

#[derive(Debug, Deserialize)]
struct WireAction {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    action_type: String,
    #[serde(default)]
    date_start: String,
    #[serde(default)]
    date_end: String,
    #[serde(default)]
    potential_products_count: i32,
    #[serde(default)]
    participating_products_count: i32,
}

impl WireAction {
    fn into_campaign(self) -> RemoteCampaign {
        RemoteCampaign {
            action_id: self.id,
            title: self.title,
            action_type: self.action_type,
            date_start: parse_remote_date(&self.date_start),
            date_end: parse_remote_date(&self.date_end),
            participating_count: self.participating_products_count,
            potential_count: self.potential_products_count,
        }
    }
}

#[derive(Debug, Serialize)]
struct ActivateItem {
    product_id: i64,
    action_price: f64,
}

#[derive(Debug, Serialize)]
struct ActivateRequest {
    action_id: i64,
    products: Vec<ActivateItem>,
}

#[derive(Debug, Serialize)]
struct DeactivateRequest {
    action_id: i64,
    product_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct MembershipResponse {
    result: MembershipResult,
}

#[derive(Debug, Deserialize)]
struct MembershipResult {
    #[serde(default)]
    product_ids: Vec<i64>,
    #[serde(default)]
    rejected: Vec<RejectedItem>,
}

#[derive(Debug, Deserialize)]
struct RejectedItem {
    #[serde(default)]
    product_id: i64,
    #[serde(default)]
    reason: String,
}

impl MembershipResult {
    /// Ok iff `remote_id` is in the accepted list.
    fn require(&self, remote_id: i64, op: &str) -> GatewayResult<()> {
        if self.product_ids.contains(&remote_id) {
            return Ok(());
        }
        let reason = self
            .rejected
            .iter()
            .find(|r| r.product_id == remote_id)
            .map(|r| r.reason.clone())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "product not in accepted list".to_string());
        Err(GatewayError::Rejected(format!("{op} product {remote_id}: {reason}")))
    }
}

#[derive(Debug, Serialize)]
struct ActionProductsRequest {
    action_id: i64,
    limit: u32,
    offset: u32,
}

#[derive(Debug, Deserialize)]
struct ActionProductsResponse {
    result: ActionProductsResult,
}

#[derive(Debug, Deserialize)]
struct ActionProductsResult {
    #[serde(default)]
    products: Vec<ActionProduct>,
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct ActionProduct {
    id: i64,
}

// ---------------------------------------------------------------------------
// Contract impl
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl MarketplaceGateway for OzonClient {
    async fn list_products(&self, cursor: Option<&str>, limit: u32) -> GatewayResult<ProductListPage> {
        let req = ListRequest {
            filter: ListFilter { visibility: "ALL" },
            last_id: cursor.filter(|c| !c.is_empty()),
            limit,
        };
        let resp: ListResponse = self.post("/v2/product/list", &req).await?;
        let next = resp.result.last_id;
        Ok(ProductListPage {
            items: resp
                .result
                .items
                .into_iter()
                .map(|i| RemoteProductRef {
                    remote_product_id: i.product_id,
                    source_sku: i.offer_id,
                })
                .collect(),
            next_cursor: if next.is_empty() { None } else { Some(next) },
        })
    }

    async fn product_details(&self, remote_ids: &[i64]) -> GatewayResult<Vec<RemoteProductDetails>> {
        if remote_ids.is_empty() {
            return Ok(Vec::new());
        }
        let resp: InfoResponse = self
            .post("/v3/product/info/list", &InfoRequest { product_id: remote_ids })
            .await?;
        // v3 answers with top-level `items`; older shapes nest under `result`.
        let items = resp
            .items
            .or(resp.result.map(|r| r.items))
            .unwrap_or_default();

        items
            .into_iter()
            .map(|i| {
                Ok(RemoteProductDetails {
                    remote_product_id: i.id,
                    remote_sku: i.sku,
                    source_sku: i.offer_id,
                    name: i.name,
                    price: price_field(&i.price, i.id)?,
                })
            })
            .collect()
    }

    async fn update_price(&self, remote_id: i64, new_price: Price) -> GatewayResult<()> {
        let req = PriceRequest {
            prices: vec![PriceItem {
                product_id: remote_id,
                price: new_price.to_string(),
            }],
        };
        let resp: PriceResponse = self.post("/v1/product/import/prices", &req).await?;
        match resp.result.first() {
            Some(r) if !r.updated => {
                let reason = r
                    .errors
                    .first()
                    .map(|e| {
                        if e.message.is_empty() {
                            e.code.clone()
                        } else {
                            e.message.clone()
                        }
                    })
                    .unwrap_or_else(|| "unknown reason".to_string());
                Err(GatewayError::Rejected(format!("price update failed: {reason}")))
            }
            _ => Ok(()),
        }
    }

    async fn list_campaigns(&self) -> GatewayResult<Vec<RemoteCampaign>> {
        let resp: ActionsResponse = self
            .call::<(), _>(Method::GET, "/v1/actions", None)
            .await?;
        Ok(resp.result.into_iter().map(WireAction::into_campaign).collect())
    }

    async fn enroll_product(&self, action_id: i64, remote_id: i64, action_price: Price) -> GatewayResult<()> {
        let req = ActivateRequest {
            action_id,
            products: vec![ActivateItem {
                product_id: remote_id,
                action_price: as_wire_number(action_price),
            }],
        };
        let resp: MembershipResponse = self.post("/v1/actions/products/activate", &req).await?;
        resp.result.require(remote_id, "activate")
    }

    async fn remove_product(&self, action_id: i64, remote_id: i64) -> GatewayResult<()> {
        let req = DeactivateRequest {
            action_id,
            product_ids: vec![remote_id],
        };
        let resp: MembershipResponse = self.post("/v1/actions/products/deactivate", &req).await?;
        resp.result.require(remote_id, "deactivate")
    }

    async fn campaign_products(&self, action_id: i64) -> GatewayResult<Vec<i64>> {
        let mut out = Vec::new();
        let mut offset = 0u32;
        loop {
            let req = ActionProductsRequest {
                action_id,
                limit: CAMPAIGN_PRODUCTS_PAGE,
                offset,
            };
            let resp: ActionProductsResponse = self.post("/v1/actions/products", &req).await?;
            let n = u32::try_from(resp.result.products.len()).unwrap_or(u32::MAX);
            out.extend(resp.result.products.into_iter().map(|p| p.id));
            offset = offset.saturating_add(n);
            if n < CAMPAIGN_PRODUCTS_PAGE || (resp.result.total > 0 && offset >= resp.result.total) {
                break;
            }
        }
        Ok(out)
    }
}
