//! Deterministic in-memory marketplace.
//!
//! Implements the gateway contract without any network:
//! - Catalog, campaigns and campaign membership live in `BTreeMap`s, so
//!   listing order is stable.
//! - Failures are injected per call target (`fail_enroll(action, remote)`,
//!   `fail_remove(..)`, `fail_price(remote)`, ...). An injected failure
//!   leaves state untouched.
//! - Every call is appended to a call log so tests can assert exactly which
//!   remote operations a workflow issued.
//! - An optional per-call delay yields to the runtime, which lets tests
//!   interleave concurrent workflows.
//!
//! The same instance doubles as its own [`GatewayFactory`]: every shop gets
//! a handle on the same state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pdk_gateway::{
    GatewayError, GatewayFactory, GatewayResult, MarketplaceGateway, ProductListPage,
    RemoteProductDetails, RemoteProductRef, ShopCredentials,
};
use pdk_schemas::{Price, RemoteCampaign};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaperCall {
    ListProducts { cursor: Option<String> },
    ProductDetails { remote_ids: Vec<i64> },
    UpdatePrice { remote_id: i64, price: Price },
    ListCampaigns,
    Enroll { action_id: i64, remote_id: i64, price: Price },
    Remove { action_id: i64, remote_id: i64 },
    CampaignProducts { action_id: i64 },
}

#[derive(Debug, Clone, Default)]
struct PaperState {
    products: BTreeMap<i64, RemoteProductDetails>,
    campaigns: BTreeMap<i64, RemoteCampaign>,
    /// action_id -> remote_id -> action price
    members: BTreeMap<i64, BTreeMap<i64, Price>>,

    fail_enroll: BTreeSet<(i64, i64)>,
    fail_remove: BTreeSet<(i64, i64)>,
    fail_price: BTreeSet<i64>,
    fail_campaign_products: BTreeSet<i64>,
    fail_list_campaigns: bool,
    fail_details: bool,

    delay: Option<Duration>,
    calls: Vec<PaperCall>,
}

#[derive(Debug, Clone, Default)]
pub struct PaperMarketplace {
    state: Arc<Mutex<PaperState>>,
}

impl PaperMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        // A panicking test thread must not cascade into every other handle.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- setup -------------------------------------------------------------

    pub fn add_product(&self, remote_id: i64, source_sku: &str, name: &str, price: Price) {
        self.lock().products.insert(
            remote_id,
            RemoteProductDetails {
                remote_product_id: remote_id,
                remote_sku: remote_id + 100_000,
                source_sku: source_sku.to_string(),
                name: name.to_string(),
                price,
            },
        );
    }

    pub fn add_campaign(&self, action_id: i64, title: &str, action_type: &str) {
        self.lock().campaigns.insert(
            action_id,
            RemoteCampaign {
                action_id,
                title: title.to_string(),
                action_type: action_type.to_string(),
                date_start: None,
                date_end: None,
                participating_count: 0,
                potential_count: 0,
            },
        );
    }

    pub fn remove_campaign(&self, action_id: i64) {
        let mut st = self.lock();
        st.campaigns.remove(&action_id);
        st.members.remove(&action_id);
    }

    /// Put a product into a campaign without logging a call.
    pub fn add_member(&self, action_id: i64, remote_id: i64, price: Price) {
        self.lock()
            .members
            .entry(action_id)
            .or_default()
            .insert(remote_id, price);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    // -- failure injection ---------------------------------------------------

    pub fn fail_enroll(&self, action_id: i64, remote_id: i64) {
        self.lock().fail_enroll.insert((action_id, remote_id));
    }

    pub fn fail_remove(&self, action_id: i64, remote_id: i64) {
        self.lock().fail_remove.insert((action_id, remote_id));
    }

    pub fn fail_price(&self, remote_id: i64) {
        self.lock().fail_price.insert(remote_id);
    }

    pub fn fail_campaign_products(&self, action_id: i64) {
        self.lock().fail_campaign_products.insert(action_id);
    }

    pub fn fail_list_campaigns(&self, fail: bool) {
        self.lock().fail_list_campaigns = fail;
    }

    pub fn fail_details(&self, fail: bool) {
        self.lock().fail_details = fail;
    }

    pub fn clear_failures(&self) {
        let mut st = self.lock();
        st.fail_enroll.clear();
        st.fail_remove.clear();
        st.fail_price.clear();
        st.fail_campaign_products.clear();
        st.fail_list_campaigns = false;
        st.fail_details = false;
    }

    // -- inspection ----------------------------------------------------------

    pub fn calls(&self) -> Vec<PaperCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn price_of(&self, remote_id: i64) -> Option<Price> {
        self.lock().products.get(&remote_id).map(|p| p.price)
    }

    pub fn is_member(&self, action_id: i64, remote_id: i64) -> bool {
        self.lock()
            .members
            .get(&action_id)
            .is_some_and(|m| m.contains_key(&remote_id))
    }

    pub fn member_price(&self, action_id: i64, remote_id: i64) -> Option<Price> {
        self.lock()
            .members
            .get(&action_id)
            .and_then(|m| m.get(&remote_id).copied())
    }

    async fn enter(&self, call: PaperCall) {
        let delay = {
            let mut st = self.lock();
            st.calls.push(call);
            st.delay
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

fn injected(what: &str) -> GatewayError {
    GatewayError::Api {
        status: 500,
        body: format!("paper: injected {what} failure"),
    }
}

#[async_trait::async_trait]
impl MarketplaceGateway for PaperMarketplace {
    async fn list_products(&self, cursor: Option<&str>, limit: u32) -> GatewayResult<ProductListPage> {
        self.enter(PaperCall::ListProducts {
            cursor: cursor.map(str::to_string),
        })
        .await;

        let after: Option<i64> = match cursor.filter(|c| !c.is_empty()) {
            Some(c) => Some(
                c.parse()
                    .map_err(|_| GatewayError::Api { status: 400, body: format!("bad cursor {c}") })?,
            ),
            None => None,
        };

        let st = self.lock();
        let items: Vec<RemoteProductRef> = st
            .products
            .values()
            .filter(|p| after.map_or(true, |a| p.remote_product_id > a))
            .take(limit as usize)
            .map(|p| RemoteProductRef {
                remote_product_id: p.remote_product_id,
                source_sku: p.source_sku.clone(),
            })
            .collect();

        let next_cursor = if items.len() == limit as usize {
            items.last().map(|i| i.remote_product_id.to_string())
        } else {
            None
        };
        Ok(ProductListPage { items, next_cursor })
    }

    async fn product_details(&self, remote_ids: &[i64]) -> GatewayResult<Vec<RemoteProductDetails>> {
        self.enter(PaperCall::ProductDetails {
            remote_ids: remote_ids.to_vec(),
        })
        .await;

        let st = self.lock();
        if st.fail_details {
            return Err(injected("details"));
        }
        Ok(remote_ids
            .iter()
            .filter_map(|id| st.products.get(id).cloned())
            .collect())
    }

    async fn update_price(&self, remote_id: i64, new_price: Price) -> GatewayResult<()> {
        self.enter(PaperCall::UpdatePrice {
            remote_id,
            price: new_price,
        })
        .await;

        let mut st = self.lock();
        if st.fail_price.contains(&remote_id) {
            return Err(injected("price"));
        }
        match st.products.get_mut(&remote_id) {
            Some(p) => {
                p.price = new_price;
                Ok(())
            }
            None => Err(GatewayError::Rejected(format!("price update failed: unknown product {remote_id}"))),
        }
    }

    async fn list_campaigns(&self) -> GatewayResult<Vec<RemoteCampaign>> {
        self.enter(PaperCall::ListCampaigns).await;

        let st = self.lock();
        if st.fail_list_campaigns {
            return Err(injected("list campaigns"));
        }
        Ok(st
            .campaigns
            .values()
            .map(|c| {
                let mut c = c.clone();
                c.participating_count = st.members.get(&c.action_id).map_or(0, |m| i32::try_from(m.len()).unwrap_or(i32::MAX));
                c.potential_count = i32::try_from(st.products.len()).unwrap_or(i32::MAX);
                c
            })
            .collect())
    }

    async fn enroll_product(&self, action_id: i64, remote_id: i64, action_price: Price) -> GatewayResult<()> {
        self.enter(PaperCall::Enroll {
            action_id,
            remote_id,
            price: action_price,
        })
        .await;

        let mut st = self.lock();
        if st.fail_enroll.contains(&(action_id, remote_id)) {
            return Err(injected("enroll"));
        }
        if !st.campaigns.contains_key(&action_id) {
            return Err(GatewayError::Api {
                status: 404,
                body: format!("action {action_id} not found"),
            });
        }
        if !st.products.contains_key(&remote_id) {
            return Err(GatewayError::Rejected(format!(
                "activate product {remote_id}: unknown product"
            )));
        }
        st.members
            .entry(action_id)
            .or_default()
            .insert(remote_id, action_price);
        Ok(())
    }

    async fn remove_product(&self, action_id: i64, remote_id: i64) -> GatewayResult<()> {
        self.enter(PaperCall::Remove { action_id, remote_id }).await;

        let mut st = self.lock();
        if st.fail_remove.contains(&(action_id, remote_id)) {
            return Err(injected("remove"));
        }
        let removed = st
            .members
            .get_mut(&action_id)
            .and_then(|m| m.remove(&remote_id))
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(GatewayError::Rejected(format!(
                "deactivate product {remote_id}: not participating"
            )))
        }
    }

    async fn campaign_products(&self, action_id: i64) -> GatewayResult<Vec<i64>> {
        self.enter(PaperCall::CampaignProducts { action_id }).await;

        let st = self.lock();
        if st.fail_campaign_products.contains(&action_id) {
            return Err(injected("campaign products"));
        }
        Ok(st
            .members
            .get(&action_id)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default())
    }
}

impl GatewayFactory for PaperMarketplace {
    fn for_shop(&self, _creds: &ShopCredentials) -> GatewayResult<Arc<dyn MarketplaceGateway>> {
        Ok(Arc::new(self.clone()))
    }
}
