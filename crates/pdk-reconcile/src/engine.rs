use std::sync::Arc;

use chrono::Utc;
use pdk_gateway::{GatewayFactory, MarketplaceGateway, ShopCredentials};
use pdk_schemas::{ActionStatus, CampaignSelector, EnrollmentClaim, Price, Product, PromotionAction};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::locks::KeyedLocks;
use crate::store::MirrorStore;
use crate::types::ItemWarning;

/// Tunables the engine needs from `DeskConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Enrollment price as a share of the current price, in basis points.
    pub action_price_bps: u32,
    /// Age after which a `pending` ledger row is swept.
    pub pending_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_price_bps: 7_200,
            pending_grace_secs: 300,
        }
    }
}

/// Reconciliation engine for all shops.
///
/// Every workflow runs items sequentially. Remote calls and mirror writes
/// are individual steps; nothing spans a transaction.
#[derive(Clone)]
pub struct Engine {
    pub(crate) store: Arc<dyn MirrorStore>,
    gateways: Arc<dyn GatewayFactory>,
    pub(crate) cfg: EngineConfig,
    pub(crate) locks: KeyedLocks,
}

/// Outcome of removing a product from every campaign it is active in.
#[derive(Debug, Default)]
pub(crate) struct ExitOutcome {
    pub all_ok: bool,
    pub errors: Vec<String>,
}

impl Engine {
    pub fn new(store: Arc<dyn MirrorStore>, gateways: Arc<dyn GatewayFactory>, cfg: EngineConfig) -> Self {
        Self {
            store,
            gateways,
            cfg,
            locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.cfg
    }

    pub fn store(&self) -> &Arc<dyn MirrorStore> {
        &self.store
    }

    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    /// Price at which a product with `current` price joins a campaign.
    pub fn action_price(&self, current: Price) -> Price {
        current.scale_bps(self.cfg.action_price_bps)
    }

    pub(crate) async fn require_shop(&self, shop_id: i64) -> EngineResult<ShopCredentials> {
        self.store
            .shop_credentials(shop_id)
            .await?
            .ok_or(EngineError::ShopNotFound { shop_id })
    }

    pub(crate) async fn gateway_for(&self, shop_id: i64) -> EngineResult<Arc<dyn MarketplaceGateway>> {
        let creds = self.require_shop(shop_id).await?;
        self.gateways
            .for_shop(&creds)
            .map_err(|e| EngineError::CredentialsRejected {
                shop_id,
                reason: e.to_string(),
            })
    }

    /// Resolve a selector to active campaigns of the shop.
    ///
    /// Returns the campaigns in request order (or mirror order for
    /// `AllActive`) and the explicit ids that did not resolve.
    pub(crate) async fn resolve_campaigns(
        &self,
        shop_id: i64,
        selector: &CampaignSelector,
    ) -> EngineResult<(Vec<PromotionAction>, Vec<i64>)> {
        match selector {
            CampaignSelector::AllActive => Ok((self.store.active_actions(shop_id).await?, Vec::new())),
            CampaignSelector::Explicit(ids) => {
                let mut wanted: Vec<i64> = Vec::with_capacity(ids.len());
                for id in ids {
                    if !wanted.contains(id) {
                        wanted.push(*id);
                    }
                }
                let found = self.store.actions_by_ids(shop_id, &wanted).await?;
                let mut resolved = Vec::with_capacity(found.len());
                let mut unresolved = Vec::new();
                for id in wanted {
                    match found.iter().find(|a| a.action_id == id) {
                        Some(a) if a.status == ActionStatus::Active => resolved.push(a.clone()),
                        _ => unresolved.push(id),
                    }
                }
                Ok((resolved, unresolved))
            }
        }
    }

    /// One per-campaign enrollment with its write-ahead ledger row.
    ///
    /// `Ok` covers a confirmed remote enrollment and an already active
    /// slot. `Err` carries a message prefixed with the campaign id.
    pub(crate) async fn enroll_one(
        &self,
        gw: &dyn MarketplaceGateway,
        product: &Product,
        action: &PromotionAction,
        base_price: Price,
        warnings: &mut Vec<ItemWarning>,
    ) -> Result<(), String> {
        let action_price = self.action_price(base_price);

        // 1) pending marker
        let enrollment_id = match self
            .store
            .begin_enrollment(product.id, action.kind, action.action_id, action_price)
            .await
        {
            Ok(EnrollmentClaim::Claimed(id)) => id,
            Ok(EnrollmentClaim::AlreadyEnrolled) => {
                debug!(product_id = product.id, action_id = action.action_id, "already enrolled");
                return Ok(());
            }
            Ok(EnrollmentClaim::InFlight) => {
                return Err(format!(
                    "action {}: another enrollment attempt is pending",
                    action.action_id
                ));
            }
            Err(e) => {
                return Err(format!("action {}: ledger write failed: {e:#}", action.action_id));
            }
        };

        // 2) remote call, 3) resolve the marker
        match gw
            .enroll_product(action.action_id, product.remote_product_id, action_price)
            .await
        {
            Ok(()) => {
                if let Err(e) = self.store.confirm_enrollment(enrollment_id, Utc::now()).await {
                    warn!(
                        product_id = product.id,
                        action_id = action.action_id,
                        step = "confirm_enrollment",
                        error = %format!("{e:#}"),
                        "enrolled remotely but ledger confirm failed"
                    );
                    warnings.push(ItemWarning::degraded("confirm_enrollment", &e));
                }
                debug!(
                    product_id = product.id,
                    action_id = action.action_id,
                    price = %action_price,
                    "enrolled"
                );
                Ok(())
            }
            Err(err) => {
                if let Err(e) = self.store.reject_enrollment(enrollment_id).await {
                    warn!(
                        product_id = product.id,
                        action_id = action.action_id,
                        step = "reject_enrollment",
                        error = %format!("{e:#}"),
                        "ledger reject failed; the sweep will resolve the row"
                    );
                    warnings.push(ItemWarning::degraded("reject_enrollment", &e));
                }
                Err(format!("action {}: {err}", action.action_id))
            }
        }
    }

    /// Remove the product from every campaign it is active in.
    ///
    /// Each removed row is marked exited on its own. `is_promoted` is
    /// cleared at the end whatever the individual outcomes were. With no
    /// active rows the exit counts as a success.
    pub(crate) async fn exit_all(
        &self,
        gw: &dyn MarketplaceGateway,
        product: &Product,
        warnings: &mut Vec<ItemWarning>,
    ) -> ExitOutcome {
        let rows = match self.store.active_enrollments(product.id).await {
            Ok(rows) => rows,
            Err(e) => {
                return ExitOutcome {
                    all_ok: false,
                    errors: vec![format!("exit: cannot read active enrollments: {e:#}")],
                };
            }
        };

        let mut out = ExitOutcome {
            all_ok: true,
            errors: Vec::new(),
        };
        for row in &rows {
            match gw.remove_product(row.action_id, product.remote_product_id).await {
                Ok(()) => {
                    if let Err(e) = self.store.mark_enrollment_exited(row.id, Utc::now()).await {
                        warn!(
                            product_id = product.id,
                            action_id = row.action_id,
                            step = "mark_enrollment_exited",
                            error = %format!("{e:#}"),
                            "removed remotely but ledger update failed"
                        );
                        warnings.push(ItemWarning::degraded("mark_enrollment_exited", &e));
                    }
                }
                Err(err) => {
                    out.all_ok = false;
                    out.errors.push(format!("remove from action {}: {err}", row.action_id));
                }
            }
        }

        if let Err(e) = self.store.set_product_promoted(product.id, false).await {
            warn!(product_id = product.id, step = "clear_promoted", error = %format!("{e:#}"), "flag write failed");
            warnings.push(ItemWarning::degraded("clear_promoted", &e));
        }
        out
    }

    /// Set `is_promoted`, downgrading a write failure to a warning.
    pub(crate) async fn mark_promoted(&self, product_id: i64, warnings: &mut Vec<ItemWarning>) {
        if let Err(e) = self.store.set_product_promoted(product_id, true).await {
            warn!(product_id, step = "set_promoted", error = %format!("{e:#}"), "flag write failed");
            warnings.push(ItemWarning::degraded("set_promoted", &e));
        }
    }

    /// Re-read a product under its lock; falls back to the snapshot the
    /// caller already holds when the read fails.
    pub(crate) async fn fresh_product(&self, snapshot: Product) -> Product {
        match self.store.product(snapshot.shop_id, snapshot.id).await {
            Ok(Some(p)) => p,
            Ok(None) => snapshot,
            Err(e) => {
                debug!(product_id = snapshot.id, error = %format!("{e:#}"), "re-read failed; using snapshot");
                snapshot
            }
        }
    }
}
