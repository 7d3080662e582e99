use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, NaiveDate, Utc};
use pdk_gateway::ShopCredentials;
use pdk_reconcile::MirrorStore;
use pdk_schemas::{
    ActionStatus, EnrollmentClaim, EnrollmentStatus, KindCount, LossProduct, LossStep, LossUpsert, ManualAction,
    PendingEnrollment, Price, Product, ProductQuery, ProductStatus, ProductUpsert, PromotedProduct,
    PromotionAction, PromotionKind, RemoteCampaign, StatsOverview,
};

#[derive(Debug, Default)]
struct MemState {
    next_id: i64,
    shops: BTreeMap<i64, ShopCredentials>,
    products: BTreeMap<i64, Product>,
    actions: Vec<PromotionAction>,
    enrollments: Vec<PromotedProduct>,
    loss: Vec<LossProduct>,
    failing: HashSet<String>,
}

impl MemState {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn product_mut(&mut self, product_id: i64) -> Result<&mut Product> {
        self.products
            .get_mut(&product_id)
            .ok_or_else(|| anyhow!("product {product_id} not found"))
    }

    fn in_shop(&self, product_id: i64, shop_id: i64) -> bool {
        self.products.get(&product_id).is_some_and(|p| p.shop_id == shop_id)
    }
}

/// In-memory `MirrorStore` with the same row semantics as the Postgres
/// mirror, plus per-operation failure injection.
///
/// `fail("confirm_enrollment")` makes every later call of that trait method
/// return an error until `heal` is called.
#[derive(Debug, Clone, Default)]
pub struct MemoryMirror {
    state: Arc<Mutex<MemState>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn guard(&self, op: &str) -> Result<MutexGuard<'_, MemState>> {
        let st = self.lock();
        if st.failing.contains(op) {
            bail!("injected failure: {op}");
        }
        Ok(st)
    }

    // --- failure injection ---

    pub fn fail(&self, op: &str) {
        self.lock().failing.insert(op.to_string());
    }

    pub fn heal(&self, op: &str) {
        self.lock().failing.remove(op);
    }

    // --- seeding ---

    pub fn add_shop(&self, client_id: &str, api_key: &str) -> i64 {
        let mut st = self.lock();
        let id = st.id();
        st.shops.insert(
            id,
            ShopCredentials {
                shop_id: id,
                client_id: client_id.to_string(),
                api_key: api_key.to_string(),
            },
        );
        id
    }

    /// Active product with both flags down. `remote_sku` is `remote_id + 100000`.
    pub fn add_product(&self, shop_id: i64, remote_id: i64, source_sku: &str, price: Price) -> Product {
        let mut st = self.lock();
        let id = st.id();
        let p = Product {
            id,
            shop_id,
            remote_product_id: remote_id,
            remote_sku: remote_id + 100_000,
            source_sku: source_sku.to_string(),
            name: format!("product {source_sku}"),
            current_price: price,
            status: ProductStatus::Active,
            is_loss: false,
            is_promoted: false,
            last_synced_at: None,
        };
        st.products.insert(id, p.clone());
        p
    }

    pub fn set_flags(&self, product_id: i64, is_loss: bool, is_promoted: bool) {
        if let Some(p) = self.lock().products.get_mut(&product_id) {
            p.is_loss = is_loss;
            p.is_promoted = is_promoted;
        }
    }

    pub fn set_status(&self, product_id: i64, status: ProductStatus) {
        if let Some(p) = self.lock().products.get_mut(&product_id) {
            p.status = status;
        }
    }

    pub fn add_action(&self, shop_id: i64, action_id: i64, kind: PromotionKind, status: ActionStatus) -> PromotionAction {
        let mut st = self.lock();
        let id = st.id();
        let a = PromotionAction {
            id,
            shop_id,
            action_id,
            title: format!("campaign {action_id}"),
            action_type: crate::remote_type_code(kind).to_string(),
            kind,
            date_start: None,
            date_end: None,
            participating_count: 0,
            potential_count: 0,
            is_manual: false,
            status,
            last_synced_at: None,
        };
        st.actions.push(a.clone());
        a
    }

    /// Seed an enrollment row directly, bypassing the slot check.
    pub fn add_enrollment(
        &self,
        product_id: i64,
        kind: PromotionKind,
        action_id: i64,
        price: Price,
        status: EnrollmentStatus,
    ) -> i64 {
        let mut st = self.lock();
        let id = st.id();
        let now = Utc::now();
        st.enrollments.push(PromotedProduct {
            id,
            product_id,
            promotion_kind: kind,
            action_id,
            action_price: price,
            status,
            created_at: now,
            enrolled_at: (status == EnrollmentStatus::Active).then_some(now),
            exited_at: None,
        });
        id
    }

    pub fn backdate_enrollment(&self, enrollment_id: i64, created_at: DateTime<Utc>) {
        if let Some(e) = self.lock().enrollments.iter_mut().find(|e| e.id == enrollment_id) {
            e.created_at = created_at;
        }
    }

    /// Unprocessed loss row dated today, original price taken from the product.
    pub fn add_loss(&self, product_id: i64, new_price: Price) -> i64 {
        let mut st = self.lock();
        let id = st.id();
        let original = st.products.get(&product_id).map(|p| p.current_price).unwrap_or(Price::ZERO);
        st.loss.push(LossProduct {
            id,
            product_id,
            loss_date: Utc::now().date_naive(),
            original_price: original,
            new_price,
            price_updated: false,
            promotion_exited: false,
            promotion_rejoined: false,
            processed_at: None,
            created_at: Utc::now(),
        });
        id
    }

    pub fn set_loss_steps(&self, loss_id: i64, exited: bool, price_updated: bool, rejoined: bool) {
        if let Some(l) = self.lock().loss.iter_mut().find(|l| l.id == loss_id) {
            l.promotion_exited = exited;
            l.price_updated = price_updated;
            l.promotion_rejoined = rejoined;
        }
    }

    // --- inspection ---

    pub fn product_row(&self, product_id: i64) -> Option<Product> {
        self.lock().products.get(&product_id).cloned()
    }

    pub fn products_of(&self, shop_id: i64) -> Vec<Product> {
        self.lock().products.values().filter(|p| p.shop_id == shop_id).cloned().collect()
    }

    /// All ledger rows of a product, any status, oldest first.
    pub fn enrollments_of(&self, product_id: i64) -> Vec<PromotedProduct> {
        self.lock()
            .enrollments
            .iter()
            .filter(|e| e.product_id == product_id)
            .cloned()
            .collect()
    }

    pub fn loss_row(&self, loss_id: i64) -> Option<LossProduct> {
        self.lock().loss.iter().find(|l| l.id == loss_id).cloned()
    }

    pub fn actions_of(&self, shop_id: i64) -> Vec<PromotionAction> {
        self.lock().actions.iter().filter(|a| a.shop_id == shop_id).cloned().collect()
    }
}

#[async_trait::async_trait]
impl MirrorStore for MemoryMirror {
    async fn shop_credentials(&self, shop_id: i64) -> Result<Option<ShopCredentials>> {
        Ok(self.guard("shop_credentials")?.shops.get(&shop_id).cloned())
    }

    async fn product(&self, shop_id: i64, product_id: i64) -> Result<Option<Product>> {
        let st = self.guard("product")?;
        Ok(st.products.get(&product_id).filter(|p| p.shop_id == shop_id).cloned())
    }

    async fn product_by_source_sku(&self, shop_id: i64, source_sku: &str) -> Result<Option<Product>> {
        let st = self.guard("product_by_source_sku")?;
        Ok(st
            .products
            .values()
            .find(|p| p.shop_id == shop_id && p.source_sku == source_sku)
            .cloned())
    }

    async fn eligible_products(
        &self,
        shop_id: i64,
        exclude_loss: bool,
        exclude_promoted: bool,
    ) -> Result<Vec<Product>> {
        let st = self.guard("eligible_products")?;
        Ok(st
            .products
            .values()
            .filter(|p| p.shop_id == shop_id && p.status == ProductStatus::Active)
            .filter(|p| !(exclude_loss && p.is_loss))
            .filter(|p| !(exclude_promoted && p.is_promoted))
            .cloned()
            .collect())
    }

    async fn upsert_product(&self, u: &ProductUpsert) -> Result<i64> {
        let mut st = self.guard("upsert_product")?;
        let clash = st.products.values().any(|p| {
            p.shop_id == u.shop_id && p.source_sku == u.source_sku && p.remote_product_id != u.remote_product_id
        });
        if clash {
            bail!("duplicate source_sku {} for shop {}", u.source_sku, u.shop_id);
        }

        if let Some(p) = st
            .products
            .values_mut()
            .find(|p| p.shop_id == u.shop_id && p.remote_product_id == u.remote_product_id)
        {
            p.remote_sku = u.remote_sku;
            p.source_sku = u.source_sku.clone();
            p.name = u.name.clone();
            p.current_price = u.current_price;
            p.status = ProductStatus::Active;
            p.last_synced_at = Some(u.synced_at);
            return Ok(p.id);
        }

        let id = st.id();
        st.products.insert(
            id,
            Product {
                id,
                shop_id: u.shop_id,
                remote_product_id: u.remote_product_id,
                remote_sku: u.remote_sku,
                source_sku: u.source_sku.clone(),
                name: u.name.clone(),
                current_price: u.current_price,
                status: ProductStatus::Active,
                is_loss: false,
                is_promoted: false,
                last_synced_at: Some(u.synced_at),
            },
        );
        Ok(id)
    }

    async fn set_product_price(&self, product_id: i64, price: Price) -> Result<()> {
        self.guard("set_product_price")?.product_mut(product_id)?.current_price = price;
        Ok(())
    }

    async fn set_product_promoted(&self, product_id: i64, promoted: bool) -> Result<()> {
        self.guard("set_product_promoted")?.product_mut(product_id)?.is_promoted = promoted;
        Ok(())
    }

    async fn set_product_loss(&self, product_id: i64, is_loss: bool) -> Result<()> {
        self.guard("set_product_loss")?.product_mut(product_id)?.is_loss = is_loss;
        Ok(())
    }

    async fn list_products(&self, q: &ProductQuery) -> Result<(Vec<Product>, i64)> {
        let st = self.guard("list_products")?;
        let matching: Vec<&Product> = st.products.values().filter(|p| q.matches(p)).collect();
        let (limit, offset) = q.limit_offset();
        let page = matching
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|p| (*p).clone())
            .collect();
        Ok((page, matching.len() as i64))
    }

    async fn action(&self, shop_id: i64, action_id: i64) -> Result<Option<PromotionAction>> {
        let st = self.guard("action")?;
        Ok(st
            .actions
            .iter()
            .find(|a| a.shop_id == shop_id && a.action_id == action_id)
            .cloned())
    }

    async fn actions_by_ids(&self, shop_id: i64, action_ids: &[i64]) -> Result<Vec<PromotionAction>> {
        let st = self.guard("actions_by_ids")?;
        Ok(action_ids
            .iter()
            .filter_map(|id| st.actions.iter().find(|a| a.shop_id == shop_id && a.action_id == *id))
            .cloned()
            .collect())
    }

    async fn active_actions(&self, shop_id: i64) -> Result<Vec<PromotionAction>> {
        let st = self.guard("active_actions")?;
        let mut out: Vec<PromotionAction> = st
            .actions
            .iter()
            .filter(|a| a.shop_id == shop_id && a.status == ActionStatus::Active)
            .cloned()
            .collect();
        out.sort_by_key(|a| a.action_id);
        Ok(out)
    }

    async fn list_actions(&self, shop_id: i64) -> Result<Vec<PromotionAction>> {
        let st = self.guard("list_actions")?;
        let mut out: Vec<PromotionAction> = st.actions.iter().filter(|a| a.shop_id == shop_id).cloned().collect();
        out.sort_by_key(|a| (a.is_manual, a.action_id));
        Ok(out)
    }

    async fn upsert_synced_action(
        &self,
        shop_id: i64,
        c: &RemoteCampaign,
        kind: PromotionKind,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut st = self.guard("upsert_synced_action")?;
        if let Some(a) = st
            .actions
            .iter_mut()
            .find(|a| a.shop_id == shop_id && a.action_id == c.action_id)
        {
            if !a.is_manual {
                a.title = c.title.clone();
                a.action_type = c.action_type.clone();
                a.kind = kind;
            }
            a.date_start = c.date_start;
            a.date_end = c.date_end;
            a.participating_count = c.participating_count;
            a.potential_count = c.potential_count;
            if a.status != ActionStatus::Disabled {
                a.status = ActionStatus::Active;
            }
            a.last_synced_at = Some(now);
            return Ok(());
        }

        let id = st.id();
        st.actions.push(PromotionAction {
            id,
            shop_id,
            action_id: c.action_id,
            title: c.title.clone(),
            action_type: c.action_type.clone(),
            kind,
            date_start: c.date_start,
            date_end: c.date_end,
            participating_count: c.participating_count,
            potential_count: c.potential_count,
            is_manual: false,
            status: ActionStatus::Active,
            last_synced_at: Some(now),
        });
        Ok(())
    }

    async fn expire_missing_actions(&self, shop_id: i64, seen_action_ids: &[i64]) -> Result<u64> {
        let mut st = self.guard("expire_missing_actions")?;
        let mut n = 0;
        for a in st.actions.iter_mut().filter(|a| {
            a.shop_id == shop_id
                && !a.is_manual
                && a.status == ActionStatus::Active
                && !seen_action_ids.contains(&a.action_id)
        }) {
            a.status = ActionStatus::Expired;
            n += 1;
        }
        Ok(n)
    }

    async fn insert_manual_action(&self, m: &ManualAction) -> Result<Option<PromotionAction>> {
        let mut st = self.guard("insert_manual_action")?;
        if st.actions.iter().any(|a| a.shop_id == m.shop_id && a.action_id == m.action_id) {
            return Ok(None);
        }
        let id = st.id();
        let a = PromotionAction {
            id,
            shop_id: m.shop_id,
            action_id: m.action_id,
            title: m.title.clone(),
            action_type: "MANUAL".to_string(),
            kind: m.kind,
            date_start: m.date_start,
            date_end: m.date_end,
            participating_count: 0,
            potential_count: 0,
            is_manual: true,
            status: ActionStatus::Active,
            last_synced_at: None,
        };
        st.actions.push(a.clone());
        Ok(Some(a))
    }

    async fn set_action_status(&self, shop_id: i64, action_id: i64, status: ActionStatus) -> Result<bool> {
        let mut st = self.guard("set_action_status")?;
        match st
            .actions
            .iter_mut()
            .find(|a| a.shop_id == shop_id && a.action_id == action_id)
        {
            Some(a) => {
                a.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_action(&self, shop_id: i64, action_id: i64) -> Result<bool> {
        let mut st = self.guard("delete_action")?;
        let before = st.actions.len();
        st.actions.retain(|a| !(a.shop_id == shop_id && a.action_id == action_id));
        Ok(st.actions.len() != before)
    }

    async fn begin_enrollment(
        &self,
        product_id: i64,
        kind: PromotionKind,
        action_id: i64,
        action_price: Price,
    ) -> Result<EnrollmentClaim> {
        let mut st = self.guard("begin_enrollment")?;
        let live = st.enrollments.iter().find(|e| {
            e.product_id == product_id && e.promotion_kind == kind && e.action_id == action_id && e.status.holds_slot()
        });
        match live.map(|e| e.status) {
            Some(EnrollmentStatus::Active) => return Ok(EnrollmentClaim::AlreadyEnrolled),
            Some(_) => return Ok(EnrollmentClaim::InFlight),
            None => {}
        }

        let id = st.id();
        st.enrollments.push(PromotedProduct {
            id,
            product_id,
            promotion_kind: kind,
            action_id,
            action_price,
            status: EnrollmentStatus::Pending,
            created_at: Utc::now(),
            enrolled_at: None,
            exited_at: None,
        });
        Ok(EnrollmentClaim::Claimed(id))
    }

    async fn confirm_enrollment(&self, enrollment_id: i64, now: DateTime<Utc>) -> Result<()> {
        let mut st = self.guard("confirm_enrollment")?;
        if let Some(e) = st
            .enrollments
            .iter_mut()
            .find(|e| e.id == enrollment_id && e.status == EnrollmentStatus::Pending)
        {
            e.status = EnrollmentStatus::Active;
            e.enrolled_at = Some(now);
        }
        Ok(())
    }

    async fn reject_enrollment(&self, enrollment_id: i64) -> Result<()> {
        let mut st = self.guard("reject_enrollment")?;
        if let Some(e) = st
            .enrollments
            .iter_mut()
            .find(|e| e.id == enrollment_id && e.status == EnrollmentStatus::Pending)
        {
            e.status = EnrollmentStatus::Rejected;
        }
        Ok(())
    }

    async fn active_enrollments(&self, product_id: i64) -> Result<Vec<PromotedProduct>> {
        let st = self.guard("active_enrollments")?;
        Ok(st
            .enrollments
            .iter()
            .filter(|e| e.product_id == product_id && e.status == EnrollmentStatus::Active)
            .cloned()
            .collect())
    }

    async fn active_enrollments_for(&self, product_ids: &[i64]) -> Result<Vec<PromotedProduct>> {
        let st = self.guard("active_enrollments_for")?;
        let mut out: Vec<PromotedProduct> = st
            .enrollments
            .iter()
            .filter(|e| product_ids.contains(&e.product_id) && e.status == EnrollmentStatus::Active)
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.product_id, e.id));
        Ok(out)
    }

    async fn mark_enrollment_exited(&self, enrollment_id: i64, now: DateTime<Utc>) -> Result<()> {
        let mut st = self.guard("mark_enrollment_exited")?;
        if let Some(e) = st
            .enrollments
            .iter_mut()
            .find(|e| e.id == enrollment_id && e.status == EnrollmentStatus::Active)
        {
            e.status = EnrollmentStatus::Exited;
            e.exited_at = Some(now);
        }
        Ok(())
    }

    async fn pending_enrollments(&self, shop_id: i64, cutoff: DateTime<Utc>) -> Result<Vec<PendingEnrollment>> {
        let st = self.guard("pending_enrollments")?;
        let mut out: Vec<PendingEnrollment> = st
            .enrollments
            .iter()
            .filter(|e| e.status == EnrollmentStatus::Pending && e.created_at <= cutoff)
            .filter_map(|e| {
                let p = st.products.get(&e.product_id).filter(|p| p.shop_id == shop_id)?;
                Some(PendingEnrollment {
                    enrollment: e.clone(),
                    shop_id,
                    remote_product_id: p.remote_product_id,
                })
            })
            .collect();
        out.sort_by_key(|r| (r.enrollment.created_at, r.enrollment.id));
        Ok(out)
    }

    async fn upsert_loss_product(
        &self,
        product_id: i64,
        loss_date: NaiveDate,
        original_price: Price,
        new_price: Price,
    ) -> Result<LossUpsert> {
        let mut st = self.guard("upsert_loss_product")?;
        if let Some(l) = st
            .loss
            .iter_mut()
            .find(|l| l.product_id == product_id && l.loss_date == loss_date)
        {
            if l.processed_at.is_some() {
                return Ok(LossUpsert::AlreadyProcessed(l.id));
            }
            l.new_price = new_price;
            return Ok(LossUpsert::Refreshed(l.id));
        }

        let id = st.id();
        st.loss.push(LossProduct {
            id,
            product_id,
            loss_date,
            original_price,
            new_price,
            price_updated: false,
            promotion_exited: false,
            promotion_rejoined: false,
            processed_at: None,
            created_at: Utc::now(),
        });
        Ok(LossUpsert::Inserted(id))
    }

    async fn loss_products_by_ids(&self, shop_id: i64, ids: &[i64]) -> Result<Vec<LossProduct>> {
        let st = self.guard("loss_products_by_ids")?;
        Ok(st
            .loss
            .iter()
            .filter(|l| ids.contains(&l.id) && st.in_shop(l.product_id, shop_id))
            .cloned()
            .collect())
    }

    async fn unprocessed_loss_products(&self, shop_id: i64) -> Result<Vec<LossProduct>> {
        let st = self.guard("unprocessed_loss_products")?;
        Ok(st
            .loss
            .iter()
            .filter(|l| l.processed_at.is_none() && st.in_shop(l.product_id, shop_id))
            .cloned()
            .collect())
    }

    async fn mark_loss_step(&self, loss_id: i64, step: LossStep) -> Result<()> {
        let mut st = self.guard("mark_loss_step")?;
        let l = st
            .loss
            .iter_mut()
            .find(|l| l.id == loss_id)
            .ok_or_else(|| anyhow!("loss product {loss_id} not found"))?;
        match step {
            LossStep::PromotionExited => l.promotion_exited = true,
            LossStep::PriceUpdated => l.price_updated = true,
            LossStep::PromotionRejoined => l.promotion_rejoined = true,
        }
        Ok(())
    }

    async fn mark_loss_processed(&self, loss_id: i64, now: DateTime<Utc>) -> Result<()> {
        let mut st = self.guard("mark_loss_processed")?;
        let l = st
            .loss
            .iter_mut()
            .find(|l| l.id == loss_id)
            .ok_or_else(|| anyhow!("loss product {loss_id} not found"))?;
        l.processed_at = Some(now);
        Ok(())
    }

    async fn stats_overview(&self, shop_id: i64) -> Result<StatsOverview> {
        let st = self.guard("stats_overview")?;
        let products: Vec<&Product> = st.products.values().filter(|p| p.shop_id == shop_id).collect();

        let mut active_enrollments = KindCount::default();
        for e in st
            .enrollments
            .iter()
            .filter(|e| e.status == EnrollmentStatus::Active && st.in_shop(e.product_id, shop_id))
        {
            active_enrollments.add(e.promotion_kind, 1);
        }

        Ok(StatsOverview {
            shop_id,
            total_products: products.len() as i64,
            loss_products: products.iter().filter(|p| p.is_loss).count() as i64,
            promoted_products: products.iter().filter(|p| p.is_promoted).count() as i64,
            promotable_products: products
                .iter()
                .filter(|p| p.status == ProductStatus::Active && !p.is_loss && !p.is_promoted)
                .count() as i64,
            active_enrollments,
            unprocessed_loss: st
                .loss
                .iter()
                .filter(|l| l.processed_at.is_none() && st.in_shop(l.product_id, shop_id))
                .count() as i64,
            active_actions: st
                .actions
                .iter()
                .filter(|a| a.shop_id == shop_id && a.status == ActionStatus::Active)
                .count() as i64,
        })
    }
}
