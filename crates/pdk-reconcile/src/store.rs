use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use pdk_gateway::ShopCredentials;
use pdk_schemas::{
    ActionStatus, EnrollmentClaim, LossProduct, LossStep, LossUpsert, ManualAction, PendingEnrollment,
    Price, Product, ProductQuery, ProductUpsert, PromotedProduct, PromotionAction, PromotionKind,
    RemoteCampaign, StatsOverview,
};
use sqlx::PgPool;

/// Persistence seam for the engine.
///
/// `PgMirror` is the production implementation; the testkit ships an
/// in-memory one with failure injection.
#[async_trait::async_trait]
pub trait MirrorStore: Send + Sync {
    async fn shop_credentials(&self, shop_id: i64) -> Result<Option<ShopCredentials>>;

    // products
    async fn product(&self, shop_id: i64, product_id: i64) -> Result<Option<Product>>;
    async fn product_by_source_sku(&self, shop_id: i64, source_sku: &str) -> Result<Option<Product>>;
    async fn eligible_products(
        &self,
        shop_id: i64,
        exclude_loss: bool,
        exclude_promoted: bool,
    ) -> Result<Vec<Product>>;
    async fn upsert_product(&self, p: &ProductUpsert) -> Result<i64>;
    async fn set_product_price(&self, product_id: i64, price: Price) -> Result<()>;
    async fn set_product_promoted(&self, product_id: i64, promoted: bool) -> Result<()>;
    async fn set_product_loss(&self, product_id: i64, is_loss: bool) -> Result<()>;
    async fn list_products(&self, q: &ProductQuery) -> Result<(Vec<Product>, i64)>;

    // campaigns
    async fn action(&self, shop_id: i64, action_id: i64) -> Result<Option<PromotionAction>>;
    async fn actions_by_ids(&self, shop_id: i64, action_ids: &[i64]) -> Result<Vec<PromotionAction>>;
    async fn active_actions(&self, shop_id: i64) -> Result<Vec<PromotionAction>>;
    async fn list_actions(&self, shop_id: i64) -> Result<Vec<PromotionAction>>;
    async fn upsert_synced_action(
        &self,
        shop_id: i64,
        c: &RemoteCampaign,
        kind: PromotionKind,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn expire_missing_actions(&self, shop_id: i64, seen_action_ids: &[i64]) -> Result<u64>;
    async fn insert_manual_action(&self, m: &ManualAction) -> Result<Option<PromotionAction>>;
    async fn set_action_status(&self, shop_id: i64, action_id: i64, status: ActionStatus) -> Result<bool>;
    async fn delete_action(&self, shop_id: i64, action_id: i64) -> Result<bool>;

    // enrollment ledger
    async fn begin_enrollment(
        &self,
        product_id: i64,
        kind: PromotionKind,
        action_id: i64,
        action_price: Price,
    ) -> Result<EnrollmentClaim>;
    async fn confirm_enrollment(&self, enrollment_id: i64, now: DateTime<Utc>) -> Result<()>;
    async fn reject_enrollment(&self, enrollment_id: i64) -> Result<()>;
    async fn active_enrollments(&self, product_id: i64) -> Result<Vec<PromotedProduct>>;
    async fn active_enrollments_for(&self, product_ids: &[i64]) -> Result<Vec<PromotedProduct>>;
    async fn mark_enrollment_exited(&self, enrollment_id: i64, now: DateTime<Utc>) -> Result<()>;
    async fn pending_enrollments(&self, shop_id: i64, cutoff: DateTime<Utc>) -> Result<Vec<PendingEnrollment>>;

    // loss ledger
    async fn upsert_loss_product(
        &self,
        product_id: i64,
        loss_date: NaiveDate,
        original_price: Price,
        new_price: Price,
    ) -> Result<LossUpsert>;
    async fn loss_products_by_ids(&self, shop_id: i64, ids: &[i64]) -> Result<Vec<LossProduct>>;
    async fn unprocessed_loss_products(&self, shop_id: i64) -> Result<Vec<LossProduct>>;
    async fn mark_loss_step(&self, loss_id: i64, step: LossStep) -> Result<()>;
    async fn mark_loss_processed(&self, loss_id: i64, now: DateTime<Utc>) -> Result<()>;

    async fn stats_overview(&self, shop_id: i64) -> Result<StatsOverview>;
}

/// Postgres-backed mirror.
#[derive(Debug, Clone)]
pub struct PgMirror {
    pool: PgPool,
}

impl PgMirror {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl MirrorStore for PgMirror {
    async fn shop_credentials(&self, shop_id: i64) -> Result<Option<ShopCredentials>> {
        Ok(pdk_db::fetch_shop(&self.pool, shop_id).await?.map(|s| ShopCredentials {
            shop_id: s.id,
            client_id: s.client_id,
            api_key: s.api_key,
        }))
    }

    async fn product(&self, shop_id: i64, product_id: i64) -> Result<Option<Product>> {
        pdk_db::fetch_product(&self.pool, shop_id, product_id).await
    }

    async fn product_by_source_sku(&self, shop_id: i64, source_sku: &str) -> Result<Option<Product>> {
        pdk_db::fetch_product_by_source_sku(&self.pool, shop_id, source_sku).await
    }

    async fn eligible_products(
        &self,
        shop_id: i64,
        exclude_loss: bool,
        exclude_promoted: bool,
    ) -> Result<Vec<Product>> {
        pdk_db::eligible_products(&self.pool, shop_id, exclude_loss, exclude_promoted).await
    }

    async fn upsert_product(&self, p: &ProductUpsert) -> Result<i64> {
        pdk_db::upsert_product(&self.pool, p).await
    }

    async fn set_product_price(&self, product_id: i64, price: Price) -> Result<()> {
        pdk_db::set_product_price(&self.pool, product_id, price).await
    }

    async fn set_product_promoted(&self, product_id: i64, promoted: bool) -> Result<()> {
        pdk_db::set_product_promoted(&self.pool, product_id, promoted).await
    }

    async fn set_product_loss(&self, product_id: i64, is_loss: bool) -> Result<()> {
        pdk_db::set_product_loss(&self.pool, product_id, is_loss).await
    }

    async fn list_products(&self, q: &ProductQuery) -> Result<(Vec<Product>, i64)> {
        pdk_db::list_products(&self.pool, q).await
    }

    async fn action(&self, shop_id: i64, action_id: i64) -> Result<Option<PromotionAction>> {
        pdk_db::fetch_action(&self.pool, shop_id, action_id).await
    }

    async fn actions_by_ids(&self, shop_id: i64, action_ids: &[i64]) -> Result<Vec<PromotionAction>> {
        pdk_db::actions_by_ids(&self.pool, shop_id, action_ids).await
    }

    async fn active_actions(&self, shop_id: i64) -> Result<Vec<PromotionAction>> {
        pdk_db::active_actions(&self.pool, shop_id).await
    }

    async fn list_actions(&self, shop_id: i64) -> Result<Vec<PromotionAction>> {
        pdk_db::list_actions(&self.pool, shop_id).await
    }

    async fn upsert_synced_action(
        &self,
        shop_id: i64,
        c: &RemoteCampaign,
        kind: PromotionKind,
        now: DateTime<Utc>,
    ) -> Result<()> {
        pdk_db::upsert_synced_action(&self.pool, shop_id, c, kind, now).await
    }

    async fn expire_missing_actions(&self, shop_id: i64, seen_action_ids: &[i64]) -> Result<u64> {
        pdk_db::expire_missing_actions(&self.pool, shop_id, seen_action_ids).await
    }

    async fn insert_manual_action(&self, m: &ManualAction) -> Result<Option<PromotionAction>> {
        pdk_db::insert_manual_action(&self.pool, m).await
    }

    async fn set_action_status(&self, shop_id: i64, action_id: i64, status: ActionStatus) -> Result<bool> {
        pdk_db::set_action_status(&self.pool, shop_id, action_id, status).await
    }

    async fn delete_action(&self, shop_id: i64, action_id: i64) -> Result<bool> {
        pdk_db::delete_action(&self.pool, shop_id, action_id).await
    }

    async fn begin_enrollment(
        &self,
        product_id: i64,
        kind: PromotionKind,
        action_id: i64,
        action_price: Price,
    ) -> Result<EnrollmentClaim> {
        pdk_db::begin_enrollment(&self.pool, product_id, kind, action_id, action_price).await
    }

    async fn confirm_enrollment(&self, enrollment_id: i64, now: DateTime<Utc>) -> Result<()> {
        pdk_db::confirm_enrollment(&self.pool, enrollment_id, now).await
    }

    async fn reject_enrollment(&self, enrollment_id: i64) -> Result<()> {
        pdk_db::reject_enrollment(&self.pool, enrollment_id).await
    }

    async fn active_enrollments(&self, product_id: i64) -> Result<Vec<PromotedProduct>> {
        pdk_db::active_enrollments(&self.pool, product_id).await
    }

    async fn active_enrollments_for(&self, product_ids: &[i64]) -> Result<Vec<PromotedProduct>> {
        pdk_db::active_enrollments_for(&self.pool, product_ids).await
    }

    async fn mark_enrollment_exited(&self, enrollment_id: i64, now: DateTime<Utc>) -> Result<()> {
        pdk_db::mark_enrollment_exited(&self.pool, enrollment_id, now).await
    }

    async fn pending_enrollments(&self, shop_id: i64, cutoff: DateTime<Utc>) -> Result<Vec<PendingEnrollment>> {
        pdk_db::pending_enrollments(&self.pool, shop_id, cutoff).await
    }

    async fn upsert_loss_product(
        &self,
        product_id: i64,
        loss_date: NaiveDate,
        original_price: Price,
        new_price: Price,
    ) -> Result<LossUpsert> {
        pdk_db::upsert_loss_product(&self.pool, product_id, loss_date, original_price, new_price).await
    }

    async fn loss_products_by_ids(&self, shop_id: i64, ids: &[i64]) -> Result<Vec<LossProduct>> {
        pdk_db::loss_products_by_ids(&self.pool, shop_id, ids).await
    }

    async fn unprocessed_loss_products(&self, shop_id: i64) -> Result<Vec<LossProduct>> {
        pdk_db::unprocessed_loss_products(&self.pool, shop_id).await
    }

    async fn mark_loss_step(&self, loss_id: i64, step: LossStep) -> Result<()> {
        pdk_db::mark_loss_step(&self.pool, loss_id, step).await
    }

    async fn mark_loss_processed(&self, loss_id: i64, now: DateTime<Utc>) -> Result<()> {
        pdk_db::mark_loss_processed(&self.pool, loss_id, now).await
    }

    async fn stats_overview(&self, shop_id: i64) -> Result<StatsOverview> {
        pdk_db::stats_overview(&self.pool, shop_id).await
    }
}
