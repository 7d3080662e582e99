use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use pdk_gateway::{DETAILS_BATCH, LIST_PAGE_LIMIT};
use pdk_schemas::{
    ActionStatus, LossUpsert, ManualAction, PendingEnrollment, ProductUpsert, PromotionAction, PromotionKind,
};
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::types::{ImportLossReport, ImportLossRequest, ProductSyncReport, SkuFailure, SweepReport};

/// Saturating count for report fields.
fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl Engine {
    /// Refresh the product mirror from the marketplace catalog.
    ///
    /// Loss and promoted flags are never touched. A failed details batch is
    /// skipped and counted; a failed listing page aborts.
    pub async fn sync_products(&self, shop_id: i64) -> EngineResult<ProductSyncReport> {
        let gw = self.gateway_for(shop_id).await?;

        let mut remote_ids: Vec<i64> = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = gw
                .list_products(cursor.as_deref(), LIST_PAGE_LIMIT)
                .await
                .map_err(EngineError::Remote)?;
            let short = page.items.len() < LIST_PAGE_LIMIT as usize;
            remote_ids.extend(page.items.into_iter().map(|r| r.remote_product_id));

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) if !short && cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        let mut report = ProductSyncReport {
            listed: count(remote_ids.len()),
            ..Default::default()
        };
        let now = Utc::now();

        for chunk in remote_ids.chunks(DETAILS_BATCH) {
            let details = match gw.product_details(chunk).await {
                Ok(d) => d,
                Err(err) => {
                    warn!(shop_id, batch = chunk.len(), error = %err, "product details batch failed");
                    report.failed_batches += 1;
                    continue;
                }
            };
            for d in details {
                let upsert = ProductUpsert {
                    shop_id,
                    remote_product_id: d.remote_product_id,
                    remote_sku: d.remote_sku,
                    source_sku: d.source_sku,
                    name: d.name,
                    current_price: d.price,
                    synced_at: now,
                };
                match self.store.upsert_product(&upsert).await {
                    Ok(_) => report.synced += 1,
                    Err(e) => {
                        warn!(
                            shop_id,
                            remote_product_id = upsert.remote_product_id,
                            error = %format!("{e:#}"),
                            "product upsert failed"
                        );
                        report.failed_upserts += 1;
                    }
                }
            }
        }

        info!(
            shop_id,
            listed = report.listed,
            synced = report.synced,
            failed_batches = report.failed_batches,
            "product sync finished"
        );
        Ok(report)
    }

    /// Pull the campaign list and upsert it into the promotion mirror.
    ///
    /// Kinds come from the remote type code. Synced campaigns missing from
    /// the remote list expire; manual ones are left alone.
    pub async fn sync_actions(&self, shop_id: i64) -> EngineResult<Vec<PromotionAction>> {
        let gw = self.gateway_for(shop_id).await?;
        let campaigns = gw.list_campaigns().await.map_err(EngineError::Remote)?;

        let now = Utc::now();
        let mut seen = Vec::with_capacity(campaigns.len());
        for c in &campaigns {
            let kind = PromotionKind::from_remote_type(&c.action_type);
            self.store.upsert_synced_action(shop_id, c, kind, now).await?;
            seen.push(c.action_id);
        }
        let expired = self.store.expire_missing_actions(shop_id, &seen).await?;

        info!(shop_id, remote = campaigns.len(), expired, "campaign sync finished");
        Ok(self.store.list_actions(shop_id).await?)
    }

    /// Resolve `pending` ledger rows older than the grace period by asking
    /// the marketplace who actually participates in each campaign.
    pub async fn sweep_pending(&self, shop_id: i64) -> EngineResult<SweepReport> {
        let gw = self.gateway_for(shop_id).await?;

        let grace = chrono::Duration::from_std(std::time::Duration::from_secs(self.cfg.pending_grace_secs))
            .map_err(|_| EngineError::InvalidInput("pending grace period out of range".to_string()))?;
        let cutoff = Utc::now()
            .checked_sub_signed(grace)
            .ok_or_else(|| EngineError::InvalidInput("pending grace period out of range".to_string()))?;

        let rows = self.store.pending_enrollments(shop_id, cutoff).await?;
        let mut report = SweepReport {
            examined: count(rows.len()),
            ..Default::default()
        };

        let mut by_action: BTreeMap<i64, Vec<PendingEnrollment>> = BTreeMap::new();
        for r in rows {
            by_action.entry(r.enrollment.action_id).or_default().push(r);
        }

        for (action_id, rows) in by_action {
            let members: HashSet<i64> = match gw.campaign_products(action_id).await {
                Ok(ids) => ids.into_iter().collect(),
                Err(err) => {
                    warn!(shop_id, action_id, error = %err, "campaign membership lookup failed");
                    report.unresolved = report.unresolved.saturating_add(count(rows.len()));
                    continue;
                }
            };

            for r in rows {
                let product_id = r.enrollment.product_id;
                let _guard = self.locks.acquire(shop_id, product_id).await;
                if members.contains(&r.remote_product_id) {
                    match self.store.confirm_enrollment(r.enrollment.id, Utc::now()).await {
                        Ok(()) => {
                            report.confirmed += 1;
                            if let Err(e) = self.store.set_product_promoted(product_id, true).await {
                                warn!(product_id, step = "set_promoted", error = %format!("{e:#}"), "flag write failed");
                            }
                        }
                        Err(e) => {
                            warn!(enrollment_id = r.enrollment.id, error = %format!("{e:#}"), "confirm failed");
                            report.unresolved += 1;
                        }
                    }
                } else {
                    match self.store.reject_enrollment(r.enrollment.id).await {
                        Ok(()) => report.rejected += 1,
                        Err(e) => {
                            warn!(enrollment_id = r.enrollment.id, error = %format!("{e:#}"), "reject failed");
                            report.unresolved += 1;
                        }
                    }
                }
            }
        }

        info!(
            shop_id,
            examined = report.examined,
            confirmed = report.confirmed,
            rejected = report.rejected,
            unresolved = report.unresolved,
            "pending sweep finished"
        );
        Ok(report)
    }

    /// Flag products as loss and queue today's loss rows.
    pub async fn import_loss(&self, req: &ImportLossRequest) -> EngineResult<ImportLossReport> {
        let shop_id = req.shop_id;
        self.require_shop(shop_id).await?;
        if let Some(bad) = req.items.iter().find(|i| !i.new_price.is_positive()) {
            return Err(EngineError::InvalidInput(format!(
                "new_price for {} must be positive, got {}",
                bad.source_sku, bad.new_price
            )));
        }

        let today = Utc::now().date_naive();
        let mut report = ImportLossReport::default();

        for item in &req.items {
            let product = match self.store.product_by_source_sku(shop_id, &item.source_sku).await {
                Ok(Some(p)) => p,
                Ok(None) => {
                    report.not_found_skus.push(item.source_sku.clone());
                    continue;
                }
                Err(e) => {
                    warn!(shop_id, source_sku = %item.source_sku, error = %format!("{e:#}"), "product lookup failed");
                    report
                        .failed_skus
                        .push(SkuFailure::store(&item.source_sku, "product_by_source_sku", &e));
                    continue;
                }
            };
            let _guard = self.locks.acquire(shop_id, product.id).await;

            if let Err(e) = self.store.set_product_loss(product.id, true).await {
                warn!(product_id = product.id, step = "set_product_loss", error = %format!("{e:#}"), "loss flag write failed");
                report
                    .failed_skus
                    .push(SkuFailure::store(&item.source_sku, "set_product_loss", &e));
                continue;
            }
            match self
                .store
                .upsert_loss_product(product.id, today, product.current_price, item.new_price)
                .await
            {
                Ok(LossUpsert::Inserted(id)) | Ok(LossUpsert::Refreshed(id)) => report.imported_ids.push(id),
                Ok(LossUpsert::AlreadyProcessed(id)) => {
                    debug!(loss_product_id = id, "already processed today; skipped");
                    report.skipped_skus.push(item.source_sku.clone());
                }
                Err(e) => {
                    warn!(product_id = product.id, step = "upsert_loss_product", error = %format!("{e:#}"), "loss row write failed");
                    report
                        .failed_skus
                        .push(SkuFailure::store(&item.source_sku, "upsert_loss_product", &e));
                }
            }
        }

        info!(
            shop_id,
            imported = report.imported_ids.len(),
            not_found = report.not_found_skus.len(),
            skipped = report.skipped_skus.len(),
            failed = report.failed_skus.len(),
            "loss import finished"
        );
        Ok(report)
    }

    /// Register an operator-managed campaign with an explicit kind.
    pub async fn register_manual_action(&self, m: &ManualAction) -> EngineResult<PromotionAction> {
        self.require_shop(m.shop_id).await?;
        if m.title.trim().is_empty() {
            return Err(EngineError::InvalidInput("title must not be empty".to_string()));
        }
        if let (Some(start), Some(end)) = (m.date_start, m.date_end) {
            if start > end {
                return Err(EngineError::InvalidInput("date_start is after date_end".to_string()));
            }
        }

        match self.store.insert_manual_action(m).await? {
            Some(a) => {
                info!(shop_id = m.shop_id, action_id = m.action_id, kind = a.kind.as_str(), "manual campaign registered");
                Ok(a)
            }
            None => Err(EngineError::InvalidInput(format!(
                "action {} already exists for shop {}",
                m.action_id, m.shop_id
            ))),
        }
    }

    pub async fn disable_action(&self, shop_id: i64, action_id: i64) -> EngineResult<()> {
        self.require_shop(shop_id).await?;
        if !self
            .store
            .set_action_status(shop_id, action_id, ActionStatus::Disabled)
            .await?
        {
            return Err(EngineError::ActionNotFound { shop_id, action_id });
        }
        info!(shop_id, action_id, "campaign disabled");
        Ok(())
    }

    pub async fn delete_action(&self, shop_id: i64, action_id: i64) -> EngineResult<()> {
        self.require_shop(shop_id).await?;
        if !self.store.delete_action(shop_id, action_id).await? {
            return Err(EngineError::ActionNotFound { shop_id, action_id });
        }
        info!(shop_id, action_id, "campaign deleted");
        Ok(())
    }
}
