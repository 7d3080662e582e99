use chrono::Utc;
use pdk_schemas::{ActionStatus, LossProduct, LossStep, Product, ProductStatus};
use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::types::{
    BatchEnrollReport, BatchEnrollRequest, EnrollDetail, ItemStatus, ItemWarning, LossItemReport,
    ProcessLossReport, ProcessLossRequest, RemoveRepriceReport, RemoveRepriceRequest, RepriceItemReport,
    SkuFailure, StepOutcome,
};

fn dedup(ids: &[i64]) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

/// Batch filters, re-applied to the row read under the product lock.
fn passes_filters(p: &Product, req: &BatchEnrollRequest) -> bool {
    p.status == ProductStatus::Active && !(req.exclude_loss && p.is_loss) && !(req.exclude_promoted && p.is_promoted)
}

impl Engine {
    /// Enroll every eligible product of a shop into the selected campaigns.
    ///
    /// A product succeeds when at least one campaign accepted it; failures on
    /// other campaigns are kept in its `error` without rolling anything back.
    pub async fn batch_enroll(
        &self,
        req: &BatchEnrollRequest,
        cancel: &CancelFlag,
    ) -> EngineResult<BatchEnrollReport> {
        let shop_id = req.shop_id;
        let gw = self.gateway_for(shop_id).await?;

        let (targets, unresolved) = self.resolve_campaigns(shop_id, &req.action_ids).await?;
        if targets.is_empty() {
            return Err(EngineError::NoCampaigns { shop_id });
        }

        let products = self
            .store
            .eligible_products(shop_id, req.exclude_loss, req.exclude_promoted)
            .await?;

        info!(
            shop_id,
            products = products.len(),
            campaigns = targets.len(),
            unresolved = unresolved.len(),
            "batch enroll started"
        );

        let mut report = BatchEnrollReport {
            unresolved_action_ids: unresolved,
            ..Default::default()
        };

        for candidate in products {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let _guard = self.locks.acquire(shop_id, candidate.id).await;
            let product = self.fresh_product(candidate).await;
            if !passes_filters(&product, req) {
                debug!(shop_id, product_id = product.id, "no longer eligible; skipped");
                report.skipped_product_ids.push(product.id);
                continue;
            }

            let mut warnings = Vec::new();
            let mut errors = Vec::new();
            let mut any_ok = false;
            for action in &targets {
                match self
                    .enroll_one(gw.as_ref(), &product, action, product.current_price, &mut warnings)
                    .await
                {
                    Ok(()) => any_ok = true,
                    Err(e) => errors.push(e),
                }
            }

            let status = if any_ok {
                self.mark_promoted(product.id, &mut warnings).await;
                report.enrolled_count += 1;
                ItemStatus::Success
            } else {
                report.failed_count += 1;
                ItemStatus::Failed
            };

            report.details.push(EnrollDetail {
                product_id: product.id,
                source_sku: product.source_sku.clone(),
                status,
                error: if errors.is_empty() { None } else { Some(errors.join("; ")) },
                warnings,
            });
        }

        info!(
            shop_id,
            enrolled = report.enrolled_count,
            failed = report.failed_count,
            skipped = report.skipped_product_ids.len(),
            cancelled = report.cancelled,
            "batch enroll finished"
        );
        Ok(report)
    }

    /// Exit, reprice and optionally rejoin each loss product.
    ///
    /// The three steps are recorded independently and the row is marked
    /// processed after they ran, whatever they returned.
    pub async fn process_loss(
        &self,
        req: &ProcessLossRequest,
        cancel: &CancelFlag,
    ) -> EngineResult<ProcessLossReport> {
        let shop_id = req.shop_id;
        let gw = self.gateway_for(shop_id).await?;

        let wanted = dedup(&req.loss_product_ids);
        let mut found = self.store.loss_products_by_ids(shop_id, &wanted).await?;

        let mut rows: Vec<LossProduct> = Vec::with_capacity(found.len());
        let mut missing_ids = Vec::new();
        for id in &wanted {
            match found.iter().position(|r| r.id == *id) {
                Some(pos) => rows.push(found.swap_remove(pos)),
                None => missing_ids.push(*id),
            }
        }
        if rows.is_empty() {
            return Err(EngineError::LossProductsNotFound { shop_id });
        }

        let rejoin = match req.rejoin_action_id {
            Some(action_id) => match self.store.action(shop_id, action_id).await? {
                Some(a) if a.status == ActionStatus::Active => Some(a),
                _ => return Err(EngineError::ActionNotFound { shop_id, action_id }),
            },
            None => None,
        };

        info!(
            shop_id,
            rows = rows.len(),
            missing = missing_ids.len(),
            rejoin_action_id = ?req.rejoin_action_id,
            "process loss started"
        );

        let mut report = ProcessLossReport {
            missing_ids,
            ..Default::default()
        };

        for row in rows {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let _guard = self.locks.acquire(shop_id, row.product_id).await;
            let mut item = LossItemReport {
                loss_product_id: row.id,
                product_id: row.product_id,
                exit: StepOutcome::Failed,
                reprice: StepOutcome::Failed,
                rejoin: if rejoin.is_some() {
                    StepOutcome::Failed
                } else {
                    StepOutcome::NotApplicable
                },
                errors: Vec::new(),
                warnings: Vec::new(),
            };

            match self.store.product(shop_id, row.product_id).await {
                Ok(Some(product)) => {
                    let skip = |step: LossStep| req.skip_completed && step.is_done(&row);

                    // 1) exit
                    item.exit = if skip(LossStep::PromotionExited) {
                        StepOutcome::Skipped
                    } else {
                        let out = self.exit_all(gw.as_ref(), &product, &mut item.warnings).await;
                        item.errors.extend(out.errors);
                        if out.all_ok {
                            self.mark_step(&row, LossStep::PromotionExited, &mut item.warnings).await;
                            StepOutcome::Success
                        } else {
                            StepOutcome::Failed
                        }
                    };

                    // 2) reprice
                    let mut price_now = product.current_price;
                    item.reprice = if skip(LossStep::PriceUpdated) {
                        StepOutcome::Skipped
                    } else {
                        match gw.update_price(product.remote_product_id, row.new_price).await {
                            Ok(()) => {
                                price_now = row.new_price;
                                if let Err(e) = self.store.set_product_price(product.id, row.new_price).await {
                                    warn!(product_id = product.id, step = "set_product_price", error = %format!("{e:#}"), "price write failed");
                                    item.warnings.push(ItemWarning::degraded("set_product_price", &e));
                                }
                                self.mark_step(&row, LossStep::PriceUpdated, &mut item.warnings).await;
                                StepOutcome::Success
                            }
                            Err(err) => {
                                item.errors.push(format!("reprice: {err}"));
                                StepOutcome::Failed
                            }
                        }
                    };

                    // 3) rejoin
                    if let Some(action) = &rejoin {
                        item.rejoin = if skip(LossStep::PromotionRejoined) {
                            StepOutcome::Skipped
                        } else {
                            match self
                                .enroll_one(gw.as_ref(), &product, action, price_now, &mut item.warnings)
                                .await
                            {
                                Ok(()) => {
                                    self.mark_step(&row, LossStep::PromotionRejoined, &mut item.warnings)
                                        .await;
                                    self.mark_promoted(product.id, &mut item.warnings).await;
                                    StepOutcome::Success
                                }
                                Err(e) => {
                                    item.errors.push(format!("rejoin: {e}"));
                                    StepOutcome::Failed
                                }
                            }
                        };
                    }
                }
                Ok(None) => item.errors.push(format!("product {} not found", row.product_id)),
                Err(e) => item.errors.push(format!("product {} unreadable: {e:#}", row.product_id)),
            }

            match self.store.mark_loss_processed(row.id, Utc::now()).await {
                Ok(()) => report.processed_count += 1,
                Err(e) => {
                    warn!(loss_product_id = row.id, step = "mark_loss_processed", error = %format!("{e:#}"), "processed marker failed");
                    item.warnings.push(ItemWarning::degraded("mark_loss_processed", &e));
                }
            }

            report.steps.exit.record(item.exit);
            report.steps.reprice.record(item.reprice);
            report.steps.rejoin.record(item.rejoin);
            report.items.push(item);
        }

        info!(
            shop_id,
            processed = report.processed_count,
            exit_ok = report.steps.exit.success,
            reprice_ok = report.steps.reprice.success,
            rejoin_ok = report.steps.rejoin.success,
            cancelled = report.cancelled,
            "process loss finished"
        );
        Ok(report)
    }

    async fn mark_step(&self, row: &LossProduct, step: LossStep, warnings: &mut Vec<ItemWarning>) {
        if let Err(e) = self.store.mark_loss_step(row.id, step).await {
            warn!(loss_product_id = row.id, step = step.column(), error = %format!("{e:#}"), "step marker failed");
            warnings.push(ItemWarning::degraded(step.column(), &e));
        }
    }

    /// For each (SKU, new price): leave every campaign, reprice, and rejoin
    /// the selected campaigns at the new price.
    pub async fn remove_reprice_reenroll(
        &self,
        req: &RemoveRepriceRequest,
        cancel: &CancelFlag,
    ) -> EngineResult<RemoveRepriceReport> {
        let shop_id = req.shop_id;
        if let Some(bad) = req.products.iter().find(|p| !p.new_price.is_positive()) {
            return Err(EngineError::InvalidInput(format!(
                "new_price for {} must be positive, got {}",
                bad.source_sku, bad.new_price
            )));
        }

        let gw = self.gateway_for(shop_id).await?;
        let (targets, unresolved) = self.resolve_campaigns(shop_id, &req.reenroll_action_ids).await?;

        info!(
            shop_id,
            items = req.products.len(),
            campaigns = targets.len(),
            unresolved = unresolved.len(),
            "remove-reprice-reenroll started"
        );

        let mut report = RemoveRepriceReport {
            unresolved_action_ids: unresolved,
            ..Default::default()
        };

        for entry in &req.products {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let found = match self.store.product_by_source_sku(shop_id, &entry.source_sku).await {
                Ok(Some(p)) => p,
                Ok(None) => {
                    report.not_found_skus.push(entry.source_sku.clone());
                    continue;
                }
                Err(e) => {
                    warn!(shop_id, source_sku = %entry.source_sku, error = %format!("{e:#}"), "product lookup failed");
                    report
                        .failed_skus
                        .push(SkuFailure::store(&entry.source_sku, "product_by_source_sku", &e));
                    continue;
                }
            };

            let _guard = self.locks.acquire(shop_id, found.id).await;
            let product = self.fresh_product(found).await;

            let mut item = RepriceItemReport {
                source_sku: entry.source_sku.clone(),
                product_id: product.id,
                exit_ok: false,
                price_updated: false,
                enrolled: Vec::new(),
                enroll_failed: Vec::new(),
                errors: Vec::new(),
                warnings: Vec::new(),
            };

            let out = self.exit_all(gw.as_ref(), &product, &mut item.warnings).await;
            item.exit_ok = out.all_ok;
            item.errors.extend(out.errors);

            let mut price_now = product.current_price;
            match gw.update_price(product.remote_product_id, entry.new_price).await {
                Ok(()) => {
                    item.price_updated = true;
                    price_now = entry.new_price;
                    if let Err(e) = self.store.set_product_price(product.id, entry.new_price).await {
                        warn!(product_id = product.id, step = "set_product_price", error = %format!("{e:#}"), "price write failed");
                        item.warnings.push(ItemWarning::degraded("set_product_price", &e));
                    }
                }
                Err(err) => item.errors.push(format!("reprice: {err}")),
            }

            for action in &targets {
                match self
                    .enroll_one(gw.as_ref(), &product, action, price_now, &mut item.warnings)
                    .await
                {
                    Ok(()) => item.enrolled.push(action.action_id),
                    Err(e) => {
                        item.enroll_failed.push(action.action_id);
                        item.errors.push(e);
                    }
                }
            }
            if !targets.is_empty() {
                self.mark_promoted(product.id, &mut item.warnings).await;
            }

            report.processed_count += 1;
            report.items.push(item);
        }

        info!(
            shop_id,
            processed = report.processed_count,
            not_found = report.not_found_skus.len(),
            failed = report.failed_skus.len(),
            cancelled = report.cancelled,
            "remove-reprice-reenroll finished"
        );
        Ok(report)
    }
}
