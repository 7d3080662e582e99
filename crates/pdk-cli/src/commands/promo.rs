//! Shop-scoped workflow commands: sync, sweep, stats, loss processing.
//!
//! Each command prints its report as JSON and journals it. Per-item
//! failures are part of the report; only request-level errors fail the
//! process.

use anyhow::Result;
use pdk_reconcile::{CancelFlag, EngineResult, ProcessLossRequest};
use serde::Serialize;
use tracing::info;

use super::{journal, print_json, wire};

/// Journal, print, then surface a request-level error as the exit status.
fn finish<T: Serialize>(w: &super::Wired, shop_id: i64, operation: &str, result: EngineResult<T>) -> Result<()> {
    journal(&w.cfg, shop_id, operation, &result)?;
    let report = result?;
    print_json(&report)
}

pub async fn sync_products(config: &[String], shop_id: i64) -> Result<()> {
    let w = wire(config).await?;
    info!(shop_id, config_hash = %w.config_hash, "product sync");
    let result = w.engine.sync_products(shop_id).await;
    finish(&w, shop_id, "sync_products", result)
}

pub async fn sync_actions(config: &[String], shop_id: i64) -> Result<()> {
    let w = wire(config).await?;
    info!(shop_id, config_hash = %w.config_hash, "campaign sync");
    let result = w.engine.sync_actions(shop_id).await;
    finish(&w, shop_id, "sync_actions", result)
}

pub async fn sweep(config: &[String], shop_id: i64) -> Result<()> {
    let w = wire(config).await?;
    info!(shop_id, grace_secs = w.cfg.engine.pending_grace_secs, "pending sweep");
    let result = w.engine.sweep_pending(shop_id).await;
    finish(&w, shop_id, "sweep_pending", result)
}

pub async fn stats(config: &[String], shop_id: i64) -> Result<()> {
    let w = wire(config).await?;
    let overview = w.engine.stats(shop_id).await?;
    print_json(&overview)
}

/// Ctrl-C stops the batch at the next item boundary.
pub async fn process_loss(config: &[String], shop_id: i64, ids: Vec<i64>, rejoin: Option<i64>, skip_completed: bool) -> Result<()> {
    let w = wire(config).await?;
    let req = ProcessLossRequest {
        shop_id,
        loss_product_ids: ids,
        rejoin_action_id: rejoin,
        skip_completed,
    };

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let result = w.engine.process_loss(&req, &cancel).await;
    watcher.abort();
    finish(&w, shop_id, "process_loss", result)
}
