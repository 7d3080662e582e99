//! Exclusion filters hold for products flagged while a batch is running.
//!
//! GREEN when:
//! - A product marked as loss after the batch listed it, but before its turn,
//!   is skipped under exclude_loss=true: no enroll call, no ledger row, not
//!   counted, and listed in skipped_product_ids.
//! - Products still matching the filters are enrolled as usual.

use std::time::Duration;

use pdk_market_paper::PaperCall;
use pdk_reconcile::{BatchEnrollRequest, CancelFlag, ImportLossRequest, ItemStatus, LossImportItem};
use pdk_schemas::{CampaignSelector, PromotionKind};
use pdk_testkit::{units, Desk};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn product_flagged_as_loss_mid_batch_is_skipped() {
    let desk = Desk::new();
    let a = desk.product(501, "SKU-A", units(100));
    let b = desk.product(502, "SKU-B", units(100));
    desk.campaign(7, PromotionKind::Discount);
    desk.market.set_delay(Duration::from_millis(50));

    let req = BatchEnrollRequest {
        shop_id: desk.shop_id,
        action_ids: CampaignSelector::Explicit(vec![7]),
        exclude_loss: true,
        exclude_promoted: false,
    };
    let engine = desk.engine.clone();
    let run = tokio::spawn(async move { engine.batch_enroll(&req, &CancelFlag::new()).await });

    // Both products are listed; A is waiting on the marketplace.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let imported = desk
        .engine
        .import_loss(&ImportLossRequest {
            shop_id: desk.shop_id,
            items: vec![LossImportItem { source_sku: "SKU-B".to_string(), new_price: units(60) }],
        })
        .await
        .unwrap();
    assert_eq!(imported.imported_ids.len(), 1);

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.details.len(), 1);
    assert_eq!(report.details[0].product_id, a.id);
    assert_eq!(report.details[0].status, ItemStatus::Success);
    assert_eq!(report.enrolled_count, 1);
    assert_eq!(report.failed_count, 0);
    assert_eq!(report.skipped_product_ids, vec![b.id]);

    let enrolled: Vec<i64> = desk
        .market
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            PaperCall::Enroll { remote_id, .. } => Some(remote_id),
            _ => None,
        })
        .collect();
    assert_eq!(enrolled, vec![501]);
    assert!(desk.mirror.enrollments_of(b.id).is_empty());
    assert!(!desk.mirror.product_row(b.id).unwrap().is_promoted);
    assert_eq!(desk.engine.locks().live_slots(), 0);
}
