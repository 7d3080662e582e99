//! Remove, reprice, re-enroll per SKU.
//!
//! GREEN when:
//! - Each SKU leaves its campaigns, gets the new price remotely and locally,
//!   and rejoins every selected campaign at the new price.
//! - Unknown SKUs are listed and skipped.
//! - A failed remote price update keeps the mirror price and re-enrolls at it.
//! - is_promoted is raised whenever a target existed and was attempted.
//! - Non-positive prices are rejected before any remote call.
//! - A mirror lookup that fails partway through a batch is reported for that
//!   SKU; items already done keep their result and the call still succeeds.

use std::time::Duration;

use pdk_reconcile::{CancelFlag, EngineError, RemoveRepriceRequest, RepriceItem};
use pdk_schemas::{CampaignSelector, EnrollmentStatus, PromotionKind};
use pdk_testkit::{units, Desk};

fn item(sku: &str, price: i64) -> RepriceItem {
    RepriceItem {
        source_sku: sku.to_string(),
        new_price: units(price),
    }
}

#[tokio::test]
async fn full_cycle_for_found_skus() {
    let desk = Desk::new();
    let p = desk.product(501, "SKU-P", units(100));
    desk.campaign(1, PromotionKind::Discount);
    desk.campaign(2, PromotionKind::ElasticBoost);
    desk.mirror
        .add_enrollment(p.id, PromotionKind::Discount, 1, units(72), EnrollmentStatus::Active);
    desk.market.add_member(1, 501, units(72));

    let req = RemoveRepriceRequest {
        shop_id: desk.shop_id,
        products: vec![item("SKU-P", 50), item("NOPE", 10)],
        reenroll_action_ids: CampaignSelector::AllActive,
    };
    let report = desk.engine.remove_reprice_reenroll(&req, &CancelFlag::new()).await.unwrap();

    assert_eq!(report.processed_count, 1);
    assert_eq!(report.not_found_skus, vec!["NOPE".to_string()]);
    let it = &report.items[0];
    assert!(it.exit_ok);
    assert!(it.price_updated);
    assert_eq!(it.enrolled, vec![1, 2]);
    assert!(it.enroll_failed.is_empty());
    assert!(it.errors.is_empty());

    let product = desk.mirror.product_row(p.id).unwrap();
    assert_eq!(product.current_price, units(50));
    assert!(product.is_promoted);
    assert_eq!(desk.market.member_price(1, 501), Some(units(36)));
    assert_eq!(desk.market.member_price(2, 501), Some(units(36)));

    let rows = desk.mirror.enrollments_of(p.id);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().filter(|e| e.status == EnrollmentStatus::Active).count(), 2);
}

#[tokio::test]
async fn failed_price_update_keeps_mirror_price() {
    let desk = Desk::new();
    let p = desk.product(501, "SKU-P", units(100));
    desk.campaign(1, PromotionKind::Discount);
    desk.market.fail_price(501);

    let req = RemoveRepriceRequest {
        shop_id: desk.shop_id,
        products: vec![item("SKU-P", 50)],
        reenroll_action_ids: CampaignSelector::Explicit(vec![1]),
    };
    let report = desk.engine.remove_reprice_reenroll(&req, &CancelFlag::new()).await.unwrap();

    let it = &report.items[0];
    assert!(!it.price_updated);
    assert!(it.errors[0].starts_with("reprice:"));
    assert_eq!(desk.mirror.product_row(p.id).unwrap().current_price, units(100));
    assert_eq!(desk.market.member_price(1, 501), Some(units(72)));
}

#[tokio::test]
async fn attempted_target_raises_flag_even_if_rejected() {
    let desk = Desk::new();
    let p = desk.product(501, "SKU-P", units(100));
    desk.campaign(1, PromotionKind::Discount);
    desk.market.fail_enroll(1, 501);

    let req = RemoveRepriceRequest {
        shop_id: desk.shop_id,
        products: vec![item("SKU-P", 90)],
        reenroll_action_ids: CampaignSelector::Explicit(vec![1]),
    };
    let report = desk.engine.remove_reprice_reenroll(&req, &CancelFlag::new()).await.unwrap();
    assert_eq!(report.items[0].enroll_failed, vec![1]);
    assert!(desk.mirror.product_row(p.id).unwrap().is_promoted);
}

#[tokio::test]
async fn no_targets_leaves_flag_down() {
    let desk = Desk::new();
    let p = desk.product(501, "SKU-P", units(100));
    desk.mirror.set_flags(p.id, false, true);

    let req = RemoveRepriceRequest {
        shop_id: desk.shop_id,
        products: vec![item("SKU-P", 90)],
        reenroll_action_ids: CampaignSelector::Explicit(vec![]),
    };
    let report = desk.engine.remove_reprice_reenroll(&req, &CancelFlag::new()).await.unwrap();
    assert!(report.items[0].price_updated);
    assert!(!desk.mirror.product_row(p.id).unwrap().is_promoted);
}

#[tokio::test]
async fn non_positive_price_is_rejected_up_front() {
    let desk = Desk::new();
    desk.product(501, "SKU-P", units(100));
    let req = RemoveRepriceRequest {
        shop_id: desk.shop_id,
        products: vec![item("SKU-P", 0)],
        reenroll_action_ids: CampaignSelector::AllActive,
    };
    let err = desk.engine.remove_reprice_reenroll(&req, &CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    assert!(desk.market.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lookup_failure_mid_batch_keeps_earlier_items() {
    let desk = Desk::new();
    let a = desk.product(501, "SKU-A", units(100));
    desk.product(502, "SKU-B", units(100));
    desk.campaign(1, PromotionKind::Discount);
    desk.market.set_delay(Duration::from_millis(50));

    let req = RemoveRepriceRequest {
        shop_id: desk.shop_id,
        products: vec![item("SKU-A", 80), item("SKU-B", 70)],
        reenroll_action_ids: CampaignSelector::Explicit(vec![1]),
    };
    let engine = desk.engine.clone();
    let run = tokio::spawn(async move { engine.remove_reprice_reenroll(&req, &CancelFlag::new()).await });

    // SKU-A is past its lookup and waiting on the marketplace.
    tokio::time::sleep(Duration::from_millis(20)).await;
    desk.mirror.fail("product_by_source_sku");

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.processed_count, 1);
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].source_sku, "SKU-A");
    assert!(report.items[0].price_updated);
    assert_eq!(report.items[0].enrolled, vec![1]);

    assert_eq!(report.failed_skus.len(), 1);
    assert_eq!(report.failed_skus[0].source_sku, "SKU-B");
    assert!(report.failed_skus[0].error.contains("product_by_source_sku"));
    assert!(report.not_found_skus.is_empty());

    assert_eq!(desk.mirror.product_row(a.id).unwrap().current_price, units(80));
    assert_eq!(desk.market.member_price(1, 501), Some(desk.action_price(units(80))));
    assert_eq!(desk.market.member_price(1, 502), None);
    assert_eq!(desk.engine.locks().live_slots(), 0);
}
