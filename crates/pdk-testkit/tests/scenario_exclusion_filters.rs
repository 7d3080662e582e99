//! Exclusion flags on batch enroll.
//!
//! GREEN when:
//! - exclude_loss=true never selects a loss product.
//! - exclude_promoted=true never selects a promoted product.
//! - Inactive products are never selected.
//! - With both flags off every active product is attempted.

use pdk_market_paper::PaperCall;
use pdk_reconcile::{BatchEnrollRequest, CancelFlag, MirrorStore};
use pdk_schemas::{CampaignSelector, ProductStatus, PromotionKind};
use pdk_testkit::{units, Desk};

fn seeded() -> (Desk, [i64; 4]) {
    let desk = Desk::new();
    let plain = desk.product(1, "PLAIN", units(10)).id;
    let loss = desk.product(2, "LOSS", units(10)).id;
    let promoted = desk.product(3, "PROMO", units(10)).id;
    let archived = desk.product(4, "ARCH", units(10)).id;
    desk.mirror.set_flags(loss, true, false);
    desk.mirror.set_flags(promoted, false, true);
    desk.mirror.set_status(archived, ProductStatus::Archived);
    desk.campaign(77, PromotionKind::Discount);
    (desk, [plain, loss, promoted, archived])
}

fn enrolled_remote_ids(desk: &Desk) -> Vec<i64> {
    desk.market
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            PaperCall::Enroll { remote_id, .. } => Some(remote_id),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn store_query_honours_both_flags() {
    let (desk, [plain, loss, promoted, _]) = seeded();
    let store = desk.engine.store();

    let ids = |v: Vec<pdk_schemas::Product>| v.into_iter().map(|p| p.id).collect::<Vec<_>>();
    assert_eq!(ids(store.eligible_products(desk.shop_id, true, false).await.unwrap()), vec![plain, promoted]);
    assert_eq!(ids(store.eligible_products(desk.shop_id, false, true).await.unwrap()), vec![plain, loss]);
    assert_eq!(ids(store.eligible_products(desk.shop_id, true, true).await.unwrap()), vec![plain]);
    for p in store.eligible_products(desk.shop_id, true, true).await.unwrap() {
        assert!(!p.is_loss && !p.is_promoted);
    }
}

#[tokio::test]
async fn batch_enroll_with_exclusions_skips_flagged_products() {
    let (desk, [plain, ..]) = seeded();
    let req = BatchEnrollRequest {
        shop_id: desk.shop_id,
        action_ids: CampaignSelector::Explicit(vec![77]),
        exclude_loss: true,
        exclude_promoted: true,
    };
    let report = desk.engine.batch_enroll(&req, &CancelFlag::new()).await.unwrap();

    assert_eq!(report.details.len(), 1);
    assert_eq!(report.details[0].product_id, plain);
    assert_eq!(enrolled_remote_ids(&desk), vec![1]);
}

#[tokio::test]
async fn batch_enroll_without_exclusions_takes_every_active_product() {
    let (desk, _) = seeded();
    let req = BatchEnrollRequest {
        shop_id: desk.shop_id,
        action_ids: CampaignSelector::Explicit(vec![77]),
        exclude_loss: false,
        exclude_promoted: false,
    };
    let report = desk.engine.batch_enroll(&req, &CancelFlag::new()).await.unwrap();

    assert_eq!(report.details.len(), 3);
    assert_eq!(enrolled_remote_ids(&desk), vec![1, 2, 3]);
}
