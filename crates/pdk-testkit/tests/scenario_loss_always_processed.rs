//! Loss processing: exit, reprice, rejoin, always marked processed.
//!
//! GREEN when:
//! - Loss row L for P with new_price 80 and no rejoin target ends with
//!   P.current_price = 80, price_updated, not rejoined, processed_at set,
//!   reprice 1/0 and rejoin 0/0.
//! - processed_at is written even when every step fails.
//! - A rejoin target enrolls at the refreshed price.
//! - skip_completed skips steps already recorded.
//! - Unknown ids are reported; an inactive rejoin target aborts up front.

use pdk_market_paper::PaperCall;
use pdk_reconcile::{CancelFlag, EngineError, ProcessLossRequest, StepCounter, StepOutcome};
use pdk_schemas::{ActionStatus, EnrollmentStatus, PromotionKind};
use pdk_testkit::{units, Desk};

fn req(desk: &Desk, ids: Vec<i64>, rejoin: Option<i64>) -> ProcessLossRequest {
    ProcessLossRequest {
        shop_id: desk.shop_id,
        loss_product_ids: ids,
        rejoin_action_id: rejoin,
        skip_completed: false,
    }
}

#[tokio::test]
async fn reprice_without_rejoin_target() {
    let desk = Desk::new();
    let p = desk.product(501, "SKU-P", units(100));
    let l = desk.mirror.add_loss(p.id, units(80));

    let report = desk
        .engine
        .process_loss(&req(&desk, vec![l], None), &CancelFlag::new())
        .await
        .unwrap();

    let product = desk.mirror.product_row(p.id).unwrap();
    assert_eq!(product.current_price, units(80));
    assert!(!product.is_promoted);
    assert_eq!(desk.market.price_of(501), Some(units(80)));

    let row = desk.mirror.loss_row(l).unwrap();
    assert!(row.price_updated);
    assert!(row.promotion_exited);
    assert!(!row.promotion_rejoined);
    assert!(row.processed_at.is_some());

    assert_eq!(report.processed_count, 1);
    assert_eq!(report.steps.exit, StepCounter { success: 1, failed: 0, skipped: 0 });
    assert_eq!(report.steps.reprice, StepCounter { success: 1, failed: 0, skipped: 0 });
    assert_eq!(report.steps.rejoin, StepCounter::default());
    assert_eq!(report.items[0].rejoin, StepOutcome::NotApplicable);
}

#[tokio::test]
async fn processed_even_when_every_step_fails() {
    let desk = Desk::new();
    let p = desk.product(501, "SKU-P", units(100));
    desk.campaign(3, PromotionKind::Discount);
    desk.campaign(4, PromotionKind::Discount);
    desk.mirror
        .add_enrollment(p.id, PromotionKind::Discount, 3, units(72), EnrollmentStatus::Active);
    desk.market.add_member(3, 501, units(72));
    desk.mirror.set_flags(p.id, true, true);
    desk.market.fail_remove(3, 501);
    desk.market.fail_price(501);
    desk.market.fail_enroll(4, 501);
    let l = desk.mirror.add_loss(p.id, units(80));

    let report = desk
        .engine
        .process_loss(&req(&desk, vec![l], Some(4)), &CancelFlag::new())
        .await
        .unwrap();

    let item = &report.items[0];
    assert_eq!(item.exit, StepOutcome::Failed);
    assert_eq!(item.reprice, StepOutcome::Failed);
    assert_eq!(item.rejoin, StepOutcome::Failed);
    assert_eq!(item.errors.len(), 3);
    assert_eq!(report.steps.exit.failed, 1);
    assert_eq!(report.steps.reprice.failed, 1);
    assert_eq!(report.steps.rejoin.failed, 1);

    let row = desk.mirror.loss_row(l).unwrap();
    assert!(row.processed_at.is_some());
    assert!(!row.price_updated && !row.promotion_exited && !row.promotion_rejoined);
    assert_eq!(report.processed_count, 1);

    // Failed removal keeps the ledger row active; the flag is cleared anyway.
    let product = desk.mirror.product_row(p.id).unwrap();
    assert_eq!(product.current_price, units(100));
    assert!(!product.is_promoted);
    assert_eq!(desk.mirror.enrollments_of(p.id)[0].status, EnrollmentStatus::Active);
}

#[tokio::test]
async fn exit_then_rejoin_at_refreshed_price() {
    let desk = Desk::new();
    let p = desk.product(501, "SKU-P", units(100));
    desk.campaign(3, PromotionKind::Discount);
    desk.campaign(5, PromotionKind::ElasticBoost);
    desk.mirror
        .add_enrollment(p.id, PromotionKind::Discount, 3, units(72), EnrollmentStatus::Active);
    desk.market.add_member(3, 501, units(72));
    let l = desk.mirror.add_loss(p.id, units(80));

    let report = desk
        .engine
        .process_loss(&req(&desk, vec![l], Some(5)), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(report.steps.exit.success, 1);
    assert_eq!(report.steps.rejoin.success, 1);

    assert!(!desk.market.is_member(3, 501));
    assert_eq!(desk.market.member_price(5, 501), Some(units(80).scale_bps(7_200)));

    let rows = desk.mirror.enrollments_of(p.id);
    assert_eq!(rows[0].status, EnrollmentStatus::Exited);
    assert_eq!(rows[1].action_id, 5);
    assert_eq!(rows[1].status, EnrollmentStatus::Active);
    assert!(desk.mirror.product_row(p.id).unwrap().is_promoted);
    assert!(desk.mirror.loss_row(l).unwrap().promotion_rejoined);

    // Steps ran in order: remove, reprice, enroll.
    let kinds: Vec<&str> = desk
        .market
        .calls()
        .iter()
        .map(|c| match c {
            PaperCall::Remove { .. } => "remove",
            PaperCall::UpdatePrice { .. } => "price",
            PaperCall::Enroll { .. } => "enroll",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["remove", "price", "enroll"]);
}

#[tokio::test]
async fn skip_completed_only_reruns_open_steps() {
    let desk = Desk::new();
    let p = desk.product(501, "SKU-P", units(100));
    let l = desk.mirror.add_loss(p.id, units(80));
    desk.mirror.set_loss_steps(l, true, false, false);

    let mut r = req(&desk, vec![l], None);
    r.skip_completed = true;
    let report = desk.engine.process_loss(&r, &CancelFlag::new()).await.unwrap();

    assert_eq!(report.steps.exit, StepCounter { success: 0, failed: 0, skipped: 1 });
    assert_eq!(report.steps.reprice.success, 1);
    assert!(!desk
        .market
        .calls()
        .iter()
        .any(|c| matches!(c, PaperCall::Remove { .. })));
}

#[tokio::test]
async fn missing_ids_reported_and_bad_rejoin_aborts() {
    let desk = Desk::new();
    let p = desk.product(501, "SKU-P", units(100));
    let l = desk.mirror.add_loss(p.id, units(80));

    let report = desk
        .engine
        .process_loss(&req(&desk, vec![l, 123_456], None), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(report.missing_ids, vec![123_456]);
    assert_eq!(report.items.len(), 1);

    let err = desk
        .engine
        .process_loss(&req(&desk, vec![123_456], None), &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LossProductsNotFound { .. }));

    desk.mirror
        .add_action(desk.shop_id, 66, PromotionKind::Discount, ActionStatus::Disabled);
    let l2 = desk.mirror.add_loss(desk.product(502, "SKU-Q", units(10)).id, units(8));
    desk.market.clear_calls();
    let err = desk
        .engine
        .process_loss(&req(&desk, vec![l2], Some(66)), &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ActionNotFound { action_id: 66, .. }));
    assert!(desk.market.calls().is_empty());
    assert!(desk.mirror.loss_row(l2).unwrap().processed_at.is_none());
}
