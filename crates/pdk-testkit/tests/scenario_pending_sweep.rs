//! Pending-enrollment sweep.
//!
//! GREEN when:
//! - A stale pending row whose product is a remote member is confirmed and
//!   the product is flagged promoted.
//! - A stale pending row whose product is absent remotely is rejected.
//! - Rows younger than the grace period are left alone.
//! - A failing membership lookup leaves that campaign's rows unresolved.

use chrono::{Duration, Utc};
use pdk_reconcile::EngineConfig;
use pdk_schemas::{EnrollmentStatus, PromotionKind};
use pdk_testkit::{units, Desk};

fn desk_with_grace(secs: u64) -> Desk {
    Desk::with_config(EngineConfig {
        pending_grace_secs: secs,
        ..EngineConfig::default()
    })
}

#[tokio::test]
async fn stale_rows_are_confirmed_or_rejected() {
    let desk = desk_with_grace(300);
    let a = desk.product(501, "SKU-A", units(100));
    let b = desk.product(502, "SKU-B", units(100));
    let c = desk.product(503, "SKU-C", units(100));
    desk.campaign(9, PromotionKind::Discount);

    let stale = Utc::now() - Duration::minutes(30);
    let ea = desk
        .mirror
        .add_enrollment(a.id, PromotionKind::Discount, 9, units(72), EnrollmentStatus::Pending);
    let eb = desk
        .mirror
        .add_enrollment(b.id, PromotionKind::Discount, 9, units(72), EnrollmentStatus::Pending);
    desk.mirror
        .add_enrollment(c.id, PromotionKind::Discount, 9, units(72), EnrollmentStatus::Pending);
    desk.mirror.backdate_enrollment(ea, stale);
    desk.mirror.backdate_enrollment(eb, stale);
    // The remote call for A landed before the crash; B's never did.
    desk.market.add_member(9, 501, units(72));

    let report = desk.engine.sweep_pending(desk.shop_id).await.unwrap();
    assert_eq!(report.examined, 2);
    assert_eq!(report.confirmed, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.unresolved, 0);

    assert_eq!(desk.mirror.enrollments_of(a.id)[0].status, EnrollmentStatus::Active);
    assert!(desk.mirror.product_row(a.id).unwrap().is_promoted);
    assert_eq!(desk.mirror.enrollments_of(b.id)[0].status, EnrollmentStatus::Rejected);
    assert!(!desk.mirror.product_row(b.id).unwrap().is_promoted);
    assert_eq!(desk.mirror.enrollments_of(c.id)[0].status, EnrollmentStatus::Pending);
}

#[tokio::test]
async fn failing_lookup_leaves_rows_unresolved() {
    let desk = desk_with_grace(0);
    let a = desk.product(501, "SKU-A", units(100));
    desk.campaign(9, PromotionKind::Discount);
    desk.mirror
        .add_enrollment(a.id, PromotionKind::Discount, 9, units(72), EnrollmentStatus::Pending);
    desk.market.fail_campaign_products(9);

    let report = desk.engine.sweep_pending(desk.shop_id).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.unresolved, 1);
    assert_eq!(desk.mirror.enrollments_of(a.id)[0].status, EnrollmentStatus::Pending);
}
