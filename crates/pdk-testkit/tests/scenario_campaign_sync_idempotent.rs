//! Campaign sync is idempotent and leaves manual campaigns alone.
//!
//! GREEN when:
//! - Two syncs of an unchanged remote list leave one row per (shop, action)
//!   with refreshed counts and last_synced_at.
//! - Kinds come from the remote type code, not the title.
//! - A manual campaign sharing an id with a remote one keeps title and kind.
//! - Synced campaigns gone from the remote list expire; manual ones do not.
//! - A failing remote list is a request-level error.

use pdk_reconcile::EngineError;
use pdk_schemas::{ActionStatus, ManualAction, PromotionKind};
use pdk_testkit::{units, Desk};

#[tokio::test]
async fn double_sync_keeps_one_row_per_campaign() {
    let desk = Desk::new();
    desk.market.add_campaign(11, "Эластичный бустинг", "ELASTIC_BOOST");
    desk.market.add_campaign(12, "Скидка 28%", "DISCOUNT");
    desk.market.add_campaign(13, "Elastic boost in title only", "MARKETPLACE_MULTI_LEVEL_DISCOUNT_ON_AMOUNT");
    desk.market.add_product(501, "SKU-P", "p", units(10));
    desk.market.add_member(12, 501, units(7));

    let first = desk.engine.sync_actions(desk.shop_id).await.unwrap();
    let second = desk.engine.sync_actions(desk.shop_id).await.unwrap();

    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 3);
    assert_eq!(desk.mirror.actions_of(desk.shop_id).len(), 3);

    let by_id = |id: i64| second.iter().find(|a| a.action_id == id).unwrap().clone();
    assert_eq!(by_id(11).kind, PromotionKind::ElasticBoost);
    assert_eq!(by_id(12).kind, PromotionKind::Discount);
    assert_eq!(by_id(13).kind, PromotionKind::Other);
    assert_eq!(by_id(12).participating_count, 1);
    assert_eq!(by_id(12).potential_count, 1);

    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.id, b.id);
        assert!(b.last_synced_at >= a.last_synced_at);
        assert_eq!(b.status, ActionStatus::Active);
    }
}

#[tokio::test]
async fn manual_campaign_survives_sync_and_expiry() {
    let desk = Desk::new();
    let manual = ManualAction {
        shop_id: desk.shop_id,
        action_id: 40,
        title: "Operator boost".to_string(),
        kind: PromotionKind::ElasticBoost,
        date_start: None,
        date_end: None,
    };
    desk.engine.register_manual_action(&manual).await.unwrap();
    let solo = ManualAction {
        action_id: 41,
        title: "Operator only".to_string(),
        ..manual.clone()
    };
    desk.engine.register_manual_action(&solo).await.unwrap();

    desk.market.add_campaign(40, "Remote title", "DISCOUNT");
    desk.market.add_campaign(50, "Remote only", "DISCOUNT");
    desk.engine.sync_actions(desk.shop_id).await.unwrap();

    let rows = desk.mirror.actions_of(desk.shop_id);
    let forty = rows.iter().find(|a| a.action_id == 40).unwrap();
    assert!(forty.is_manual);
    assert_eq!(forty.title, "Operator boost");
    assert_eq!(forty.kind, PromotionKind::ElasticBoost);
    assert!(forty.last_synced_at.is_some());

    // Both 50 and the manual 41 are missing from the next remote list.
    desk.market.remove_campaign(50);
    desk.engine.sync_actions(desk.shop_id).await.unwrap();
    let rows = desk.mirror.actions_of(desk.shop_id);
    let status = |id: i64| rows.iter().find(|a| a.action_id == id).unwrap().status;
    assert_eq!(status(50), ActionStatus::Expired);
    assert_eq!(status(41), ActionStatus::Active);
    assert_eq!(status(40), ActionStatus::Active);
}

#[tokio::test]
async fn disabled_campaign_stays_disabled_after_sync() {
    let desk = Desk::new();
    desk.market.add_campaign(60, "c", "DISCOUNT");
    desk.engine.sync_actions(desk.shop_id).await.unwrap();
    desk.engine.disable_action(desk.shop_id, 60).await.unwrap();
    let rows = desk.engine.sync_actions(desk.shop_id).await.unwrap();
    assert_eq!(rows[0].status, ActionStatus::Disabled);
}

#[tokio::test]
async fn failing_remote_list_is_request_level() {
    let desk = Desk::new();
    desk.market.fail_list_campaigns(true);
    let err = desk.engine.sync_actions(desk.shop_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Remote(_)), "got {err}");
    assert!(desk.mirror.actions_of(desk.shop_id).is_empty());
}

#[tokio::test]
async fn manual_registration_rules() {
    let desk = Desk::new();
    let m = ManualAction {
        shop_id: desk.shop_id,
        action_id: 70,
        title: "Manual".to_string(),
        kind: PromotionKind::Discount,
        date_start: None,
        date_end: None,
    };
    desk.engine.register_manual_action(&m).await.unwrap();
    let dup = desk.engine.register_manual_action(&m).await.unwrap_err();
    assert!(matches!(dup, EngineError::InvalidInput(_)));

    let blank = ManualAction {
        action_id: 71,
        title: "  ".to_string(),
        ..m.clone()
    };
    assert!(matches!(
        desk.engine.register_manual_action(&blank).await.unwrap_err(),
        EngineError::InvalidInput(_)
    ));

    desk.engine.delete_action(desk.shop_id, 70).await.unwrap();
    let gone = desk.engine.delete_action(desk.shop_id, 70).await.unwrap_err();
    assert!(matches!(gone, EngineError::ActionNotFound { action_id: 70, .. }));
    assert!(matches!(
        desk.engine.disable_action(desk.shop_id, 70).await.unwrap_err(),
        EngineError::ActionNotFound { .. }
    ));
}
