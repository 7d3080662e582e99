//! Workflow invocations land in the operation log.
//!
//! GREEN when:
//! - Each mutating request appends one chained record, including failed ones.
//! - Read-only requests append nothing.
//! - The resulting file verifies as intact.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use pdk_audit::{verify_chain, ChainStatus, OperationLog, OperationRecord};
use pdk_daemon::{routes, state};
use pdk_schemas::PromotionKind;
use pdk_testkit::{units, Desk};
use serde_json::json;
use tower::ServiceExt; // oneshot

fn post_json(uri: &str, body: serde_json::Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn mutating_requests_are_journaled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ops.jsonl");

    let desk = Desk::new();
    desk.product(101, "SKU-A", units(100));
    desk.campaign(1, PromotionKind::Discount);

    let journal = state::OperationJournal::new(OperationLog::open(&path, true).unwrap());
    let router = routes::build_router(Arc::new(state::AppState::new(desk.engine.clone(), journal)));

    let resp = router
        .clone()
        .oneshot(post_json("/v1/promotions/batch-enroll", json!({ "shop_id": desk.shop_id })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = router
        .clone()
        .oneshot(post_json("/v1/promotions/batch-enroll", json!({ "shop_id": 4_040 })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/v1/stats?shop_id={}", desk.shop_id))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    assert_eq!(verify_chain(&path).unwrap(), ChainStatus::Intact { records: 2 });

    let content = std::fs::read_to_string(&path).unwrap();
    let records: Vec<OperationRecord> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records[0].operation, "batch_enroll");
    assert_eq!(records[0].detail["enrolled_count"], 1);
    assert_eq!(
        serde_json::to_value(records[0].outcome).unwrap(),
        json!("completed")
    );
    assert_eq!(records[1].shop_id, 4_040);
    assert_eq!(serde_json::to_value(records[1].outcome).unwrap(), json!("failed"));
    assert_eq!(records[1].detail["kind"], "shop_not_found");
}
