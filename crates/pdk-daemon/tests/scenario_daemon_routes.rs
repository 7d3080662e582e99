//! In-process scenario tests for pdk-daemon HTTP endpoints.
//!
//! The router is driven via `tower::ServiceExt::oneshot` against an engine
//! wired to the in-memory mirror and the paper marketplace. No socket, no
//! database.
//!
//! GREEN when:
//! - Batch operations answer 200 with per-item outcomes embedded.
//! - Unknown shops and unknown loss ids map to 404, bad prices to 400,
//!   all with an `{error, kind}` body.
//! - Manual campaigns can be registered, disabled and deleted over HTTP.
//! - Read endpoints reflect what the workflows wrote.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pdk_daemon::{routes, state};
use pdk_schemas::PromotionKind;
use pdk_testkit::{units, Desk};
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_router(desk: &Desk) -> axum::Router {
    let st = Arc::new(state::AppState::new(
        desk.engine.clone(),
        state::OperationJournal::disabled(),
    ));
    routes::build_router(st)
}

/// Drive the router with a single request and return (status, body_bytes).
async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let desk = Desk::new();
    let (status, body) = call(make_router(&desk), get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "pdk-daemon");
    assert_eq!(json["operation_log"], false);
}

// ---------------------------------------------------------------------------
// POST /v1/promotions/batch-enroll
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_enroll_reports_per_item_outcomes() {
    let desk = Desk::new();
    desk.product(101, "SKU-A", units(100));
    desk.product(102, "SKU-B", units(200));
    desk.campaign(1, PromotionKind::Discount);
    desk.market.fail_enroll(1, 102);

    let (status, body) = call(
        make_router(&desk),
        post_json("/v1/promotions/batch-enroll", json!({ "shop_id": desk.shop_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["enrolled_count"], 1);
    assert_eq!(json["failed_count"], 1);
    assert_eq!(json["cancelled"], false);
    let details = json["details"].as_array().unwrap();
    assert_eq!(details.len(), 2);
    let failed = details.iter().find(|d| d["source_sku"] == "SKU-B").unwrap();
    assert_eq!(failed["status"], "failed");
    assert!(failed["error"].as_str().unwrap().contains("action 1"));
}

#[tokio::test]
async fn batch_enroll_unknown_shop_is_404() {
    let desk = Desk::new();
    let (status, body) = call(
        make_router(&desk),
        post_json("/v1/promotions/batch-enroll", json!({ "shop_id": 9_999 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json = parse_json(body);
    assert_eq!(json["kind"], "shop_not_found");
    assert!(json["error"].as_str().unwrap().contains("9999"));
}

#[tokio::test]
async fn batch_enroll_without_campaigns_is_404() {
    let desk = Desk::new();
    desk.product(101, "SKU-A", units(100));

    let (status, body) = call(
        make_router(&desk),
        post_json(
            "/v1/promotions/batch-enroll",
            json!({ "shop_id": desk.shop_id, "action_ids": [77] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse_json(body)["kind"], "no_campaigns");
}

// ---------------------------------------------------------------------------
// POST /v1/promotions/process-loss
// ---------------------------------------------------------------------------

#[tokio::test]
async fn process_loss_runs_and_unknown_ids_are_404() {
    let desk = Desk::new();
    let p = desk.product(201, "SKU-L", units(100));
    desk.mirror.set_flags(p.id, true, false);
    let loss_id = desk.mirror.add_loss(p.id, units(80));

    let (status, body) = call(
        make_router(&desk),
        post_json(
            "/v1/promotions/process-loss",
            json!({ "shop_id": desk.shop_id, "loss_product_ids": [loss_id, 424_242] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["processed_count"], 1);
    assert_eq!(json["missing_ids"], json!([424_242]));
    assert_eq!(desk.market.price_of(201), Some(units(80)));

    let (status, body) = call(
        make_router(&desk),
        post_json(
            "/v1/promotions/process-loss",
            json!({ "shop_id": desk.shop_id, "loss_product_ids": [424_242] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse_json(body)["kind"], "loss_products_not_found");
}

// ---------------------------------------------------------------------------
// POST /v1/promotions/remove-reprice-promote
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_reprice_rejects_non_positive_price_with_400() {
    let desk = Desk::new();
    desk.product(301, "SKU-R", units(100));
    desk.campaign(1, PromotionKind::Discount);

    let (status, body) = call(
        make_router(&desk),
        post_json(
            "/v1/promotions/remove-reprice-promote",
            json!({
                "shop_id": desk.shop_id,
                "products": [{ "source_sku": "SKU-R", "new_price": 0 }]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(body)["kind"], "invalid_input");
    assert!(desk.market.calls().is_empty());
}

#[tokio::test]
async fn remove_reprice_accepts_legacy_action_ids_field() {
    let desk = Desk::new();
    desk.product(301, "SKU-R", units(100));
    desk.campaign(1, PromotionKind::Discount);
    desk.campaign(2, PromotionKind::ElasticBoost);

    let (status, body) = call(
        make_router(&desk),
        post_json(
            "/v1/promotions/remove-reprice-promote",
            json!({
                "shop_id": desk.shop_id,
                "products": [{ "source_sku": "SKU-R", "new_price": "50.00" }],
                "action_ids": [2]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["processed_count"], 1);
    assert_eq!(json["items"][0]["enrolled"], json!([2]));
    assert!(!desk.market.is_member(1, 301));
    assert_eq!(desk.market.member_price(2, 301), Some(units(36)));
}

// ---------------------------------------------------------------------------
// Campaign registry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manual_campaign_lifecycle() {
    let desk = Desk::new();
    let router = make_router(&desk);

    let manual = json!({
        "shop_id": desk.shop_id,
        "action_id": 900,
        "title": "Autumn clearance",
        "kind": "discount"
    });
    let (status, body) = call(router.clone(), post_json("/v1/promotions/actions/manual", manual.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["action_id"], 900);
    assert_eq!(json["status"], "active");

    let (status, body) = call(router.clone(), post_json("/v1/promotions/actions/manual", manual)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(body)["kind"], "invalid_input");

    let uri = format!("/v1/promotions/actions/900/disable?shop_id={}", desk.shop_id);
    let (status, body) = call(router.clone(), post_json(&uri, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["result"], "disabled");

    let (status, body) = call(router.clone(), get(&format!("/v1/promotions/actions?shop_id={}", desk.shop_id))).await;
    assert_eq!(status, StatusCode::OK);
    let listed = parse_json(body);
    assert_eq!(listed[0]["status"], "disabled");

    let delete = |uri: String| {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(axum::body::Body::empty())
            .unwrap()
    };
    let uri = format!("/v1/promotions/actions/900?shop_id={}", desk.shop_id);
    let (status, _) = call(router.clone(), delete(uri.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(router, delete(uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse_json(body)["kind"], "action_not_found");
}

#[tokio::test]
async fn sync_actions_returns_mirrored_campaigns() {
    let desk = Desk::new();
    desk.market.add_campaign(5, "Boost week", "ELASTIC_BOOST");
    desk.market.add_campaign(6, "Flat discount", "DISCOUNT");

    let (status, body) = call(
        make_router(&desk),
        post_json("/v1/promotions/sync-actions", json!({ "shop_id": desk.shop_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    let kinds: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["kind"].as_str().unwrap())
        .collect();
    assert_eq!(json.as_array().unwrap().len(), 2);
    assert!(kinds.contains(&"elastic_boost"));
    assert!(kinds.contains(&"discount"));
}

#[tokio::test]
async fn sync_actions_listing_failure_is_502() {
    let desk = Desk::new();
    desk.market.fail_list_campaigns(true);

    let (status, body) = call(
        make_router(&desk),
        post_json("/v1/promotions/sync-actions", json!({ "shop_id": desk.shop_id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(parse_json(body)["kind"], "remote_failure");
}

// ---------------------------------------------------------------------------
// Loss intake, products, stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn loss_import_then_queries_reflect_it() {
    let desk = Desk::new();
    desk.product(401, "SKU-X", units(100));
    desk.product(402, "SKU-Y", units(60));
    let router = make_router(&desk);

    let (status, body) = call(
        router.clone(),
        post_json(
            "/v1/loss/import",
            json!({
                "shop_id": desk.shop_id,
                "items": [
                    { "source_sku": "SKU-X", "new_price": 90 },
                    { "source_sku": "SKU-NONE", "new_price": 10 }
                ]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["imported_ids"].as_array().unwrap().len(), 1);
    assert_eq!(json["not_found_skus"], json!(["SKU-NONE"]));

    let (status, body) = call(router.clone(), get(&format!("/v1/loss?shop_id={}", desk.shop_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body).as_array().unwrap().len(), 1);

    let (status, body) = call(
        router.clone(),
        get(&format!("/v1/products?shop_id={}&is_loss=true", desk.shop_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let page = parse_json(body);
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["source_sku"], "SKU-X");

    let (status, body) = call(router, get(&format!("/v1/stats?shop_id={}", desk.shop_id))).await;
    assert_eq!(status, StatusCode::OK);
    let stats = parse_json(body);
    assert_eq!(stats["total_products"], 2);
    assert_eq!(stats["loss_products"], 1);
    assert_eq!(stats["unprocessed_loss"], 1);
}

#[tokio::test]
async fn stats_for_unknown_shop_is_404() {
    let desk = Desk::new();
    let (status, body) = call(make_router(&desk), get("/v1/stats?shop_id=31337")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse_json(body)["kind"], "shop_not_found");
}
