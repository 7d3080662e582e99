//! Axum router and all HTTP handlers for pdk-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)` so the scenario tests in
//! `tests/` compose the router directly.
//!
//! Batch workflows run on a spawned task. The handler holds a cancel-on-drop
//! guard, so a caller that disconnects stops the batch at the next item
//! boundary instead of killing it mid-item.

use std::{future::Future, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use pdk_audit::OperationOutcome;
use pdk_reconcile::{
    BatchEnrollReport, BatchEnrollRequest, CancelFlag, Engine, EngineError, EngineResult, ImportLossReport,
    ImportLossRequest, ProcessLossReport, ProcessLossRequest, ProductSyncReport, RemoveRepriceReport,
    RemoveRepriceRequest, SweepReport,
};
use pdk_schemas::{LossProduct, ManualAction, ProductPage, ProductQuery, PromotionAction, StatsOverview};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    api_types::{ActionChangeResponse, ErrorResponse, HealthResponse, ShopBody, ShopQuery},
    state::{AppState, OperationJournal},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/promotions/batch-enroll", post(batch_enroll))
        .route("/v1/promotions/process-loss", post(process_loss))
        .route("/v1/promotions/remove-reprice-promote", post(remove_reprice_promote))
        .route("/v1/promotions/sync-actions", post(sync_actions))
        .route("/v1/promotions/sweep-pending", post(sweep_pending))
        .route("/v1/promotions/actions", get(list_actions))
        .route("/v1/promotions/actions/manual", post(register_manual_action))
        .route("/v1/promotions/actions/:action_id/disable", post(disable_action))
        .route("/v1/promotions/actions/:action_id", delete(delete_action))
        .route("/v1/products/sync", post(sync_products))
        .route("/v1/products", get(list_products))
        .route("/v1/stats", get(stats))
        .route("/v1/loss/import", post(import_loss))
        .route("/v1/loss", get(list_loss))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Request-level failure rendered as `{error, kind}`.
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn internal(msg: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorResponse {
                error: msg,
                kind: "internal".to_string(),
            },
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            EngineError::InvalidInput(_) | EngineError::CredentialsRejected { .. } => StatusCode::BAD_REQUEST,
            EngineError::Remote(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(kind = e.kind(), error = %e, "request failed");
        }
        Self {
            status,
            body: ErrorResponse {
                error: e.to_string(),
                kind: e.kind().to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Operation runner
// ---------------------------------------------------------------------------

/// Run a mutating operation on its own task and journal the outcome.
///
/// The journal entry is written by the task itself, so a run whose caller
/// went away is still recorded (as `cancelled` if it stopped early).
async fn run_operation<T, F, Fut>(st: &AppState, shop_id: i64, operation: &'static str, work: F) -> ApiResult<T>
where
    F: FnOnce(Engine, CancelFlag) -> Fut,
    Fut: Future<Output = EngineResult<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let cancel = CancelFlag::new();
    let guard = cancel.cancel_on_drop();
    let journal = st.journal.clone();
    let fut = work(st.engine.clone(), cancel);

    let handle = tokio::spawn(async move {
        let result = fut.await;
        journal_outcome(&journal, shop_id, operation, &result);
        result
    });

    let joined = handle.await;
    guard.disarm();
    match joined {
        Ok(result) => result.map(Json).map_err(ApiError::from),
        Err(e) => Err(ApiError::internal(format!("{operation} task failed: {e}"))),
    }
}

fn journal_outcome<T: Serialize>(journal: &OperationJournal, shop_id: i64, operation: &str, result: &EngineResult<T>) {
    if !journal.is_enabled() {
        return;
    }
    let (outcome, detail) = match result {
        Ok(report) => {
            let detail = serde_json::to_value(report).unwrap_or_else(|e| json!({ "unserializable": e.to_string() }));
            let outcome = if detail.get("cancelled") == Some(&Value::Bool(true)) {
                OperationOutcome::Cancelled
            } else {
                OperationOutcome::Completed
            };
            (outcome, detail)
        }
        Err(e) => (
            OperationOutcome::Failed,
            json!({ "error": e.to_string(), "kind": e.kind() }),
        ),
    };
    journal.record(shop_id, operation, outcome, detail);
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
            operation_log: st.journal.is_enabled(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/promotions/batch-enroll
// ---------------------------------------------------------------------------

pub(crate) async fn batch_enroll(
    State(st): State<Arc<AppState>>,
    Json(req): Json<BatchEnrollRequest>,
) -> ApiResult<BatchEnrollReport> {
    let shop_id = req.shop_id;
    info!(shop_id, "batch enroll requested");
    run_operation(&st, shop_id, "batch_enroll", move |engine, cancel| async move {
        engine.batch_enroll(&req, &cancel).await
    })
    .await
}

// ---------------------------------------------------------------------------
// POST /v1/promotions/process-loss
// ---------------------------------------------------------------------------

pub(crate) async fn process_loss(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ProcessLossRequest>,
) -> ApiResult<ProcessLossReport> {
    let shop_id = req.shop_id;
    info!(shop_id, items = req.loss_product_ids.len(), "loss processing requested");
    run_operation(&st, shop_id, "process_loss", move |engine, cancel| async move {
        engine.process_loss(&req, &cancel).await
    })
    .await
}

// ---------------------------------------------------------------------------
// POST /v1/promotions/remove-reprice-promote
// ---------------------------------------------------------------------------

pub(crate) async fn remove_reprice_promote(
    State(st): State<Arc<AppState>>,
    Json(req): Json<RemoveRepriceRequest>,
) -> ApiResult<RemoveRepriceReport> {
    let shop_id = req.shop_id;
    info!(shop_id, items = req.products.len(), "remove-reprice-re-enroll requested");
    run_operation(&st, shop_id, "remove_reprice_reenroll", move |engine, cancel| async move {
        engine.remove_reprice_reenroll(&req, &cancel).await
    })
    .await
}

// ---------------------------------------------------------------------------
// POST /v1/promotions/sync-actions
// ---------------------------------------------------------------------------

pub(crate) async fn sync_actions(
    State(st): State<Arc<AppState>>,
    Json(body): Json<ShopBody>,
) -> ApiResult<Vec<PromotionAction>> {
    let shop_id = body.shop_id;
    run_operation(&st, shop_id, "sync_actions", move |engine, _| async move {
        engine.sync_actions(shop_id).await
    })
    .await
}

// ---------------------------------------------------------------------------
// POST /v1/promotions/sweep-pending
// ---------------------------------------------------------------------------

pub(crate) async fn sweep_pending(State(st): State<Arc<AppState>>, Json(body): Json<ShopBody>) -> ApiResult<SweepReport> {
    let shop_id = body.shop_id;
    run_operation(&st, shop_id, "sweep_pending", move |engine, _| async move {
        engine.sweep_pending(shop_id).await
    })
    .await
}

// ---------------------------------------------------------------------------
// Campaign registry
// ---------------------------------------------------------------------------

pub(crate) async fn list_actions(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ShopQuery>,
) -> ApiResult<Vec<PromotionAction>> {
    Ok(Json(st.engine.list_actions(q.shop_id).await?))
}

pub(crate) async fn register_manual_action(
    State(st): State<Arc<AppState>>,
    Json(m): Json<ManualAction>,
) -> ApiResult<PromotionAction> {
    let shop_id = m.shop_id;
    run_operation(&st, shop_id, "register_manual_action", move |engine, _| async move {
        engine.register_manual_action(&m).await
    })
    .await
}

pub(crate) async fn disable_action(
    State(st): State<Arc<AppState>>,
    Path(action_id): Path<i64>,
    Query(q): Query<ShopQuery>,
) -> ApiResult<ActionChangeResponse> {
    let shop_id = q.shop_id;
    run_operation(&st, shop_id, "disable_action", move |engine, _| async move {
        engine.disable_action(shop_id, action_id).await.map(|()| ActionChangeResponse {
            shop_id,
            action_id,
            result: "disabled".to_string(),
        })
    })
    .await
}

pub(crate) async fn delete_action(
    State(st): State<Arc<AppState>>,
    Path(action_id): Path<i64>,
    Query(q): Query<ShopQuery>,
) -> ApiResult<ActionChangeResponse> {
    let shop_id = q.shop_id;
    run_operation(&st, shop_id, "delete_action", move |engine, _| async move {
        engine.delete_action(shop_id, action_id).await.map(|()| ActionChangeResponse {
            shop_id,
            action_id,
            result: "deleted".to_string(),
        })
    })
    .await
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

pub(crate) async fn sync_products(
    State(st): State<Arc<AppState>>,
    Json(body): Json<ShopBody>,
) -> ApiResult<ProductSyncReport> {
    let shop_id = body.shop_id;
    run_operation(&st, shop_id, "sync_products", move |engine, _| async move {
        engine.sync_products(shop_id).await
    })
    .await
}

pub(crate) async fn list_products(State(st): State<Arc<AppState>>, Query(q): Query<ProductQuery>) -> ApiResult<ProductPage> {
    Ok(Json(st.engine.list_products(&q).await?))
}

// ---------------------------------------------------------------------------
// GET /v1/stats
// ---------------------------------------------------------------------------

pub(crate) async fn stats(State(st): State<Arc<AppState>>, Query(q): Query<ShopQuery>) -> ApiResult<StatsOverview> {
    Ok(Json(st.engine.stats(q.shop_id).await?))
}

// ---------------------------------------------------------------------------
// Loss intake
// ---------------------------------------------------------------------------

pub(crate) async fn import_loss(
    State(st): State<Arc<AppState>>,
    Json(req): Json<ImportLossRequest>,
) -> ApiResult<ImportLossReport> {
    let shop_id = req.shop_id;
    run_operation(&st, shop_id, "import_loss", move |engine, _| async move {
        engine.import_loss(&req).await
    })
    .await
}

pub(crate) async fn list_loss(State(st): State<Arc<AppState>>, Query(q): Query<ShopQuery>) -> ApiResult<Vec<LossProduct>> {
    Ok(Json(st.engine.unprocessed_loss(q.shop_id).await?))
}
