//! Shared runtime state for pdk-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The engine is cheap to
//! clone and is handed by value to spawned workflow tasks.

use std::sync::{Arc, Mutex};

use pdk_audit::{OperationLog, OperationOutcome};
use pdk_reconcile::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            service: "pdk-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

// ---------------------------------------------------------------------------
// OperationJournal
// ---------------------------------------------------------------------------

/// Shared handle on the optional operation log.
///
/// Appends are short synchronous file writes; the mutex is never held
/// across an await point.
#[derive(Clone, Default)]
pub struct OperationJournal {
    log: Option<Arc<Mutex<OperationLog>>>,
}

impl OperationJournal {
    pub fn disabled() -> Self {
        Self { log: None }
    }

    pub fn new(log: OperationLog) -> Self {
        Self {
            log: Some(Arc::new(Mutex::new(log))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.log.is_some()
    }

    /// Append one record. Failures are logged and swallowed: a workflow that
    /// already touched the marketplace must still answer its caller.
    pub fn record(&self, shop_id: i64, operation: &str, outcome: OperationOutcome, detail: Value) {
        let Some(log) = &self.log else {
            return;
        };
        let mut guard = match log.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = guard.append(shop_id, operation, outcome, detail) {
            warn!(shop_id, operation, error = %format!("{e:#}"), "operation log append failed");
        }
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Static build metadata.
    pub build: BuildInfo,
    /// Reconciliation engine wired to the mirror and the gateway factory.
    pub engine: Engine,
    pub journal: OperationJournal,
}

impl AppState {
    pub fn new(engine: Engine, journal: OperationJournal) -> Self {
        Self {
            build: BuildInfo::current(),
            engine,
            journal,
        }
    }
}
