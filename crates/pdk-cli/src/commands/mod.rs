//! Command handler modules for pdk-cli.
//!
//! Shared wiring (config, engine, operation log) lives here; shop-scoped
//! workflow commands live in `promo`.

pub mod promo;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pdk_audit::{OperationLog, OperationOutcome};
use pdk_config::{DeskConfig, LoadedConfig};
use pdk_gateway::HttpGatewayFactory;
use pdk_reconcile::{Engine, EngineConfig, EngineResult, PgMirror};
use serde::Serialize;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Everything a shop-scoped command needs.
pub struct Wired {
    pub engine: Engine,
    pub cfg: DeskConfig,
    pub config_hash: String,
}

pub fn load_config(paths: &[String]) -> Result<(LoadedConfig, DeskConfig)> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = pdk_config::load_layered_yaml(&path_refs)?;
    let cfg = DeskConfig::from_loaded(&loaded)?;
    Ok((loaded, cfg))
}

/// Connect the mirror named by config and build an engine over it.
pub async fn wire(paths: &[String]) -> Result<Wired> {
    let (loaded, cfg) = load_config(paths)?;
    let secrets = pdk_config::resolve_secrets(&loaded.config_json, true)?;
    let pool = pdk_db::connect(secrets.require_database_url()?).await?;

    let gateways = HttpGatewayFactory::new(&cfg.gateway.base_url, Duration::from_secs(cfg.gateway.timeout_secs))
        .context("build marketplace http client")?;
    let engine = Engine::new(
        Arc::new(PgMirror::new(pool)),
        Arc::new(gateways),
        EngineConfig {
            action_price_bps: cfg.engine.action_price_bps,
            pending_grace_secs: cfg.engine.pending_grace_secs,
        },
    );
    Ok(Wired {
        engine,
        cfg,
        config_hash: loaded.config_hash,
    })
}

/// Append the outcome to the operation log when one is configured.
pub fn journal<T: Serialize>(cfg: &DeskConfig, shop_id: i64, operation: &str, result: &EngineResult<T>) -> Result<()> {
    let Some(path) = cfg.audit.path.as_deref() else {
        return Ok(());
    };
    let (outcome, detail) = match result {
        Ok(report) => {
            let detail = serde_json::to_value(report).context("serialize report for operation log")?;
            let outcome = if detail.get("cancelled") == Some(&Value::Bool(true)) {
                OperationOutcome::Cancelled
            } else {
                OperationOutcome::Completed
            };
            (outcome, detail)
        }
        Err(e) => (OperationOutcome::Failed, json!({ "error": e.to_string(), "kind": e.kind() })),
    };
    let mut log = OperationLog::open(path, cfg.audit.hash_chain)?;
    log.append(shop_id, operation, outcome, detail)?;
    Ok(())
}

pub fn print_json<T: Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v).context("serialize output")?);
    Ok(())
}
