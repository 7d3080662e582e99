//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES (e.g. `"PDK_DATABASE_URL"`).
//! Binaries call [`resolve_secrets`] once at start-up and pass the result to
//! constructors. Error messages name the variable, never the value.
//!
//! Marketplace credentials are per shop and live in the database; they are
//! not resolved here.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::DEFAULT_DB_URL_ENV;

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Env var the URL was read from (safe to print).
    pub database_url_env: String,
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("database_url_env", &self.database_url_env)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

impl ResolvedSecrets {
    pub fn require_database_url(&self) -> Result<&str> {
        match self.database_url.as_deref() {
            Some(url) => Ok(url),
            None => bail!(
                "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
                self.database_url_env
            ),
        }
    }
}

fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve secrets named by `config_json`.
///
/// With `require_database = true` a missing database URL is an error; the
/// CLI's `config-hash` path passes `false`.
pub fn resolve_secrets(config_json: &Value, require_database: bool) -> Result<ResolvedSecrets> {
    let database_url_env = read_str_at(config_json, "/database/url_env")
        .unwrap_or_else(|| DEFAULT_DB_URL_ENV.to_string());
    let database_url = resolve_env(&database_url_env);

    let resolved = ResolvedSecrets {
        database_url_env,
        database_url,
    };
    if require_database {
        resolved.require_database_url()?;
    }
    Ok(resolved)
}
