//! Append-only operation log.
//!
//! One JSON line per workflow invocation. With chaining enabled each record
//! carries the previous record's hash and its own, so edits or deletions in
//! the middle of the file are detectable.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Namespace for deterministic record ids.
const RECORD_NAMESPACE: Uuid = Uuid::from_u128(0x7d1f_3c2a_9b4e_4e61_8a05_52c0_e1d7_b903);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Ran to the end; per-item failures live in `detail`.
    Completed,
    /// Stopped between items because the caller went away.
    Cancelled,
    /// Rejected before or during the run with a request-level error.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub record_id: Uuid,
    pub seq: u64,
    pub ts_utc: DateTime<Utc>,
    pub shop_id: i64,
    pub operation: String,
    pub outcome: OperationOutcome,
    pub detail: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Writer for the operation log file.
#[derive(Debug)]
pub struct OperationLog {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    seq: u64,
}

impl OperationLog {
    /// Open (or create) the log and resume after its last record.
    pub fn open(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
            }
        }

        let mut log = Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        };

        if log.path.exists() {
            let content =
                fs::read_to_string(&log.path).with_context(|| format!("read operation log {:?}", log.path))?;
            if let Some(last) = content.lines().map(str::trim).filter(|l| !l.is_empty()).last() {
                let rec: OperationRecord =
                    serde_json::from_str(last).context("parse last operation record failed")?;
                log.last_hash = rec.hash_self;
                log.seq = rec.seq + 1;
            }
        }
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    /// Sequence number the next record will get.
    pub fn next_seq(&self) -> u64 {
        self.seq
    }

    pub fn append(
        &mut self,
        shop_id: i64,
        operation: &str,
        outcome: OperationOutcome,
        detail: Value,
    ) -> Result<OperationRecord> {
        let record_id = derive_record_id(self.last_hash.as_deref(), self.seq, operation, shop_id);

        let mut rec = OperationRecord {
            record_id,
            seq: self.seq,
            ts_utc: Utc::now(),
            shop_id,
            operation: operation.to_string(),
            outcome,
            detail,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            rec.hash_prev = self.last_hash.clone();
            rec.hash_self = Some(record_hash(&rec)?);
        }

        let line = canonical_json(&rec)?;
        append_line(&self.path, &line)?;

        self.seq += 1;
        if self.hash_chain {
            self.last_hash = rec.hash_self.clone();
        }
        Ok(rec)
    }
}

fn derive_record_id(prev: Option<&str>, seq: u64, operation: &str, shop_id: i64) -> Uuid {
    let name = format!("{}|{}|{}|{}", prev.unwrap_or("genesis"), seq, operation, shop_id);
    Uuid::new_v5(&RECORD_NAMESPACE, name.as_bytes())
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open operation log {:?}", path))?;
    f.write_all(line.as_bytes()).context("write operation record failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

/// Compact JSON with object keys sorted at every level.
fn canonical_json<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize operation record failed")?;
    serde_json::to_string(&sort_keys(raw)).context("json stringify failed")
}

fn sort_keys(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// SHA-256 over the canonical record with `hash_self` cleared.
pub fn record_hash(rec: &OperationRecord) -> Result<String> {
    let mut unsealed = rec.clone();
    unsealed.hash_self = None;
    let canonical = canonical_json(&unsealed)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Intact { records: usize },
    Broken { line: usize, reason: String },
}

pub fn verify_chain(path: impl AsRef<Path>) -> Result<ChainStatus> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read operation log {:?}", path.as_ref()))?;
    verify_chain_str(&content)
}

/// Check every record's link to its predecessor and its own hash.
///
/// Unchained logs (no hashes at all) only get their sequence checked.
pub fn verify_chain_str(content: &str) -> Result<ChainStatus> {
    let mut prev_hash: Option<String> = None;
    let mut expected_seq: Option<u64> = None;
    let mut records = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let rec: OperationRecord =
            serde_json::from_str(trimmed).with_context(|| format!("parse operation record at line {}", i + 1))?;
        records += 1;

        if let Some(seq) = expected_seq {
            if rec.seq != seq {
                return Ok(ChainStatus::Broken {
                    line: i + 1,
                    reason: format!("seq gap: expected {seq}, got {}", rec.seq),
                });
            }
        }
        expected_seq = Some(rec.seq + 1);

        if rec.hash_prev != prev_hash {
            return Ok(ChainStatus::Broken {
                line: i + 1,
                reason: format!("hash_prev mismatch: expected {:?}, got {:?}", prev_hash, rec.hash_prev),
            });
        }

        if let Some(claimed) = &rec.hash_self {
            let recomputed = record_hash(&rec)?;
            if *claimed != recomputed {
                return Ok(ChainStatus::Broken {
                    line: i + 1,
                    reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
                });
            }
        }
        prev_hash = rec.hash_self;
    }

    Ok(ChainStatus::Intact { records })
}
