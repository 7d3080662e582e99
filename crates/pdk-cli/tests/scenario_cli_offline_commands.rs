//! CLI commands that need neither a database nor the marketplace.
//!
//! GREEN when:
//! - `config-hash` prints a stable hash for layered files and warns about
//!   keys nothing reads.
//! - `audit verify` succeeds on an intact log and exits non-zero on a
//!   tampered one, naming the line.

use assert_cmd::prelude::*;
use pdk_audit::{OperationLog, OperationOutcome};
use predicates::prelude::*;
use serde_json::json;
use std::process::Command;

#[test]
fn config_hash_is_stable_and_flags_unused_keys() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    std::fs::write(&base, "engine:\n  action_price_bps: 7200\n  pending_grace_secs: 300\n")?;
    std::fs::write(&overlay, "engine:\n  action_price_bps: 6500\nmystery:\n  knob: 1\n")?;

    let run = || -> anyhow::Result<String> {
        let out = Command::cargo_bin("pdk")?
            .arg("config-hash")
            .arg(&base)
            .arg(&overlay)
            .output()?;
        assert!(out.status.success());
        let stderr = String::from_utf8(out.stderr)?;
        assert!(stderr.contains("/mystery/knob"), "stderr: {stderr}");
        Ok(String::from_utf8(out.stdout)?)
    };

    let first = run()?;
    let second = run()?;
    assert!(first.starts_with("config_hash="));
    assert!(first.contains("\"action_price_bps\":6500"));
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn audit_verify_reports_intact_and_broken_logs() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ops.jsonl");
    {
        let mut log = OperationLog::open(&path, true)?;
        for n in 0..3 {
            log.append(1, "sweep_pending", OperationOutcome::Completed, json!({ "examined": n }))?;
        }
    }

    Command::cargo_bin("pdk")?
        .args(["audit", "verify", "--path"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("chain_ok=true records=3"));

    let content = std::fs::read_to_string(&path)?;
    std::fs::write(&path, content.replace("\"examined\":1", "\"examined\":9"))?;

    Command::cargo_bin("pdk")?
        .args(["audit", "verify", "--path"])
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("chain_ok=false line=2"));
    Ok(())
}
