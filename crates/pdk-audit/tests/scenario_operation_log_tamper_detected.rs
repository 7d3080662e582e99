//! Operation log chain integrity.
//!
//! GREEN when:
//! - Five chained records verify as intact.
//! - Editing one record's detail is reported at that line.
//! - Reopening an existing log continues the chain instead of restarting it.

use pdk_audit::{verify_chain, ChainStatus, OperationLog, OperationOutcome};
use serde_json::json;
use uuid::Uuid;

fn temp_log_path(suffix: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "pdk_oplog_test_{}_{}_{}.jsonl",
        suffix,
        std::process::id(),
        Uuid::new_v4().as_simple()
    ))
}

fn write_five(path: &std::path::Path) {
    let mut log = OperationLog::open(path, true).unwrap();
    for i in 0..5 {
        log.append(
            7,
            "batch_enroll",
            OperationOutcome::Completed,
            json!({"enrolled_count": i, "failed_count": 0}),
        )
        .unwrap();
    }
}

#[test]
fn untampered_log_is_intact() {
    let path = temp_log_path("intact");
    write_five(&path);

    assert_eq!(verify_chain(&path).unwrap(), ChainStatus::Intact { records: 5 });

    let _ = std::fs::remove_file(&path);
}

#[test]
fn edited_detail_is_detected_at_its_line() {
    let path = temp_log_path("tampered");
    write_five(&path);

    let content = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    assert_eq!(lines.len(), 5);
    lines[2] = lines[2].replace("\"enrolled_count\":2", "\"enrolled_count\":200");
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();

    match verify_chain(&path).unwrap() {
        ChainStatus::Broken { line, reason } => {
            assert_eq!(line, 3);
            assert!(reason.contains("hash_self"), "unexpected reason: {reason}");
        }
        other => panic!("expected a broken chain, got {other:?}"),
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn deleted_record_breaks_the_chain() {
    let path = temp_log_path("deleted");
    write_five(&path);

    let content = std::fs::read_to_string(&path).unwrap();
    let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
    std::fs::write(&path, kept.join("\n") + "\n").unwrap();

    assert!(matches!(verify_chain(&path).unwrap(), ChainStatus::Broken { line: 2, .. }));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn reopened_log_continues_the_chain() {
    let path = temp_log_path("resume");
    write_five(&path);

    let mut log = OperationLog::open(&path, true).unwrap();
    assert_eq!(log.next_seq(), 5);
    assert!(log.last_hash().is_some());
    let rec = log
        .append(7, "process_loss", OperationOutcome::Cancelled, json!({"processed_count": 1}))
        .unwrap();
    assert_eq!(rec.seq, 5);

    assert_eq!(verify_chain(&path).unwrap(), ChainStatus::Intact { records: 6 });

    let _ = std::fs::remove_file(&path);
}
