//! Audit chain tests

use promoter::audit::{verify_chain, AuditLog, HashChainAuditLog, GENESIS};
use serde_json::json;

async fn chain_of_three(log: &HashChainAuditLog) {
    for (actor, action) in [
        ("alice", "deployment.requested"),
        ("bob", "approval.approved"),
        ("bob", "deployment.started"),
    ] {
        log.log_audit(actor, action, "deployment", "d-1", json!({}))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_audit_chain_links_entries() {
    let log = HashChainAuditLog::new();
    chain_of_three(&log).await;

    let entries = log.entries().await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].previous_hash, GENESIS);
    assert_eq!(entries[1].previous_hash, entries[0].hash);
    assert_eq!(entries[2].previous_hash, entries[1].hash);
    assert_eq!(entries.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2, 3]);

    let verification = log.verify().await.unwrap();
    assert!(verification.valid);
    assert_eq!(verification.total_entries, 3);
}

#[tokio::test]
async fn test_audit_detects_tampered_field() {
    let log = HashChainAuditLog::new();
    chain_of_three(&log).await;

    let mut entries = log.entries().await.unwrap();
    entries[1].actor = "mallory".to_string();

    let verification = verify_chain(&entries);
    assert!(!verification.valid);
    assert_eq!(verification.first_invalid_seq, Some(2));
    assert!(verification.invalid_seqs.contains(&2));
}

#[tokio::test]
async fn test_audit_detects_removed_entry() {
    let log = HashChainAuditLog::new();
    chain_of_three(&log).await;

    let mut entries = log.entries().await.unwrap();
    entries.remove(1);

    let verification = verify_chain(&entries);
    assert!(!verification.valid);
    assert_eq!(verification.first_invalid_seq, Some(3));
}

#[tokio::test]
async fn test_audit_metadata_not_hashed() {
    let log = HashChainAuditLog::new();
    chain_of_three(&log).await;

    let mut entries = log.entries().await.unwrap();
    entries[0].metadata = json!({ "note": "annotated later" });
    assert!(verify_chain(&entries).valid);
}

#[tokio::test]
async fn test_audit_file_resumes_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit").join("audit.jsonl");

    {
        let log = HashChainAuditLog::open(&path).await.unwrap();
        chain_of_three(&log).await;
    }

    let reopened = HashChainAuditLog::open(&path).await.unwrap();
    let entry = reopened
        .log_audit("carol", "deployment.completed", "deployment", "d-1", json!({}))
        .await
        .unwrap();
    assert_eq!(entry.seq, 4);

    let verification = reopened.verify().await.unwrap();
    assert!(verification.valid);
    assert_eq!(verification.total_entries, 4);
}
