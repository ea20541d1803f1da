//! Integration tests for the activity ledger and its export

use securecomm::ledger::{ActivityLedger, LedgerStats};
use securecomm::models::{LogStatus, NewActivity};
use securecomm::report;

fn activity(id: &str, status: LogStatus, outgoing: Option<&str>) -> NewActivity {
    NewActivity {
        id: id.to_string(),
        source: "8200250915".to_string(),
        destination: "9723405732".to_string(),
        incoming_payload: "cipher".to_string(),
        tampered_message: "plain".to_string(),
        decryption_key: "NONE".to_string(),
        outgoing_payload: outgoing.map(str::to_string),
        status,
        is_encrypted: false,
    }
}

#[test]
fn test_rows_are_newest_first() {
    let ledger = ActivityLedger::new();
    ledger.upsert(activity("PKT-A", LogStatus::Intercepted, None));
    ledger.upsert(activity("PKT-B", LogStatus::Intercepted, None));

    let ids: Vec<_> = ledger.entries().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["PKT-B", "PKT-A"]);
}

#[test]
fn test_same_id_merges_in_place() {
    let ledger = ActivityLedger::new();
    ledger.upsert(activity("PKT-A", LogStatus::Intercepted, None));
    ledger.upsert(activity("PKT-B", LogStatus::Intercepted, None));

    let mut tamper = activity("PKT-A", LogStatus::Modified, Some("out"));
    tamper.tampered_message = "changed".to_string();
    let merged = ledger.upsert(tamper);

    assert_eq!(ledger.len(), 2);
    assert_eq!(merged.status, LogStatus::Modified);
    assert_eq!(merged.tampered_message, "changed");

    let ids: Vec<_> = ledger.entries().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["PKT-B", "PKT-A"]);
    assert_eq!(
        ledger.get("PKT-A").unwrap().outgoing_payload.as_deref(),
        Some("out")
    );
}

#[test]
fn test_absent_outgoing_keeps_previous() {
    let ledger = ActivityLedger::new();
    ledger.upsert(activity("PKT-A", LogStatus::Modified, Some("out")));
    let merged = ledger.upsert(activity("PKT-A", LogStatus::Forwarded, None));

    assert_eq!(merged.status, LogStatus::Forwarded);
    assert_eq!(merged.outgoing_payload.as_deref(), Some("out"));
}

#[test]
fn test_stats_count_modified_rows() {
    let ledger = ActivityLedger::new();
    assert_eq!(ledger.stats(), LedgerStats::default());

    ledger.upsert(activity("PKT-A", LogStatus::Intercepted, None));
    ledger.upsert(activity("PKT-B", LogStatus::Modified, Some("x")));
    ledger.upsert(activity("PKT-C", LogStatus::Forwarded, None));
    ledger.upsert(activity("PKT-A", LogStatus::Modified, Some("y")));

    assert_eq!(
        ledger.stats(),
        LedgerStats {
            total: 3,
            modified: 2
        }
    );
}

#[test]
fn test_wire_names_are_camel_case() {
    let ledger = ActivityLedger::new();
    let entry = ledger.upsert(activity("PKT-A", LogStatus::Intercepted, None));
    let json = serde_json::to_value(&entry).unwrap();

    assert_eq!(json["status"], "intercepted");
    assert_eq!(json["incomingPayload"], "cipher");
    assert_eq!(json["tamperedMessage"], "plain");
    assert_eq!(json["decryptionKey"], "NONE");
    assert_eq!(json["isEncrypted"], false);
    assert!(json.get("outgoingPayload").is_none());
}

#[test]
fn test_export_then_load() {
    let ledger = ActivityLedger::new();
    ledger.upsert(activity("PKT-A", LogStatus::Intercepted, None));
    ledger.upsert(activity("PKT-B", LogStatus::Modified, Some("out")));

    let path = std::env::temp_dir().join(format!("securecomm-ledger-{}.json", std::process::id()));
    report::export(&ledger, &path).unwrap();
    let loaded = report::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.entries(), ledger.entries());
    assert_eq!(loaded.stats().modified, 1);
}
