//! Integration tests for the hacker sandbox

mod common;

use common::{advance, sandbox_config, session};
use securecomm::codec;
use securecomm::error::SimError;
use securecomm::models::{LogStatus, Protocol, RecordStatus, TrafficKind};
use securecomm::sandbox::{API_ENDPOINT, P2P_ENDPOINT, P2P_FROM, P2P_PAYLOAD, P2P_TO};

#[tokio::test(start_paused = true)]
async fn test_p2p_capture_decrypt_and_tamper() {
    let session = session(&sandbox_config(true, true));
    let sandbox = session.sandbox();

    let record = sandbox.generate(TrafficKind::P2p).unwrap();
    assert_eq!(record.protocol, Protocol::Https);
    assert_eq!(record.port, 443);
    assert_eq!(record.endpoint, P2P_ENDPOINT);
    assert_eq!(record.body, P2P_PAYLOAD);
    assert_eq!(record.ciphertext.as_deref(), Some(codec::encode(P2P_PAYLOAD).as_str()));
    assert_eq!(record.header("X-From"), Some(P2P_FROM));
    assert_eq!(record.header("X-To"), Some(P2P_TO));
    assert_eq!(sandbox.selected().as_deref(), Some(record.id.as_str()));

    let trapped = session.ledger().get(&record.id).unwrap();
    assert_eq!(trapped.status, LogStatus::Intercepted);
    assert_eq!(trapped.incoming_payload, codec::encode(P2P_PAYLOAD));
    assert_eq!(trapped.decryption_key, codec::SECRET_KEY);
    assert!(session
        .console()
        .contains(&format!("INTERCEPT: Request {} from {P2P_FROM} trapped.", record.id)));

    sandbox.decrypt(&record.id).unwrap();
    advance(600).await;
    assert!(sandbox.decrypted().is_none());
    assert!(sandbox.progress() > 0.0 && sandbox.progress() < 100.0);

    advance(700).await;
    assert_eq!(sandbox.decrypted().as_deref(), Some(P2P_PAYLOAD));
    assert_eq!(sandbox.editing(), P2P_PAYLOAD);
    assert_eq!(sandbox.progress(), 100.0);
    assert!(session
        .console()
        .contains(&format!("DECRYPT: Packet {} recovered.", record.id)));

    sandbox.set_editing("Meet at 6 PM instead.").unwrap();
    let entry = sandbox.forward_modified(&record.id).unwrap();
    assert_eq!(entry.status, LogStatus::Modified);
    assert_eq!(entry.tampered_message, "Meet at 6 PM instead.");
    assert_eq!(
        entry.outgoing_payload.as_deref(),
        Some(codec::encode("Meet at 6 PM instead.").as_str())
    );
    assert_eq!(entry.source, P2P_FROM);
    assert_eq!(entry.destination, P2P_TO);
    assert_eq!(session.ledger().len(), 1);
    assert!(sandbox.selected().is_none());

    advance(600).await;
    let delivered = sandbox.record(&record.id).unwrap();
    assert_eq!(delivered.status, RecordStatus::Completed);
    assert_eq!(delivered.body, codec::encode("Meet at 6 PM instead."));
    assert!(session
        .console()
        .contains(&format!("SERVER: Delivered to {P2P_TO}. [MODIFIED]")));
}

#[tokio::test(start_paused = true)]
async fn test_passthrough_delivers_without_logging() {
    let session = session(&sandbox_config(false, true));
    let sandbox = session.sandbox();

    let record = sandbox.generate(TrafficKind::P2p).unwrap();
    assert!(session.ledger().is_empty());
    assert!(session
        .console()
        .contains(&format!("ROUTING: Request {} forwarded to {P2P_TO}.", record.id)));
    assert_eq!(
        sandbox.record(&record.id).unwrap().status,
        RecordStatus::Captured
    );

    advance(600).await;
    let delivered = sandbox.record(&record.id).unwrap();
    assert_eq!(delivered.status, RecordStatus::Completed);
    assert_eq!(delivered.body, P2P_PAYLOAD);
    assert!(session
        .console()
        .contains(&format!("SERVER: Delivered to {P2P_TO}.")));
    assert!(!session.console().contains("[MODIFIED]"));
}

#[tokio::test(start_paused = true)]
async fn test_completed_record_cannot_be_forwarded() {
    let session = session(&sandbox_config(false, true));
    let sandbox = session.sandbox();

    let record = sandbox.generate(TrafficKind::Api).unwrap();
    advance(600).await;
    sandbox.select(&record.id).unwrap();

    assert!(matches!(
        sandbox.forward_modified(&record.id),
        Err(SimError::InvalidState(_))
    ));
    assert!(session.ledger().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_forward_requires_selection() {
    let session = session(&sandbox_config(true, false));
    let sandbox = session.sandbox();

    let record = sandbox.generate(TrafficKind::P2p).unwrap();
    sandbox.forward_modified(&record.id).unwrap();
    assert!(matches!(
        sandbox.forward_modified(&record.id),
        Err(SimError::NotSelected(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_plain_http_forward_sends_plaintext() {
    let session = session(&sandbox_config(true, false));
    let sandbox = session.sandbox();

    let record = sandbox.generate(TrafficKind::P2p).unwrap();
    assert_eq!(record.protocol, Protocol::Http);
    assert_eq!(record.port, 80);
    assert!(record.ciphertext.is_none());
    assert!(matches!(
        sandbox.decrypt(&record.id),
        Err(SimError::NoCiphertext(_))
    ));

    sandbox.set_editing("Meet at 6 PM instead.").unwrap();
    let entry = sandbox.forward_modified(&record.id).unwrap();
    assert_eq!(entry.incoming_payload, P2P_PAYLOAD);
    assert_eq!(entry.outgoing_payload.as_deref(), Some("Meet at 6 PM instead."));
    assert_eq!(entry.decryption_key, codec::NO_KEY);
    assert!(!entry.is_encrypted);
}

#[tokio::test(start_paused = true)]
async fn test_decrypt_is_idempotent() {
    let session = session(&sandbox_config(true, true));
    let sandbox = session.sandbox();

    let record = sandbox.generate(TrafficKind::P2p).unwrap();
    sandbox.decrypt(&record.id).unwrap();
    advance(600).await;
    let midway = sandbox.progress();
    sandbox.decrypt(&record.id).unwrap();
    assert_eq!(sandbox.progress(), midway);

    advance(700).await;
    sandbox.set_editing("edited").unwrap();
    sandbox.decrypt(&record.id).unwrap();
    advance(1300).await;
    assert_eq!(sandbox.editing(), "edited");
    assert_eq!(sandbox.decrypted().as_deref(), Some(P2P_PAYLOAD));
}

#[tokio::test(start_paused = true)]
async fn test_selection_change_cancels_decrypt() {
    let session = session(&sandbox_config(true, true));
    let sandbox = session.sandbox();

    let first = sandbox.generate(TrafficKind::P2p).unwrap();
    let second = sandbox.generate(TrafficKind::Api).unwrap();
    assert_eq!(sandbox.selected().as_deref(), Some(second.id.as_str()));

    assert!(matches!(
        sandbox.decrypt(&first.id),
        Err(SimError::NotSelected(_))
    ));

    sandbox.decrypt(&second.id).unwrap();
    advance(600).await;
    sandbox.select(&first.id).unwrap();
    assert_eq!(sandbox.progress(), 0.0);
    assert_eq!(sandbox.editing(), P2P_PAYLOAD);

    advance(1300).await;
    assert!(sandbox.decrypted().is_none());
    assert_eq!(sandbox.progress(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_api_template_defaults() {
    let session = session(&sandbox_config(true, true));
    let sandbox = session.sandbox();

    let record = sandbox.generate(TrafficKind::Api).unwrap();
    assert_eq!(record.endpoint, API_ENDPOINT);
    let body: serde_json::Value = serde_json::from_str(&record.body).unwrap();
    assert_eq!(body["token"], format!("AUTH_{}", record.id));
    assert!(record.header("X-From").is_none());

    let entry = session.ledger().get(&record.id).unwrap();
    assert_eq!(entry.source, "LocalSystem");
    assert_eq!(entry.destination, "RemoteAPI");
    assert!(session
        .console()
        .contains(&format!("INTERCEPT: Request {} from System trapped.", record.id)));
}

#[tokio::test(start_paused = true)]
async fn test_records_are_newest_first() {
    let session = session(&sandbox_config(true, true));
    let sandbox = session.sandbox();

    let a = sandbox.generate(TrafficKind::P2p).unwrap();
    let b = sandbox.generate(TrafficKind::Api).unwrap();
    let ids: Vec<_> = sandbox.records().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![b.id, a.id]);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_record_is_reported() {
    let session = session(&sandbox_config(true, true));
    assert!(matches!(
        session.sandbox().select("PKT-NOPE0"),
        Err(SimError::RecordNotFound(_))
    ));
    assert!(session.sandbox().set_editing("x").is_err());
}

#[tokio::test(start_paused = true)]
async fn test_clear_selection_stops_inspection() {
    let session = session(&sandbox_config(true, true));
    let sandbox = session.sandbox();

    let record = sandbox.generate(TrafficKind::P2p).unwrap();
    sandbox.decrypt(&record.id).unwrap();
    advance(600).await;
    sandbox.clear_selection();

    let view = sandbox.view();
    assert!(view.selected.is_none());
    assert_eq!(view.editing, "");
    assert!(!view.decrypting);
    assert_eq!(view.progress, 0.0);

    advance(1300).await;
    assert!(sandbox.decrypted().is_none());
    assert!(matches!(
        sandbox.forward_modified(&record.id),
        Err(SimError::NotSelected(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_view_reflects_decrypt_progress() {
    let session = session(&sandbox_config(true, true));
    let sandbox = session.sandbox();

    let record = sandbox.generate(TrafficKind::P2p).unwrap();
    sandbox.decrypt(&record.id).unwrap();
    advance(600).await;

    let view = sandbox.view();
    assert_eq!(view.records.len(), 1);
    assert_eq!(view.selected.as_deref(), Some(record.id.as_str()));
    assert!(view.decrypting);
    assert!(view.progress > 0.0 && view.progress < 100.0);
    assert!(view.decrypted.is_none());

    advance(700).await;
    let view = sandbox.view();
    assert!(!view.decrypting);
    assert_eq!(view.decrypted.as_deref(), Some(P2P_PAYLOAD));
    assert_eq!(view.editing, P2P_PAYLOAD);
}
