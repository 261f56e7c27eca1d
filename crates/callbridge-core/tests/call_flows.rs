//! Call flow integration tests
//!
//! Drives a running bridge through outgoing, incoming, cancelled and failed
//! calls using the fakes in `callbridge_core::testing`, checking the events
//! the host sees and the calls made into the native UI and the transport.

use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

use callbridge_core::config::BridgeConfig;
use callbridge_core::store::MemoryStore;
use callbridge_core::testing::{
    FakeMicrophone, TelephonyCall, TelephonyOp, TestBridge, TransportCall, TransportOp,
};
use callbridge_core::types::{AudioRoute, EndedReason};
use callbridge_core::{
    ActionOutcome, BridgeError, CallDirection, CallInvite, CallStatus, OutboundEvent,
    TransportEvent, UiActionKind,
};

fn count(events: &[String], wire: &str) -> usize {
    events.iter().filter(|e| e.as_str() == wire).count()
}

// ===== OUTGOING =====

#[tokio::test]
async fn test_make_call_issues_one_start_request() {
    let bridge = TestBridge::start().unwrap();

    let call_id = bridge.dial("+15551234", "alice").await.unwrap();

    assert_eq!(
        bridge.telephony.start_requests(),
        vec![(call_id, "+15551234".to_string())]
    );
    let snapshot = bridge.settle().await.unwrap();
    let session = snapshot.session.unwrap();
    assert_eq!(session.direction, CallDirection::Outgoing);
    assert_eq!(session.remote, "+15551234");
    assert!(snapshot.pending_outgoing.is_none());
}

#[tokio::test]
async fn test_make_call_connects_with_destination_and_params() {
    let bridge = TestBridge::start().unwrap();
    bridge
        .invoke(
            "makeCall",
            json!({ "To": "+15551234", "From": "alice", "accessToken": "jwt", "priority": "high" }),
        )
        .await
        .unwrap();
    bridge.settle().await.unwrap();

    let connects: Vec<_> = bridge
        .transport
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            TransportCall::Connect(options) => Some(options),
            _ => None,
        })
        .collect();
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].access_token, "jwt");
    assert_eq!(connects[0].params.get("To").map(String::as_str), Some("+15551234"));
    assert_eq!(connects[0].params.get("priority").map(String::as_str), Some("high"));

    let calls = bridge.telephony.calls();
    assert!(calls.contains(&TelephonyCall::OutgoingConnecting(connects[0].call_id)));
    assert!(
        calls
            .iter()
            .any(|c| matches!(c, TelephonyCall::CallUpdated { update, .. } if update.handle == "+15551234")),
        "Successful start transaction should update the native call"
    );
}

#[tokio::test]
async fn test_outgoing_progress_events() {
    let mut bridge = TestBridge::start().unwrap();
    let call_id = bridge.dial("+15551234", "alice").await.unwrap();
    bridge.drain();

    bridge
        .transport_event(TransportEvent::Ringing { call_id, from: None, to: None })
        .await
        .unwrap();
    let snapshot = bridge
        .transport_event(TransportEvent::Connected { call_id, from: None, to: None })
        .await
        .unwrap();

    assert_eq!(
        bridge.drain_call_events(),
        vec![
            "Ringing|alice|+15551234|Outgoing".to_string(),
            "Connected|alice|+15551234|Outgoing".to_string(),
        ]
    );
    assert_eq!(snapshot.session.unwrap().status, CallStatus::Connected);
    assert!(bridge.telephony.calls().contains(&TelephonyCall::OutgoingConnected(call_id)));
    assert_eq!(bridge.audio.routes(), vec![AudioRoute::Earpiece]);
}

#[tokio::test]
async fn test_progress_for_other_call_is_ignored() {
    let mut bridge = TestBridge::start().unwrap();
    let call_id = bridge.dial("+15551234", "alice").await.unwrap();
    bridge.drain();

    let stranger = Uuid::new_v4();
    bridge
        .transport_event(TransportEvent::Connected { call_id: stranger, from: None, to: None })
        .await
        .unwrap();
    let snapshot = bridge
        .transport_event(TransportEvent::Disconnected { call_id: stranger, error: None })
        .await
        .unwrap();

    assert!(bridge.drain_call_events().is_empty());
    assert_eq!(snapshot.session.map(|s| s.id), Some(call_id));
}

#[tokio::test]
async fn test_make_call_without_tokens_fails() {
    let mut bridge = TestBridge::start().unwrap();
    bridge
        .invoke("makeCall", json!({ "To": "+15551234", "From": "alice" }))
        .await
        .unwrap();
    let snapshot = bridge.settle().await.unwrap();

    assert!(snapshot.is_idle());
    assert_eq!(bridge.transport.count(TransportOp::Connect), 0);
    let errors: Vec<_> = bridge.drain().into_iter().filter(OutboundEvent::is_error).collect();
    assert!(matches!(&errors[..], [OutboundEvent::Error { code, .. }] if code == "MISSING_TOKENS"));
}

#[tokio::test]
async fn test_make_call_uses_registered_credential() {
    let bridge = TestBridge::start().unwrap();
    bridge.invoke("tokens", json!({ "accessToken": "jwt-1" })).await.unwrap();
    bridge
        .invoke("makeCall", json!({ "To": "+15551234", "From": "alice" }))
        .await
        .unwrap();
    let snapshot = bridge.settle().await.unwrap();

    assert!(snapshot.session.is_some());
    assert!(bridge
        .transport
        .calls()
        .iter()
        .any(|c| matches!(c, TransportCall::Connect(options) if options.access_token == "jwt-1")));
}

#[tokio::test]
async fn test_start_transaction_failure_frees_slot() {
    let mut bridge = TestBridge::start().unwrap();
    bridge
        .telephony
        .fail(TelephonyOp::RequestStart, BridgeError::native_ui("Call directory busy"));

    bridge
        .invoke("makeCall", json!({ "To": "+15551234", "From": "alice", "accessToken": "jwt" }))
        .await
        .unwrap();
    let snapshot = bridge.settle().await.unwrap();

    assert!(snapshot.is_idle());
    assert_eq!(bridge.transport.count(TransportOp::Connect), 0);
    assert!(bridge.drain().iter().any(OutboundEvent::is_error));

    bridge.telephony.clear_failure(TelephonyOp::RequestStart);
    assert!(bridge.dial("+15551234", "alice").await.is_ok());
}

#[tokio::test]
async fn test_connect_failure_frees_slot() {
    let bridge = TestBridge::start().unwrap();
    bridge
        .transport
        .fail(TransportOp::Connect, BridgeError::transport("No network"));

    let result = bridge.dial("+15551234", "alice").await;

    assert_eq!(result, Err(BridgeError::NoActiveCall));
    assert!(bridge.settle().await.unwrap().is_idle());
}

#[tokio::test]
async fn test_denied_microphone_continues_by_default() {
    let mut bridge =
        TestBridge::start_with(BridgeConfig::default(), MemoryStore::new(), FakeMicrophone::denied())
            .unwrap();

    bridge.dial("+15551234", "alice").await.unwrap();

    assert!(bridge
        .drain_logs()
        .iter()
        .any(|l| l.starts_with("LOG|WARN|Microphone permission denied")));
}

#[tokio::test]
async fn test_denied_microphone_blocks_when_required() {
    let config = BridgeConfig::default().with_require_microphone(true);
    let mut bridge = TestBridge::start_with(config, MemoryStore::new(), FakeMicrophone::denied()).unwrap();

    bridge
        .invoke("makeCall", json!({ "To": "+15551234", "From": "alice", "accessToken": "jwt" }))
        .await
        .unwrap();
    let snapshot = bridge.settle().await.unwrap();

    assert!(snapshot.is_idle());
    assert!(bridge.telephony.start_requests().is_empty());
    let errors: Vec<_> = bridge.drain().into_iter().filter(OutboundEvent::is_error).collect();
    assert!(matches!(&errors[..], [OutboundEvent::Error { code, .. }] if code == "PERMISSION_DENIED"));
}

#[tokio::test]
async fn test_make_call_while_connected_hangs_up_first() {
    let bridge = TestBridge::start().unwrap();
    let call_id = bridge.dial("+15551234", "alice").await.unwrap();
    bridge
        .transport_event(TransportEvent::Connected { call_id, from: None, to: None })
        .await
        .unwrap();

    let result = bridge
        .invoke("makeCall", json!({ "To": "+15559999", "From": "alice", "accessToken": "jwt" }))
        .await;
    assert_eq!(result, Err(BridgeError::AlreadyInCall));

    let snapshot = bridge.settle().await.unwrap();
    assert!(snapshot.is_idle());
    assert_eq!(bridge.telephony.end_requests(), vec![call_id]);
    assert_eq!(bridge.telephony.start_requests().len(), 1);
}

#[tokio::test]
async fn test_make_call_while_dialing_is_refused() {
    let bridge = TestBridge::start().unwrap();
    bridge.dial("+15551234", "alice").await.unwrap();

    let result = bridge
        .invoke("makeCall", json!({ "To": "+15559999", "From": "alice", "accessToken": "jwt" }))
        .await;

    assert_eq!(result, Err(BridgeError::AlreadyInCall));
    assert_eq!(bridge.telephony.start_requests().len(), 1);
}

#[tokio::test]
async fn test_reconnecting_call_returns_to_connected() {
    let mut bridge = TestBridge::start().unwrap();
    let call_id = bridge.dial("+15551234", "alice").await.unwrap();
    bridge
        .transport_event(TransportEvent::Connected { call_id, from: None, to: None })
        .await
        .unwrap();
    bridge.drain();

    let snapshot = bridge
        .transport_event(TransportEvent::Reconnecting {
            call_id,
            error: "Signaling connection lost".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(snapshot.session.unwrap().status, CallStatus::Reconnecting);
    assert!(bridge
        .drain_logs()
        .contains(&"LOG|INFO|Call reconnecting: Signaling connection lost".to_string()));

    let snapshot = bridge
        .transport_event(TransportEvent::Reconnected { call_id })
        .await
        .unwrap();
    assert_eq!(snapshot.session.unwrap().status, CallStatus::Connected);
    assert!(bridge
        .drain_logs()
        .contains(&"LOG|INFO|Call reconnected".to_string()));
}

#[tokio::test]
async fn test_reconnect_for_other_call_is_ignored() {
    let mut bridge = TestBridge::start().unwrap();
    let call_id = bridge.dial("+15551234", "alice").await.unwrap();
    bridge
        .transport_event(TransportEvent::Connected { call_id, from: None, to: None })
        .await
        .unwrap();
    bridge.drain();

    let stranger = Uuid::new_v4();
    bridge
        .transport_event(TransportEvent::Reconnecting {
            call_id: stranger,
            error: "Signaling connection lost".to_string(),
        })
        .await
        .unwrap();
    let snapshot = bridge
        .transport_event(TransportEvent::Reconnected { call_id: stranger })
        .await
        .unwrap();

    assert_eq!(snapshot.session.unwrap().status, CallStatus::Connected);
    assert!(!bridge
        .drain_logs()
        .iter()
        .any(|l| l.starts_with("LOG|INFO|Call reconnect")));
}

// ===== ENDING =====

#[tokio::test]
async fn test_hang_up_then_repeated_disconnects_end_once() {
    let mut bridge = TestBridge::start().unwrap();
    let call_id = bridge.dial("+15551234", "alice").await.unwrap();
    bridge
        .transport_event(TransportEvent::Connected { call_id, from: None, to: None })
        .await
        .unwrap();
    bridge.drain();

    bridge.invoke("hangUp", json!({})).await.unwrap();
    let snapshot = bridge.settle().await.unwrap();
    assert!(snapshot.is_idle());
    assert_eq!(bridge.transport.count(TransportOp::Disconnect), 1);

    for _ in 0..3 {
        bridge
            .transport_event(TransportEvent::Disconnected { call_id, error: None })
            .await
            .unwrap();
    }

    let events = bridge.drain_call_events();
    assert_eq!(count(&events, "Call Ended"), 1);
    assert!(
        bridge.telephony.ended_reports().is_empty(),
        "User initiated hang up must not be reported back to the native UI"
    );
}

#[tokio::test]
async fn test_remote_hang_up_reports_to_native_ui() {
    let mut bridge = TestBridge::start().unwrap();
    let call_id = bridge.dial("+15551234", "alice").await.unwrap();
    bridge.drain();

    let snapshot = bridge
        .transport_event(TransportEvent::Disconnected { call_id, error: None })
        .await
        .unwrap();

    assert!(snapshot.is_idle());
    assert_eq!(bridge.drain_call_events(), vec!["Call Ended".to_string()]);
    assert_eq!(
        bridge.telephony.ended_reports(),
        vec![(call_id, EndedReason::RemoteEnded)]
    );
}

#[tokio::test]
async fn test_failed_connect_with_expired_token() {
    let mut bridge = TestBridge::start().unwrap();
    let call_id = bridge.dial("+15551234", "alice").await.unwrap();
    bridge.drain();

    let snapshot = bridge
        .transport_event(TransportEvent::FailedToConnect {
            call_id,
            error: "Access Token expired or expiration date invalid".to_string(),
        })
        .await
        .unwrap();

    assert!(snapshot.is_idle());
    assert_eq!(
        bridge.drain_call_events(),
        vec!["Call Ended".to_string(), "DEVICETOKEN".to_string()]
    );
    assert_eq!(bridge.telephony.ended_reports(), vec![(call_id, EndedReason::Failed)]);
}

#[tokio::test]
async fn test_disconnect_with_error_emits_failure() {
    let mut bridge = TestBridge::start().unwrap();
    let call_id = bridge.dial("+15551234", "alice").await.unwrap();
    bridge.drain();

    bridge
        .transport_event(TransportEvent::Disconnected {
            call_id,
            error: Some("Media connection failed".to_string()),
        })
        .await
        .unwrap();

    let events = bridge.drain();
    let wires: Vec<_> = events
        .iter()
        .filter(|e| !matches!(e, OutboundEvent::Log { .. }))
        .map(OutboundEvent::wire)
        .collect();
    assert_eq!(
        wires,
        vec![
            "Call Ended".to_string(),
            "Call Failed: Media connection failed".to_string(),
        ]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, OutboundEvent::Error { code, .. } if code == "TRANSPORT_FAILURE")));
    assert_eq!(bridge.telephony.ended_reports(), vec![(call_id, EndedReason::Failed)]);
}

#[tokio::test]
async fn test_failed_end_transaction_keeps_remote_hang_up_reported() {
    let mut bridge = TestBridge::start().unwrap();
    let call_id = bridge.dial("+15551234", "alice").await.unwrap();
    bridge
        .transport_event(TransportEvent::Connected { call_id, from: None, to: None })
        .await
        .unwrap();
    bridge
        .telephony
        .fail(TelephonyOp::RequestEnd, BridgeError::native_ui("Transaction refused"));
    bridge.drain();

    bridge.invoke("hangUp", json!({})).await.unwrap();
    let snapshot = bridge.settle().await.unwrap();
    assert!(snapshot.session.is_some());
    assert_eq!(bridge.transport.count(TransportOp::Disconnect), 0);
    bridge.telephony.clear_failure(TelephonyOp::RequestEnd);

    let snapshot = bridge
        .transport_event(TransportEvent::Disconnected { call_id, error: None })
        .await
        .unwrap();

    assert!(snapshot.is_idle());
    assert_eq!(
        bridge.telephony.ended_reports(),
        vec![(call_id, EndedReason::RemoteEnded)]
    );
    assert_eq!(count(&bridge.drain_call_events(), "Call Ended"), 1);
}

#[tokio::test]
async fn test_hang_up_abandons_outgoing_call_still_starting() {
    let mut bridge = TestBridge::start().unwrap();
    bridge.telephony.set_auto_perform(false);

    bridge
        .invoke(
            "makeCall",
            json!({ "To": "+15551234", "From": "alice", "accessToken": "jwt-1" }),
        )
        .await
        .unwrap();
    let snapshot = bridge.settle().await.unwrap();
    let call_id = snapshot.pending_outgoing.unwrap();
    assert_eq!(bridge.telephony.start_requests().len(), 1);

    bridge.invoke("hangUp", json!({})).await.unwrap();
    let snapshot = bridge.settle().await.unwrap();
    assert!(snapshot.is_idle());
    assert!(bridge
        .drain_logs()
        .contains(&"LOG|INFO|Outgoing call abandoned before it connected".to_string()));

    let outcome = bridge
        .ui_action(UiActionKind::StartCall { call_id, handle: "+15551234".to_string() })
        .await
        .unwrap();
    assert_eq!(outcome, ActionOutcome::Failed);
    assert_eq!(bridge.transport.count(TransportOp::Connect), 0);
    assert!(bridge.settle().await.unwrap().is_idle());
}

// ===== INCOMING =====

#[tokio::test]
async fn test_invite_reports_stripped_handle() {
    let mut bridge = TestBridge::start().unwrap();

    let invite = bridge.ring_in("client:bob").await.unwrap();

    assert_eq!(
        bridge.drain_call_events(),
        vec!["Ringing|bob|alice|Incoming".to_string()]
    );
    let reports = bridge.telephony.incoming_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, invite.id);
    assert_eq!(reports[0].1.handle, "bob");
    assert_eq!(reports[0].1.caller_name, "Unknown Caller");
    assert!(reports[0].1.supports_dtmf);
}

#[tokio::test]
async fn test_invite_without_from_uses_default_caller() {
    let mut bridge = TestBridge::start().unwrap();
    let invite = CallInvite::new(Uuid::new_v4(), None, "alice");

    bridge
        .transport_event(TransportEvent::InviteReceived(invite))
        .await
        .unwrap();

    assert_eq!(
        bridge.drain_call_events(),
        vec!["Ringing|Unknown Caller|alice|Incoming".to_string()]
    );
}

#[tokio::test]
async fn test_invite_caller_id_parameter_wins() {
    let bridge = TestBridge::start().unwrap();
    bridge
        .invoke("registerClient", json!({ "id": "bob", "name": "Bob From Directory" }))
        .await
        .unwrap();
    let invite = CallInvite::new(Uuid::new_v4(), Some("client:bob".into()), "alice")
        .with_parameter("CALLER_ID", "Bob Calling");

    bridge
        .transport_event(TransportEvent::InviteReceived(invite))
        .await
        .unwrap();

    let reports = bridge.telephony.incoming_reports();
    assert_eq!(reports[0].1.caller_name, "Bob Calling");
}

#[tokio::test]
async fn test_accept_creates_single_incoming_session() {
    let mut bridge = TestBridge::start().unwrap();
    let invite = bridge.ring_in("client:bob").await.unwrap();
    bridge.drain();

    let outcome = bridge
        .ui_action(UiActionKind::AnswerCall { call_id: invite.id })
        .await
        .unwrap();

    assert_eq!(outcome, ActionOutcome::Fulfilled);
    let snapshot = bridge.settle().await.unwrap();
    assert!(snapshot.invite.is_none());
    let session = snapshot.session.unwrap();
    assert_eq!(session.id, invite.id);
    assert_eq!(session.direction, CallDirection::Incoming);
    assert_eq!(bridge.transport.count(TransportOp::Accept), 1);
    assert_eq!(bridge.drain_call_events(), vec!["Answer|bob|alice".to_string()]);

    let again = bridge
        .ui_action(UiActionKind::AnswerCall { call_id: invite.id })
        .await
        .unwrap();
    assert_eq!(again, ActionOutcome::Failed);
    assert_eq!(bridge.transport.count(TransportOp::Accept), 1);
}

#[tokio::test]
async fn test_second_invite_is_rejected() {
    let bridge = TestBridge::start().unwrap();
    let first = bridge.ring_in("client:bob").await.unwrap();
    let second = bridge.ring_in("client:carol").await.unwrap();

    let snapshot = bridge.settle().await.unwrap();
    assert_eq!(snapshot.invite.map(|i| i.id), Some(first.id));
    assert_eq!(bridge.transport.calls(), vec![TransportCall::Reject(second.id)]);
    assert_eq!(bridge.telephony.incoming_reports().len(), 1);
}

#[tokio::test]
async fn test_second_invite_replaces_under_replace_policy() {
    let config = BridgeConfig::default()
        .with_duplicate_invite_policy(callbridge_core::DuplicateInvitePolicy::Replace);
    let bridge = TestBridge::start_with(config, MemoryStore::new(), FakeMicrophone::granted()).unwrap();

    bridge.ring_in("client:bob").await.unwrap();
    let second = bridge.ring_in("client:carol").await.unwrap();

    let snapshot = bridge.settle().await.unwrap();
    assert_eq!(snapshot.invite.map(|i| i.id), Some(second.id));
    assert_eq!(bridge.transport.count(TransportOp::Reject), 0);
}

#[tokio::test]
async fn test_invite_during_call_is_rejected() {
    let bridge = TestBridge::start().unwrap();
    let call_id = bridge.dial("+15551234", "alice").await.unwrap();

    let invite = bridge.ring_in("client:bob").await.unwrap();

    let snapshot = bridge.settle().await.unwrap();
    assert_eq!(snapshot.session.map(|s| s.id), Some(call_id));
    assert!(snapshot.invite.is_none());
    assert!(bridge.transport.calls().contains(&TransportCall::Reject(invite.id)));
}

#[tokio::test]
async fn test_hang_up_rejects_ringing_invite() {
    let mut bridge = TestBridge::start().unwrap();
    let invite = bridge.ring_in("client:bob").await.unwrap();
    bridge.drain();

    bridge.invoke("hangUp", json!({})).await.unwrap();
    let snapshot = bridge.settle().await.unwrap();

    assert!(snapshot.is_idle());
    assert_eq!(bridge.telephony.end_requests(), vec![invite.id]);
    assert_eq!(bridge.transport.calls(), vec![TransportCall::Reject(invite.id)]);
    assert_eq!(bridge.drain_call_events(), vec!["Call Ended".to_string()]);
}

#[tokio::test]
async fn test_cancelled_invite_is_not_rejected() {
    let mut bridge = TestBridge::start().unwrap();
    let invite = bridge.ring_in("client:bob").await.unwrap();
    bridge.drain();

    let snapshot = bridge
        .transport_event(TransportEvent::InviteCancelled { invite_id: invite.id, error: None })
        .await
        .unwrap();

    assert!(snapshot.is_idle());
    assert_eq!(bridge.telephony.end_requests(), vec![invite.id]);
    assert_eq!(bridge.transport.count(TransportOp::Reject), 0);
    assert_eq!(bridge.drain_call_events(), vec!["Call Ended".to_string()]);
}

#[tokio::test]
async fn test_cancel_without_invite_warns() {
    let mut bridge = TestBridge::start().unwrap();

    bridge
        .transport_event(TransportEvent::InviteCancelled { invite_id: Uuid::new_v4(), error: None })
        .await
        .unwrap();

    assert!(bridge
        .drain_logs()
        .contains(&"LOG|WARN|No pending call invite".to_string()));
    assert!(bridge.telephony.end_requests().is_empty());
}

#[tokio::test]
async fn test_end_call_action_for_unknown_call_is_fulfilled() {
    let bridge = TestBridge::start().unwrap();

    let outcome = bridge
        .ui_action(UiActionKind::EndCall { call_id: Uuid::new_v4() })
        .await
        .unwrap();

    assert_eq!(outcome, ActionOutcome::Fulfilled);
    assert!(bridge.transport.calls().is_empty());
}

#[tokio::test]
async fn test_end_transaction_failure_emits_error() {
    let mut bridge = TestBridge::start().unwrap();
    bridge.ring_in("client:bob").await.unwrap();
    bridge
        .telephony
        .fail(TelephonyOp::RequestEnd, BridgeError::native_ui("Unknown call"));
    bridge.drain();

    bridge.invoke("hangUp", json!({})).await.unwrap();
    bridge.settle().await.unwrap();

    let wires = bridge.drain_call_events();
    assert_eq!(wires.len(), 1);
    assert!(wires[0].starts_with("End Call Failed:"));
}
