//! Test doubles for every capability and a harness around a running bridge
//!
//! The fakes record each call they receive and can be told to fail specific
//! operations. [`FakeTransport`] and [`FakeTelephony`] are attached to the
//! bridge through a [`WeakBridgeHandle`] so they can answer the way the real
//! SDKs do: a requested start or end transaction comes back as a native UI
//! action, a hang-up comes back as a disconnect callback, and a VoIP push
//! payload comes back as an invite.
//!
//! # Usage Examples
//!
//! ```rust
//! use callbridge_core::testing::TestBridge;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> callbridge_core::BridgeResult<()> {
//! let bridge = TestBridge::start()?;
//! bridge.invoke("makeCall", json!({ "To": "+15551234", "From": "alice", "accessToken": "jwt" })).await?;
//!
//! let snapshot = bridge.settle().await?;
//! assert!(snapshot.session.is_some());
//! assert_eq!(bridge.telephony.start_requests().len(), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::bridge::{ActionOutcome, TransportEvent, UiActionKind};
use crate::capabilities::{
    AudioRouter, Capabilities, MicrophonePermission, PermissionStatus, TelephonyUi, VoiceTransport,
};
use crate::commands::CommandReply;
use crate::config::BridgeConfig;
use crate::coordinator::{BridgeCoordinator, BridgeHandle, BridgeSnapshot, WeakBridgeHandle};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{EventStream, OutboundEvent};
use crate::store::MemoryStore;
use crate::types::{
    AcceptedCall, AudioRoute, CallId, CallInvite, CallUpdate, ConnectOptions, DeviceToken,
    EndedReason,
};

/// Access token the harness dials with
pub const TEST_ACCESS_TOKEN: &str = "test-access-token";

const SETTLE_ROUNDS: usize = 16;
const WAIT_ROUNDS: usize = 500;

fn post_back(loopback: &Mutex<Option<WeakBridgeHandle>>, post: impl FnOnce(&BridgeHandle)) {
    if let Some(handle) = loopback.lock().as_ref().and_then(WeakBridgeHandle::upgrade) {
        post(&handle);
    }
}

// ===== TRANSPORT =====

/// Transport operation kinds, for failure injection and counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportOp {
    Register,
    Unregister,
    HandleNotification,
    Connect,
    Accept,
    Reject,
    Disconnect,
    SetMuted,
    SetHeld,
    SendDigits,
}

/// A recorded transport call
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Register {
        access_token: String,
        device_token: DeviceToken,
    },
    Unregister {
        access_token: String,
        device_token: DeviceToken,
    },
    HandleNotification(Value),
    Connect(ConnectOptions),
    Accept(CallId),
    Reject(CallId),
    Disconnect(CallId),
    SetMuted(CallId, bool),
    SetHeld(CallId, bool),
    SendDigits(CallId, String),
}

impl TransportCall {
    pub fn op(&self) -> TransportOp {
        match self {
            TransportCall::Register { .. } => TransportOp::Register,
            TransportCall::Unregister { .. } => TransportOp::Unregister,
            TransportCall::HandleNotification(_) => TransportOp::HandleNotification,
            TransportCall::Connect(_) => TransportOp::Connect,
            TransportCall::Accept(_) => TransportOp::Accept,
            TransportCall::Reject(_) => TransportOp::Reject,
            TransportCall::Disconnect(_) => TransportOp::Disconnect,
            TransportCall::SetMuted(..) => TransportOp::SetMuted,
            TransportCall::SetHeld(..) => TransportOp::SetHeld,
            TransportCall::SendDigits(..) => TransportOp::SendDigits,
        }
    }
}

/// Decode the push payload shape [`FakeTransport`] understands into an invite
///
/// `{"to": "...", "from": "...", "uuid": "...", "customParameters": {...}}`;
/// only `to` is required.
pub fn invite_from_payload(payload: &Value) -> Option<CallInvite> {
    let object = payload.as_object()?;
    let to = object.get("to")?.as_str()?;
    let id = object
        .get("uuid")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let from = object.get("from").and_then(Value::as_str).map(str::to_string);

    let mut invite = CallInvite::new(id, from, to);
    if let Some(params) = object.get("customParameters").and_then(Value::as_object) {
        for (key, value) in params {
            if let Some(value) = value.as_str() {
                invite = invite.with_parameter(key.clone(), value);
            }
        }
    }
    Some(invite)
}

/// Recording [`VoiceTransport`]
#[derive(Debug, Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<TransportCall>>,
    failures: Mutex<HashMap<TransportOp, BridgeError>>,
    loopback: Mutex<Option<WeakBridgeHandle>>,
    manual_disconnect: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route echoed callbacks to `handle`
    pub fn attach(&self, handle: WeakBridgeHandle) {
        *self.loopback.lock() = Some(handle);
    }

    /// Make every `op` fail with `error` until cleared
    pub fn fail(&self, op: TransportOp, error: BridgeError) {
        self.failures.lock().insert(op, error);
    }

    pub fn clear_failure(&self, op: TransportOp) {
        self.failures.lock().remove(&op);
    }

    /// Stop answering `disconnect` with a disconnect callback
    pub fn set_manual_disconnect(&self, manual: bool) {
        self.manual_disconnect.store(manual, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, op: TransportOp) -> usize {
        self.calls.lock().iter().filter(|c| c.op() == op).count()
    }

    /// Deliver a transport callback to the attached bridge
    pub fn emit(&self, event: TransportEvent) {
        post_back(&self.loopback, |handle| {
            let _ = handle.transport_event(event);
        });
    }

    fn record(&self, call: TransportCall) -> BridgeResult<()> {
        let op = call.op();
        self.calls.lock().push(call);
        match self.failures.lock().get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn register(&self, access_token: &str, device_token: &DeviceToken) -> BridgeResult<()> {
        self.record(TransportCall::Register {
            access_token: access_token.to_string(),
            device_token: device_token.clone(),
        })
    }

    async fn unregister(&self, access_token: &str, device_token: &DeviceToken) -> BridgeResult<()> {
        self.record(TransportCall::Unregister {
            access_token: access_token.to_string(),
            device_token: device_token.clone(),
        })
    }

    async fn handle_notification(&self, payload: &Value) -> BridgeResult<()> {
        self.record(TransportCall::HandleNotification(payload.clone()))?;
        match invite_from_payload(payload) {
            Some(invite) => {
                self.emit(TransportEvent::InviteReceived(invite));
                Ok(())
            }
            None => Err(BridgeError::transport("Not a call invite payload")),
        }
    }

    async fn connect(&self, options: ConnectOptions) -> BridgeResult<()> {
        self.record(TransportCall::Connect(options))
    }

    async fn accept(&self, invite: &CallInvite) -> BridgeResult<AcceptedCall> {
        self.record(TransportCall::Accept(invite.id))?;
        Ok(AcceptedCall {
            call_id: invite.id,
            from: invite.from.clone(),
            to: Some(invite.to.clone()),
        })
    }

    async fn reject(&self, invite: &CallInvite) -> BridgeResult<()> {
        self.record(TransportCall::Reject(invite.id))
    }

    async fn disconnect(&self, call_id: CallId) -> BridgeResult<()> {
        self.record(TransportCall::Disconnect(call_id))?;
        if !self.manual_disconnect.load(Ordering::SeqCst) {
            self.emit(TransportEvent::Disconnected {
                call_id,
                error: None,
            });
        }
        Ok(())
    }

    async fn set_muted(&self, call_id: CallId, muted: bool) -> BridgeResult<()> {
        self.record(TransportCall::SetMuted(call_id, muted))
    }

    async fn set_held(&self, call_id: CallId, held: bool) -> BridgeResult<()> {
        self.record(TransportCall::SetHeld(call_id, held))
    }

    async fn send_digits(&self, call_id: CallId, digits: &str) -> BridgeResult<()> {
        self.record(TransportCall::SendDigits(call_id, digits.to_string()))
    }
}

// ===== NATIVE CALL UI =====

/// Native UI transaction kinds, for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelephonyOp {
    RequestStart,
    RequestEnd,
    ReportIncoming,
}

/// A recorded native UI call
#[derive(Debug, Clone, PartialEq)]
pub enum TelephonyCall {
    RequestStart { call_id: CallId, handle: String },
    RequestEnd(CallId),
    ReportIncoming { call_id: CallId, update: CallUpdate },
    CallUpdated { call_id: CallId, update: CallUpdate },
    OutgoingConnecting(CallId),
    OutgoingConnected(CallId),
    CallEnded { call_id: CallId, reason: EndedReason },
    Invalidated,
}

/// Recording [`TelephonyUi`] that performs requested transactions
#[derive(Debug)]
pub struct FakeTelephony {
    calls: Mutex<Vec<TelephonyCall>>,
    failures: Mutex<HashMap<TelephonyOp, BridgeError>>,
    loopback: Mutex<Option<WeakBridgeHandle>>,
    auto_perform: AtomicBool,
}

impl Default for FakeTelephony {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            loopback: Mutex::new(None),
            auto_perform: AtomicBool::new(true),
        }
    }
}

impl FakeTelephony {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route performed actions to `handle`
    pub fn attach(&self, handle: WeakBridgeHandle) {
        *self.loopback.lock() = Some(handle);
    }

    /// Make every `op` transaction fail with `error` until cleared
    pub fn fail(&self, op: TelephonyOp, error: BridgeError) {
        self.failures.lock().insert(op, error);
    }

    pub fn clear_failure(&self, op: TelephonyOp) {
        self.failures.lock().remove(&op);
    }

    /// Whether successful start/end transactions are performed as actions
    pub fn set_auto_perform(&self, perform: bool) {
        self.auto_perform.store(perform, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TelephonyCall> {
        self.calls.lock().clone()
    }

    pub fn start_requests(&self) -> Vec<(CallId, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                TelephonyCall::RequestStart { call_id, handle } => Some((*call_id, handle.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn end_requests(&self) -> Vec<CallId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                TelephonyCall::RequestEnd(call_id) => Some(*call_id),
                _ => None,
            })
            .collect()
    }

    pub fn incoming_reports(&self) -> Vec<(CallId, CallUpdate)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                TelephonyCall::ReportIncoming { call_id, update } => Some((*call_id, update.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn ended_reports(&self) -> Vec<(CallId, EndedReason)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                TelephonyCall::CallEnded { call_id, reason } => Some((*call_id, *reason)),
                _ => None,
            })
            .collect()
    }

    fn transaction(&self, op: TelephonyOp, call: TelephonyCall) -> BridgeResult<()> {
        self.calls.lock().push(call);
        match self.failures.lock().get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn perform(&self, kind: UiActionKind) {
        if self.auto_perform.load(Ordering::SeqCst) {
            post_back(&self.loopback, |handle| {
                let _ = handle.ui_notification(kind);
            });
        }
    }
}

#[async_trait]
impl TelephonyUi for FakeTelephony {
    async fn request_start_call(&self, call_id: CallId, handle: &str) -> BridgeResult<()> {
        self.transaction(
            TelephonyOp::RequestStart,
            TelephonyCall::RequestStart {
                call_id,
                handle: handle.to_string(),
            },
        )?;
        self.perform(UiActionKind::StartCall {
            call_id,
            handle: handle.to_string(),
        });
        Ok(())
    }

    async fn request_end_call(&self, call_id: CallId) -> BridgeResult<()> {
        self.transaction(TelephonyOp::RequestEnd, TelephonyCall::RequestEnd(call_id))?;
        self.perform(UiActionKind::EndCall { call_id });
        Ok(())
    }

    async fn report_incoming_call(&self, call_id: CallId, update: &CallUpdate) -> BridgeResult<()> {
        self.transaction(
            TelephonyOp::ReportIncoming,
            TelephonyCall::ReportIncoming {
                call_id,
                update: update.clone(),
            },
        )
    }

    fn report_call_updated(&self, call_id: CallId, update: &CallUpdate) {
        self.calls.lock().push(TelephonyCall::CallUpdated {
            call_id,
            update: update.clone(),
        });
    }

    fn report_outgoing_connecting(&self, call_id: CallId) {
        self.calls.lock().push(TelephonyCall::OutgoingConnecting(call_id));
    }

    fn report_outgoing_connected(&self, call_id: CallId) {
        self.calls.lock().push(TelephonyCall::OutgoingConnected(call_id));
    }

    fn report_call_ended(&self, call_id: CallId, reason: EndedReason) {
        self.calls.lock().push(TelephonyCall::CallEnded { call_id, reason });
    }

    fn invalidate(&self) {
        self.calls.lock().push(TelephonyCall::Invalidated);
    }
}

// ===== MICROPHONE & AUDIO =====

/// Scripted [`MicrophonePermission`]
#[derive(Debug)]
pub struct FakeMicrophone {
    status: Mutex<PermissionStatus>,
    grant_on_request: AtomicBool,
    requests: AtomicUsize,
}

impl FakeMicrophone {
    pub fn new(status: PermissionStatus, grant_on_request: bool) -> Self {
        Self {
            status: Mutex::new(status),
            grant_on_request: AtomicBool::new(grant_on_request),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn granted() -> Self {
        Self::new(PermissionStatus::Granted, true)
    }

    pub fn denied() -> Self {
        Self::new(PermissionStatus::Denied, false)
    }

    pub fn set_status(&self, status: PermissionStatus) {
        *self.status.lock() = status;
    }

    /// How many times the user was prompted
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MicrophonePermission for FakeMicrophone {
    async fn status(&self) -> PermissionStatus {
        *self.status.lock()
    }

    async fn request(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let granted = self.grant_on_request.load(Ordering::SeqCst);
        *self.status.lock() = if granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        };
        granted
    }
}

/// Recording [`AudioRouter`]
#[derive(Debug, Default)]
pub struct FakeAudioRouter {
    routes: Mutex<Vec<AudioRoute>>,
    enabled: Mutex<Vec<bool>>,
    fail_routes: AtomicBool,
}

impl FakeAudioRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_routes(&self, fail: bool) {
        self.fail_routes.store(fail, Ordering::SeqCst);
    }

    pub fn routes(&self) -> Vec<AudioRoute> {
        self.routes.lock().clone()
    }

    pub fn enabled_changes(&self) -> Vec<bool> {
        self.enabled.lock().clone()
    }
}

impl AudioRouter for FakeAudioRouter {
    fn set_route(&self, route: AudioRoute) -> BridgeResult<()> {
        if self.fail_routes.load(Ordering::SeqCst) {
            return Err(BridgeError::transport("Audio route unavailable"));
        }
        self.routes.lock().push(route);
        Ok(())
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.lock().push(enabled);
    }
}

// ===== HARNESS =====

/// A running bridge wired to fakes, with a subscribed event stream
pub struct TestBridge {
    pub handle: BridgeHandle,
    pub events: EventStream,
    pub transport: Arc<FakeTransport>,
    pub telephony: Arc<FakeTelephony>,
    pub store: Arc<MemoryStore>,
    pub microphone: Arc<FakeMicrophone>,
    pub audio: Arc<FakeAudioRouter>,
}

impl TestBridge {
    /// Default configuration, empty store, granted microphone
    pub fn start() -> BridgeResult<Self> {
        Self::start_with(BridgeConfig::default(), MemoryStore::new(), FakeMicrophone::granted())
    }

    pub fn start_with(config: BridgeConfig, store: MemoryStore, microphone: FakeMicrophone) -> BridgeResult<Self> {
        let transport = Arc::new(FakeTransport::new());
        let telephony = Arc::new(FakeTelephony::new());
        let store = Arc::new(store);
        let microphone = Arc::new(microphone);
        let audio = Arc::new(FakeAudioRouter::new());

        let capabilities = Capabilities {
            transport: transport.clone(),
            telephony: telephony.clone(),
            store: store.clone(),
            microphone: microphone.clone(),
            audio: audio.clone(),
        };
        let handle = BridgeCoordinator::start(config, capabilities)?;
        transport.attach(handle.downgrade());
        telephony.attach(handle.downgrade());
        let events = handle.subscribe();

        Ok(Self {
            handle,
            events,
            transport,
            telephony,
            store,
            microphone,
            audio,
        })
    }

    /// Run a command by method name
    pub async fn invoke(&self, method: &str, args: Value) -> BridgeResult<CommandReply> {
        self.handle.invoke(method, &args).await
    }

    /// Let spawned transactions and their completions run to quiescence
    pub async fn settle(&self) -> BridgeResult<BridgeSnapshot> {
        let mut snapshot = self.handle.snapshot().await?;
        for _ in 0..SETTLE_ROUNDS {
            tokio::task::yield_now().await;
            snapshot = self.handle.snapshot().await?;
        }
        Ok(snapshot)
    }

    /// Poll snapshots until `predicate` holds; `None` if it never does
    pub async fn wait_until<F>(&self, predicate: F) -> BridgeResult<Option<BridgeSnapshot>>
    where
        F: Fn(&BridgeSnapshot) -> bool,
    {
        for _ in 0..WAIT_ROUNDS {
            let snapshot = self.handle.snapshot().await?;
            if predicate(&snapshot) {
                return Ok(Some(snapshot));
            }
            tokio::task::yield_now().await;
        }
        Ok(None)
    }

    /// Deliver a transport callback and settle
    pub async fn transport_event(&self, event: TransportEvent) -> BridgeResult<BridgeSnapshot> {
        self.handle.transport_event(event)?;
        self.settle().await
    }

    /// Perform a native UI action and wait for its outcome
    pub async fn ui_action(&self, kind: UiActionKind) -> BridgeResult<ActionOutcome> {
        let outcome = self.handle.ui_action(kind)?;
        let outcome = outcome.await.map_err(|_| BridgeError::ChannelClosed)?;
        self.settle().await?;
        Ok(outcome)
    }

    /// Place an outgoing call and settle; returns the new call id
    pub async fn dial(&self, to: &str, from: &str) -> BridgeResult<CallId> {
        self.invoke(
            "makeCall",
            serde_json::json!({ "To": to, "From": from, "accessToken": TEST_ACCESS_TOKEN }),
        )
        .await?;
        let snapshot = self.settle().await?;
        snapshot
            .session
            .map(|s| s.id)
            .ok_or(BridgeError::NoActiveCall)
    }

    /// Deliver an invite from `from` to `alice` and settle
    pub async fn ring_in(&self, from: &str) -> BridgeResult<CallInvite> {
        let invite = CallInvite::new(Uuid::new_v4(), Some(from.to_string()), "alice");
        self.transport_event(TransportEvent::InviteReceived(invite.clone()))
            .await?;
        Ok(invite)
    }

    /// Every event delivered so far
    pub fn drain(&mut self) -> Vec<OutboundEvent> {
        std::iter::from_fn(|| self.events.try_recv()).collect()
    }

    /// Wire strings of delivered call state changes and errors, skipping log lines
    pub fn drain_call_events(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter(|e| !matches!(e, OutboundEvent::Log { .. }))
            .map(|e| e.wire())
            .collect()
    }

    /// Wire strings of delivered log lines
    pub fn drain_logs(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter(|e| matches!(e, OutboundEvent::Log { .. }))
            .map(|e| e.wire())
            .collect()
    }
}
