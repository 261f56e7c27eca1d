//! The bridge coordinator
//!
//! [`BridgeCoordinator`] is the single owner of all call, registration and
//! directory state. Every event source posts a [`BridgeMessage`] into one
//! unbounded queue and the coordinator task applies them strictly in order:
//!
//! ```text
//!   host commands ─────┐
//!   native UI actions ─┤
//!   transport events ──┼──► queue ──► BridgeCoordinator ──► EventPublisher ──► host
//!   push callbacks ────┤                  │
//!   completions ───────┘◄── spawned UI / registration tasks
//! ```
//!
//! Native UI transactions, (un)registration and the microphone check run on
//! spawned tasks and report back with a [`Completion`]; only the coordinator
//! task ever mutates state. Transport call operations return immediately
//! (their outcome arrives later as a transport event) and are awaited inline.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use callbridge_core::{BridgeConfig, BridgeCoordinator, Capabilities};
//! use serde_json::json;
//!
//! # async fn example(capabilities: Capabilities) -> callbridge_core::BridgeResult<()> {
//! let bridge = BridgeCoordinator::start(BridgeConfig::default(), capabilities)?;
//! let mut events = bridge.subscribe();
//!
//! bridge.invoke("tokens", &json!({ "accessToken": "eyJ..." })).await?;
//! bridge.invoke("makeCall", &json!({ "To": "+15551234", "From": "alice" })).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.wire());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bridge::{
    ActionOutcome, PushMessage, TelephonyUiBridge, TransportEvent, TransportEventAdapter, UiAction,
    UiActionKind,
};
use crate::capabilities::Capabilities;
use crate::commands::{Command, CommandDispatcher, CommandReply};
use crate::config::BridgeConfig;
use crate::directory::ClientDirectory;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{CallEvent, EventPublisher, EventStream, LogLevel};
use crate::registration::{PushRegistrationManager, RegistrationRequest, RegistrationStatus};
use crate::session::{CallSessionState, EndTarget, OutgoingDecision};
use crate::types::{AudioRoute, CallId, CallInvite, CallSession, DeviceToken, PushKind};

// ===== MESSAGES =====

/// Everything the coordinator queue carries
pub(crate) enum BridgeMessage {
    Command {
        command: Command,
        reply: oneshot::Sender<BridgeResult<CommandReply>>,
    },
    Transport(TransportEvent),
    Ui(UiAction),
    Push(PushMessage),
    Completion(Completion),
    Snapshot {
        reply: oneshot::Sender<BridgeSnapshot>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Result of work the coordinator spawned
#[derive(Debug)]
pub(crate) enum Completion {
    StartTransaction {
        call_id: CallId,
        handle: String,
        result: BridgeResult<()>,
    },
    EndTransaction {
        call_id: CallId,
        target: EndTarget,
        result: BridgeResult<()>,
    },
    IncomingReport {
        call_id: CallId,
        result: BridgeResult<()>,
    },
    Registration {
        request: RegistrationRequest,
        result: BridgeResult<()>,
    },
    Unregistration {
        result: BridgeResult<()>,
    },
    Microphone {
        call_id: CallId,
        handle: String,
        granted: bool,
    },
}

/// Post a completion back to the coordinator if it is still running
pub(crate) fn post_completion(completions: &mpsc::WeakUnboundedSender<BridgeMessage>, completion: Completion) {
    match completions.upgrade() {
        Some(tx) => {
            if tx.send(BridgeMessage::Completion(completion)).is_err() {
                debug!("Coordinator stopped before completion arrived");
            }
        }
        None => debug!("Coordinator gone, dropping completion {:?}", completion),
    }
}

/// Point-in-time view of the coordinator state
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSnapshot {
    pub session: Option<CallSession>,
    pub invite: Option<CallInvite>,
    pub pending_outgoing: Option<CallId>,
    pub registration: RegistrationStatus,
    pub device_token: Option<DeviceToken>,
    pub audio_enabled: bool,
    pub speaker_on: bool,
    pub caller_id_key: String,
}

impl BridgeSnapshot {
    /// No call, invite or outgoing start
    pub fn is_idle(&self) -> bool {
        self.session.is_none() && self.invite.is_none() && self.pending_outgoing.is_none()
    }
}

// ===== COORDINATOR =====

/// Owner of all bridge state; see the module docs
pub struct BridgeCoordinator {
    pub(crate) config: BridgeConfig,
    pub(crate) caps: Capabilities,
    pub(crate) events: Arc<EventPublisher>,
    pub(crate) state: CallSessionState,
    pub(crate) registration: PushRegistrationManager,
    pub(crate) directory: ClientDirectory,
    pub(crate) telephony: TelephonyUiBridge,
    pub(crate) adapter: TransportEventAdapter,
    pub(crate) caller_id_key: String,
    pub(crate) audio_enabled: bool,
    pub(crate) speaker_on: bool,
    pub(crate) completions: mpsc::WeakUnboundedSender<BridgeMessage>,
}

impl BridgeCoordinator {
    /// Load persisted state and spawn the coordinator task
    ///
    /// Must be called from within a Tokio runtime. The coordinator runs until
    /// [`BridgeHandle::shutdown`] or until every handle is dropped.
    pub fn start(config: BridgeConfig, caps: Capabilities) -> BridgeResult<BridgeHandle> {
        config.validate()?;

        let directory = ClientDirectory::load(caps.store.clone(), config.default_caller.clone())?;
        let cached_token = caps.store.load_device_token()?;
        if cached_token.is_some() {
            debug!("Restored cached device token");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventPublisher::new());
        let completions = tx.downgrade();

        let coordinator = Self {
            state: CallSessionState::new(config.default_identity.clone()),
            registration: PushRegistrationManager::new(cached_token),
            directory,
            telephony: TelephonyUiBridge::new(caps.telephony.clone(), completions.clone()),
            adapter: TransportEventAdapter::from_config(&config),
            caller_id_key: config.caller_id_parameter_key.clone(),
            audio_enabled: false,
            speaker_on: false,
            events: events.clone(),
            completions,
            caps,
            config,
        };

        let dispatcher = CommandDispatcher::new(coordinator.config.strict_commands);
        tokio::spawn(coordinator.run(rx));
        info!("Call bridge coordinator started");

        Ok(BridgeHandle {
            tx,
            events,
            dispatcher,
        })
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<BridgeMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                BridgeMessage::Command { command, reply } => self.handle_command(command, reply).await,
                BridgeMessage::Transport(event) => self.handle_transport_event(event).await,
                BridgeMessage::Ui(action) => self.handle_ui_action(action).await,
                BridgeMessage::Push(message) => self.handle_push(message).await,
                BridgeMessage::Completion(completion) => self.handle_completion(completion),
                BridgeMessage::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                BridgeMessage::Shutdown { done } => {
                    self.shut_down();
                    let _ = done.send(());
                    break;
                }
            }
        }
        info!("Call bridge coordinator stopped");
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::StartTransaction {
                call_id,
                handle,
                result,
            } => self.on_start_transaction(call_id, handle, result),
            Completion::EndTransaction {
                call_id,
                target,
                result,
            } => self.on_end_transaction(call_id, target, result),
            Completion::IncomingReport { call_id, result } => self.on_incoming_reported(call_id, result),
            Completion::Registration { request, result } => self.on_registration_completed(request, result),
            Completion::Unregistration { result } => self.on_unregistration_completed(result),
            Completion::Microphone {
                call_id,
                handle,
                granted,
            } => self.on_microphone_checked(call_id, handle, granted),
        }
    }

    fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot {
            session: self.state.session().cloned(),
            invite: self.state.invite().map(|p| p.invite.clone()),
            pending_outgoing: self.state.pending_outgoing().map(|p| p.id),
            registration: self.registration.status(),
            device_token: self.registration.device_token().cloned(),
            audio_enabled: self.audio_enabled,
            speaker_on: self.speaker_on,
            caller_id_key: self.caller_id_key.clone(),
        }
    }

    fn shut_down(&mut self) {
        if let Some(session) = self.state.session() {
            warn!("Shutting down with call {} still active", session.id);
        }
        self.caps.telephony.invalidate();
        self.events.unsubscribe();
    }

    // ===== CALL CONTROLS =====

    /// Reserve the call slot and check the microphone before asking the native UI to start
    pub(crate) fn make_call(
        &mut self,
        to: String,
        from: String,
        access_token: Option<String>,
        params: BTreeMap<String, String>,
    ) -> BridgeResult<()> {
        if let Some(token) = &access_token {
            self.registration.remember_credential(token.clone());
        }

        match self.state.request_outgoing(to, from, access_token, params)? {
            OutgoingDecision::HangUpExisting(call_id) => {
                self.events.log(
                    LogLevel::Info,
                    "Ending the connected call before placing a new one",
                );
                self.telephony.request_end(call_id, EndTarget::Call);
                Err(BridgeError::AlreadyInCall)
            }
            OutgoingDecision::Start(pending) => {
                let microphone = self.caps.microphone.clone();
                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let granted = microphone.ensure().await;
                    post_completion(
                        &completions,
                        Completion::Microphone {
                            call_id: pending.id,
                            handle: pending.to,
                            granted,
                        },
                    );
                });
                Ok(())
            }
        }
    }

    fn on_microphone_checked(&mut self, call_id: CallId, handle: String, granted: bool) {
        if self.state.pending_outgoing().map(|p| p.id) != Some(call_id) {
            debug!("Outgoing call {} no longer pending", call_id);
            return;
        }
        if !granted {
            if self.config.require_microphone {
                self.state.abandon_outgoing(call_id);
                self.events.bridge_error(&BridgeError::PermissionDenied);
                return;
            }
            self.events.log(
                LogLevel::Warn,
                "Microphone permission denied, continuing without microphone",
            );
        }
        self.telephony.request_start(call_id, handle);
    }

    /// End the pending invite, the active call or an outgoing call still starting
    pub(crate) fn hang_up(&mut self) {
        match self.state.end_request(true) {
            Some((call_id, target)) => {
                self.events.log(LogLevel::Info, "Hang up requested");
                self.telephony.request_end(call_id, target);
            }
            None => match self.state.pending_outgoing().map(|p| p.id) {
                // The pending native start action now fails and closes the call UI
                Some(call_id) => {
                    self.state.abandon_outgoing(call_id);
                    self.events
                        .log(LogLevel::Info, "Outgoing call abandoned before it connected");
                }
                None => debug!("Nothing to hang up"),
            },
        }
    }

    /// Mute or unmute the active call; `None` toggles
    pub(crate) async fn set_muted(&mut self, muted: Option<bool>) -> BridgeResult<()> {
        let session = self.state.active_mut()?;
        let (call_id, muted) = (session.id, muted.unwrap_or(!session.muted));
        self.caps.transport.set_muted(call_id, muted).await?;
        self.state.active_mut()?.muted = muted;
        self.events.call_event(CallEvent::Muted(muted));
        Ok(())
    }

    /// Hold or resume the active call; `None` toggles
    pub(crate) async fn set_held(&mut self, on_hold: Option<bool>) -> BridgeResult<()> {
        let session = self.state.active_mut()?;
        let (call_id, on_hold) = (session.id, on_hold.unwrap_or(!session.held));
        self.caps.transport.set_held(call_id, on_hold).await?;
        self.state.active_mut()?.held = on_hold;
        self.events.call_event(CallEvent::Held(on_hold));
        Ok(())
    }

    pub(crate) fn toggle_speaker(&mut self, speaker_on: bool) {
        let route = if speaker_on {
            AudioRoute::Speaker
        } else {
            AudioRoute::Earpiece
        };
        if self.route_audio(route) {
            self.events.call_event(CallEvent::Speaker(speaker_on));
        }
    }

    /// Switch the audio route, logging failures; returns whether it switched
    pub(crate) fn route_audio(&mut self, route: AudioRoute) -> bool {
        match self.caps.audio.set_route(route) {
            Ok(()) => {
                self.speaker_on = route == AudioRoute::Speaker;
                true
            }
            Err(e) => {
                self.events
                    .log(LogLevel::Error, format!("Failed to route audio: {}", e));
                false
            }
        }
    }

    pub(crate) fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
        self.caps.audio.set_enabled(enabled);
    }
}

// ===== HANDLE =====

/// Cloneable front door to a running coordinator
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::UnboundedSender<BridgeMessage>,
    events: Arc<EventPublisher>,
    dispatcher: CommandDispatcher,
}

impl std::fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("running", &self.is_running())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl BridgeHandle {
    /// Run a host command by method name
    ///
    /// Argument errors are returned without reaching the coordinator.
    pub async fn invoke(&self, method: &str, args: &serde_json::Value) -> BridgeResult<CommandReply> {
        let command = self.dispatcher.parse(method, args)?;
        self.execute(command).await
    }

    /// Run an already parsed command
    pub async fn execute(&self, command: Command) -> BridgeResult<CommandReply> {
        let (reply, rx) = oneshot::channel();
        self.send(BridgeMessage::Command { command, reply })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)?
    }

    /// Feed a transport SDK callback
    pub fn transport_event(&self, event: TransportEvent) -> BridgeResult<()> {
        self.send(BridgeMessage::Transport(event))
    }

    /// Feed a native UI action; the receiver resolves once it has been applied
    pub fn ui_action(&self, kind: UiActionKind) -> BridgeResult<oneshot::Receiver<ActionOutcome>> {
        let (action, rx) = UiAction::new(kind);
        self.send(BridgeMessage::Ui(action))?;
        Ok(rx)
    }

    /// Feed a native UI notification nobody waits on
    pub fn ui_notification(&self, kind: UiActionKind) -> BridgeResult<()> {
        self.send(BridgeMessage::Ui(UiAction::notification(kind)))
    }

    /// A push arrived
    pub fn push_received(&self, kind: PushKind, payload: serde_json::Value) -> BridgeResult<()> {
        self.send(BridgeMessage::Push(PushMessage::Received { kind, payload }))
    }

    /// The push registry issued a device token
    pub fn push_credentials_updated(&self, kind: PushKind, token: DeviceToken) -> BridgeResult<()> {
        self.send(BridgeMessage::Push(PushMessage::CredentialsUpdated { kind, token }))
    }

    /// The push registry revoked the device token
    pub fn push_token_invalidated(&self, kind: PushKind) -> BridgeResult<()> {
        self.send(BridgeMessage::Push(PushMessage::TokenInvalidated { kind }))
    }

    /// Current state, after every message queued before this call
    pub async fn snapshot(&self) -> BridgeResult<BridgeSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(BridgeMessage::Snapshot { reply })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Start receiving outbound events, replacing any previous subscriber
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Stop receiving outbound events
    pub fn unsubscribe(&self) {
        self.events.unsubscribe();
    }

    /// Stop the coordinator and release the native call provider
    pub async fn shutdown(&self) -> BridgeResult<()> {
        let (done, rx) = oneshot::channel();
        self.send(BridgeMessage::Shutdown { done })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// A handle that does not keep the coordinator alive
    pub fn downgrade(&self) -> WeakBridgeHandle {
        WeakBridgeHandle {
            tx: self.tx.downgrade(),
            events: Arc::downgrade(&self.events),
            dispatcher: self.dispatcher,
        }
    }

    fn send(&self, message: BridgeMessage) -> BridgeResult<()> {
        self.tx.send(message).map_err(|_| BridgeError::ChannelClosed)
    }
}

/// Non-owning [`BridgeHandle`], for collaborators that call back into the bridge
#[derive(Clone)]
pub struct WeakBridgeHandle {
    tx: mpsc::WeakUnboundedSender<BridgeMessage>,
    events: Weak<EventPublisher>,
    dispatcher: CommandDispatcher,
}

impl WeakBridgeHandle {
    pub fn upgrade(&self) -> Option<BridgeHandle> {
        Some(BridgeHandle {
            tx: self.tx.upgrade()?,
            events: self.events.upgrade()?,
            dispatcher: self.dispatcher,
        })
    }
}

impl std::fmt::Debug for WeakBridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakBridgeHandle").finish_non_exhaustive()
    }
}
