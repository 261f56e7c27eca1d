//! Native call UI bridge
//!
//! Outbound, [`TelephonyUiBridge`] turns coordinator decisions into native UI
//! transactions. Each transaction runs on its own task and posts exactly one
//! [`Completion`] back into the coordinator queue, so a slow or failing UI
//! never blocks call handling.
//!
//! Inbound, the native UI answers with [`UiAction`]s (start, answer, end, hold,
//! mute) and provider notifications. Actions carry a responder the coordinator
//! resolves with an [`ActionOutcome`] once the action has been applied.
//!
//! ```text
//!   coordinator ──request_start──► TelephonyUi ──StartCall action──► coordinator
//!        ▲                              │
//!        └──── Completion::StartTransaction ◄──┘
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::capabilities::TelephonyUi;
use crate::coordinator::{post_completion, BridgeCoordinator, BridgeMessage, Completion};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{CallEvent, LogLevel};
use crate::session::{EndResolution, EndTarget};
use crate::types::{CallId, CallUpdate, ConnectOptions};

// ===== ACTIONS =====

/// What the native UI asked for or notified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiActionKind {
    /// Perform a previously requested outgoing call
    StartCall { call_id: CallId, handle: String },
    /// The user answered an incoming call
    AnswerCall { call_id: CallId },
    /// The user (or the system) ended a call or declined an invite
    EndCall { call_id: CallId },
    /// Hold or resume
    SetHeld { call_id: CallId, on_hold: bool },
    /// Mute or unmute
    SetMuted { call_id: CallId, muted: bool },
    /// The provider was reset; every call is gone from the system UI
    ProviderReset,
    /// The provider is ready
    ProviderBegan,
    /// The system activated the call audio session
    AudioSessionActivated,
    /// The system deactivated the call audio session
    AudioSessionDeactivated,
    /// An action was not resolved in time
    TimedOut { action: String },
}

/// How an action was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Fulfilled,
    Failed,
}

/// A native UI action with an optional responder
#[derive(Debug)]
pub struct UiAction {
    pub kind: UiActionKind,
    responder: Option<oneshot::Sender<ActionOutcome>>,
}

impl UiAction {
    /// Action whose outcome the caller wants back
    pub fn new(kind: UiActionKind) -> (Self, oneshot::Receiver<ActionOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                kind,
                responder: Some(tx),
            },
            rx,
        )
    }

    /// Fire-and-forget notification
    pub fn notification(kind: UiActionKind) -> Self {
        Self {
            kind,
            responder: None,
        }
    }

    fn into_parts(self) -> (UiActionKind, Option<oneshot::Sender<ActionOutcome>>) {
        (self.kind, self.responder)
    }
}

// ===== OUTBOUND TRANSACTIONS =====

/// Spawns native UI transactions and routes their completions
pub(crate) struct TelephonyUiBridge {
    ui: Arc<dyn TelephonyUi>,
    completions: mpsc::WeakUnboundedSender<BridgeMessage>,
}

impl TelephonyUiBridge {
    pub(crate) fn new(
        ui: Arc<dyn TelephonyUi>,
        completions: mpsc::WeakUnboundedSender<BridgeMessage>,
    ) -> Self {
        Self { ui, completions }
    }

    /// Ask the system to start an outgoing call to `handle`
    pub(crate) fn request_start(&self, call_id: CallId, handle: String) {
        debug!("Requesting start transaction for {}", call_id);
        let ui = self.ui.clone();
        let transaction_handle = handle.clone();
        self.spawn_transaction(
            async move { ui.request_start_call(call_id, &transaction_handle).await },
            move |result| Completion::StartTransaction {
                call_id,
                handle,
                result,
            },
        );
    }

    /// Ask the system to end a call or invite
    pub(crate) fn request_end(&self, call_id: CallId, target: EndTarget) {
        debug!("Requesting end transaction for {} ({:?})", call_id, target);
        let ui = self.ui.clone();
        self.spawn_transaction(
            async move { ui.request_end_call(call_id).await },
            move |result| Completion::EndTransaction {
                call_id,
                target,
                result,
            },
        );
    }

    /// Show a new incoming call
    pub(crate) fn report_incoming(&self, call_id: CallId, update: CallUpdate) {
        debug!("Reporting incoming call {} from {}", call_id, update.handle);
        let ui = self.ui.clone();
        self.spawn_transaction(
            async move { ui.report_incoming_call(call_id, &update).await },
            move |result| Completion::IncomingReport { call_id, result },
        );
    }

    fn spawn_transaction<F, C>(&self, transaction: F, complete: C)
    where
        F: Future<Output = BridgeResult<()>> + Send + 'static,
        C: FnOnce(BridgeResult<()>) -> Completion + Send + 'static,
    {
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = transaction.await;
            post_completion(&completions, complete(result));
        });
    }
}

// ===== COORDINATOR HANDLERS =====

impl BridgeCoordinator {
    pub(crate) async fn handle_ui_action(&mut self, action: UiAction) {
        let (kind, responder) = action.into_parts();
        debug!("Native UI action: {:?}", kind);

        let outcome = match kind {
            UiActionKind::StartCall { call_id, handle } => self.perform_start_call(call_id, handle).await,
            UiActionKind::AnswerCall { call_id } => self.perform_answer_call(call_id).await,
            UiActionKind::EndCall { call_id } => self.perform_end_call(call_id).await,
            UiActionKind::SetHeld { call_id, on_hold } => {
                if self.is_current_call(call_id) {
                    let result = self.set_held(Some(on_hold)).await;
                    self.control_outcome("hold", result)
                } else {
                    ActionOutcome::Failed
                }
            }
            UiActionKind::SetMuted { call_id, muted } => {
                if self.is_current_call(call_id) {
                    let result = self.set_muted(Some(muted)).await;
                    self.control_outcome("mute", result)
                } else {
                    ActionOutcome::Failed
                }
            }
            UiActionKind::ProviderReset => {
                self.events.log(LogLevel::Info, "Call provider reset");
                self.set_audio_enabled(false);
                ActionOutcome::Fulfilled
            }
            UiActionKind::ProviderBegan => {
                self.events.log(LogLevel::Info, "Call provider began");
                ActionOutcome::Fulfilled
            }
            UiActionKind::AudioSessionActivated => {
                self.events.log(LogLevel::Info, "Audio session activated");
                self.set_audio_enabled(true);
                ActionOutcome::Fulfilled
            }
            UiActionKind::AudioSessionDeactivated => {
                self.events.log(LogLevel::Info, "Audio session deactivated");
                self.set_audio_enabled(false);
                ActionOutcome::Fulfilled
            }
            UiActionKind::TimedOut { action } => {
                self.events
                    .log(LogLevel::Info, format!("Timed out performing {}", action));
                ActionOutcome::Failed
            }
        };

        Self::respond(responder, outcome);
    }

    fn respond(responder: Option<oneshot::Sender<ActionOutcome>>, outcome: ActionOutcome) {
        if let Some(responder) = responder {
            let _ = responder.send(outcome);
        }
    }

    async fn perform_start_call(&mut self, call_id: CallId, handle: String) -> ActionOutcome {
        let Some(pending) = self.state.pending_outgoing().filter(|p| p.id == call_id).cloned() else {
            self.events.log(
                LogLevel::Warn,
                format!("No outgoing call matches start action {}", call_id),
            );
            return ActionOutcome::Failed;
        };
        if pending.to != handle {
            debug!("Start action handle {} differs from destination {}", handle, pending.to);
        }

        let Some(access_token) = pending
            .access_token
            .clone()
            .or_else(|| self.registration.access_token().map(str::to_string))
        else {
            self.state.abandon_outgoing(call_id);
            self.events.bridge_error(&BridgeError::MissingTokens);
            return ActionOutcome::Failed;
        };

        let mut params = pending.params.clone();
        params.insert("To".to_string(), pending.to.clone());
        let options = ConnectOptions {
            call_id,
            access_token,
            params,
        };

        self.caps.telephony.report_outgoing_connecting(call_id);
        match self.caps.transport.connect(options).await {
            Ok(()) => {
                if let Some(pending) = self.state.take_outgoing(call_id) {
                    self.state.open_outgoing(&pending);
                }
                info!("Outgoing call {} connecting to {}", call_id, pending.to);
                ActionOutcome::Fulfilled
            }
            Err(e) => {
                self.state.abandon_outgoing(call_id);
                self.events.bridge_error(&e);
                ActionOutcome::Failed
            }
        }
    }

    async fn perform_answer_call(&mut self, call_id: CallId) -> ActionOutcome {
        let invite = match self.state.invite_to_accept(call_id) {
            Ok(invite) => invite.clone(),
            Err(_) => {
                self.events
                    .log(LogLevel::Warn, "No call invite matches the answered call");
                return ActionOutcome::Failed;
            }
        };

        match self.caps.transport.accept(&invite).await {
            Ok(accepted) => {
                let from = accepted
                    .from
                    .as_deref()
                    .or(invite.from.as_deref())
                    .map(|f| self.adapter.display_handle(f))
                    .unwrap_or_default();
                let to = accepted.to.clone().unwrap_or_else(|| invite.to.clone());
                match self.state.open_incoming(&accepted) {
                    Ok(_) => {
                        self.events.call_event(CallEvent::Answered { from, to });
                        ActionOutcome::Fulfilled
                    }
                    Err(e) => {
                        warn!("Accepted call {} lost its invite: {}", call_id, e);
                        ActionOutcome::Failed
                    }
                }
            }
            Err(e) => {
                self.events
                    .log(LogLevel::Warn, format!("Answering call failed: {}", e));
                self.events.bridge_error(&e);
                ActionOutcome::Failed
            }
        }
    }

    async fn perform_end_call(&mut self, call_id: CallId) -> ActionOutcome {
        match self.state.resolve_end_action(call_id) {
            EndResolution::RejectInvite(pending) => {
                if pending.cancelled {
                    debug!("Invite {} already cancelled by the caller", pending.invite.id);
                } else {
                    self.events.log(LogLevel::Info, "Rejecting call invite");
                    if let Err(e) = self.caps.transport.reject(&pending.invite).await {
                        self.events
                            .log(LogLevel::Error, format!("Failed to reject call invite: {}", e));
                    }
                }
                ActionOutcome::Fulfilled
            }
            EndResolution::Disconnect(active) => {
                self.events.log(LogLevel::Info, "Disconnecting call");
                match self.caps.transport.disconnect(active).await {
                    Ok(()) => ActionOutcome::Fulfilled,
                    Err(e) => {
                        self.events.bridge_error(&e);
                        ActionOutcome::Failed
                    }
                }
            }
            EndResolution::Nothing => {
                debug!("End action {} found nothing to end", call_id);
                ActionOutcome::Fulfilled
            }
        }
    }

    fn is_current_call(&self, call_id: CallId) -> bool {
        let current = self.state.session().map(|s| s.id) == Some(call_id);
        if !current {
            debug!("Action for {} does not match the active call", call_id);
        }
        current
    }

    fn control_outcome(&self, what: &str, result: BridgeResult<()>) -> ActionOutcome {
        match result {
            Ok(()) => ActionOutcome::Fulfilled,
            Err(e) => {
                self.events
                    .log(LogLevel::Error, format!("Failed to {} call: {}", what, e));
                ActionOutcome::Failed
            }
        }
    }

    // ===== TRANSACTION COMPLETIONS =====

    pub(crate) fn on_start_transaction(&mut self, call_id: CallId, handle: String, result: BridgeResult<()>) {
        match result {
            Ok(()) => {
                self.events
                    .log(LogLevel::Info, "Start call transaction request successful");
                let caller_name = self.directory.display_name(&handle).to_string();
                self.caps
                    .telephony
                    .report_call_updated(call_id, &CallUpdate::outgoing(handle, caller_name));
            }
            Err(e) => {
                self.events.log(
                    LogLevel::Error,
                    format!("Start call transaction request failed: {}", e),
                );
                self.state.abandon_outgoing(call_id);
                self.events.bridge_error(&e);
            }
        }
    }

    pub(crate) fn on_end_transaction(&mut self, call_id: CallId, target: EndTarget, result: BridgeResult<()>) {
        match result {
            Ok(()) => {
                debug!("End transaction for {} completed", call_id);
                if target == EndTarget::Invite {
                    self.events.call_event(CallEvent::CallEnded);
                }
            }
            Err(e) => {
                // The call is still up; a later remote hang up must be reported
                self.state.clear_user_initiated();
                self.events.error(e.code(), format!("End Call Failed: {}", e));
            }
        }
    }

    pub(crate) fn on_incoming_reported(&mut self, call_id: CallId, result: BridgeResult<()>) {
        match result {
            Ok(()) => self
                .events
                .log(LogLevel::Info, "Incoming call successfully reported"),
            Err(e) => {
                self.events.log(
                    LogLevel::Error,
                    format!("Failed to report incoming call {}: {}", call_id, e),
                );
                self.events.bridge_error(&e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_notification_has_no_responder() {
        let action = UiAction::notification(UiActionKind::ProviderBegan);
        let (kind, responder) = action.into_parts();
        assert_eq!(kind, UiActionKind::ProviderBegan);
        assert!(responder.is_none());
    }

    #[tokio::test]
    async fn test_responder_delivers_outcome() {
        let (action, rx) = UiAction::new(UiActionKind::AnswerCall {
            call_id: Uuid::new_v4(),
        });
        let (_, responder) = action.into_parts();
        responder.unwrap().send(ActionOutcome::Fulfilled).unwrap();
        assert_eq!(rx.await.unwrap(), ActionOutcome::Fulfilled);
    }
}
