//! Transport SDK callbacks
//!
//! The transport reports invites, cancellations and call lifecycle changes as
//! [`TransportEvent`]s. [`TransportEventAdapter`] holds the transport
//! conventions (client address prefix, expired-credential text) and the
//! coordinator applies each event to the call session.

use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::coordinator::BridgeCoordinator;
use crate::error::BridgeError;
use crate::events::{CallEvent, LogLevel};
use crate::session::{CancelOutcome, EndTarget};
use crate::types::{AudioRoute, CallDirection, CallId, CallInvite, CallStatus, CallUpdate, EndedReason};

/// A callback from the transport SDK
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A VoIP push decoded into a call invite
    InviteReceived(CallInvite),
    /// The caller withdrew an invite
    InviteCancelled {
        invite_id: CallId,
        error: Option<String>,
    },
    /// The remote side is alerting
    Ringing {
        call_id: CallId,
        from: Option<String>,
        to: Option<String>,
    },
    /// Media is flowing
    Connected {
        call_id: CallId,
        from: Option<String>,
        to: Option<String>,
    },
    /// Connectivity lost, recovery in progress
    Reconnecting { call_id: CallId, error: String },
    /// Connectivity recovered
    Reconnected { call_id: CallId },
    /// The call never connected
    FailedToConnect { call_id: CallId, error: String },
    /// The call ended, with an error if it ended abnormally
    Disconnected {
        call_id: CallId,
        error: Option<String>,
    },
}

impl TransportEvent {
    /// The call or invite this event refers to
    pub fn call_id(&self) -> CallId {
        match self {
            TransportEvent::InviteReceived(invite) => invite.id,
            TransportEvent::InviteCancelled { invite_id, .. } => *invite_id,
            TransportEvent::Ringing { call_id, .. }
            | TransportEvent::Connected { call_id, .. }
            | TransportEvent::Reconnecting { call_id, .. }
            | TransportEvent::Reconnected { call_id }
            | TransportEvent::FailedToConnect { call_id, .. }
            | TransportEvent::Disconnected { call_id, .. } => *call_id,
        }
    }
}

/// Transport naming and failure conventions
#[derive(Debug, Clone)]
pub struct TransportEventAdapter {
    client_prefix: String,
    expiry_pattern: String,
}

impl TransportEventAdapter {
    pub fn new(client_prefix: impl Into<String>, expiry_pattern: impl Into<String>) -> Self {
        Self {
            client_prefix: client_prefix.into(),
            expiry_pattern: expiry_pattern.into(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(&config.client_prefix, &config.credential_expiry_pattern)
    }

    /// Address as shown to the user: `client:bob` becomes `bob`
    pub fn display_handle(&self, address: &str) -> String {
        if self.client_prefix.is_empty() {
            return address.to_string();
        }
        address
            .strip_prefix(&self.client_prefix)
            .unwrap_or(address)
            .to_string()
    }

    /// Whether a failure description means the access token expired
    pub fn is_credential_expiry(&self, description: &str) -> bool {
        !self.expiry_pattern.is_empty() && description.contains(&self.expiry_pattern)
    }

    /// Map a failure description onto the error taxonomy
    pub fn classify_failure(&self, description: &str) -> BridgeError {
        if self.is_credential_expiry(description) {
            BridgeError::CredentialExpired {
                message: description.to_string(),
            }
        } else {
            BridgeError::transport(description)
        }
    }
}

// ===== COORDINATOR HANDLERS =====

impl BridgeCoordinator {
    pub(crate) async fn handle_transport_event(&mut self, event: TransportEvent) {
        debug!("Transport event: {:?}", event);
        match event {
            TransportEvent::InviteReceived(invite) => self.on_invite_received(invite).await,
            TransportEvent::InviteCancelled { invite_id, error } => {
                self.on_invite_cancelled(invite_id, error)
            }
            TransportEvent::Ringing { call_id, from, to } => {
                if self.state.apply_progress(call_id, CallStatus::Ringing).is_some() {
                    let (from, to) = self.state.parties(from.as_deref(), to.as_deref());
                    let direction = self.state.direction();
                    self.events.call_event(CallEvent::Ringing { from, to, direction });
                }
            }
            TransportEvent::Connected { call_id, from, to } => self.on_connected(call_id, from, to),
            TransportEvent::Reconnecting { call_id, error } => {
                if self
                    .state
                    .apply_progress(call_id, CallStatus::Reconnecting)
                    .is_some()
                {
                    self.events
                        .log(LogLevel::Info, format!("Call reconnecting: {}", error));
                }
            }
            TransportEvent::Reconnected { call_id } => {
                if self.state.apply_progress(call_id, CallStatus::Connected).is_some() {
                    self.events.log(LogLevel::Info, "Call reconnected");
                }
            }
            TransportEvent::FailedToConnect { call_id, error } => {
                self.on_failed_to_connect(call_id, error)
            }
            TransportEvent::Disconnected { call_id, error } => self.on_disconnected(call_id, error),
        }
    }

    async fn on_invite_received(&mut self, invite: CallInvite) {
        self.events.log(LogLevel::Info, "Call invite received");

        let raw_from = invite
            .from
            .clone()
            .unwrap_or_else(|| self.directory.default_caller().to_string());
        let handle = self.adapter.display_handle(&raw_from);
        let caller_name = self
            .directory
            .resolve_caller_name(&handle, invite.custom_caller_id(&self.caller_id_key))
            .to_string();
        let (call_id, to) = (invite.id, invite.to.clone());

        match self
            .state
            .store_invite(invite.clone(), self.config.duplicate_invite_policy)
        {
            Ok(_) => {
                self.events.call_event(CallEvent::Ringing {
                    from: handle.clone(),
                    to,
                    direction: CallDirection::Incoming,
                });
                self.telephony
                    .report_incoming(call_id, CallUpdate::incoming(handle, caller_name));
            }
            Err(e) => {
                warn!("Refusing invite {}: {}", call_id, e);
                self.events
                    .log(LogLevel::Warn, format!("Rejecting call invite: {}", e));
                if let Err(reject_err) = self.caps.transport.reject(&invite).await {
                    self.events.log(
                        LogLevel::Error,
                        format!("Failed to reject call invite: {}", reject_err),
                    );
                }
            }
        }
    }

    fn on_invite_cancelled(&mut self, invite_id: CallId, error: Option<String>) {
        self.events.log(
            LogLevel::Info,
            match &error {
                Some(error) => format!("Call invite cancelled: {}", error),
                None => "Call invite cancelled".to_string(),
            },
        );
        match self.state.cancel_invite(invite_id) {
            CancelOutcome::NoInvite => self.events.log(LogLevel::Warn, "No pending call invite"),
            CancelOutcome::Mismatch => self.events.log(
                LogLevel::Warn,
                format!("Cancelled invite {} is not the pending invite", invite_id),
            ),
            CancelOutcome::Cancelled(id) => self.telephony.request_end(id, EndTarget::Invite),
        }
    }

    fn on_connected(&mut self, call_id: CallId, from: Option<String>, to: Option<String>) {
        if self.state.apply_progress(call_id, CallStatus::Connected).is_none() {
            return;
        }
        let (from, to) = self.state.parties(from.as_deref(), to.as_deref());
        let direction = self.state.direction();
        self.events.call_event(CallEvent::Connected { from, to, direction });

        if direction == CallDirection::Outgoing {
            self.caps.telephony.report_outgoing_connected(call_id);
        }
        self.route_audio(AudioRoute::Earpiece);
    }

    fn on_failed_to_connect(&mut self, call_id: CallId, error: String) {
        let Some(finished) = self.state.finish(call_id, CallStatus::Failed) else {
            return;
        };
        self.events
            .log(LogLevel::Error, format!("Call failed to connect: {}", error));
        self.events.call_event(CallEvent::CallEnded);
        if self.adapter.is_credential_expiry(&error) {
            self.events.call_event(CallEvent::CredentialExpired);
        }
        self.caps
            .telephony
            .report_call_ended(finished.session.id, EndedReason::Failed);
    }

    fn on_disconnected(&mut self, call_id: CallId, error: Option<String>) {
        let status = if error.is_some() {
            CallStatus::Failed
        } else {
            CallStatus::Disconnected
        };
        let Some(finished) = self.state.finish(call_id, status) else {
            return;
        };

        self.events.call_event(CallEvent::CallEnded);
        if let Some(error) = &error {
            let failure = self.adapter.classify_failure(error);
            self.events
                .error(failure.code(), format!("Call Failed: {}", error));
            if matches!(failure, BridgeError::CredentialExpired { .. }) {
                self.events.call_event(CallEvent::CredentialExpired);
            }
        }

        if finished.user_initiated {
            self.events.log(LogLevel::Info, "User initiated disconnect");
        } else {
            let reason = if error.is_some() {
                EndedReason::Failed
            } else {
                EndedReason::RemoteEnded
            };
            self.caps.telephony.report_call_ended(call_id, reason);
        }
        self.events.log(LogLevel::Info, "Call disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn adapter() -> TransportEventAdapter {
        TransportEventAdapter::new("client:", "Access Token expired")
    }

    #[test]
    fn test_strips_client_prefix() {
        let adapter = adapter();
        assert_eq!(adapter.display_handle("client:bob"), "bob");
        assert_eq!(adapter.display_handle("+15551234"), "+15551234");
        // Only a leading prefix is a client address
        assert_eq!(adapter.display_handle("bob-client:"), "bob-client:");
    }

    #[test]
    fn test_empty_prefix_keeps_address() {
        let adapter = TransportEventAdapter::new("", "Access Token expired");
        assert_eq!(adapter.display_handle("client:bob"), "client:bob");
    }

    #[test]
    fn test_classifies_expired_credentials() {
        let adapter = adapter();
        assert!(adapter.is_credential_expiry("20104: Access Token expired or expiration date invalid"));
        assert_eq!(
            adapter.classify_failure("Access Token expired").code(),
            "CREDENTIAL_EXPIRED"
        );
        assert_eq!(adapter.classify_failure("Network unreachable").code(), "TRANSPORT_FAILURE");
    }

    #[test]
    fn test_event_call_id() {
        let id = Uuid::new_v4();
        assert_eq!(TransportEvent::Reconnected { call_id: id }.call_id(), id);
        assert_eq!(
            TransportEvent::InviteCancelled { invite_id: id, error: None }.call_id(),
            id
        );
    }
}
