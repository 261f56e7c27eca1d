//! Push registry callbacks and transport (un)registration
//!
//! The push registry reports three things: a new device token, an invalidated
//! token, and an incoming push payload. Only VoIP pushes are acted on.
//! Registration requests come from [`PushRegistrationManager`] and run on
//! spawned tasks; their outcome returns through the coordinator queue.
//!
//! [`PushRegistrationManager`]: crate::registration::PushRegistrationManager

use tracing::debug;

use crate::coordinator::{post_completion, BridgeCoordinator, Completion};
use crate::error::BridgeResult;
use crate::events::{CallEvent, LogLevel};
use crate::registration::{DeviceTokenUpdate, RegistrationRequest, RegistrationTrigger};
use crate::types::{DeviceToken, PushKind};

/// A push registry callback
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// A push arrived
    Received {
        kind: PushKind,
        payload: serde_json::Value,
    },
    /// The registry issued a device token
    CredentialsUpdated { kind: PushKind, token: DeviceToken },
    /// The registry revoked the device token
    TokenInvalidated { kind: PushKind },
}

impl PushMessage {
    pub fn kind(&self) -> PushKind {
        match self {
            PushMessage::Received { kind, .. }
            | PushMessage::CredentialsUpdated { kind, .. }
            | PushMessage::TokenInvalidated { kind } => *kind,
        }
    }
}

impl BridgeCoordinator {
    pub(crate) async fn handle_push(&mut self, message: PushMessage) {
        if message.kind() != PushKind::Voip {
            debug!("Ignoring non-VoIP push callback: {:?}", message);
            return;
        }

        match message {
            PushMessage::Received { payload, .. } => {
                self.events.log(LogLevel::Info, "Incoming VoIP push received");
                if let Err(e) = self.caps.transport.handle_notification(&payload).await {
                    self.events.log(
                        LogLevel::Error,
                        format!("Transport rejected the push payload: {}", e),
                    );
                }
            }
            PushMessage::CredentialsUpdated { token, .. } => self.on_device_token(token),
            PushMessage::TokenInvalidated { .. } => {
                self.events.log(LogLevel::Info, "VoIP push token invalidated");
                if let Err(e) = self.start_unregister(None) {
                    self.events
                        .log(LogLevel::Warn, format!("Cannot unregister: {}", e));
                }
            }
        }
    }

    fn on_device_token(&mut self, token: DeviceToken) {
        self.events.log(LogLevel::Info, "VoIP push credentials updated");
        if token.is_empty() {
            self.events.log(LogLevel::Warn, "Ignoring empty device token");
            return;
        }
        match self.registration.on_device_token_update(token.clone()) {
            DeviceTokenUpdate::Unchanged => {
                self.events
                    .log(LogLevel::Info, "Device token unchanged, not registering");
            }
            DeviceTokenUpdate::Changed { request } => {
                if let Some(request) = request {
                    self.spawn_registration(request);
                }
                if let Err(e) = self.caps.store.save_device_token(Some(&token)) {
                    self.events
                        .log(LogLevel::Error, format!("Failed to cache device token: {}", e));
                }
            }
        }
    }

    /// Register with the transport on a spawned task
    pub(crate) fn spawn_registration(&self, request: RegistrationRequest) {
        self.events
            .log(LogLevel::Info, "Attempting to register for VoIP push notifications");
        let transport = self.caps.transport.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = transport
                .register(&request.access_token, &request.device_token)
                .await;
            post_completion(&completions, Completion::Registration { request, result });
        });
    }

    /// Unregister from the transport on a spawned task
    ///
    /// Fails with `MissingTokens` before anything is spawned when either
    /// token is unavailable.
    pub(crate) fn start_unregister(&mut self, access_token: Option<String>) -> BridgeResult<()> {
        let request = self.registration.unregister_request(access_token)?;
        let transport = self.caps.transport.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = transport
                .unregister(&request.access_token, &request.device_token)
                .await;
            post_completion(&completions, Completion::Unregistration { result });
        });
        Ok(())
    }

    pub(crate) fn on_registration_completed(&mut self, request: RegistrationRequest, result: BridgeResult<()>) {
        self.registration.on_registration_completed(&request, &result);
        match result {
            Ok(()) => self.events.log(
                LogLevel::Info,
                "Successfully registered for VoIP push notifications",
            ),
            Err(e) => {
                self.events.log(
                    LogLevel::Error,
                    format!("An error occurred while registering: {}", e),
                );
                if request.trigger == RegistrationTrigger::DeviceToken {
                    self.events
                        .call_event(CallEvent::DeviceTokenRejected(request.device_token.to_string()));
                }
            }
        }
    }

    pub(crate) fn on_unregistration_completed(&mut self, result: BridgeResult<()>) {
        self.registration.on_unregister_completed(&result);
        match &result {
            Ok(()) => self.events.log(
                LogLevel::Info,
                "Successfully unregistered from VoIP push notifications",
            ),
            Err(e) => self.events.log(
                LogLevel::Error,
                format!("An error occurred while unregistering: {}", e),
            ),
        }
        if let Err(e) = self.caps.store.save_device_token(None) {
            self.events
                .log(LogLevel::Error, format!("Failed to clear cached device token: {}", e));
        }
    }
}
