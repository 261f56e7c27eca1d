//! Capability interfaces for the external collaborators
//!
//! The bridge never talks to a platform SDK directly. Each collaborator is a
//! narrow trait injected at construction through [`Capabilities`]:
//!
//! ```text
//!                    ┌──────────────────────┐
//!  VoiceTransport ◄──┤                      ├──► TelephonyUi
//!                    │  BridgeCoordinator   │
//!     ClientStore ◄──┤                      ├──► AudioRouter
//!                    └──────────┬───────────┘
//!                               ▼
//!                      MicrophonePermission
//! ```
//!
//! Test doubles for every trait live in [`crate::testing`]; the store also has a
//! production adapter in [`crate::store`].
//!
//! Transport operations model SDK calls that return immediately; their real
//! outcome arrives later as a [`crate::TransportEvent`]. Native UI requests are
//! transactions whose completion the coordinator awaits on a spawned task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BridgeResult;
use crate::types::{
    AcceptedCall, AudioRoute, CallId, CallInvite, CallUpdate, ConnectOptions, DeviceToken,
    EndedReason,
};

/// The third-party VoIP transport SDK
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Register the device for incoming call pushes
    async fn register(&self, access_token: &str, device_token: &DeviceToken) -> BridgeResult<()>;

    /// Stop receiving incoming call pushes
    async fn unregister(&self, access_token: &str, device_token: &DeviceToken) -> BridgeResult<()>;

    /// Hand a VoIP push payload to the SDK, which answers with invite events
    async fn handle_notification(&self, payload: &serde_json::Value) -> BridgeResult<()>;

    /// Place an outgoing call
    async fn connect(&self, options: ConnectOptions) -> BridgeResult<()>;

    /// Accept a pending invite, producing the live call
    async fn accept(&self, invite: &CallInvite) -> BridgeResult<AcceptedCall>;

    /// Decline a pending invite
    async fn reject(&self, invite: &CallInvite) -> BridgeResult<()>;

    /// Hang up a live call
    async fn disconnect(&self, call_id: CallId) -> BridgeResult<()>;

    /// Mute or unmute the microphone on a live call
    async fn set_muted(&self, call_id: CallId, muted: bool) -> BridgeResult<()>;

    /// Put a live call on hold or resume it
    async fn set_held(&self, call_id: CallId, held: bool) -> BridgeResult<()>;

    /// Play DTMF digits on a live call
    async fn send_digits(&self, call_id: CallId, digits: &str) -> BridgeResult<()>;
}

/// The platform's system call UI
///
/// `request_*` and `report_incoming_call` are transactions with a completion;
/// the `report_*` notifications are one-way.
#[async_trait]
pub trait TelephonyUi: Send + Sync {
    /// Ask the system to start an outgoing call; it answers with a start action
    async fn request_start_call(&self, call_id: CallId, handle: &str) -> BridgeResult<()>;

    /// Ask the system to end a call or invite; it answers with an end action
    async fn request_end_call(&self, call_id: CallId) -> BridgeResult<()>;

    /// Show a new incoming call
    async fn report_incoming_call(&self, call_id: CallId, update: &CallUpdate) -> BridgeResult<()>;

    /// Refresh the details shown for a call
    fn report_call_updated(&self, call_id: CallId, update: &CallUpdate);

    /// An outgoing call started connecting
    fn report_outgoing_connecting(&self, call_id: CallId);

    /// An outgoing call connected
    fn report_outgoing_connected(&self, call_id: CallId);

    /// A call ended for a reason the system did not initiate
    fn report_call_ended(&self, call_id: CallId, reason: EndedReason);

    /// Release the system provider; called once on shutdown
    fn invalidate(&self) {}
}

/// Persistent key-value storage for the client directory and device token
pub trait ClientStore: Send + Sync {
    /// Load the client id → display name map
    fn load_clients(&self) -> BridgeResult<HashMap<String, String>>;

    /// Replace the stored client map
    fn save_clients(&self, clients: &HashMap<String, String>) -> BridgeResult<()>;

    /// Load the cached device token
    fn load_device_token(&self) -> BridgeResult<Option<DeviceToken>>;

    /// Store or clear the cached device token
    fn save_device_token(&self, token: Option<&DeviceToken>) -> BridgeResult<()>;
}

/// Record-permission state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// The user has not been asked yet
    Undetermined,
}

/// Microphone permission prompt
#[async_trait]
pub trait MicrophonePermission: Send + Sync {
    /// Current permission state, without prompting
    async fn status(&self) -> PermissionStatus;

    /// Prompt the user; resolves to whether access was granted
    async fn request(&self) -> bool;

    /// Resolve to a grant decision, prompting only when undetermined
    async fn ensure(&self) -> bool {
        match self.status().await {
            PermissionStatus::Granted => true,
            PermissionStatus::Denied => false,
            PermissionStatus::Undetermined => self.request().await,
        }
    }
}

/// Audio session routing
pub trait AudioRouter: Send + Sync {
    /// Switch the output route
    fn set_route(&self, route: AudioRoute) -> BridgeResult<()>;

    /// Enable or disable the audio device backing the call
    fn set_enabled(&self, enabled: bool);
}

/// Every collaborator the coordinator needs, injected at construction
#[derive(Clone)]
pub struct Capabilities {
    pub transport: Arc<dyn VoiceTransport>,
    pub telephony: Arc<dyn TelephonyUi>,
    pub store: Arc<dyn ClientStore>,
    pub microphone: Arc<dyn MicrophonePermission>,
    pub audio: Arc<dyn AudioRouter>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("transport", &"<voice transport>")
            .field("telephony", &"<telephony ui>")
            .field("store", &"<client store>")
            .field("microphone", &"<microphone permission>")
            .field("audio", &"<audio router>")
            .finish()
    }
}
