//! Shared data types
//!
//! # Type Categories
//!
//! - **Call Types** - the single call session, its direction and status
//! - **Invite Types** - pending incoming call offers
//! - **Transport Types** - connect options and accepted call descriptions
//! - **Native UI Types** - call updates and end reasons reported to the system call UI
//! - **Push Types** - device tokens and push kinds

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a call or invite, shared with the native call UI
pub type CallId = Uuid;

// ===== CALL TYPES =====

/// Direction of a call relative to this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// Placed by the local user
    Outgoing,
    /// Offered by a remote party and accepted locally
    Incoming,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Outgoing => write!(f, "Outgoing"),
            CallDirection::Incoming => write!(f, "Incoming"),
        }
    }
}

/// Lifecycle status of the call session
///
/// The slot itself is idle when no session exists, so there is no `Idle`
/// variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    /// Connect or accept issued, nothing heard from the transport yet
    Connecting,
    /// Remote side is alerting
    Ringing,
    /// Media path established
    Connected,
    /// Transport lost connectivity and is trying to recover
    Reconnecting,
    /// Call ended normally
    Disconnected,
    /// Call ended with an error
    Failed,
}

impl CallStatus {
    /// Whether the call can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Disconnected | CallStatus::Failed)
    }
}

/// The one call this bridge manages
#[derive(Debug, Clone, PartialEq)]
pub struct CallSession {
    /// Identifier shared with the native call UI and the transport
    pub id: CallId,
    /// Who placed the call
    pub direction: CallDirection,
    /// Remote party address
    pub remote: String,
    /// Local identity on the transport
    pub local_identity: String,
    /// Current lifecycle status
    pub status: CallStatus,
    /// Microphone muted
    pub muted: bool,
    /// Call on hold
    pub held: bool,
    /// When the session was opened
    pub started_at: DateTime<Utc>,
}

impl CallSession {
    /// Open a session in the `Connecting` status
    pub fn new(
        id: CallId,
        direction: CallDirection,
        remote: impl Into<String>,
        local_identity: impl Into<String>,
    ) -> Self {
        Self {
            id,
            direction,
            remote: remote.into(),
            local_identity: local_identity.into(),
            status: CallStatus::Connecting,
            muted: false,
            held: false,
            started_at: Utc::now(),
        }
    }
}

/// An outgoing call waiting for the native UI to confirm the start action
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOutgoing {
    /// Identifier the native UI will echo back in its start action
    pub id: CallId,
    /// Destination address, also used as the native UI handle
    pub to: String,
    /// Local identity placing the call
    pub from: String,
    /// Access token supplied with the request, if any
    pub access_token: Option<String>,
    /// Extra parameters forwarded to the transport connect
    pub params: BTreeMap<String, String>,
}

// ===== INVITE TYPES =====

/// An incoming call offer decoded from a VoIP push
#[derive(Debug, Clone, PartialEq)]
pub struct CallInvite {
    /// Identifier shared with the native call UI
    pub id: CallId,
    /// Caller address as the transport reports it, possibly prefixed
    pub from: Option<String>,
    /// Callee address
    pub to: String,
    /// Custom parameters attached by the caller
    pub custom_parameters: HashMap<String, String>,
    /// When the invite was received
    pub created_at: DateTime<Utc>,
}

impl CallInvite {
    /// Create an invite with no custom parameters
    pub fn new(id: CallId, from: Option<String>, to: impl Into<String>) -> Self {
        Self {
            id,
            from,
            to: to.into(),
            custom_parameters: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a custom parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_parameters.insert(key.into(), value.into());
        self
    }

    /// Caller display name carried in the custom parameters under `key`
    pub fn custom_caller_id(&self, key: &str) -> Option<&str> {
        self.custom_parameters.get(key).map(String::as_str)
    }
}

// ===== TRANSPORT TYPES =====

/// Everything the transport needs to place an outgoing call
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    /// Identifier for the new call
    pub call_id: CallId,
    /// Access token authorising the call
    pub access_token: String,
    /// Connect parameters; always contains `To`
    pub params: BTreeMap<String, String>,
}

/// The call object the transport hands back when an invite is accepted
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedCall {
    /// Identifier of the call, equal to the invite id
    pub call_id: CallId,
    /// Caller address, if the transport knows it
    pub from: Option<String>,
    /// Callee address, if the transport knows it
    pub to: Option<String>,
}

// ===== NATIVE UI TYPES =====

/// Why a call ended, as reported to the native call UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndedReason {
    /// The remote party hung up
    RemoteEnded,
    /// The call failed
    Failed,
}

/// Audio output route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioRoute {
    /// Built-in receiver
    Earpiece,
    /// Loudspeaker
    Speaker,
}

/// Call details pushed to the native call UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallUpdate {
    /// Remote handle shown by the system UI
    pub handle: String,
    /// Localised caller name
    pub caller_name: String,
    pub supports_dtmf: bool,
    pub supports_holding: bool,
    pub supports_grouping: bool,
    pub supports_ungrouping: bool,
    pub has_video: bool,
}

impl CallUpdate {
    /// Update for an outgoing call after the start transaction succeeded
    pub fn outgoing(handle: impl Into<String>, caller_name: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            caller_name: caller_name.into(),
            supports_dtmf: false,
            supports_holding: true,
            supports_grouping: false,
            supports_ungrouping: false,
            has_video: false,
        }
    }

    /// Update for a newly reported incoming call
    pub fn incoming(handle: impl Into<String>, caller_name: impl Into<String>) -> Self {
        Self {
            supports_dtmf: true,
            ..Self::outgoing(handle, caller_name)
        }
    }
}

// ===== PUSH TYPES =====

/// Kind of push a push-registry callback refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    /// VoIP push, the only kind the bridge acts on
    Voip,
    /// Any other push type
    Other,
}

/// Opaque device push token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceToken(Vec<u8>);

impl DeviceToken {
    /// Wrap raw token bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw token bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether the token carries no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_token_renders_as_hex() {
        let token = DeviceToken::new(vec![0x0a, 0xff, 0x00]);
        assert_eq!(token.to_string(), "0aff00");
        assert!(!token.is_empty());
        assert!(DeviceToken::new(Vec::new()).is_empty());
    }

    #[test]
    fn test_incoming_update_supports_dtmf() {
        let incoming = CallUpdate::incoming("bob", "Bob");
        let outgoing = CallUpdate::outgoing("bob", "Bob");
        assert!(incoming.supports_dtmf);
        assert!(!outgoing.supports_dtmf);
        assert!(incoming.supports_holding && outgoing.supports_holding);
        assert!(!incoming.has_video);
    }

    #[test]
    fn test_custom_caller_id() {
        let invite = CallInvite::new(Uuid::new_v4(), Some("client:bob".into()), "alice")
            .with_parameter("CALLER_ID", "Bob Builder");
        assert_eq!(invite.custom_caller_id("CALLER_ID"), Some("Bob Builder"));
        assert_eq!(invite.custom_caller_id("OTHER"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CallStatus::Failed.is_terminal());
        assert!(CallStatus::Disconnected.is_terminal());
        assert!(!CallStatus::Reconnecting.is_terminal());
    }
}
