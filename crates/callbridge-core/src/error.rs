//! Error types for the call bridge
//!
//! Every fallible operation in the crate returns [`BridgeResult`]. Errors fall
//! into three groups:
//!
//! - **Command errors** (`MissingArgument`, `UnknownCommand`) are returned to the
//!   host synchronously and block only the offending command.
//! - **State errors** (`NoActiveCall`, `NoPendingInvite`, `AlreadyInCall`,
//!   `InviteAlreadyPending`, `MissingTokens`) reject an operation that does not
//!   fit the current call state. They never change that state.
//! - **Collaborator errors** (`TransportFailure`, `NativeUiTransactionFailure`,
//!   `CredentialExpired`, `Storage`) come back from the transport SDK, the
//!   native call UI or the persistent store. They are logged and surfaced on
//!   the event stream but never abort the coordinator.

use thiserror::Error;

/// Result type for call bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur in the call bridge
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// A command was missing one of its required arguments
    #[error("Missing argument: {key}")]
    MissingArgument { key: String },

    /// The host invoked a command this bridge does not know
    #[error("Unknown command: {method}")]
    UnknownCommand { method: String },

    /// The operation needs an active call but there is none
    #[error("No active call")]
    NoActiveCall,

    /// The operation needs a pending invite but there is none
    #[error("No pending call invite")]
    NoPendingInvite,

    /// A call (or a call being set up) already occupies the single call slot
    #[error("Already in a call")]
    AlreadyInCall,

    /// An invite is already waiting for an answer
    #[error("A call invite is already pending")]
    InviteAlreadyPending,

    /// Registration needs both an access token and a device token
    #[error("Missing access token or device token")]
    MissingTokens,

    /// Microphone access was denied and the configuration requires it
    #[error("Microphone permission denied")]
    PermissionDenied,

    /// The transport SDK reported a failure
    #[error("Transport failure: {message}")]
    TransportFailure { message: String },

    /// A native call UI transaction failed
    #[error("Native UI transaction failed: {message}")]
    NativeUiTransactionFailure { message: String },

    /// The access token used with the transport has expired
    #[error("Access token expired: {message}")]
    CredentialExpired { message: String },

    /// The persistent store could not be read or written
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The coordinator is no longer running
    #[error("Call bridge is not running")]
    ChannelClosed,
}

impl BridgeError {
    /// Create a missing argument error
    pub fn missing_argument(key: impl Into<String>) -> Self {
        Self::MissingArgument { key: key.into() }
    }

    /// Create a transport failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
        }
    }

    /// Create a native UI transaction failure
    pub fn native_ui(message: impl Into<String>) -> Self {
        Self::NativeUiTransactionFailure {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Stable error code handed to the host application alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingArgument { .. } => "MISSING_ARGUMENT",
            Self::UnknownCommand { .. } => "UNKNOWN_COMMAND",
            Self::NoActiveCall => "NO_ACTIVE_CALL",
            Self::NoPendingInvite => "NO_PENDING_INVITE",
            Self::AlreadyInCall => "ALREADY_IN_CALL",
            Self::InviteAlreadyPending => "INVITE_ALREADY_PENDING",
            Self::MissingTokens => "MISSING_TOKENS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::TransportFailure { .. } => "TRANSPORT_FAILURE",
            Self::NativeUiTransactionFailure { .. } => "NATIVE_UI_TRANSACTION_FAILURE",
            Self::CredentialExpired { .. } => "CREDENTIAL_EXPIRED",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::ChannelClosed => "BRIDGE_CLOSED",
        }
    }

    /// Whether the bridge keeps working normally after this error
    ///
    /// Only a closed coordinator and a broken configuration are fatal; every
    /// other error affects a single operation.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ChannelClosed | Self::Config { .. })
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::storage(err.to_string())
    }
}
