//! Bridge configuration
//!
//! [`BridgeConfig`] carries the handful of knobs the coordinator needs: naming
//! fallbacks for caller display, the transport conventions used to recognise
//! client addresses and expired credentials, and the policies for the cases the
//! call flow leaves open (a second invite while one is pending, unknown host
//! commands, a denied microphone).
//!
//! # Usage Examples
//!
//! ```rust
//! use callbridge_core::config::{BridgeConfig, DuplicateInvitePolicy};
//!
//! let config = BridgeConfig::new()
//!     .with_default_caller("Front Desk")
//!     .with_duplicate_invite_policy(DuplicateInvitePolicy::Replace)
//!     .with_strict_commands(true);
//!
//! assert_eq!(config.default_caller, "Front Desk");
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Loading from TOML
//!
//! ```rust
//! use callbridge_core::config::BridgeConfig;
//!
//! let config = BridgeConfig::from_toml_str(r#"
//!     default_caller = "Reception"
//!     caller_id_parameter_key = "DISPLAY_NAME"
//!     require_microphone = true
//!
//!     [logging]
//!     level = "debug"
//!     json = true
//! "#).unwrap();
//!
//! assert_eq!(config.caller_id_parameter_key, "DISPLAY_NAME");
//! assert_eq!(config.client_prefix, "client:");
//! assert!(config.logging.json);
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Fallback display name when neither the invite nor the directory names a caller
pub const DEFAULT_CALLER_NAME: &str = "Unknown Caller";

/// Custom invite parameter that carries a caller display name
pub const DEFAULT_CALLER_ID_KEY: &str = "CALLER_ID";

/// Prefix the transport puts in front of client (non-PSTN) addresses
pub const DEFAULT_CLIENT_PREFIX: &str = "client:";

/// Substring of a transport failure that means the access token expired
pub const DEFAULT_CREDENTIAL_EXPIRY_PATTERN: &str = "Access Token expired";

/// What to do when an invite arrives while another one is still pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateInvitePolicy {
    /// Keep the pending invite, reject the newcomer with `InviteAlreadyPending`
    Reject,
    /// Drop the pending invite and keep the newcomer
    Replace,
}

impl Default for DuplicateInvitePolicy {
    fn default() -> Self {
        Self::Reject
    }
}

/// `[logging]` section, consumed by [`crate::logging::setup_logging`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Minimum level: `trace`, `debug`, `info`, `warn` or `error`
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
    /// Include source file and line in each record
    pub file_info: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
        }
    }
}

/// Main bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Display name used when nothing better is known about a caller
    pub default_caller: String,
    /// Local identity reported when the transport omits the `from` party
    pub default_identity: String,
    /// Invite custom parameter holding a caller display name
    pub caller_id_parameter_key: String,
    /// Prefix stripped from transport client addresses before display
    pub client_prefix: String,
    /// Failure text that identifies an expired access token
    pub credential_expiry_pattern: String,
    /// Behaviour for a second invite while one is pending
    pub duplicate_invite_policy: DuplicateInvitePolicy,
    /// Fail unknown host commands with `UnknownCommand` instead of ignoring them
    pub strict_commands: bool,
    /// Refuse to place calls when microphone permission is denied
    pub require_microphone: bool,
    /// Location of the JSON client directory, if file persistence is used
    pub store_path: Option<PathBuf>,
    /// Subscriber settings for hosts that let the bridge install one
    pub logging: LoggingSettings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_caller: DEFAULT_CALLER_NAME.to_string(),
            default_identity: "anonymous".to_string(),
            caller_id_parameter_key: DEFAULT_CALLER_ID_KEY.to_string(),
            client_prefix: DEFAULT_CLIENT_PREFIX.to_string(),
            credential_expiry_pattern: DEFAULT_CREDENTIAL_EXPIRY_PATTERN.to_string(),
            duplicate_invite_policy: DuplicateInvitePolicy::default(),
            strict_commands: false,
            require_microphone: false,
            store_path: None,
            logging: LoggingSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> BridgeResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| BridgeError::config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Set the fallback caller display name
    pub fn with_default_caller(mut self, name: impl Into<String>) -> Self {
        self.default_caller = name.into();
        self
    }

    /// Set the identity used when the transport omits the local party
    pub fn with_default_identity(mut self, identity: impl Into<String>) -> Self {
        self.default_identity = identity.into();
        self
    }

    /// Set the invite parameter that carries the caller display name
    pub fn with_caller_id_parameter_key(mut self, key: impl Into<String>) -> Self {
        self.caller_id_parameter_key = key.into();
        self
    }

    /// Set the transport client-address prefix
    pub fn with_client_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_prefix = prefix.into();
        self
    }

    /// Set the duplicate invite policy
    pub fn with_duplicate_invite_policy(mut self, policy: DuplicateInvitePolicy) -> Self {
        self.duplicate_invite_policy = policy;
        self
    }

    /// Fail unknown commands instead of silently accepting them
    pub fn with_strict_commands(mut self, strict: bool) -> Self {
        self.strict_commands = strict;
        self
    }

    /// Refuse outgoing calls without microphone permission
    pub fn with_require_microphone(mut self, required: bool) -> Self {
        self.require_microphone = required;
        self
    }

    /// Persist the client directory to a JSON file at `path`
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Set the minimum log level, e.g. `"debug"`
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.logging.level = level.into();
        self
    }

    /// Check the configuration for values the bridge cannot work with
    pub fn validate(&self) -> BridgeResult<()> {
        if self.default_caller.trim().is_empty() {
            return Err(BridgeError::config("default_caller must not be empty"));
        }
        if self.caller_id_parameter_key.is_empty() {
            return Err(BridgeError::config("caller_id_parameter_key must not be empty"));
        }
        if self.credential_expiry_pattern.is_empty() {
            return Err(BridgeError::config("credential_expiry_pattern must not be empty"));
        }
        crate::logging::parse_log_level(&self.logging.level)?;
        Ok(())
    }
}
