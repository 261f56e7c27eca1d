//! # callbridge-core - VoIP call session coordinator
//!
//! This crate is the platform-independent core of a mobile VoIP plugin. It
//! reconciles three asynchronous event sources into one consistent call state:
//! - **VoIP push** - incoming call invites and device token updates
//! - **Native call UI** - start, answer, end, hold and mute actions
//! - **Transport SDK** - call lifecycle callbacks (ringing, connected, failed, ...)
//!
//! The host application drives the bridge with string commands and observes it
//! through a single stream of string-tagged events.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use callbridge_core::{BridgeConfig, BridgeCoordinator, Capabilities};
//! use callbridge_core::store::JsonFileStore;
//! # use callbridge_core::capabilities::{AudioRouter, MicrophonePermission, TelephonyUi, VoiceTransport};
//!
//! # async fn example(
//! #     transport: Arc<dyn VoiceTransport>,
//! #     telephony: Arc<dyn TelephonyUi>,
//! #     microphone: Arc<dyn MicrophonePermission>,
//! #     audio: Arc<dyn AudioRouter>,
//! # ) -> callbridge_core::BridgeResult<()> {
//! let config = BridgeConfig::from_file("callbridge.toml")?;
//! let store = JsonFileStore::from_config(&config).unwrap_or_else(|| JsonFileStore::new("clients.json"));
//! let capabilities = Capabilities {
//!     transport,
//!     telephony,
//!     store: Arc::new(store),
//!     microphone,
//!     audio,
//! };
//!
//! let bridge = BridgeCoordinator::start(config, capabilities)?;
//! let mut events = bridge.subscribe();
//!
//! bridge.invoke("registerClient", &serde_json::json!({ "id": "42", "name": "Bob" })).await?;
//! let on_call = bridge.invoke("isOnCall", &serde_json::Value::Null).await?;
//! assert!(!on_call.as_bool());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`coordinator`] owns every piece of state and consumes one serialized queue
//! - [`session`] is the synchronous call slot state machine
//! - [`registration`] decides when to (un)register for pushes
//! - [`directory`] maps client ids to display names
//! - [`bridge`] adapts native UI, transport and push callbacks
//! - [`capabilities`] are the traits the host implements for the platform SDKs

pub mod bridge;
pub mod capabilities;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod events;
pub mod logging;
pub mod registration;
pub mod session;
pub mod store;
pub mod testing;
pub mod types;

// Re-export main types
pub use bridge::{ActionOutcome, PushMessage, TransportEvent, UiActionKind};
pub use capabilities::Capabilities;
pub use commands::{Command, CommandReply};
pub use config::{BridgeConfig, DuplicateInvitePolicy, LoggingSettings};
pub use coordinator::{BridgeCoordinator, BridgeHandle, BridgeSnapshot, WeakBridgeHandle};
pub use error::{BridgeError, BridgeResult};
pub use events::{CallEvent, EventStream, LogLevel, OutboundEvent};
pub use types::{CallDirection, CallId, CallInvite, CallSession, CallStatus, DeviceToken, PushKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
