//! Adapters between the coordinator and its event sources
//!
//! - [`telephony`] - native call UI transactions and actions
//! - [`transport`] - transport SDK callbacks
//! - [`push`] - push registry callbacks and (un)registration

pub mod push;
pub mod telephony;
pub mod transport;

pub(crate) use telephony::TelephonyUiBridge;

pub use push::PushMessage;
pub use telephony::{ActionOutcome, UiAction, UiActionKind};
pub use transport::{TransportEvent, TransportEventAdapter};
