//! Outbound event stream to the host application
//!
//! The host sees a single ordered stream of string-tagged events. Three kinds of
//! value travel on it:
//!
//! - **Log lines** - `LOG|{LEVEL}|{message}` diagnostics
//! - **Call state changes** - `Ringing|...`, `Connected|...`, `Call Ended`, ...
//! - **Errors** - hard failures carrying a code and a message
//!
//! Exactly one subscriber is active at a time. Subscribing again replaces the
//! previous subscriber; with no subscriber, events are only mirrored to
//! `tracing`.
//!
//! # Usage Examples
//!
//! ```rust
//! use callbridge_core::events::{CallEvent, EventPublisher, OutboundEvent};
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new();
//! let mut stream = publisher.subscribe();
//!
//! publisher.call_event(CallEvent::Muted(true));
//! assert_eq!(stream.recv().await.unwrap().wire(), "Mute");
//! # });
//! ```

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::error::BridgeError;
use crate::types::CallDirection;

/// Severity of a diagnostic line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(tag)
    }
}

/// A call state transition as the host application sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// `Ringing|{from}|{to}|{direction}`
    Ringing {
        from: String,
        to: String,
        direction: CallDirection,
    },
    /// `Connected|{from}|{to}|{direction}`
    Connected {
        from: String,
        to: String,
        direction: CallDirection,
    },
    /// `Answer|{from}|{to}`
    Answered { from: String, to: String },
    /// `Call Ended`
    CallEnded,
    /// `Mute` / `Unmute`
    Muted(bool),
    /// `Hold` / `Unhold`
    Held(bool),
    /// `Speaker On` / `Speaker Off`
    Speaker(bool),
    /// `DEVICETOKEN` - the access token expired, refresh and register again
    CredentialExpired,
    /// `DEVICETOKEN|{token}` - registration with this device token failed
    DeviceTokenRejected(String),
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallEvent::Ringing { from, to, direction } => {
                write!(f, "Ringing|{}|{}|{}", from, to, direction)
            }
            CallEvent::Connected { from, to, direction } => {
                write!(f, "Connected|{}|{}|{}", from, to, direction)
            }
            CallEvent::Answered { from, to } => write!(f, "Answer|{}|{}", from, to),
            CallEvent::CallEnded => f.write_str("Call Ended"),
            CallEvent::Muted(true) => f.write_str("Mute"),
            CallEvent::Muted(false) => f.write_str("Unmute"),
            CallEvent::Held(true) => f.write_str("Hold"),
            CallEvent::Held(false) => f.write_str("Unhold"),
            CallEvent::Speaker(true) => f.write_str("Speaker On"),
            CallEvent::Speaker(false) => f.write_str("Speaker Off"),
            CallEvent::CredentialExpired => f.write_str("DEVICETOKEN"),
            CallEvent::DeviceTokenRejected(token) => write!(f, "DEVICETOKEN|{}", token),
        }
    }
}

/// A value delivered to the host application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Diagnostic line
    Log { level: LogLevel, message: String },
    /// Call state transition, already rendered to its wire form
    CallStateChange(String),
    /// Hard failure
    Error { code: String, message: String },
}

impl OutboundEvent {
    /// The string the host channel carries for this event
    pub fn wire(&self) -> String {
        match self {
            OutboundEvent::Log { level, message } => format!("LOG|{}|{}", level, message),
            OutboundEvent::CallStateChange(description) => description.clone(),
            OutboundEvent::Error { message, .. } => message.clone(),
        }
    }

    /// Whether this is the error-carrying variant
    pub fn is_error(&self) -> bool {
        matches!(self, OutboundEvent::Error { .. })
    }
}

impl From<CallEvent> for OutboundEvent {
    fn from(event: CallEvent) -> Self {
        OutboundEvent::CallStateChange(event.to_string())
    }
}

/// Receiving half of the event stream
#[derive(Debug)]
pub struct EventStream {
    inner: UnboundedReceiverStream<OutboundEvent>,
}

impl EventStream {
    /// Wait for the next event; `None` once the subscription was replaced or cancelled
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        self.inner.next().await
    }

    /// Take an already delivered event without waiting
    pub fn try_recv(&mut self) -> Option<OutboundEvent> {
        self.inner.as_mut().try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = OutboundEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Single-subscriber publisher for [`OutboundEvent`]s
#[derive(Debug, Default)]
pub struct EventPublisher {
    sink: Mutex<Option<mpsc::UnboundedSender<OutboundEvent>>>,
}

impl EventPublisher {
    /// Create a publisher with no subscriber
    pub fn new() -> Self {
        Self::default()
    }

    /// Start listening; any previous subscriber's stream ends
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.sink.lock().replace(tx).is_some() {
            tracing::debug!("Event subscriber replaced");
        }
        EventStream {
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    /// Stop listening
    pub fn unsubscribe(&self) {
        self.sink.lock().take();
    }

    /// Whether a subscriber is attached
    pub fn has_subscriber(&self) -> bool {
        self.sink.lock().as_ref().map_or(false, |tx| !tx.is_closed())
    }

    /// Publish an event to the current subscriber
    pub fn publish(&self, event: OutboundEvent) {
        mirror_to_tracing(&event);
        let mut sink = self.sink.lock();
        if let Some(tx) = sink.as_ref() {
            if tx.send(event).is_err() {
                // Receiver dropped without unsubscribing
                *sink = None;
            }
        }
    }

    /// Publish a diagnostic line
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.publish(OutboundEvent::Log {
            level,
            message: message.into(),
        });
    }

    /// Publish a call state transition
    pub fn call_event(&self, event: CallEvent) {
        self.publish(event.into());
    }

    /// Publish a hard failure with an explicit message
    pub fn error(&self, code: impl Into<String>, message: impl Into<String>) {
        self.publish(OutboundEvent::Error {
            code: code.into(),
            message: message.into(),
        });
    }

    /// Publish a bridge error using its code and display text
    pub fn bridge_error(&self, err: &BridgeError) {
        self.error(err.code(), err.to_string());
    }
}

fn mirror_to_tracing(event: &OutboundEvent) {
    match event {
        OutboundEvent::Log { level, message } => match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        },
        OutboundEvent::CallStateChange(description) => tracing::info!(event = %description, "call state"),
        OutboundEvent::Error { code, message } => tracing::error!(code = %code, "{}", message),
    }
}
