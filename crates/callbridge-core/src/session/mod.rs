//! Call session state machine
//!
//! ```text
//!            outgoing start │ invite accept
//!   Idle ───────────────────┴──────────────► Connecting ──► Ringing ──► Connected
//!    ▲                                                                   │   ▲
//!    │                                                        Reconnecting ──┘
//!    │                     Disconnected │ Failed                         │
//!    └───────────────────────────────────┴───────────────────────────────┘
//! ```
//!
//! [`CallSessionState`] holds the single call slot together with the pending
//! invite and the pending outgoing start. It is purely synchronous; the
//! coordinator owns it and performs the I/O its decisions call for.

pub mod state;

pub use state::{
    CallSessionState, CancelOutcome, EndResolution, EndTarget, FinishedCall, OutgoingDecision,
    PendingInvite,
};
