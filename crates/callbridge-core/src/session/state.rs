use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DuplicateInvitePolicy;
use crate::error::{BridgeError, BridgeResult};
use crate::types::{
    AcceptedCall, CallDirection, CallId, CallInvite, CallSession, CallStatus, PendingOutgoing,
};

/// An invite waiting for an answer
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInvite {
    pub invite: CallInvite,
    /// The caller withdrew the invite; only the native UI still shows it
    pub cancelled: bool,
}

/// Result of asking to place an outgoing call
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingDecision {
    /// Slot reserved; ask the native UI to start this call
    Start(PendingOutgoing),
    /// A connected call occupies the slot; end it first
    HangUpExisting(CallId),
}

/// Result of a remote invite cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Nothing was pending
    NoInvite,
    /// A different invite is pending
    Mismatch,
    /// The pending invite was marked cancelled; end it in the native UI
    Cancelled(CallId),
}

/// What a native end-call request refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndTarget {
    Invite,
    Call,
}

/// What a native end-call action resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum EndResolution {
    /// Drop the pending invite, rejecting it at the transport unless already cancelled
    RejectInvite(PendingInvite),
    /// Hang up the active call
    Disconnect(CallId),
    /// Nothing to end
    Nothing,
}

/// A session removed from the slot by a terminal transport event
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedCall {
    pub session: CallSession,
    /// The local user asked for the hang-up, so the native UI already knows
    pub user_initiated: bool,
}

/// The single call slot and everything that can lead into it
#[derive(Debug)]
pub struct CallSessionState {
    session: Option<CallSession>,
    invite: Option<PendingInvite>,
    outgoing: Option<PendingOutgoing>,
    user_initiated_disconnect: bool,
    call_outgoing: bool,
    identity: String,
    call_to: String,
}

impl CallSessionState {
    /// Create an idle state; `default_identity` names the local party until a call sets it
    pub fn new(default_identity: impl Into<String>) -> Self {
        Self {
            session: None,
            invite: None,
            outgoing: None,
            user_initiated_disconnect: false,
            call_outgoing: false,
            identity: default_identity.into(),
            call_to: String::new(),
        }
    }

    // ===== QUERIES =====

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn invite(&self) -> Option<&PendingInvite> {
        self.invite.as_ref()
    }

    pub fn pending_outgoing(&self) -> Option<&PendingOutgoing> {
        self.outgoing.as_ref()
    }

    pub fn is_on_call(&self) -> bool {
        self.session.is_some()
    }

    /// No session, invite or outgoing start
    pub fn is_idle(&self) -> bool {
        self.session.is_none() && self.invite.is_none() && self.outgoing.is_none()
    }

    pub fn user_initiated_disconnect(&self) -> bool {
        self.user_initiated_disconnect
    }

    /// Direction of the call currently being set up or active
    pub fn direction(&self) -> CallDirection {
        if self.call_outgoing {
            CallDirection::Outgoing
        } else {
            CallDirection::Incoming
        }
    }

    /// From/to for host events, filling gaps from the last request
    pub fn parties(&self, from: Option<&str>, to: Option<&str>) -> (String, String) {
        (
            from.unwrap_or(&self.identity).to_string(),
            to.unwrap_or(&self.call_to).to_string(),
        )
    }

    /// The active session, or `NoActiveCall`
    pub fn active_mut(&mut self) -> BridgeResult<&mut CallSession> {
        self.session.as_mut().ok_or(BridgeError::NoActiveCall)
    }

    // ===== OUTGOING =====

    /// Reserve the slot for an outgoing call
    ///
    /// A connected call is ended first (hang up and redial); anything else in
    /// the slot refuses with `AlreadyInCall`.
    pub fn request_outgoing(
        &mut self,
        to: String,
        from: String,
        access_token: Option<String>,
        params: BTreeMap<String, String>,
    ) -> BridgeResult<OutgoingDecision> {
        if let Some(session) = &self.session {
            if session.status == CallStatus::Connected {
                info!("Ending connected call {} before dialing again", session.id);
                self.user_initiated_disconnect = true;
                return Ok(OutgoingDecision::HangUpExisting(session.id));
            }
            return Err(BridgeError::AlreadyInCall);
        }
        if self.outgoing.is_some() || self.invite.is_some() {
            return Err(BridgeError::AlreadyInCall);
        }

        let pending = PendingOutgoing {
            id: Uuid::new_v4(),
            to,
            from,
            access_token,
            params,
        };
        self.identity = pending.from.clone();
        self.call_to = pending.to.clone();
        self.call_outgoing = true;
        self.outgoing = Some(pending.clone());
        debug!("Reserved call slot for outgoing call {}", pending.id);
        Ok(OutgoingDecision::Start(pending))
    }

    /// Take the pending start matching a native start action
    pub fn take_outgoing(&mut self, id: CallId) -> Option<PendingOutgoing> {
        match &self.outgoing {
            Some(pending) if pending.id == id => self.outgoing.take(),
            _ => None,
        }
    }

    /// Release a pending start that will never connect
    pub fn abandon_outgoing(&mut self, id: CallId) -> bool {
        if self.take_outgoing(id).is_none() {
            return false;
        }
        if self.session.is_none() {
            self.call_outgoing = false;
        }
        true
    }

    /// Open the outgoing session once the transport accepted the connect
    pub fn open_outgoing(&mut self, pending: &PendingOutgoing) -> &CallSession {
        debug_assert!(self.session.is_none(), "outgoing call opened over an active session");
        self.call_outgoing = true;
        self.session.insert(CallSession::new(
            pending.id,
            CallDirection::Outgoing,
            pending.to.clone(),
            pending.from.clone(),
        ))
    }

    // ===== INCOMING =====

    /// Store an invite decoded from a push
    ///
    /// Returns the invite it replaced under [`DuplicateInvitePolicy::Replace`].
    pub fn store_invite(
        &mut self,
        invite: CallInvite,
        policy: DuplicateInvitePolicy,
    ) -> BridgeResult<Option<CallInvite>> {
        if self.session.is_some() || self.outgoing.is_some() {
            return Err(BridgeError::AlreadyInCall);
        }
        let replaced = match (&self.invite, policy) {
            (Some(_), DuplicateInvitePolicy::Reject) => {
                return Err(BridgeError::InviteAlreadyPending);
            }
            (Some(_), DuplicateInvitePolicy::Replace) => self.invite.take().map(|p| p.invite),
            (None, _) => None,
        };
        if let Some(old) = &replaced {
            warn!("Invite {} replaced by {}", old.id, invite.id);
        }
        self.call_outgoing = false;
        self.invite = Some(PendingInvite {
            invite,
            cancelled: false,
        });
        Ok(replaced)
    }

    /// The caller withdrew invite `id`
    pub fn cancel_invite(&mut self, id: CallId) -> CancelOutcome {
        match self.invite.as_mut() {
            None => CancelOutcome::NoInvite,
            Some(pending) if pending.invite.id != id => CancelOutcome::Mismatch,
            Some(pending) => {
                pending.cancelled = true;
                CancelOutcome::Cancelled(id)
            }
        }
    }

    /// The invite a native answer action for `call_id` may accept
    pub fn invite_to_accept(&self, call_id: CallId) -> BridgeResult<&CallInvite> {
        match &self.invite {
            Some(pending) if pending.invite.id == call_id && !pending.cancelled => Ok(&pending.invite),
            _ => Err(BridgeError::NoPendingInvite),
        }
    }

    /// Turn the pending invite into the active session
    pub fn open_incoming(&mut self, accepted: &AcceptedCall) -> BridgeResult<&CallSession> {
        let pending = self.invite.take().ok_or(BridgeError::NoPendingInvite)?;
        debug_assert!(self.session.is_none(), "invite accepted over an active session");

        let invite = pending.invite;
        let remote = accepted.from.clone().or(invite.from).unwrap_or_default();
        let local = accepted.to.clone().unwrap_or(invite.to);
        self.call_outgoing = false;
        Ok(self
            .session
            .insert(CallSession::new(invite.id, CallDirection::Incoming, remote, local)))
    }

    // ===== ENDING =====

    /// Pick what an explicit hang-up should end, invite first
    pub fn end_request(&mut self, user_initiated: bool) -> Option<(CallId, EndTarget)> {
        let target = if let Some(pending) = &self.invite {
            (pending.invite.id, EndTarget::Invite)
        } else if let Some(session) = &self.session {
            (session.id, EndTarget::Call)
        } else {
            return None;
        };
        if user_initiated {
            self.user_initiated_disconnect = true;
        }
        Some(target)
    }

    /// Forget a hang-up that never reached the transport
    pub fn clear_user_initiated(&mut self) {
        self.user_initiated_disconnect = false;
    }

    /// Resolve a native end-call action
    ///
    /// An invite always wins over an active call; the two should never
    /// coexist, but if they do the call is left alone.
    pub fn resolve_end_action(&mut self, call_id: CallId) -> EndResolution {
        if let Some(pending) = self.invite.take() {
            if pending.invite.id != call_id {
                warn!("End action for {} resolved to pending invite {}", call_id, pending.invite.id);
            }
            if self.session.is_none() {
                self.reset_flags();
            }
            return EndResolution::RejectInvite(pending);
        }
        match &self.session {
            Some(session) => EndResolution::Disconnect(session.id),
            None => EndResolution::Nothing,
        }
    }

    /// Apply a non-terminal transport status to the session `call_id`
    pub fn apply_progress(&mut self, call_id: CallId, status: CallStatus) -> Option<&CallSession> {
        debug_assert!(!status.is_terminal());
        match self.session.as_mut() {
            Some(session) if session.id == call_id => {
                debug!("Call {} {:?} -> {:?}", call_id, session.status, status);
                session.status = status;
                Some(session)
            }
            _ => {
                debug!("Ignoring {:?} for unknown call {}", status, call_id);
                None
            }
        }
    }

    /// Remove the session `call_id` after a terminal transport event and reset to idle
    ///
    /// Returns `None` when the slot no longer holds that call, which makes
    /// repeated disconnect callbacks harmless.
    pub fn finish(&mut self, call_id: CallId, status: CallStatus) -> Option<FinishedCall> {
        debug_assert!(status.is_terminal());
        match &self.session {
            Some(session) if session.id == call_id => {}
            _ => {
                debug!("Call {} already finished", call_id);
                return None;
            }
        }
        let mut session = self.session.take()?;
        session.status = status;
        let user_initiated = self.user_initiated_disconnect;
        self.invite = None;
        self.outgoing = None;
        self.reset_flags();
        info!("Call {} finished as {:?}", call_id, status);
        Some(FinishedCall {
            session,
            user_initiated,
        })
    }

    fn reset_flags(&mut self) {
        self.call_outgoing = false;
        self.user_initiated_disconnect = false;
    }
}
