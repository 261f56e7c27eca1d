//! Push registration bookkeeping
//!
//! [`PushRegistrationManager`] owns the device push token and the current
//! access token and decides when the transport must be (un)registered. It does
//! no I/O itself: every operation returns the [`RegistrationRequest`] the
//! coordinator should issue, and completions are fed back through
//! [`PushRegistrationManager::on_registration_completed`].
//!
//! # Registration rule
//!
//! A register request is produced only when both tokens are non-empty and the
//! pair differs from the last successful registration and from the one in
//! flight. Rotating a token therefore registers exactly once, and repeating an
//! unchanged token never registers again.
//!
//! # Usage Examples
//!
//! ```rust
//! use callbridge_core::registration::{DeviceTokenUpdate, PushRegistrationManager};
//! use callbridge_core::types::DeviceToken;
//!
//! let mut manager = PushRegistrationManager::new(None);
//! assert!(manager.on_credential_update("jwt-1".into()).is_none());
//!
//! let token = DeviceToken::new(vec![0xab]);
//! match manager.on_device_token_update(token.clone()) {
//!     DeviceTokenUpdate::Changed { request } => assert!(request.is_some()),
//!     DeviceTokenUpdate::Unchanged => unreachable!(),
//! }
//! assert!(matches!(manager.on_device_token_update(token), DeviceTokenUpdate::Unchanged));
//! ```

use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::types::DeviceToken;

/// Registration state against the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// Never registered, or unregistered since
    Unregistered,
    /// A register request is in flight
    Registering,
    /// The last register request succeeded
    Registered,
    /// The last register request failed
    Failed,
}

/// What caused a registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationTrigger {
    /// The host supplied a new access token
    Credential,
    /// The push registry supplied a new device token
    DeviceToken,
}

/// A register or unregister call the coordinator should make
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub access_token: String,
    pub device_token: DeviceToken,
    pub trigger: RegistrationTrigger,
}

impl RegistrationRequest {
    fn same_tokens(&self, other: &RegistrationRequest) -> bool {
        self.access_token == other.access_token && self.device_token == other.device_token
    }
}

/// Outcome of a device token update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTokenUpdate {
    /// Same token as cached; nothing to do
    Unchanged,
    /// New token cached; persist it and issue `request` if present
    Changed { request: Option<RegistrationRequest> },
}

/// Tracks tokens and registration status
#[derive(Debug)]
pub struct PushRegistrationManager {
    access_token: Option<String>,
    device_token: Option<DeviceToken>,
    status: RegistrationStatus,
    registered: Option<RegistrationRequest>,
    in_flight: Option<RegistrationRequest>,
}

impl PushRegistrationManager {
    /// Start with the device token cached from a previous run, if any
    pub fn new(cached_device_token: Option<DeviceToken>) -> Self {
        Self {
            access_token: None,
            device_token: cached_device_token.filter(|t| !t.is_empty()),
            status: RegistrationStatus::Unregistered,
            registered: None,
            in_flight: None,
        }
    }

    pub fn status(&self) -> RegistrationStatus {
        self.status
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn device_token(&self) -> Option<&DeviceToken> {
        self.device_token.as_ref()
    }

    /// Remember an access token without attempting registration
    pub fn remember_credential(&mut self, token: String) {
        if !token.is_empty() {
            self.access_token = Some(token);
        }
    }

    /// A new access token arrived; register if a device token is cached
    pub fn on_credential_update(&mut self, token: String) -> Option<RegistrationRequest> {
        self.remember_credential(token);
        self.next_request(RegistrationTrigger::Credential)
    }

    /// The push registry produced a device token
    ///
    /// The token is cached whether or not a registration follows.
    ///
    /// An empty token never replaces the cached one.
    pub fn on_device_token_update(&mut self, token: DeviceToken) -> DeviceTokenUpdate {
        if token.is_empty() {
            debug!("Empty device token, keeping the cached one");
            return DeviceTokenUpdate::Unchanged;
        }
        if self.device_token.as_ref() == Some(&token) {
            debug!("Device token unchanged, skipping registration");
            return DeviceTokenUpdate::Unchanged;
        }
        self.device_token = Some(token);
        DeviceTokenUpdate::Changed {
            request: self.next_request(RegistrationTrigger::DeviceToken),
        }
    }

    /// Record the outcome of a register request
    pub fn on_registration_completed(&mut self, request: &RegistrationRequest, result: &BridgeResult<()>) {
        if self.in_flight.as_ref().map_or(false, |r| r.same_tokens(request)) {
            self.in_flight = None;
        }
        match result {
            Ok(()) => {
                info!("Registered for VoIP push notifications");
                self.registered = Some(request.clone());
                self.status = RegistrationStatus::Registered;
            }
            Err(e) => {
                warn!("Registration failed: {}", e);
                self.status = RegistrationStatus::Failed;
            }
        }
    }

    /// Build an unregister request
    ///
    /// `access_token` overrides the remembered credential. Fails with
    /// `MissingTokens` when either token is unavailable.
    pub fn unregister_request(&self, access_token: Option<String>) -> BridgeResult<RegistrationRequest> {
        let access_token = access_token
            .filter(|t| !t.is_empty())
            .or_else(|| self.access_token.clone())
            .ok_or(BridgeError::MissingTokens)?;
        let device_token = self.device_token.clone().ok_or(BridgeError::MissingTokens)?;
        Ok(RegistrationRequest {
            access_token,
            device_token,
            trigger: RegistrationTrigger::Credential,
        })
    }

    /// Record the outcome of an unregister request
    ///
    /// The cached device token is dropped whatever the outcome, so the next
    /// token the push registry hands out always registers afresh.
    pub fn on_unregister_completed(&mut self, result: &BridgeResult<()>) {
        if let Err(e) = result {
            warn!("Unregistration failed: {}", e);
        }
        self.device_token = None;
        self.registered = None;
        self.in_flight = None;
        self.status = RegistrationStatus::Unregistered;
    }

    fn next_request(&mut self, trigger: RegistrationTrigger) -> Option<RegistrationRequest> {
        let request = RegistrationRequest {
            access_token: self.access_token.clone()?,
            device_token: self.device_token.clone()?,
            trigger,
        };
        let duplicate = [&self.registered, &self.in_flight]
            .into_iter()
            .flatten()
            .any(|known| known.same_tokens(&request));
        if duplicate {
            debug!("Tokens already registered, skipping registration");
            return None;
        }
        self.in_flight = Some(request.clone());
        self.status = RegistrationStatus::Registering;
        Some(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(byte: u8) -> DeviceToken {
        DeviceToken::new(vec![byte; 4])
    }

    fn changed_request(update: DeviceTokenUpdate) -> Option<RegistrationRequest> {
        match update {
            DeviceTokenUpdate::Changed { request } => request,
            DeviceTokenUpdate::Unchanged => panic!("expected a changed token"),
        }
    }

    #[test]
    fn test_credential_without_device_token_does_not_register() {
        let mut manager = PushRegistrationManager::new(None);
        assert!(manager.on_credential_update("jwt".into()).is_none());
        assert_eq!(manager.access_token(), Some("jwt"));
        assert_eq!(manager.status(), RegistrationStatus::Unregistered);
    }

    #[test]
    fn test_credential_with_cached_device_token_registers() {
        let mut manager = PushRegistrationManager::new(Some(token(1)));
        let request = manager.on_credential_update("jwt".into()).unwrap();
        assert_eq!(request.trigger, RegistrationTrigger::Credential);
        assert_eq!(request.device_token, token(1));
        assert_eq!(manager.status(), RegistrationStatus::Registering);
    }

    #[test]
    fn test_unchanged_device_token_never_registers() {
        let mut manager = PushRegistrationManager::new(None);
        manager.remember_credential("jwt".into());

        let request = changed_request(manager.on_device_token_update(token(1))).unwrap();
        manager.on_registration_completed(&request, &Ok(()));

        assert_eq!(manager.on_device_token_update(token(1)), DeviceTokenUpdate::Unchanged);
    }

    #[test]
    fn test_device_token_cached_without_credential() {
        let mut manager = PushRegistrationManager::new(None);
        assert_eq!(changed_request(manager.on_device_token_update(token(2))), None);
        assert_eq!(manager.device_token(), Some(&token(2)));
    }

    #[test]
    fn test_empty_device_token_keeps_cached_one() {
        let mut manager = PushRegistrationManager::new(Some(token(3)));
        manager.remember_credential("jwt".into());

        let update = manager.on_device_token_update(DeviceToken::new(Vec::new()));

        assert_eq!(update, DeviceTokenUpdate::Unchanged);
        assert_eq!(manager.device_token(), Some(&token(3)));
        assert_eq!(manager.status(), RegistrationStatus::Unregistered);
    }

    #[test]
    fn test_same_credential_twice_registers_once() {
        let mut manager = PushRegistrationManager::new(Some(token(1)));
        let request = manager.on_credential_update("jwt".into()).unwrap();

        // Still in flight
        assert!(manager.on_credential_update("jwt".into()).is_none());

        manager.on_registration_completed(&request, &Ok(()));
        assert_eq!(manager.status(), RegistrationStatus::Registered);
        assert!(manager.on_credential_update("jwt".into()).is_none());

        // Rotation registers again
        assert!(manager.on_credential_update("jwt-2".into()).is_some());
    }

    #[test]
    fn test_failed_registration_can_retry() {
        let mut manager = PushRegistrationManager::new(Some(token(1)));
        let request = manager.on_credential_update("jwt".into()).unwrap();
        manager.on_registration_completed(&request, &Err(BridgeError::transport("offline")));

        assert_eq!(manager.status(), RegistrationStatus::Failed);
        assert!(manager.on_credential_update("jwt".into()).is_some());
    }

    #[test]
    fn test_unregister_needs_both_tokens() {
        let manager = PushRegistrationManager::new(None);
        assert_eq!(manager.unregister_request(Some("jwt".into())), Err(BridgeError::MissingTokens));

        let manager = PushRegistrationManager::new(Some(token(3)));
        assert_eq!(manager.unregister_request(None), Err(BridgeError::MissingTokens));
        let request = manager.unregister_request(Some("jwt".into())).unwrap();
        assert_eq!(request.device_token, token(3));
    }

    #[test]
    fn test_unregister_clears_device_token_even_on_failure() {
        let mut manager = PushRegistrationManager::new(Some(token(3)));
        manager.remember_credential("jwt".into());
        manager.on_unregister_completed(&Err(BridgeError::transport("offline")));

        assert_eq!(manager.device_token(), None);
        assert_eq!(manager.status(), RegistrationStatus::Unregistered);
    }
}
