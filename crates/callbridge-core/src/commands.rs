//! Host command surface
//!
//! The host invokes commands by method name with a JSON object of arguments.
//! [`CommandDispatcher::parse`] validates the arguments on the caller's side,
//! so a malformed command fails with `MissingArgument` before it reaches the
//! coordinator. Parsed [`Command`]s are then executed in order by the
//! coordinator.
//!
//! # Methods
//!
//! | Method | Arguments | Reply |
//! |--------|-----------|-------|
//! | `tokens` | `accessToken` | done |
//! | `makeCall` | `To`, `From`, `accessToken`?, extra params | done |
//! | `muteCall` | `muted`? | done |
//! | `toggleSpeaker` | `speakerIsOn` | done |
//! | `isOnCall` | | flag |
//! | `sendDigits` | `digits` | done |
//! | `holdCall` | `onHold`? | done |
//! | `answer` | | done |
//! | `unregister` | `accessToken`? | done |
//! | `hangUp` | | done |
//! | `registerClient` | `id`, `name` | done |
//! | `unregisterClient` | `id` | done |
//! | `defaultCaller` | `defaultCaller` | done |
//! | `callerIdCustomParameterKey` | `key` | done |
//! | `hasMicPermission` | | flag |
//! | `requestMicPermission` | | flag |
//!
//! # Usage Examples
//!
//! ```rust
//! use callbridge_core::commands::{Command, CommandDispatcher};
//! use serde_json::json;
//!
//! let dispatcher = CommandDispatcher::new(false);
//! let command = dispatcher
//!     .parse("makeCall", &json!({ "To": "+15551234", "From": "alice", "region": "us1" }))
//!     .unwrap();
//!
//! match command {
//!     Command::MakeCall { to, params, .. } => {
//!         assert_eq!(to, "+15551234");
//!         assert_eq!(params.get("region").map(String::as_str), Some("us1"));
//!     }
//!     other => panic!("unexpected command {:?}", other),
//! }
//!
//! assert!(dispatcher.parse("sendDigits", &json!({})).is_err());
//! ```

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::debug;

use crate::coordinator::BridgeCoordinator;
use crate::error::{BridgeError, BridgeResult};
use crate::events::LogLevel;

/// A validated host command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Supply the access token used for registration and calls
    Tokens { access_token: String },
    /// Place an outgoing call
    MakeCall {
        to: String,
        from: String,
        access_token: Option<String>,
        params: BTreeMap<String, String>,
    },
    /// Mute, unmute, or toggle when `muted` is absent
    MuteCall { muted: Option<bool> },
    /// Route audio to the loudspeaker or the earpiece
    ToggleSpeaker { speaker_on: bool },
    /// Whether a call is active
    IsOnCall,
    /// Play DTMF digits
    SendDigits { digits: String },
    /// Hold, resume, or toggle when `on_hold` is absent
    HoldCall { on_hold: Option<bool> },
    /// Answering happens through the native call UI; accepted and ignored
    Answer,
    /// Stop receiving incoming call pushes
    Unregister { access_token: Option<String> },
    /// End the active call or decline the pending invite
    HangUp,
    /// Map a client id to a display name
    RegisterClient { id: String, name: String },
    /// Forget a client id
    UnregisterClient { id: String },
    /// Set the fallback caller name
    DefaultCaller { name: String },
    /// Set the invite parameter carrying the caller display name
    CallerIdParameterKey { key: String },
    HasMicPermission,
    RequestMicPermission,
    /// A method this bridge does not know, ignored in lenient mode
    Ignored { method: String },
}

/// What a command returns to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandReply {
    Done,
    Flag(bool),
}

impl CommandReply {
    /// The boolean a flag reply carries; `Done` counts as success
    pub fn as_bool(&self) -> bool {
        match self {
            CommandReply::Done => true,
            CommandReply::Flag(flag) => *flag,
        }
    }
}

/// Parses method calls into [`Command`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDispatcher {
    strict: bool,
}

impl CommandDispatcher {
    /// `strict` makes unknown methods fail with `UnknownCommand`
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn parse(&self, method: &str, args: &Value) -> BridgeResult<Command> {
        let args = Arguments::new(args);
        let command = match method {
            "tokens" => Command::Tokens {
                access_token: args.required_str("accessToken")?,
            },
            "makeCall" => Command::MakeCall {
                to: args.required_str("To")?,
                from: args.required_str("From")?,
                access_token: args.optional_str("accessToken"),
                params: args.params_except(&["To", "From"]),
            },
            "muteCall" => Command::MuteCall {
                muted: args.optional_bool("muted"),
            },
            "toggleSpeaker" => Command::ToggleSpeaker {
                speaker_on: args.required_bool("speakerIsOn")?,
            },
            "isOnCall" => Command::IsOnCall,
            "sendDigits" => Command::SendDigits {
                digits: args.required_str("digits")?,
            },
            "holdCall" => Command::HoldCall {
                on_hold: args.optional_bool("onHold"),
            },
            "answer" => Command::Answer,
            "unregister" => Command::Unregister {
                access_token: args.optional_str("accessToken"),
            },
            "hangUp" => Command::HangUp,
            "registerClient" => Command::RegisterClient {
                id: args.required_str("id")?,
                name: args.required_str("name")?,
            },
            "unregisterClient" => Command::UnregisterClient {
                id: args.required_str("id")?,
            },
            "defaultCaller" => Command::DefaultCaller {
                name: args.required_str("defaultCaller")?,
            },
            "callerIdCustomParameterKey" => Command::CallerIdParameterKey {
                key: args.required_str("key")?,
            },
            "hasMicPermission" => Command::HasMicPermission,
            "requestMicPermission" => Command::RequestMicPermission,
            other if self.strict => {
                return Err(BridgeError::UnknownCommand {
                    method: other.to_string(),
                });
            }
            other => Command::Ignored {
                method: other.to_string(),
            },
        };
        Ok(command)
    }
}

/// Typed access to a command's JSON arguments
struct Arguments<'a> {
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Arguments<'a> {
    fn new(value: &'a Value) -> Self {
        Self {
            map: value.as_object(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.and_then(|m| m.get(key))
    }

    fn required_str(&self, key: &str) -> BridgeResult<String> {
        self.optional_str(key)
            .ok_or_else(|| BridgeError::missing_argument(key))
    }

    fn optional_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn required_bool(&self, key: &str) -> BridgeResult<bool> {
        self.optional_bool(key)
            .ok_or_else(|| BridgeError::missing_argument(key))
    }

    fn optional_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Every argument but `excluded`, rendered as strings
    fn params_except(&self, excluded: &[&str]) -> BTreeMap<String, String> {
        self.map
            .into_iter()
            .flatten()
            .filter(|(key, _)| !excluded.contains(&key.as_str()))
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect()
    }
}

// ===== COORDINATOR EXECUTION =====

impl BridgeCoordinator {
    pub(crate) async fn handle_command(
        &mut self,
        command: Command,
        reply: oneshot::Sender<BridgeResult<CommandReply>>,
    ) {
        // The permission prompt can take as long as the user likes
        if command == Command::RequestMicPermission {
            let microphone = self.caps.microphone.clone();
            tokio::spawn(async move {
                let granted = microphone.ensure().await;
                let _ = reply.send(Ok(CommandReply::Flag(granted)));
            });
            return;
        }

        let result = self.execute(command).await;
        if let Err(e) = &result {
            debug!("Command failed: {}", e);
        }
        let _ = reply.send(result);
    }

    async fn execute(&mut self, command: Command) -> BridgeResult<CommandReply> {
        match command {
            Command::Tokens { access_token } => {
                if let Some(request) = self.registration.on_credential_update(access_token) {
                    self.spawn_registration(request);
                }
            }
            Command::MakeCall {
                to,
                from,
                access_token,
                params,
            } => self.make_call(to, from, access_token, params)?,
            Command::MuteCall { muted } => self.set_muted(muted).await?,
            Command::ToggleSpeaker { speaker_on } => self.toggle_speaker(speaker_on),
            Command::IsOnCall => return Ok(CommandReply::Flag(self.state.is_on_call())),
            Command::SendDigits { digits } => {
                let call_id = self.state.active_mut()?.id;
                self.caps.transport.send_digits(call_id, &digits).await?;
            }
            Command::HoldCall { on_hold } => self.set_held(on_hold).await?,
            Command::Answer => debug!("Answer is performed through the native call UI"),
            Command::Unregister { access_token } => self.start_unregister(access_token)?,
            Command::HangUp => self.hang_up(),
            Command::RegisterClient { id, name } => self.directory.register_client(&id, &name)?,
            Command::UnregisterClient { id } => self.directory.unregister_client(&id)?,
            Command::DefaultCaller { name } => self.directory.set_default_caller(&name)?,
            Command::CallerIdParameterKey { key } => {
                debug!("Caller id parameter key set to {}", key);
                self.caller_id_key = key;
            }
            Command::HasMicPermission => {
                let status = self.caps.microphone.status().await;
                return Ok(CommandReply::Flag(
                    status == crate::capabilities::PermissionStatus::Granted,
                ));
            }
            Command::RequestMicPermission => {
                return Ok(CommandReply::Flag(self.caps.microphone.ensure().await));
            }
            Command::Ignored { method } => {
                self.events
                    .log(LogLevel::Debug, format!("Ignoring unknown command {}", method));
            }
        }
        Ok(CommandReply::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_make_call_extra_params() {
        let command = CommandDispatcher::new(false)
            .parse(
                "makeCall",
                &json!({ "To": "+15551234", "From": "alice", "accessToken": "jwt", "priority": 2 }),
            )
            .unwrap();

        let mut params = BTreeMap::new();
        params.insert("accessToken".to_string(), "jwt".to_string());
        params.insert("priority".to_string(), "2".to_string());
        assert_eq!(
            command,
            Command::MakeCall {
                to: "+15551234".into(),
                from: "alice".into(),
                access_token: Some("jwt".into()),
                params,
            }
        );
    }

    #[test]
    fn test_missing_arguments() {
        let dispatcher = CommandDispatcher::new(false);
        assert_eq!(
            dispatcher.parse("makeCall", &json!({ "To": "+1" })),
            Err(BridgeError::missing_argument("From"))
        );
        assert_eq!(
            dispatcher.parse("registerClient", &json!({ "id": "42" })),
            Err(BridgeError::missing_argument("name"))
        );
        assert_eq!(
            dispatcher.parse("toggleSpeaker", &json!({ "speakerIsOn": "yes" })),
            Err(BridgeError::missing_argument("speakerIsOn"))
        );
        // Arguments that are not an object count as empty
        assert_eq!(
            dispatcher.parse("tokens", &Value::Null),
            Err(BridgeError::missing_argument("accessToken"))
        );
    }

    #[test]
    fn test_unknown_methods() {
        assert_eq!(
            CommandDispatcher::new(false).parse("receiveCalls", &json!({})),
            Ok(Command::Ignored {
                method: "receiveCalls".into()
            })
        );
        assert_eq!(
            CommandDispatcher::new(true).parse("receiveCalls", &json!({})),
            Err(BridgeError::UnknownCommand {
                method: "receiveCalls".into()
            })
        );
    }

    #[test]
    fn test_optional_toggles() {
        let dispatcher = CommandDispatcher::new(false);
        assert_eq!(
            dispatcher.parse("muteCall", &Value::Null),
            Ok(Command::MuteCall { muted: None })
        );
        assert_eq!(
            dispatcher.parse("holdCall", &json!({ "onHold": true })),
            Ok(Command::HoldCall { on_hold: Some(true) })
        );
    }

    #[test]
    fn test_reply_flag() {
        assert!(CommandReply::Done.as_bool());
        assert!(!CommandReply::Flag(false).as_bool());
    }
}
