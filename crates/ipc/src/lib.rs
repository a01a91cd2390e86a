//! notifyd IPC Protocol
//!
//! Shared types for daemon-client communication over a Unix domain socket.
//!
//! The protocol is line-delimited JSON. A client writes one [`IpcCommand`]
//! per line and the daemon answers each with one [`IpcResponse`] line. The
//! connection is the client's session: signals for notifications it created
//! arrive on the same stream as [`IpcSignal`] lines, interleaved with
//! responses. Responses carry a `status` tag and signals a `signal` tag.

use notifyd_core::{CloseReason, HintValue, NotificationId, NotifyRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Socket file name inside the runtime directory.
pub const SOCKET_NAME: &str = "notifyd.sock";

/// Maximum accepted size of a single IPC line.
pub const MAX_IPC_MESSAGE_SIZE: usize = 1024 * 1024;

/// Server identity reported by `get_server_information`.
pub const SERVER_NAME: &str = "notifyd";
pub const SERVER_VENDOR: &str = "notifyd";
pub const PROTOCOL_VERSION: &str = "1.2";

/// Features advertised to clients.
pub const CAPABILITIES: &[&str] = &[
    "actions",
    "action-icons",
    "body",
    "body-hyperlinks",
    "body-markup",
    "icon-static",
    "sound",
];

/// Path of the daemon socket.
///
/// `$XDG_RUNTIME_DIR/notifyd.sock`, or the system temp dir when the runtime
/// dir is not set.
pub fn socket_path() -> PathBuf {
    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    dir.join(SOCKET_NAME)
}

/// Commands a client can send to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Show a notification, or replace the live one named by `replaces_id`.
    Notify {
        #[serde(default)]
        app_name: String,
        /// 0 for a new notification.
        #[serde(default)]
        replaces_id: NotificationId,
        /// Icon name, absolute path or `file://` URI.
        #[serde(default)]
        icon: String,
        summary: String,
        #[serde(default)]
        body: String,
        /// Flat `[key, label, key, label, ...]` list.
        #[serde(default)]
        actions: Vec<String>,
        #[serde(default)]
        hints: HashMap<String, HintValue>,
        /// Milliseconds; 0 never expires, negative uses the server default.
        #[serde(default = "default_timeout_ms")]
        timeout_ms: i32,
    },
    /// Close a live notification.
    CloseNotification { id: NotificationId },
    /// List the supported features.
    GetCapabilities,
    /// Report the server identity.
    GetServerInformation,
    /// Query live notifications and stack state.
    Status,
    /// Receive signals for every notification, not only this session's.
    Subscribe,
    /// Reload configuration from file.
    Reload,
    /// Stop the daemon.
    Stop,
}

fn default_timeout_ms() -> i32 {
    -1
}

impl IpcCommand {
    /// The engine request carried by a `notify` command, attributed to `sender`.
    pub fn into_notify_request(self, sender: &str) -> Option<NotifyRequest> {
        match self {
            IpcCommand::Notify {
                app_name,
                replaces_id,
                icon,
                summary,
                body,
                actions,
                hints,
                timeout_ms,
            } => Some(NotifyRequest {
                sender: sender.to_string(),
                app_name,
                replaces_id,
                icon,
                summary,
                body,
                actions,
                hints,
                timeout_ms,
            }),
            _ => None,
        }
    }
}

/// Responses from the daemon to a client command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Command executed successfully.
    Ok,
    /// Command failed with an error.
    Error {
        /// Error message describing what went wrong.
        message: String,
    },
    /// A notification was shown or replaced.
    Notification { id: NotificationId },
    Capabilities { capabilities: Vec<String> },
    ServerInformation {
        name: String,
        vendor: String,
        version: String,
        spec_version: String,
    },
    /// Daemon state.
    Status {
        /// Live notification ids, ascending.
        ids: Vec<NotificationId>,
        /// Number of monitor stacks.
        stacks: usize,
        /// Corner identifier, e.g. `bottom_right`.
        location: String,
        /// Seconds since the daemon started.
        uptime_secs: u64,
    },
}

impl IpcResponse {
    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn capabilities() -> Self {
        Self::Capabilities {
            capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn server_information() -> Self {
        Self::ServerInformation {
            name: SERVER_NAME.to_string(),
            vendor: SERVER_VENDOR.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            spec_version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Signals pushed to the session that created a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum IpcSignal {
    ActionInvoked {
        id: NotificationId,
        action_key: String,
    },
    NotificationClosed {
        id: NotificationId,
        reason: CloseReason,
    },
}

/// Anything the daemon may write to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IpcMessage {
    Response(IpcResponse),
    Signal(IpcSignal),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IPC message exceeds the maximum size")]
    TooLarge,
    #[error("Empty IPC message")]
    Empty,
    #[error("Invalid IPC message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse one protocol line (trailing newline allowed).
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    if line.len() > MAX_IPC_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge);
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Serialize a value as one protocol line, newline included.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_minimal_uses_defaults() {
        let cmd: IpcCommand =
            decode_line(r#"{"type":"notify","summary":"Build finished"}"#).unwrap();
        match cmd {
            IpcCommand::Notify {
                summary,
                replaces_id,
                timeout_ms,
                actions,
                hints,
                ..
            } => {
                assert_eq!(summary, "Build finished");
                assert_eq!(replaces_id, 0);
                assert_eq!(timeout_ms, -1);
                assert!(actions.is_empty());
                assert!(hints.is_empty());
            }
            other => panic!("Expected Notify, got {:?}", other),
        }
    }

    #[test]
    fn test_notify_with_hints() {
        let line = r#"{"type":"notify","summary":"s","hints":{
            "window-xid":{"type":"uint","value":4194307},
            "x":{"type":"int","value":-20},
            "suppress-sound":{"type":"bool","value":true},
            "sound-file":{"type":"string","value":"/tmp/a.wav"}
        }}"#;
        let cmd: IpcCommand = decode_line(line).unwrap();
        let IpcCommand::Notify { hints, .. } = cmd else {
            panic!("Expected Notify");
        };
        assert_eq!(hints["window-xid"], HintValue::UInt(4194307));
        assert_eq!(hints["x"], HintValue::Int(-20));
        assert_eq!(hints["suppress-sound"], HintValue::Bool(true));
        assert_eq!(hints["sound-file"], HintValue::Str("/tmp/a.wav".into()));
    }

    #[test]
    fn test_into_notify_request() {
        let cmd: IpcCommand = decode_line(
            r#"{"type":"notify","app_name":"make","summary":"done","replaces_id":4,"timeout_ms":0}"#,
        )
        .unwrap();
        let req = cmd.into_notify_request(":client-3").unwrap();
        assert_eq!(req.sender, ":client-3");
        assert_eq!(req.app_name, "make");
        assert_eq!(req.replaces_id, 4);
        assert_eq!(req.timeout_ms, 0);

        assert!(IpcCommand::Status.into_notify_request(":client-3").is_none());
    }

    #[test]
    fn test_close_command_serialization() {
        let cmd = IpcCommand::CloseNotification { id: 7 };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"type":"close_notification","id":7}"#);
    }

    #[test]
    fn test_response_serialization() {
        let json = serde_json::to_string(&IpcResponse::Notification { id: 3 }).unwrap();
        assert_eq!(json, r#"{"status":"notification","id":3}"#);

        let resp: IpcResponse = decode_line(r#"{"status":"ok"}"#).unwrap();
        assert_eq!(resp, IpcResponse::Ok);
    }

    #[test]
    fn test_error_response() {
        let resp = IpcResponse::error("Exceeded maximum number of notifications");
        if let IpcResponse::Error { message } = resp {
            assert_eq!(message, "Exceeded maximum number of notifications");
        } else {
            panic!("Expected Error response");
        }
    }

    #[test]
    fn test_capabilities() {
        let IpcResponse::Capabilities { capabilities } = IpcResponse::capabilities() else {
            panic!("Expected Capabilities");
        };
        assert!(capabilities.contains(&"actions".to_string()));
        assert!(capabilities.contains(&"sound".to_string()));
        assert_eq!(capabilities.len(), CAPABILITIES.len());
    }

    #[test]
    fn test_server_information() {
        let IpcResponse::ServerInformation {
            name, spec_version, ..
        } = IpcResponse::server_information()
        else {
            panic!("Expected ServerInformation");
        };
        assert_eq!(name, "notifyd");
        assert_eq!(spec_version, "1.2");
    }

    #[test]
    fn test_signal_wire_shape() {
        let signal = IpcSignal::NotificationClosed {
            id: 4,
            reason: CloseReason::Dismissed,
        };
        let json = serde_json::to_string(&signal).unwrap();
        assert_eq!(
            json,
            r#"{"signal":"notification_closed","id":4,"reason":"dismissed"}"#
        );
    }

    #[test]
    fn test_message_distinguishes_signal_from_response() {
        let msg: IpcMessage =
            decode_line(r#"{"signal":"action_invoked","id":2,"action_key":"default"}"#).unwrap();
        assert_eq!(
            msg,
            IpcMessage::Signal(IpcSignal::ActionInvoked {
                id: 2,
                action_key: "default".into()
            })
        );

        let msg: IpcMessage = decode_line(r#"{"status":"notification","id":2}"#).unwrap();
        assert_eq!(msg, IpcMessage::Response(IpcResponse::Notification { id: 2 }));
    }

    #[test]
    fn test_encode_line_appends_newline() {
        let line = encode_line(&IpcCommand::Status).unwrap();
        assert_eq!(line, "{\"type\":\"status\"}\n");
        let parsed: IpcCommand = decode_line(&line).unwrap();
        assert_eq!(parsed, IpcCommand::Status);
    }

    #[test]
    fn test_invalid_json_handling() {
        assert!(matches!(
            decode_line::<IpcCommand>("not valid json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(decode_line::<IpcCommand>(r#"{"type": "unknown_command"}"#).is_err());
        assert!(matches!(
            decode_line::<IpcCommand>("   \n"),
            Err(ProtocolError::Empty)
        ));
        let huge = "x".repeat(MAX_IPC_MESSAGE_SIZE + 1);
        assert!(matches!(
            decode_line::<IpcCommand>(&huge),
            Err(ProtocolError::TooLarge)
        ));
    }

    #[test]
    fn test_unit_commands() {
        for (cmd, tag) in [
            (IpcCommand::GetCapabilities, "get_capabilities"),
            (IpcCommand::GetServerInformation, "get_server_information"),
            (IpcCommand::Subscribe, "subscribe"),
            (IpcCommand::Reload, "reload"),
            (IpcCommand::Stop, "stop"),
        ] {
            let json = serde_json::to_string(&cmd).unwrap();
            assert_eq!(json, format!(r#"{{"type":"{}"}}"#, tag));
        }
    }

    #[test]
    fn test_socket_path_name() {
        assert!(socket_path().ends_with(SOCKET_NAME));
    }
}
