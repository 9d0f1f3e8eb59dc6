//
// jupyter_message.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::fmt;

use serde::{Deserialize, Serialize};

/// The version of the Jupyter messaging protocol spoken by the kernel.
pub const PROTOCOL_VERSION: &str = "5.3";

/// The header of a Jupyter message.
///
/// Field names follow the documented wire protocol exactly. Fields other than
/// the message ID and type are optional on inbound messages; any additional
/// fields a client sends are kept in `extra` so that they are echoed verbatim
/// when the header is copied into a reply's parent header.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JupyterMessageHeader {
    /// The message ID; unique per message
    pub msg_id: String,

    /// The type of the message
    pub msg_type: String,

    /// The ID of the session that produced the message
    #[serde(default)]
    pub session: String,

    /// The user who produced the message
    #[serde(default)]
    pub username: String,

    /// The date/time the message was created (ISO 8601)
    #[serde(default)]
    pub date: String,

    /// The version of the Jupyter protocol
    #[serde(default)]
    pub version: String,

    /// Header fields not named above
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JupyterMessageHeader {
    /// Whether the message is a request (`*_request`).
    pub fn is_request(&self) -> bool {
        self.msg_type.to_lowercase().ends_with("_request")
    }

    /// Whether the message is a reply (`*_reply`).
    pub fn is_reply(&self) -> bool {
        self.msg_type.to_lowercase().ends_with("_reply")
    }

    /// The action named by the message type: `execute_request` => `execute`.
    pub fn action(&self) -> String {
        let msg_type = self.msg_type.to_lowercase();
        match msg_type.rfind('_') {
            Some(index) => msg_type[..index].to_string(),
            None => msg_type,
        }
    }

    /// The message type of the reply to this request: `execute_request` =>
    /// `execute_reply`.
    pub fn reply_type(&self) -> String {
        format!("{}_reply", self.action())
    }
}

/// The set of all Jupyter sockets ("channels") over which messages are sent and
/// received.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JupyterChannel {
    /// The shell channel
    Shell,

    /// The control channel
    Control,

    /// The stdin channel
    Stdin,

    /// The iopub channel
    IOPub,

    /// The heartbeat channel
    Heartbeat,
}

impl JupyterChannel {
    /// All channels, in the order the kernel binds them.
    pub const ALL: [JupyterChannel; 5] = [
        JupyterChannel::Heartbeat,
        JupyterChannel::IOPub,
        JupyterChannel::Control,
        JupyterChannel::Stdin,
        JupyterChannel::Shell,
    ];

    /// The name of the port field for this channel in a connection file.
    pub fn port_name(&self) -> &'static str {
        match self {
            JupyterChannel::Shell => "shell_port",
            JupyterChannel::Control => "control_port",
            JupyterChannel::Stdin => "stdin_port",
            JupyterChannel::IOPub => "iopub_port",
            JupyterChannel::Heartbeat => "hb_port",
        }
    }
}

impl fmt::Display for JupyterChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            JupyterChannel::Shell => "shell",
            JupyterChannel::Control => "control",
            JupyterChannel::Stdin => "stdin",
            JupyterChannel::IOPub => "iopub",
            JupyterChannel::Heartbeat => "heartbeat",
        };
        write!(f, "{}", name)
    }
}
