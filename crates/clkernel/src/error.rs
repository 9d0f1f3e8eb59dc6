//
// error.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::fmt;

use clshared::message_content::ErrorContent;
use log::error;
use serde_json::json;

/// A failure raised by the execution backend while running or evaluating
/// code. Never fatal to the kernel; it is reported to the requester.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationError {
    /// The name of the error (e.g. `KeyboardInterrupt`)
    pub ename: String,

    /// The error message
    pub evalue: String,

    /// The traceback, one line per entry
    pub traceback: Vec<String>,
}

impl EvaluationError {
    pub fn new(ename: &str, evalue: &str) -> Self {
        Self {
            ename: ename.to_string(),
            evalue: evalue.to_string(),
            traceback: vec![format!("{}: {}", ename, evalue)],
        }
    }
}

impl From<EvaluationError> for ErrorContent {
    fn from(err: EvaluationError) -> Self {
        ErrorContent {
            ename: err.ename,
            evalue: err.evalue,
            traceback: err.traceback,
        }
    }
}

#[derive(Debug)]
pub enum KernelError {
    /// The connection descriptor is missing fields or holds invalid values
    MalformedConnection(String),

    /// An inbound message has bad framing, bad JSON, or a bad signature
    Protocol(String),

    /// A socket could not be bound or used
    Transport { endpoint: String, reason: String },

    /// A request arrived in a state that can't service it
    State(String),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error KE-{}: ", self.code())?;
        match self {
            KernelError::MalformedConnection(reason) => {
                write!(f, "Malformed connection file: {}", reason)
            }
            KernelError::Protocol(reason) => {
                write!(f, "Protocol error: {}", reason)
            }
            KernelError::Transport { endpoint, reason } => {
                write!(f, "Transport error on {}: {}", endpoint, reason)
            }
            KernelError::State(reason) => {
                write!(f, "Invalid kernel state: {}", reason)
            }
        }
    }
}

impl std::error::Error for KernelError {}

impl KernelError {
    pub fn code(&self) -> u8 {
        match self {
            KernelError::MalformedConnection(_) => 0,
            KernelError::Protocol(_) => 1,
            KernelError::Transport { .. } => 2,
            KernelError::State(_) => 3,
        }
    }

    /// The name reported as `ename` when this error is sent to a client.
    pub fn ename(&self) -> String {
        match self {
            KernelError::MalformedConnection(_) => String::from("MalformedConnection"),
            KernelError::Protocol(_) => String::from("ProtocolError"),
            KernelError::Transport { .. } => String::from("TransportError"),
            KernelError::State(_) => String::from("StateError"),
        }
    }

    /// Convert the error into the content of an error reply.
    pub fn to_content(&self) -> serde_json::Value {
        json!({
            "status": "error",
            "ename": self.ename(),
            "evalue": self.to_string(),
            "traceback": [self.to_string()],
        })
    }

    pub fn log(&self) {
        error!("{}", self.to_string());
    }
}
