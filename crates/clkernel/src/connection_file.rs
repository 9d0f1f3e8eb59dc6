//
// connection_file.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::fs;
use std::path::Path;

use clshared::jupyter_message::JupyterChannel;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::digester::SignatureScheme;
use crate::error::KernelError;

/// Fields every connection file must carry.
const REQUIRED_FIELDS: [&str; 7] = [
    "transport",
    "ip",
    "control_port",
    "shell_port",
    "stdin_port",
    "iopub_port",
    "hb_port",
];

/// The contents of the Connection File as listed in the Jupyter specfication;
/// directly parsed from JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// The transport scheme; `tcp` or `ipc`
    pub transport: String,

    /// The address to bind to
    pub ip: String,

    pub control_port: u16,
    pub shell_port: u16,
    pub stdin_port: u16,
    pub iopub_port: u16,
    pub hb_port: u16,

    /// The name of the HMAC scheme, e.g. `hmac-sha256`; empty disables signing
    #[serde(default)]
    pub signature_scheme: String,

    /// The shared signing key; empty disables signing
    #[serde(default)]
    pub key: String,

    /// The kernel's identifier, if the descriptor (or its file name) names one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_id: Option<String>,
}

impl ConnectionConfig {
    /// Parse the contents of a connection file.
    pub fn parse(descriptor: &str) -> Result<Self, KernelError> {
        let value: serde_json::Value = serde_json::from_str(descriptor)
            .map_err(|e| KernelError::MalformedConnection(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Build a connection config from an already-parsed JSON descriptor.
    pub fn from_value(value: serde_json::Value) -> Result<Self, KernelError> {
        let fields = match value.as_object() {
            Some(fields) => fields,
            None => {
                return Err(KernelError::MalformedConnection(String::from(
                    "descriptor is not a JSON object",
                )))
            }
        };

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .filter(|name| fields.get(**name).map_or(true, |v| v.is_null()))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(KernelError::MalformedConnection(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        }

        let config: ConnectionConfig = serde_json::from_value(value)
            .map_err(|e| KernelError::MalformedConnection(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a connection file. When the descriptor doesn't name a
    /// kernel, the ID is taken from a file named `kernel-<id>.json`.
    pub fn from_file<P: AsRef<Path>>(connection_file: P) -> Result<Self, KernelError> {
        let path = connection_file.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            KernelError::MalformedConnection(format!(
                "unable to read '{}': {}",
                path.display(),
                e
            ))
        })?;
        let mut config = Self::parse(&contents)?;
        if config.kernel_id.is_none() {
            config.kernel_id = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(kernel_id_from_file_name);
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), KernelError> {
        match self.transport.as_str() {
            "tcp" | "ipc" => {}
            other => {
                return Err(KernelError::MalformedConnection(format!(
                    "unsupported transport '{}' (expected 'tcp' or 'ipc')",
                    other
                )))
            }
        }
        if self.ip.trim().is_empty() {
            return Err(KernelError::MalformedConnection(String::from(
                "'ip' must not be empty",
            )));
        }
        if !self.key.is_empty() {
            SignatureScheme::parse(&self.signature_scheme)?;
        }
        Ok(())
    }

    /// The port assigned to a channel.
    pub fn port(&self, channel: JupyterChannel) -> u16 {
        match channel {
            JupyterChannel::Shell => self.shell_port,
            JupyterChannel::Control => self.control_port,
            JupyterChannel::Stdin => self.stdin_port,
            JupyterChannel::IOPub => self.iopub_port,
            JupyterChannel::Heartbeat => self.hb_port,
        }
    }

    /// The address a channel's socket binds to.
    ///
    /// Example: `tcp` on `127.0.0.1`, port 32 => `"tcp://127.0.0.1:32"`; the
    /// `ipc` transport uses the file-path form `"ipc://<ip>-<port>"`.
    pub fn endpoint(&self, channel: JupyterChannel) -> String {
        let port = self.port(channel);
        match self.transport.as_str() {
            "ipc" => format!("ipc://{}-{}", self.ip, port),
            transport => format!("{}://{}:{}", transport, self.ip, port),
        }
    }

    /// Whether messages are signed.
    pub fn signing_enabled(&self) -> bool {
        !self.signature_scheme.is_empty() && !self.key.is_empty()
    }
}

/// Extract the kernel ID from a connection file name such as
/// `kernel-1234.json`.
pub fn kernel_id_from_file_name(name: &str) -> Option<String> {
    let re = Regex::new(r"^(?:kernel-)?(?P<id>[^.]+)\.json$").ok()?;
    re.captures(name)
        .and_then(|caps| caps.name("id"))
        .map(|id| id.as_str().to_string())
}
