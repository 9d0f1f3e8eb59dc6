//
// message_content.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Content records for the Jupyter messages the kernel reads and writes.
//! Inbound records default every optional field the way the protocol
//! documents; outbound records skip absent fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::kernel_status::ExecutionState;

fn default_true() -> bool {
    true
}

/// The status field carried by every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
    Aborted,
}

/// Content of an `execute_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// The source to execute
    pub code: String,

    /// When true, no output is broadcast and history is not stored
    #[serde(default)]
    pub silent: bool,

    /// Whether the execution counter should be advanced
    #[serde(default = "default_true")]
    pub store_history: bool,

    /// Expressions to evaluate after the code has run
    #[serde(default)]
    pub user_expressions: Map<String, Value>,

    /// Whether the frontend can answer input requests
    #[serde(default)]
    pub allow_stdin: bool,

    /// Whether queued requests should be aborted if this one fails
    #[serde(default = "default_true")]
    pub stop_on_error: bool,
}

impl ExecuteRequest {
    /// Whether this request advances the execution counter.
    pub fn counts(&self) -> bool {
        self.store_history && !self.silent
    }
}

/// Content of an `execute_reply`.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteReply {
    pub status: ReplyStatus,
    pub execution_count: u32,
    pub user_expressions: Option<Map<String, Value>>,
    pub payload: Option<Vec<Value>>,
    pub ename: Option<String>,
    pub evalue: Option<String>,
    pub traceback: Option<Vec<String>>,
}

impl ExecuteReply {
    /// A successful reply.
    pub fn ok(execution_count: u32, user_expressions: Map<String, Value>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            execution_count,
            user_expressions: Some(user_expressions),
            payload: Some(vec![]),
            ename: None,
            evalue: None,
            traceback: None,
        }
    }

    /// A failed reply carrying the error that stopped execution.
    pub fn error(execution_count: u32, error: ErrorContent) -> Self {
        Self {
            status: ReplyStatus::Error,
            execution_count,
            user_expressions: None,
            payload: None,
            ename: Some(error.ename),
            evalue: Some(error.evalue),
            traceback: Some(error.traceback),
        }
    }

    /// The reply for a request that was never run.
    pub fn aborted(execution_count: u32) -> Self {
        Self {
            status: ReplyStatus::Aborted,
            execution_count,
            user_expressions: None,
            payload: None,
            ename: None,
            evalue: None,
            traceback: None,
        }
    }
}

/// An error, as carried by iopub `error` messages and error replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

/// Content of an `is_complete_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsCompleteRequest {
    pub code: String,
}

/// The verdict of a completeness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Complete,
    Incomplete,
    Invalid,
    Unknown,
}

/// Content of an `is_complete_reply`.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsCompleteReply {
    pub status: Completeness,

    /// Indentation for the next line; only sent for incomplete code
    pub indent: Option<String>,
}

/// Content of a `shutdown_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

/// Content of a `shutdown_reply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownReply {
    pub status: ReplyStatus,
    pub restart: bool,
}

/// Content of replies that carry nothing but a status (`interrupt_reply`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: ReplyStatus,
}

/// Content of a `complete_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub cursor_pos: usize,
}

/// Content of a `complete_reply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteReply {
    pub status: ReplyStatus,
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
    pub metadata: Map<String, Value>,
}

/// Content of an `inspect_reply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectReply {
    pub status: ReplyStatus,
    pub found: bool,
    pub data: Map<String, Value>,
    pub metadata: Map<String, Value>,
}

/// Content of a `history_reply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryReply {
    pub status: ReplyStatus,
    pub history: Vec<Value>,
}

/// Content of a `comm_info_reply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommInfoReply {
    pub status: ReplyStatus,
    pub comms: Map<String, Value>,
}

/// The name of an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

/// Content of an iopub `stream` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamContent {
    pub name: StreamName,
    pub text: String,
}

/// Content of an iopub `display_data` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayData {
    pub data: Map<String, Value>,
    pub metadata: Map<String, Value>,
}

/// Content of an iopub `execute_result` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub execution_count: u32,
    pub data: Map<String, Value>,
    pub metadata: Map<String, Value>,
}

/// Content of an iopub `execute_input` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteInput {
    pub code: String,
    pub execution_count: u32,
}

/// Content of an iopub `status` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusContent {
    pub execution_state: ExecutionState,
}
