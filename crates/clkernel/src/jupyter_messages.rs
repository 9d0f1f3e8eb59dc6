//
// jupyter_messages.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use clshared::message_content::{
    CompleteRequest, ExecuteRequest, IsCompleteRequest, ShutdownRequest,
};
use serde::de::DeserializeOwned;

use crate::wire_message::WireMessage;

/// The requests the kernel knows how to answer, with their parsed content.
#[derive(Debug)]
pub enum JupyterMsg {
    ExecuteRequest(ExecuteRequest),
    KernelInfoRequest,
    IsCompleteRequest(IsCompleteRequest),
    CompleteRequest(CompleteRequest),
    InspectRequest,
    HistoryRequest,
    CommInfoRequest,
    InterruptRequest,
    ShutdownRequest(ShutdownRequest),

    /// A known request whose content could not be parsed
    Invalid(String),

    /// A request the kernel doesn't implement
    Unsupported,

    /// Anything that isn't a request
    Other,
}

fn parse<T: DeserializeOwned>(
    msg: &WireMessage,
    wrap: impl FnOnce(T) -> JupyterMsg,
) -> JupyterMsg {
    match serde_json::from_value::<T>(msg.content.clone()) {
        Ok(content) => wrap(content),
        Err(err) => JupyterMsg::Invalid(format!(
            "invalid content for '{}': {}",
            msg.header.msg_type, err
        )),
    }
}

/// Convert a WireMessage (generic type) into a JupyterMsg (specific type)
impl From<&WireMessage> for JupyterMsg {
    fn from(msg: &WireMessage) -> Self {
        match msg.header.msg_type.as_str() {
            "execute_request" => parse(msg, JupyterMsg::ExecuteRequest),
            "kernel_info_request" => JupyterMsg::KernelInfoRequest,
            "is_complete_request" => parse(msg, JupyterMsg::IsCompleteRequest),
            "complete_request" => parse(msg, JupyterMsg::CompleteRequest),
            "inspect_request" => JupyterMsg::InspectRequest,
            "history_request" => JupyterMsg::HistoryRequest,
            "comm_info_request" => JupyterMsg::CommInfoRequest,
            "interrupt_request" => JupyterMsg::InterruptRequest,
            "shutdown_request" => parse(msg, JupyterMsg::ShutdownRequest),
            _ if msg.header.is_request() => JupyterMsg::Unsupported,
            _ => JupyterMsg::Other,
        }
    }
}
