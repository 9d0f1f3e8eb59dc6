//
// iopub.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Publishing on the iopub channel.

use clshared::jupyter_message::JupyterMessageHeader;
use clshared::kernel_status::ExecutionState;
use clshared::message_content::StatusContent;
use serde::Serialize;

use crate::dispatcher::ChannelSender;
use crate::wire_message::WireMessage;

/// Builds and queues iopub broadcasts. Every message is sent with the topic
/// `kernel.<kernel id>.<message type>`.
#[derive(Clone)]
pub struct IOPubPublisher {
    sender: ChannelSender,
    kernel_id: String,
    username: String,
}

impl IOPubPublisher {
    pub fn new(sender: ChannelSender, kernel_id: String, username: String) -> Self {
        Self {
            sender,
            kernel_id,
            username,
        }
    }

    pub fn topic(&self, msg_type: &str) -> String {
        format!("kernel.{}.{}", self.kernel_id, msg_type)
    }

    /// Publish a message.
    pub fn publish<T: Serialize>(
        &self,
        session: &str,
        parent: Option<&JupyterMessageHeader>,
        msg_type: &str,
        content: &T,
    ) {
        let content = match serde_json::to_value(content) {
            Ok(content) => content,
            Err(err) => {
                log::error!(
                    "[session {}] Cannot serialize '{}' content: {}",
                    session,
                    msg_type,
                    err
                );
                return;
            }
        };
        let msg = WireMessage::broadcast(
            &self.topic(msg_type),
            parent,
            msg_type,
            session,
            &self.username,
            content,
        );
        if let Err(err) = self.sender.send(msg) {
            log::error!("[session {}] {}", session, err);
        }
    }

    /// Publish the kernel's execution state.
    pub fn status(
        &self,
        session: &str,
        parent: Option<&JupyterMessageHeader>,
        execution_state: ExecutionState,
    ) {
        log::trace!(
            "[session {}] Publishing status {:?}",
            session,
            execution_state
        );
        self.publish(session, parent, "status", &StatusContent { execution_state });
    }
}
