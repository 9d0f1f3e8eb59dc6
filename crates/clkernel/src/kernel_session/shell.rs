//
// shell.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Shell channel requests. Queries are answered on the spot; execute
//! requests are queued for the executor.

use clshared::message_content::{
    CommInfoReply, CompleteReply, HistoryReply, InspectReply, ReplyStatus,
};
use serde_json::{json, Map};

use super::KernelSession;
use crate::dispatcher::ChannelSender;
use crate::error::KernelError;
use crate::jupyter_messages::JupyterMsg;
use crate::wire_message::WireMessage;

impl KernelSession {
    pub(super) async fn handle_shell(&self, msg: WireMessage) -> anyhow::Result<()> {
        let (session, accepting) = {
            let state = self.state.lock().await;
            (state.session_id.clone(), state.status.accepts_requests())
        };

        let request = JupyterMsg::from(&msg);
        if let JupyterMsg::Other = request {
            log::debug!(
                "[session {}] Ignoring '{}' on shell",
                session,
                msg.header.msg_type
            );
            return Ok(());
        }

        if !accepting {
            let error = KernelError::State(String::from("the kernel is shutting down"));
            return self.reply_error(&self.shell, &session, &msg, &error);
        }

        match request {
            JupyterMsg::ExecuteRequest(_) => self.enqueue_execution(msg).await,
            JupyterMsg::KernelInfoRequest => {
                let info = self.kernel_info();
                self.reply(&self.shell, &session, &msg, "kernel_info_reply", &info)
            }
            JupyterMsg::IsCompleteRequest(content) => {
                let verdict = self.backend.is_complete(&content.code);
                self.reply(&self.shell, &session, &msg, "is_complete_reply", &verdict)
            }
            JupyterMsg::CompleteRequest(content) => {
                let reply = CompleteReply {
                    status: ReplyStatus::Ok,
                    matches: vec![],
                    cursor_start: content.cursor_pos,
                    cursor_end: content.cursor_pos,
                    metadata: Map::new(),
                };
                self.reply(&self.shell, &session, &msg, "complete_reply", &reply)
            }
            JupyterMsg::InspectRequest => {
                let reply = InspectReply {
                    status: ReplyStatus::Ok,
                    found: false,
                    data: Map::new(),
                    metadata: Map::new(),
                };
                self.reply(&self.shell, &session, &msg, "inspect_reply", &reply)
            }
            JupyterMsg::HistoryRequest => {
                let reply = HistoryReply {
                    status: ReplyStatus::Ok,
                    history: vec![],
                };
                self.reply(&self.shell, &session, &msg, "history_reply", &reply)
            }
            JupyterMsg::CommInfoRequest => {
                let reply = CommInfoReply {
                    status: ReplyStatus::Ok,
                    comms: Map::new(),
                };
                self.reply(&self.shell, &session, &msg, "comm_info_reply", &reply)
            }
            JupyterMsg::Invalid(reason) => {
                self.reply_error(&self.shell, &session, &msg, &KernelError::Protocol(reason))
            }
            JupyterMsg::InterruptRequest
            | JupyterMsg::ShutdownRequest(_)
            | JupyterMsg::Unsupported => self.reply_unsupported(&self.shell, &session, &msg),
            JupyterMsg::Other => Ok(()),
        }
    }

    /// Hand an `execute_request` to the executor, or queue it behind the
    /// one in flight.
    async fn enqueue_execution(&self, msg: WireMessage) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.execution_queue.process_request(msg.clone()) {
            self.executor_tx
                .try_send(msg)
                .map_err(|e| anyhow::anyhow!("Cannot start execution: {}", e))?;
        }
        Ok(())
    }

    /// Answer a request the kernel doesn't implement on this channel.
    pub(super) fn reply_unsupported(
        &self,
        sender: &ChannelSender,
        session: &str,
        msg: &WireMessage,
    ) -> anyhow::Result<()> {
        log::info!(
            "[session {}] Unsupported request '{}' on {}",
            session,
            msg.header.msg_type,
            sender.channel()
        );
        let content = json!({
            "status": "error",
            "ename": "UnsupportedRequest",
            "evalue": format!(
                "'{}' is not supported on the {} channel",
                msg.header.msg_type,
                sender.channel()
            ),
            "traceback": [],
        });
        self.reply(sender, session, msg, &msg.header.reply_type(), &content)
    }
}
