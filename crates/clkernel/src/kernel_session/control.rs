//
// control.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Control channel requests. The control channel has its own worker, so
//! these are serviced even while a shell request is executing.

use clshared::message_content::{ReplyStatus, StatusReply};

use super::KernelSession;
use crate::error::KernelError;
use crate::jupyter_messages::JupyterMsg;
use crate::wire_message::WireMessage;

impl KernelSession {
    pub(super) async fn handle_control(&self, msg: WireMessage) -> anyhow::Result<()> {
        let (session, accepting) = {
            let state = self.state.lock().await;
            (state.session_id.clone(), state.status.accepts_requests())
        };

        let request = JupyterMsg::from(&msg);
        if let JupyterMsg::Other = request {
            log::debug!(
                "[session {}] Ignoring '{}' on control",
                session,
                msg.header.msg_type
            );
            return Ok(());
        }

        if !accepting {
            let error = KernelError::State(format!(
                "cannot handle '{}'; the kernel is shutting down",
                msg.header.msg_type
            ));
            return self.reply_error(&self.control, &session, &msg, &error);
        }

        match request {
            JupyterMsg::InterruptRequest => self.interrupt(&session, &msg).await,
            JupyterMsg::ShutdownRequest(content) => {
                if content.restart {
                    self.restart(&msg).await
                } else {
                    self.shutdown(&msg).await
                }
            }
            JupyterMsg::KernelInfoRequest => {
                let info = self.kernel_info();
                self.reply(&self.control, &session, &msg, "kernel_info_reply", &info)
            }
            JupyterMsg::Invalid(reason) => self.reply_error(
                &self.control,
                &session,
                &msg,
                &KernelError::Protocol(reason),
            ),
            _ => self.reply_unsupported(&self.control, &session, &msg),
        }
    }

    /// Ask the backend to stop its current evaluation, then acknowledge.
    async fn interrupt(&self, session: &str, msg: &WireMessage) -> anyhow::Result<()> {
        let active = self.state.lock().await.evaluating();
        match active {
            Some(msg_id) => log::info!("[session {}] Interrupting request {}", session, msg_id),
            None => log::info!("[session {}] Interrupt requested while idle", session),
        }
        self.backend.interrupt();

        self.reply(
            &self.control,
            session,
            msg,
            "interrupt_reply",
            &StatusReply {
                status: ReplyStatus::Ok,
            },
        )
    }
}
