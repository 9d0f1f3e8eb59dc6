//
// lifecycle.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Kernel lifecycle management (restart, shutdown).

use clshared::jupyter_message::JupyterMessageHeader;
use clshared::kernel_status::{ExecutionState, KernelStatus};
use clshared::message_content::{ReplyStatus, ShutdownReply};
use tokio::time::{timeout, Instant};

use super::{make_session_id, KernelSession};
use crate::error::KernelError;
use crate::wire_message::WireMessage;

impl KernelSession {
    /// Restart the kernel: stop whatever is running, rebuild the backend and
    /// begin a new session with the execution count back at 1. The channels
    /// stay bound.
    ///
    /// Returns the new session ID.
    pub async fn restart_kernel(
        &self,
        parent: Option<&JupyterMessageHeader>,
    ) -> Result<String, KernelError> {
        let old_session = {
            let mut state = self.state.lock().await;
            match state.status {
                KernelStatus::Restarting => {
                    return Err(KernelError::State(String::from(
                        "the kernel is already restarting",
                    )))
                }
                KernelStatus::ShuttingDown | KernelStatus::Stopped => {
                    return Err(KernelError::State(String::from(
                        "the kernel is shutting down",
                    )))
                }
                _ => {}
            }
            state.set_status(KernelStatus::Restarting, Some(String::from("restart requested")));
            state.set_running(false);
            state.session_id.clone()
        };

        self.settle_evaluation(&old_session).await;
        let rebuilt = self.backend.restart().await;

        let mut state = self.state.lock().await;
        if let Err(err) = rebuilt {
            log::error!("[session {}] Backend failed to restart: {}", old_session, err);
            state.set_running(true);
            state.set_status(KernelStatus::Idle, Some(String::from("restart failed")));
            return Err(KernelError::State(format!("restart failed: {}", err)));
        }

        let session = make_session_id();
        state.reset_session(session.clone());
        state.set_running(true);

        self.iopub
            .status(&session, parent, ExecutionState::Starting);
        self.iopub.status(&session, parent, ExecutionState::Idle);

        let status = if state.execution_queue.is_empty() {
            KernelStatus::Idle
        } else {
            KernelStatus::Busy
        };
        state.set_status(status, Some(String::from("restarted")));
        Ok(session)
    }

    /// Interrupt the evaluation in flight, if any, and wait for it to unwind.
    /// The interrupt is repeated each poll interval, in case it landed before
    /// the backend started; after the shutdown grace period the wait is
    /// abandoned.
    async fn settle_evaluation(&self, session: &str) {
        let mut evaluating = self.state.lock().await.watch_evaluation();
        let deadline = Instant::now() + self.options.shutdown_grace;
        loop {
            self.backend.interrupt();
            let settled = timeout(
                self.options.poll_interval,
                evaluating.wait_for(|active| active.is_none()),
            )
            .await
            .is_ok();
            if settled {
                return;
            }
            if Instant::now() >= deadline {
                let active = self.state.lock().await.evaluating().unwrap_or_default();
                log::warn!(
                    "[session {}] Evaluation of {} did not stop within {:?}; restarting anyway",
                    session,
                    active,
                    self.options.shutdown_grace
                );
                return;
            }
        }
    }

    /// Handle `shutdown_request` with `restart: true`.
    pub(super) async fn restart(&self, msg: &WireMessage) -> anyhow::Result<()> {
        let old_session = self.session_id().await;
        match self.restart_kernel(Some(&msg.header)).await {
            Ok(session) => {
                let reply = ShutdownReply {
                    status: ReplyStatus::Ok,
                    restart: true,
                };
                self.reply(&self.control, &session, msg, "shutdown_reply", &reply)?;
                self.iopub
                    .publish(&session, Some(&msg.header), "shutdown_reply", &reply);
                log::info!(
                    "[session {}] Restarted as session {}",
                    old_session,
                    session
                );
                Ok(())
            }
            Err(err) => self.reply_error(&self.control, &old_session, msg, &err),
        }
    }

    /// Handle `shutdown_request` without restart: acknowledge, then tear
    /// everything down.
    pub(super) async fn shutdown(&self, msg: &WireMessage) -> anyhow::Result<()> {
        let session = {
            let mut state = self.state.lock().await;
            state.set_status(
                KernelStatus::ShuttingDown,
                Some(String::from("shutdown requested")),
            );
            state.set_running(false);
            state.session_id.clone()
        };

        self.backend.interrupt();

        let reply = ShutdownReply {
            status: ReplyStatus::Ok,
            restart: false,
        };
        self.reply(&self.control, &session, msg, "shutdown_reply", &reply)?;
        self.iopub
            .publish(&session, Some(&msg.header), "shutdown_reply", &reply);

        self.stop().await;
        Ok(())
    }

    /// Shut the backend down and signal every channel worker to stop.
    pub async fn stop(&self) {
        let session = self.session_id().await;
        log::info!("[session {}] Shutting down", session);
        self.backend.shutdown().await;
        self.shutdown.trigger();
    }

    /// Shut down without a client request (e.g. on Ctrl-C). Anything still
    /// running is interrupted.
    pub async fn stop_unrequested(&self) {
        {
            let mut state = self.state.lock().await;
            if matches!(
                state.status,
                KernelStatus::ShuttingDown | KernelStatus::Stopped
            ) {
                return;
            }
            state.set_status(KernelStatus::ShuttingDown, Some(String::from("stopped")));
            state.set_running(false);
        }
        self.backend.interrupt();
        self.stop().await;
    }
}
