//
// mod.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! The kernel session: the state machine behind the shell, control and
//! stdin channels.

mod control;
mod executor;
mod iopub;
mod lifecycle;
mod shell;

use std::sync::Arc;

use async_channel::Receiver;
use async_trait::async_trait;
use clshared::jupyter_message::{JupyterChannel, PROTOCOL_VERSION};
use clshared::kernel_info::KernelInfoReply;
use clshared::kernel_status::{ExecutionState, KernelStatus};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::backend::ExecutionBackend;
use crate::dispatcher::{ChannelHandler, ChannelSender, ShutdownSignal};
use crate::error::KernelError;
use crate::kernel_options::KernelOptions;
use crate::kernel_state::KernelState;
use crate::renderer::RendererRegistry;
use crate::wire_message::WireMessage;

pub use iopub::IOPubPublisher;

/// Create a fresh session ID.
pub fn make_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A Jupyter kernel session.
///
/// This object consists of only shared handles so that it can safely be
/// cloned into each channel's handler; all mutable kernel state is stored in
/// the `KernelState` object.
#[derive(Clone)]
pub struct KernelSession {
    /// The mutable state, shared by every channel
    pub state: Arc<Mutex<KernelState>>,

    /// The backend that runs code
    backend: Arc<dyn ExecutionBackend>,

    /// Renders display objects into MIME bundles
    renderers: Arc<RendererRegistry>,

    options: KernelOptions,

    /// Outbound queues for the channels the session replies on
    shell: ChannelSender,
    control: ChannelSender,
    iopub: IOPubPublisher,

    /// Hands `execute_request`s to the shell executor
    executor_tx: async_channel::Sender<WireMessage>,

    /// Set when the kernel shuts down
    shutdown: Arc<ShutdownSignal>,
}

impl KernelSession {
    /// Create a new session. Returns the session and the queue the shell
    /// executor reads from; pass the latter to `spawn_executor`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kernel_id: String,
        session_id: String,
        backend: Arc<dyn ExecutionBackend>,
        renderers: Arc<RendererRegistry>,
        options: KernelOptions,
        shell: ChannelSender,
        control: ChannelSender,
        iopub: ChannelSender,
        shutdown: Arc<ShutdownSignal>,
    ) -> (Self, Receiver<WireMessage>) {
        let (executor_tx, executor_rx) = async_channel::unbounded();
        let iopub = IOPubPublisher::new(iopub, kernel_id, options.username.clone());
        let session = Self {
            state: Arc::new(Mutex::new(KernelState::new(session_id))),
            backend,
            renderers,
            options,
            shell,
            control,
            iopub,
            executor_tx,
            shutdown,
        };
        (session, executor_rx)
    }

    /// Start the task that runs `execute_request`s one at a time.
    pub fn spawn_executor(&self, requests: Receiver<WireMessage>) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move { session.run_executor(requests).await })
    }

    pub async fn session_id(&self) -> String {
        self.state.lock().await.session_id.clone()
    }

    /// Announce that the kernel is up: `starting` then `idle`, with no
    /// parent.
    pub async fn announce_startup(&self) {
        let mut state = self.state.lock().await;
        self.iopub
            .status(&state.session_id, None, ExecutionState::Starting);
        self.iopub.status(&state.session_id, None, ExecutionState::Idle);
        state.set_status(KernelStatus::Idle, Some(String::from("channels bound")));
    }

    /// The content of a `kernel_info_reply`.
    fn kernel_info(&self) -> KernelInfoReply {
        KernelInfoReply {
            status: String::from("ok"),
            protocol_version: PROTOCOL_VERSION.to_string(),
            implementation: self.options.implementation.clone(),
            implementation_version: self.options.implementation_version.clone(),
            language_info: self.backend.language_info(),
            banner: self
                .backend
                .banner()
                .unwrap_or_else(|| self.options.banner.clone()),
            debugger: false,
            help_links: vec![],
        }
    }

    /// Queue a reply to a request on the channel it came from.
    fn reply<T: Serialize>(
        &self,
        sender: &ChannelSender,
        session: &str,
        request: &WireMessage,
        msg_type: &str,
        content: &T,
    ) -> anyhow::Result<()> {
        let content = serde_json::to_value(content)?;
        let reply = request.reply(msg_type, session, &self.options.username, content);
        sender.send(reply)
    }

    /// Reply to a request with an error.
    fn reply_error(
        &self,
        sender: &ChannelSender,
        session: &str,
        request: &WireMessage,
        error: &KernelError,
    ) -> anyhow::Result<()> {
        log::warn!(
            "[session {}] Replying to '{}' with error: {}",
            session,
            request.header.msg_type,
            error
        );
        self.reply(
            sender,
            session,
            request,
            &request.header.reply_type(),
            &error.to_content(),
        )
    }
}

#[async_trait]
impl ChannelHandler for KernelSession {
    async fn handle(&self, channel: JupyterChannel, msg: WireMessage) -> anyhow::Result<()> {
        match channel {
            JupyterChannel::Shell => self.handle_shell(msg).await,
            JupyterChannel::Control => self.handle_control(msg).await,
            JupyterChannel::Stdin => {
                log::debug!(
                    "[session {}] Ignoring '{}' on stdin",
                    self.session_id().await,
                    msg.header.msg_type
                );
                Ok(())
            }
            JupyterChannel::IOPub | JupyterChannel::Heartbeat => {
                log::warn!(
                    "Unexpected '{}' message on {} channel",
                    msg.header.msg_type,
                    channel
                );
                Ok(())
            }
        }
    }
}
