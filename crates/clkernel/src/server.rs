//
// server.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Kernel bootstrap: builds the channel workers and the session from a
//! connection config, and runs until the kernel is shut down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clshared::jupyter_message::JupyterChannel;
use clshared::kernel_status::KernelStatus;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::backend::ExecutionBackend;
use crate::connection_file::ConnectionConfig;
use crate::digester::Digester;
use crate::dispatcher::{BindState, ChannelHandler, Dispatcher, DispatcherHandle, ShutdownSignal};
use crate::error::KernelError;
use crate::kernel_options::KernelOptions;
use crate::kernel_session::{make_session_id, KernelSession};
use crate::renderer::RendererRegistry;

/// A running kernel.
pub struct Kernel {
    config: ConnectionConfig,
    options: KernelOptions,
    session: KernelSession,
    dispatchers: Vec<DispatcherHandle>,
    executor: JoinHandle<()>,
    shutdown: Arc<ShutdownSignal>,
    announced: AtomicBool,
}

impl Kernel {
    /// Start the kernel's channel workers and ask each to bind to its
    /// endpoint. Must be called from within a tokio runtime.
    pub fn start(
        config: ConnectionConfig,
        backend: Arc<dyn ExecutionBackend>,
        options: KernelOptions,
    ) -> Result<Self, KernelError> {
        let digester = Arc::new(Digester::from_config(&config)?);
        if !digester.is_enabled() {
            log::warn!("Message signing is disabled; any peer can send requests to this kernel");
        }

        let shutdown = Arc::new(ShutdownSignal::new());
        let new_dispatcher = |channel: JupyterChannel| {
            Dispatcher::new(channel, digester.clone(), options.clone(), shutdown.clone())
        };
        let shell = new_dispatcher(JupyterChannel::Shell);
        let control = new_dispatcher(JupyterChannel::Control);
        let stdin = new_dispatcher(JupyterChannel::Stdin);
        let iopub = new_dispatcher(JupyterChannel::IOPub);
        let heartbeat = new_dispatcher(JupyterChannel::Heartbeat);

        let session_id = make_session_id();
        let kernel_id = config
            .kernel_id
            .clone()
            .unwrap_or_else(|| session_id.clone());
        log::info!("[session {}] Starting kernel {}", session_id, kernel_id);

        let (session, executor_rx) = KernelSession::new(
            kernel_id,
            session_id,
            backend,
            Arc::new(RendererRegistry::with_defaults()),
            options.clone(),
            shell.sender(),
            control.sender(),
            iopub.sender(),
            shutdown.clone(),
        );
        let handler: Arc<dyn ChannelHandler> = Arc::new(session.clone());

        // Bind in the order heartbeat, iopub, control, stdin, shell
        let mut dispatchers = Vec::with_capacity(JupyterChannel::ALL.len());
        for (dispatcher, handler) in [
            (heartbeat, None),
            (iopub, None),
            (control, Some(handler.clone())),
            (stdin, Some(handler.clone())),
            (shell, Some(handler)),
        ] {
            let handle = dispatcher.spawn(handler);
            handle
                .request_bind(&config.endpoint(handle.channel))
                .map_err(|e| KernelError::Transport {
                    endpoint: config.endpoint(handle.channel),
                    reason: e.to_string(),
                })?;
            dispatchers.push(handle);
        }

        let executor = session.spawn_executor(executor_rx);

        Ok(Self {
            config,
            options,
            session,
            dispatchers,
            executor,
            shutdown,
            announced: AtomicBool::new(false),
        })
    }

    pub fn session(&self) -> &KernelSession {
        &self.session
    }

    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        self.shutdown.clone()
    }

    /// Wait for every channel to bind. Once all are bound, the kernel
    /// announces itself on iopub. Fails with the first channel that is
    /// still unbound when the time runs out.
    pub async fn wait_until_bound(&self, limit: Duration) -> Result<(), KernelError> {
        let deadline = Instant::now() + limit;
        for handle in &self.dispatchers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let endpoint = self.config.endpoint(handle.channel);
            match handle.wait_until_bound(remaining).await {
                BindState::Bound(_) => {}
                BindState::Retrying {
                    reason, attempts, ..
                } => {
                    return Err(KernelError::Transport {
                        endpoint,
                        reason: format!("{} (after {} attempts)", reason, attempts),
                    })
                }
                BindState::Unbound => {
                    return Err(KernelError::Transport {
                        endpoint,
                        reason: String::from("bind was never attempted"),
                    })
                }
                BindState::Closed => {
                    return Err(KernelError::Transport {
                        endpoint,
                        reason: String::from("channel closed"),
                    })
                }
            }
        }

        if !self.announced.swap(true, Ordering::SeqCst) {
            log::info!(
                "[session {}] All channels bound on {}",
                self.session.session_id().await,
                self.config.ip
            );
            self.session.announce_startup().await;
        }
        Ok(())
    }

    /// Shut the kernel down without a client request.
    pub async fn stop(&self) {
        self.session.stop_unrequested().await;
    }

    /// Run until the kernel is shut down, then wait for the channel workers
    /// to flush and close.
    pub async fn run(self) {
        self.shutdown.wait().await;

        let grace = self.options.shutdown_grace + self.options.poll_interval;
        for handle in self.dispatchers {
            let channel = handle.channel;
            if timeout(grace, handle.join()).await.is_err() {
                log::warn!("[{}] Channel worker did not stop in time", channel);
            }
        }
        self.executor.abort();

        let mut state = self.session.state.lock().await;
        state.set_status(KernelStatus::Stopped, Some(String::from("shutdown complete")));
    }
}
