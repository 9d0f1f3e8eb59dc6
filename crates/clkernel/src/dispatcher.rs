//
// dispatcher.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! Channel workers. Each channel gets one task that owns its socket for its
//! whole life: the task creates and binds the socket, receives and decodes
//! inbound messages, hands them to the channel's handler, and sends whatever
//! other components queue for it. Nothing else ever touches the socket.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use bytes::Bytes;
use clshared::jupyter_message::JupyterChannel;
use event_listener::Event;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::channel::ChannelSocket;
use crate::digester::Digester;
use crate::kernel_options::KernelOptions;
use crate::wire_message::WireMessage;

/// Handles decoded messages arriving on a channel.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    async fn handle(&self, channel: JupyterChannel, msg: WireMessage) -> anyhow::Result<()>;
}

/// A one-shot signal telling every worker to wind down.
#[derive(Default)]
pub struct ShutdownSignal {
    triggered: AtomicBool,
    event: Event,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            self.event.notify(usize::MAX);
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Wait until the signal is triggered.
    pub async fn wait(&self) {
        loop {
            if self.is_triggered() {
                return;
            }
            let listener = self.event.listen();
            // Re-check; the signal may have fired before the listener existed
            if self.is_triggered() {
                return;
            }
            listener.await;
        }
    }
}

/// Whether a channel's socket is bound.
#[derive(Debug, Clone, PartialEq)]
pub enum BindState {
    /// No bind has been attempted yet
    Unbound,

    /// The socket is bound to the endpoint
    Bound(String),

    /// The last attempt to bind failed; another will follow
    Retrying {
        endpoint: String,
        reason: String,
        attempts: u32,
    },

    /// The worker has exited and closed its socket
    Closed,
}

/// A cloneable handle for queueing outbound messages on a channel.
#[derive(Clone)]
pub struct ChannelSender {
    channel: JupyterChannel,
    tx: Sender<WireMessage>,
}

impl ChannelSender {
    /// Queue a message for sending. Never blocks; the queue is unbounded.
    pub fn send(&self, msg: WireMessage) -> anyhow::Result<()> {
        log::trace!(
            "[{}] Queueing '{}' ({})",
            self.channel,
            msg.header.msg_type,
            msg.header.msg_id
        );
        self.tx.try_send(msg).map_err(|e| {
            anyhow::anyhow!("Cannot queue message on {} channel: {}", self.channel, e)
        })
    }

    pub fn channel(&self) -> JupyterChannel {
        self.channel
    }
}

/// The parts of a dispatcher that stay with its owner once the worker task
/// has been spawned.
pub struct DispatcherHandle {
    pub channel: JupyterChannel,
    bind_tx: Sender<String>,
    sender: ChannelSender,
    bound_rx: watch::Receiver<BindState>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Ask the worker to bind its socket to an endpoint.
    pub fn request_bind(&self, endpoint: &str) -> anyhow::Result<()> {
        self.bind_tx
            .try_send(endpoint.to_string())
            .map_err(|e| anyhow::anyhow!("Cannot request bind on {}: {}", self.channel, e))
    }

    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    pub fn bind_state(&self) -> BindState {
        self.bound_rx.borrow().clone()
    }

    /// Wait for the socket to be bound, or for the timeout to elapse.
    /// Returns the last known state either way.
    pub async fn wait_until_bound(&self, limit: Duration) -> BindState {
        let mut rx = self.bound_rx.clone();
        let _ = timeout(limit, async {
            loop {
                if matches!(*rx.borrow_and_update(), BindState::Bound(_)) {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        let state = rx.borrow().clone();
        state
    }

    /// Wait for the worker task to finish.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            log::error!("[{}] Channel worker failed: {}", self.channel, err);
        }
    }
}

/// A channel worker that has not been started yet. Its sender can be
/// handed out before the worker (and its handler) exist.
pub struct Dispatcher {
    worker: ChannelWorker,
    bind_tx: Sender<String>,
    sender: ChannelSender,
    bound_rx: watch::Receiver<BindState>,
}

impl Dispatcher {
    pub fn new(
        channel: JupyterChannel,
        digester: Arc<Digester>,
        options: KernelOptions,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        let (bind_tx, bind_rx) = async_channel::unbounded();
        let (outbound_tx, outbound_rx) = async_channel::unbounded();
        let (bound_tx, bound_rx) = watch::channel(BindState::Unbound);

        Self {
            worker: ChannelWorker {
                channel,
                digester,
                options,
                handler: None,
                shutdown,
                bind_rx,
                outbound_rx,
                bound_tx,
            },
            bind_tx,
            sender: ChannelSender {
                channel,
                tx: outbound_tx,
            },
            bound_rx,
        }
    }

    /// A handle for queueing messages on this channel.
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Start the worker. The handler receives every message that decodes and
    /// verifies; heartbeat and iopub take no handler.
    pub fn spawn(self, handler: Option<Arc<dyn ChannelHandler>>) -> DispatcherHandle {
        let mut worker = self.worker;
        worker.handler = handler;
        let channel = worker.channel;
        let task = tokio::spawn(worker.run());

        DispatcherHandle {
            channel,
            bind_tx: self.bind_tx,
            sender: self.sender,
            bound_rx: self.bound_rx,
            task,
        }
    }
}

struct ChannelWorker {
    channel: JupyterChannel,
    digester: Arc<Digester>,
    options: KernelOptions,
    handler: Option<Arc<dyn ChannelHandler>>,
    shutdown: Arc<ShutdownSignal>,
    bind_rx: Receiver<String>,
    outbound_rx: Receiver<WireMessage>,
    bound_tx: watch::Sender<BindState>,
}

impl ChannelWorker {
    async fn run(self) {
        log::debug!("[{}] Channel worker starting", self.channel);

        let mut socket: Option<ChannelSocket> = None;
        let mut pending_bind: Option<String> = None;
        let mut attempts: u32 = 0;
        let mut backoff = self.options.poll_interval;
        let mut next_attempt = Instant::now();

        while !self.shutdown.is_triggered() {
            // Pick up the most recent bind request, if any
            while let Ok(endpoint) = self.bind_rx.try_recv() {
                pending_bind = Some(endpoint);
                attempts = 0;
                backoff = self.options.poll_interval;
                next_attempt = Instant::now();
            }

            if let Some(endpoint) = pending_bind.clone() {
                if Instant::now() >= next_attempt {
                    let mut candidate = ChannelSocket::new(self.channel);
                    match candidate.bind(&endpoint).await {
                        Ok(()) => {
                            log::info!("[{}] Bound to {}", self.channel, endpoint);
                            if let Some(previous) = socket.replace(candidate) {
                                previous.close().await;
                            }
                            pending_bind = None;
                            let _ = self.bound_tx.send(BindState::Bound(endpoint));
                        }
                        Err(err) => {
                            attempts += 1;
                            log::warn!(
                                "[{}] Bind attempt {} failed; retrying in {:?}: {}",
                                self.channel,
                                attempts,
                                backoff,
                                err
                            );
                            candidate.close().await;
                            let _ = self.bound_tx.send(BindState::Retrying {
                                endpoint,
                                reason: err.to_string(),
                                attempts,
                            });
                            next_attempt = Instant::now() + backoff;
                            backoff = std::cmp::min(backoff * 2, self.options.bind_backoff_cap);
                        }
                    }
                }
            }

            match socket.as_mut() {
                Some(sock) => self.poll(sock).await,
                None => {
                    let requested = self.idle_wait(pending_bind.is_some(), next_attempt).await;
                    if let Some(endpoint) = requested {
                        log::trace!("[{}] Bind requested: {}", self.channel, endpoint);
                        pending_bind = Some(endpoint);
                        attempts = 0;
                        backoff = self.options.poll_interval;
                        next_attempt = Instant::now();
                    }
                }
            }
        }

        self.drain(socket).await;
    }

    /// Wait on a channel with no socket for a bind request, the next retry,
    /// or shutdown. Returns a newly requested endpoint, if one arrived.
    async fn idle_wait(&self, retrying: bool, next_attempt: Instant) -> Option<String> {
        let wait = if retrying {
            next_attempt.saturating_duration_since(Instant::now())
        } else {
            self.options.poll_interval
        };
        tokio::select! {
            _ = self.shutdown.wait() => None,
            endpoint = self.bind_rx.recv(), if !retrying => endpoint.ok(),
            _ = tokio::time::sleep(wait) => None,
        }
    }

    /// One bounded wait on a bound socket.
    async fn poll(&self, sock: &mut ChannelSocket) {
        tokio::select! {
            _ = self.shutdown.wait() => {}
            frames = timeout(self.options.poll_interval, sock.recv_frames()) => {
                match frames {
                    Ok(Ok(frames)) => self.on_frames(sock, frames).await,
                    Ok(Err(err)) => {
                        log::error!("[{}] Error receiving message: {}", self.channel, err);
                    }
                    Err(_) => {
                        // Poll interval elapsed with nothing to read
                    }
                }
            }
            msg = self.outbound_rx.recv() => {
                if let Ok(msg) = msg {
                    self.send(sock, msg).await;
                }
            }
        }
    }

    async fn on_frames(&self, sock: &mut ChannelSocket, frames: Vec<Bytes>) {
        // The heartbeat is answered here and never decoded
        if self.channel == JupyterChannel::Heartbeat {
            log::trace!("[heartbeat] Echoing {} frame(s)", frames.len());
            if let Err(err) = sock.send_frames(frames).await {
                log::error!("[heartbeat] Failed to echo heartbeat: {}", err);
            }
            return;
        }

        let msg = match WireMessage::decode(frames, &self.digester) {
            Ok(msg) => msg,
            Err(err) => {
                log::warn!("[{}] Dropping message: {}", self.channel, err);
                return;
            }
        };

        log::trace!(
            "[{}] Received '{}' ({})",
            self.channel,
            msg.header.msg_type,
            msg.header.msg_id
        );

        let handler = match &self.handler {
            Some(handler) => handler.clone(),
            None => {
                log::debug!(
                    "[{}] No handler; ignoring '{}'",
                    self.channel,
                    msg.header.msg_type
                );
                return;
            }
        };

        let msg_type = msg.header.msg_type.clone();
        let result = AssertUnwindSafe(handler.handle(self.channel, msg))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::error!(
                    "[{}] Handler failed for '{}': {}",
                    self.channel,
                    msg_type,
                    err
                );
            }
            Err(_) => {
                log::error!("[{}] Handler panicked on '{}'", self.channel, msg_type);
            }
        }
    }

    async fn send(&self, sock: &mut ChannelSocket, msg: WireMessage) {
        let frames = match msg.encode(&self.digester) {
            Ok(frames) => frames,
            Err(err) => {
                log::error!(
                    "[{}] Cannot encode '{}': {}",
                    self.channel,
                    msg.header.msg_type,
                    err
                );
                return;
            }
        };
        log::trace!(
            "[{}] Sending '{}' ({})",
            self.channel,
            msg.header.msg_type,
            msg.header.msg_id
        );
        if let Err(err) = sock.send_frames(frames).await {
            log::error!(
                "[{}] Failed to send '{}': {}",
                self.channel,
                msg.header.msg_type,
                err
            );
        }
    }

    /// Flush queued messages within the grace period, then close the socket.
    async fn drain(&self, socket: Option<ChannelSocket>) {
        if let Some(mut sock) = socket {
            let flushed = timeout(self.options.shutdown_grace, async {
                let mut count = 0;
                while let Ok(msg) = self.outbound_rx.try_recv() {
                    self.send(&mut sock, msg).await;
                    count += 1;
                }
                count
            })
            .await;
            match flushed {
                Ok(count) if count > 0 => {
                    log::debug!("[{}] Flushed {} message(s)", self.channel, count)
                }
                Ok(_) => {}
                Err(_) => log::warn!(
                    "[{}] Grace period elapsed with messages still queued",
                    self.channel
                ),
            }
            sock.close().await;
        }
        let _ = self.bound_tx.send(BindState::Closed);
        log::debug!("[{}] Channel worker stopped", self.channel);
    }
}
