//
// mod.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! A kernel running in-process on free ports, and a client that talks to it
//! over real ZeroMQ sockets.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clkernel::backend::EchoBackend;
use clkernel::connection_file::ConnectionConfig;
use clkernel::digester::Digester;
use clkernel::dispatcher::ShutdownSignal;
use clkernel::kernel_options::KernelOptions;
use clkernel::kernel_session::KernelSession;
use clkernel::server::Kernel;
use clkernel::wire_message::{frames_to_zmq, WireMessage};
use clshared::jupyter_message::JupyterChannel;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use zeromq::{DealerSocket, ReqSocket, Socket, SocketRecv, SocketSend, SubSocket};

pub const TEST_KEY: &str = "a0436f6c-1916-498b-8eb9-e81ab9368e84";

/// How long to wait for any single message before failing the test
const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Pick five distinct free ports.
pub fn pick_ports() -> Vec<u16> {
    let mut ports: Vec<u16> = Vec::new();
    while ports.len() < 5 {
        let port = portpicker::pick_unused_port().expect("Failed to pick unused port");
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    ports
}

/// A connection config on free local ports.
pub fn test_config(signature_scheme: &str, key: &str) -> ConnectionConfig {
    let ports = pick_ports();
    ConnectionConfig {
        transport: String::from("tcp"),
        ip: String::from("127.0.0.1"),
        control_port: ports[0],
        shell_port: ports[1],
        stdin_port: ports[2],
        hb_port: ports[3],
        iopub_port: ports[4],
        signature_scheme: signature_scheme.to_string(),
        key: key.to_string(),
        kernel_id: Some(String::from("test-kernel")),
    }
}

/// Write a connection file into a temporary directory.
pub fn write_connection_file(dir: &TempDir, name: &str, contents: &Value) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_string_pretty(contents).unwrap()).unwrap();
    path
}

pub fn test_options() -> KernelOptions {
    KernelOptions {
        poll_interval: Duration::from_millis(50),
        shutdown_grace: Duration::from_millis(500),
        ..KernelOptions::default()
    }
}

/// A kernel running in the test's runtime.
pub struct TestKernel {
    pub config: ConnectionConfig,
    pub session: KernelSession,
    pub shutdown: Arc<ShutdownSignal>,
    pub task: JoinHandle<()>,
}

impl TestKernel {
    pub async fn start() -> Self {
        Self::start_with(test_config("hmac-sha256", TEST_KEY)).await
    }

    pub async fn start_with(config: ConnectionConfig) -> Self {
        let kernel = Kernel::start(config.clone(), Arc::new(EchoBackend::new()), test_options())
            .expect("Failed to start kernel");
        kernel
            .wait_until_bound(Duration::from_secs(10))
            .await
            .expect("Kernel failed to bind its channels");
        let session = kernel.session().clone();
        let shutdown = kernel.shutdown_signal();
        let task = tokio::spawn(kernel.run());
        Self {
            config,
            session,
            shutdown,
            task,
        }
    }

    /// Stop the kernel and wait for it to wind down.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = timeout(Duration::from_secs(5), self.task).await;
    }
}

/// A Jupyter client connected to every channel of a kernel.
pub struct TestClient {
    pub shell: DealerSocket,
    pub control: DealerSocket,
    pub stdin: DealerSocket,
    pub iopub: SubSocket,
    pub heartbeat: ReqSocket,
    pub digester: Digester,
    pub session: String,
}

impl TestClient {
    pub async fn connect(config: &ConnectionConfig) -> Self {
        let mut shell = DealerSocket::new();
        let mut control = DealerSocket::new();
        let mut stdin = DealerSocket::new();
        let mut iopub = SubSocket::new();
        let mut heartbeat = ReqSocket::new();

        shell
            .connect(&config.endpoint(JupyterChannel::Shell))
            .await
            .expect("Failed to connect to shell");
        control
            .connect(&config.endpoint(JupyterChannel::Control))
            .await
            .expect("Failed to connect to control");
        stdin
            .connect(&config.endpoint(JupyterChannel::Stdin))
            .await
            .expect("Failed to connect to stdin");
        iopub
            .connect(&config.endpoint(JupyterChannel::IOPub))
            .await
            .expect("Failed to connect to iopub");
        iopub.subscribe("").await.expect("Failed to subscribe");
        heartbeat
            .connect(&config.endpoint(JupyterChannel::Heartbeat))
            .await
            .expect("Failed to connect to heartbeat");

        let mut client = Self {
            shell,
            control,
            stdin,
            iopub,
            heartbeat,
            digester: Digester::from_config(config).expect("Bad signature scheme"),
            session: uuid::Uuid::new_v4().to_string(),
        };
        client.wait_for_iopub().await;
        client
    }

    /// Create a request from this client.
    pub fn request(&self, msg_type: &str, content: Value) -> WireMessage {
        WireMessage::new(msg_type, &self.session, "test", content)
    }

    pub fn execute_request(&self, code: &str) -> WireMessage {
        self.request(
            "execute_request",
            json!({
                "code": code,
                "silent": false,
                "store_history": true,
                "user_expressions": {},
                "allow_stdin": false,
                "stop_on_error": true
            }),
        )
    }

    pub async fn send_shell(&mut self, msg: &WireMessage) {
        let zmq = msg.to_zmq(&self.digester).unwrap();
        self.shell.send(zmq).await.expect("Failed to send on shell");
    }

    pub async fn send_control(&mut self, msg: &WireMessage) {
        let zmq = msg.to_zmq(&self.digester).unwrap();
        self.control
            .send(zmq)
            .await
            .expect("Failed to send on control");
    }

    /// Send raw frames on the shell channel.
    pub async fn send_shell_frames(&mut self, frames: Vec<Bytes>) {
        self.shell
            .send(frames_to_zmq(frames).unwrap())
            .await
            .expect("Failed to send on shell");
    }

    pub async fn recv_shell(&mut self) -> WireMessage {
        let msg = timeout(RECV_TIMEOUT, self.shell.recv())
            .await
            .expect("Timed out waiting for a shell message")
            .expect("Failed to receive on shell");
        WireMessage::decode(msg.into_vec(), &self.digester).expect("Bad shell message")
    }

    pub async fn recv_control(&mut self) -> WireMessage {
        let msg = timeout(RECV_TIMEOUT, self.control.recv())
            .await
            .expect("Timed out waiting for a control message")
            .expect("Failed to receive on control");
        WireMessage::decode(msg.into_vec(), &self.digester).expect("Bad control message")
    }

    pub async fn recv_iopub(&mut self) -> WireMessage {
        let msg = timeout(RECV_TIMEOUT, self.iopub.recv())
            .await
            .expect("Timed out waiting for an iopub message")
            .expect("Failed to receive on iopub");
        WireMessage::decode(msg.into_vec(), &self.digester).expect("Bad iopub message")
    }

    /// Collect the iopub messages caused by a request, up to and including
    /// its `status: idle`.
    pub async fn iopub_until_idle(&mut self, parent_id: &str) -> Vec<WireMessage> {
        let mut messages = vec![];
        loop {
            let msg = self.recv_iopub().await;
            if msg.parent_id() != Some(parent_id) {
                continue;
            }
            let idle = msg.header.msg_type == "status"
                && msg.content["execution_state"] == "idle";
            messages.push(msg);
            if idle {
                return messages;
            }
        }
    }

    /// Collect the iopub messages caused by a request, up to and including
    /// its `status: busy`.
    pub async fn iopub_until_busy(&mut self, parent_id: &str) -> Vec<WireMessage> {
        let mut messages = vec![];
        loop {
            let msg = self.recv_iopub().await;
            if msg.parent_id() != Some(parent_id) {
                continue;
            }
            let busy = msg.header.msg_type == "status"
                && msg.content["execution_state"] == "busy";
            messages.push(msg);
            if busy {
                return messages;
            }
        }
    }

    /// Send a heartbeat and return the echo.
    pub async fn heartbeat(&mut self, payload: &[u8]) -> Vec<Bytes> {
        self.heartbeat
            .send(Bytes::copy_from_slice(payload).into())
            .await
            .expect("Failed to send heartbeat");
        let echo = timeout(RECV_TIMEOUT, self.heartbeat.recv())
            .await
            .expect("Timed out waiting for heartbeat")
            .expect("Failed to receive heartbeat");
        echo.into_vec()
    }

    /// A SUB socket only receives once its subscription has reached the
    /// publisher. Poke the kernel with silent executions until iopub
    /// traffic arrives, then discard it.
    async fn wait_for_iopub(&mut self) {
        for _ in 0..50 {
            let poke = self.request(
                "execute_request",
                json!({ "code": "", "silent": true, "store_history": false }),
            );
            self.send_shell(&poke).await;
            let _ = self.recv_shell().await;
            let arrived = timeout(Duration::from_millis(200), self.iopub.recv()).await;
            if arrived.is_ok() {
                // Let the rest of the poke's traffic arrive and drop it
                while timeout(Duration::from_millis(200), self.iopub.recv())
                    .await
                    .is_ok()
                {}
                return;
            }
        }
        panic!("iopub subscription never became active");
    }

    pub async fn close(self) {
        self.shell.close().await;
        self.control.close().await;
        self.stdin.close().await;
        self.iopub.close().await;
        self.heartbeat.close().await;
    }
}

/// The message types in a list of messages, with the execution state
/// appended to each `status`.
pub fn message_types(messages: &[WireMessage]) -> Vec<String> {
    messages
        .iter()
        .map(|msg| {
            if msg.header.msg_type == "status" {
                format!(
                    "status:{}",
                    msg.content["execution_state"].as_str().unwrap_or("?")
                )
            } else {
                msg.header.msg_type.clone()
            }
        })
        .collect()
}
