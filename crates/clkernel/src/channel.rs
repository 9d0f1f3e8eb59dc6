//
// channel.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use bytes::Bytes;
use clshared::jupyter_message::JupyterChannel;
use zeromq::{PubSocket, RepSocket, RouterSocket, Socket, SocketRecv, SocketSend, ZmqError, ZmqMessage};

use crate::error::KernelError;
use crate::wire_message::frames_to_zmq;

/// The socket behind one channel. Shell, control and stdin are ROUTER
/// sockets (identity-framed replies to many peers), iopub is PUB and the
/// heartbeat is REP.
pub enum ChannelSocket {
    Router(RouterSocket),
    Publish(PubSocket),
    Reply(RepSocket),
}

impl ChannelSocket {
    /// Create an unbound socket of the right pattern for a channel.
    pub fn new(channel: JupyterChannel) -> Self {
        match channel {
            JupyterChannel::Shell | JupyterChannel::Control | JupyterChannel::Stdin => {
                ChannelSocket::Router(RouterSocket::new())
            }
            JupyterChannel::IOPub => ChannelSocket::Publish(PubSocket::new()),
            JupyterChannel::Heartbeat => ChannelSocket::Reply(RepSocket::new()),
        }
    }

    pub async fn bind(&mut self, endpoint: &str) -> Result<(), KernelError> {
        let result = match self {
            ChannelSocket::Router(socket) => socket.bind(endpoint).await,
            ChannelSocket::Publish(socket) => socket.bind(endpoint).await,
            ChannelSocket::Reply(socket) => socket.bind(endpoint).await,
        };
        result.map(|_| ()).map_err(|e| KernelError::Transport {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }

    /// Receive one complete multipart message. A PUB socket never receives,
    /// so this never completes for iopub.
    pub async fn recv_frames(&mut self) -> Result<Vec<Bytes>, ZmqError> {
        let message = match self {
            ChannelSocket::Router(socket) => socket.recv().await?,
            ChannelSocket::Reply(socket) => socket.recv().await?,
            ChannelSocket::Publish(_) => futures::future::pending::<ZmqMessage>().await,
        };
        Ok(message.into_vec())
    }

    pub async fn send_frames(&mut self, frames: Vec<Bytes>) -> anyhow::Result<()> {
        let message = frames_to_zmq(frames)?;
        match self {
            ChannelSocket::Router(socket) => socket.send(message).await?,
            ChannelSocket::Publish(socket) => socket.send(message).await?,
            ChannelSocket::Reply(socket) => socket.send(message).await?,
        }
        Ok(())
    }

    pub async fn close(self) {
        match self {
            ChannelSocket::Router(socket) => {
                socket.close().await;
            }
            ChannelSocket::Publish(socket) => {
                socket.close().await;
            }
            ChannelSocket::Reply(socket) => {
                socket.close().await;
            }
        }
    }
}
