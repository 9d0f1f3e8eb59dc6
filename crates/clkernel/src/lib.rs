//! This module contains the implementation of Callisto's Jupyter kernel
//! protocol engine.

#![allow(missing_docs)]

pub mod backend;
pub mod channel;
pub mod connection_file;
pub mod digester;
pub mod dispatcher;
pub mod error;
pub mod execution_queue;
pub mod jupyter_messages;
pub mod kernel_options;
pub mod kernel_session;
pub mod kernel_state;
pub mod renderer;
pub mod server;
pub mod wire_message;
