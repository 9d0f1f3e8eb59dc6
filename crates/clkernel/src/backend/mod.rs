//
// mod.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! The contract between the kernel and whatever actually runs code.

mod echo;

pub use echo::EchoBackend;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use clshared::kernel_info::LanguageInfo;
use clshared::message_content::{IsCompleteReply, StreamName};

use crate::error::EvaluationError;
use crate::renderer::DisplayObject;

/// Output produced by the backend while code runs.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// Text written to stdout or stderr
    Stream { name: StreamName, text: String },

    /// An object to show now
    Display(DisplayObject),

    /// The value the code evaluated to
    Result(DisplayObject),
}

/// Where the backend pushes output while it runs. Pushing never blocks; the
/// kernel forwards each event to iopub as it arrives.
#[derive(Clone)]
pub struct OutputSink {
    tx: Sender<OutputEvent>,
}

impl OutputSink {
    /// Create a sink and the receiver its events arrive on.
    pub fn channel() -> (Self, Receiver<OutputEvent>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }

    pub fn stdout(&self, text: &str) {
        self.emit(OutputEvent::Stream {
            name: StreamName::Stdout,
            text: text.to_string(),
        });
    }

    pub fn stderr(&self, text: &str) {
        self.emit(OutputEvent::Stream {
            name: StreamName::Stderr,
            text: text.to_string(),
        });
    }

    pub fn display(&self, object: DisplayObject) {
        self.emit(OutputEvent::Display(object));
    }

    pub fn result(&self, object: DisplayObject) {
        self.emit(OutputEvent::Result(object));
    }

    fn emit(&self, event: OutputEvent) {
        if let Err(err) = self.tx.try_send(event) {
            log::debug!("Discarding output produced after execution ended: {}", err);
        }
    }
}

/// An execution backend: the component that evaluates submitted code.
///
/// All methods take `&self`; the kernel shares one backend between the shell
/// executor (which runs code) and the control channel (which interrupts and
/// restarts it), so implementations keep their mutable state behind their
/// own locks.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Describes the language, for `kernel_info_reply`.
    fn language_info(&self) -> LanguageInfo;

    /// A banner to show in place of the kernel's own, if any.
    fn banner(&self) -> Option<String> {
        None
    }

    /// Run code, pushing output to the sink as it is produced.
    async fn execute(&self, code: &str, output: &OutputSink) -> Result<(), EvaluationError>;

    /// Evaluate an expression without side effects.
    async fn evaluate(&self, expression: &str) -> Result<DisplayObject, EvaluationError>;

    /// Check whether code is ready to run.
    fn is_complete(&self, code: &str) -> IsCompleteReply;

    /// Ask the running evaluation to stop. Must not block.
    fn interrupt(&self);

    /// Tear down and rebuild the backend's state. Called once any evaluation
    /// in flight has stopped; an interrupt still pending must survive it.
    async fn restart(&self) -> anyhow::Result<()>;

    /// Release resources before the kernel exits.
    async fn shutdown(&self) {}
}
