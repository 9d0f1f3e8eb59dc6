//
// kernel_state.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use clshared::kernel_status::KernelStatus;
use tokio::sync::watch;

use crate::execution_queue::ExecutionQueue;

/// The mutable state of the kernel, shared by the channel handlers and the
/// shell executor behind a single mutex.
///
/// Does not implement the Clone trait; only one instance of the kernel state
/// should exist at a time.
#[derive(Debug)]
pub struct KernelState {
    /// The session ID for this kernel instance; regenerated on restart.
    pub session_id: String,

    /// The kernel's current status.
    pub status: KernelStatus,

    /// The execution count the next counted request will receive.
    pub execution_count: u32,

    /// The execution queue for the kernel.
    pub execution_queue: ExecutionQueue,

    /// Whether the executor may start requests. False while the kernel is
    /// being restarted or shut down.
    running: watch::Sender<bool>,

    /// The ID of the request the backend is evaluating, if any.
    evaluating: watch::Sender<Option<String>>,
}

impl KernelState {
    /// Create a new kernel state.
    pub fn new(session_id: String) -> Self {
        KernelState {
            session_id,
            status: KernelStatus::Starting,
            execution_count: 1,
            execution_queue: ExecutionQueue::new(),
            running: watch::Sender::new(true),
            evaluating: watch::Sender::new(None),
        }
    }

    /// Set the kernel's status.
    pub fn set_status(&mut self, status: KernelStatus, reason: Option<String>) {
        log::debug!(
            "[session {}] status '{}' => '{}' {}",
            self.session_id,
            self.status,
            status,
            match reason {
                Some(ref r) => format!("({})", r),
                None => "".to_string(),
            }
        );

        // If the status didn't change, don't perform any side effects.
        if self.status == status {
            return;
        }

        self.status = status;

        if status == KernelStatus::Stopped {
            self.execution_queue.clear();
            self.set_running(false);
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Open or close the gate the executor waits on before starting each
    /// request.
    pub fn set_running(&mut self, running: bool) {
        if self.is_running() != running {
            log::debug!("[session {}] running: {}", self.session_id, running);
        }
        self.running.send_replace(running);
    }

    /// Watch the `running` gate.
    pub fn watch_running(&self) -> watch::Receiver<bool> {
        self.running.subscribe()
    }

    /// Record that the backend has started evaluating a request.
    pub fn begin_evaluation(&mut self, msg_id: &str) {
        self.evaluating.send_replace(Some(msg_id.to_string()));
    }

    /// Record that the backend is no longer evaluating anything.
    pub fn end_evaluation(&mut self) {
        self.evaluating.send_replace(None);
    }

    /// The request under evaluation, if any.
    pub fn evaluating(&self) -> Option<String> {
        self.evaluating.borrow().clone()
    }

    /// Watch the request under evaluation.
    pub fn watch_evaluation(&self) -> watch::Receiver<Option<String>> {
        self.evaluating.subscribe()
    }

    /// Take the next execution count for a counted request.
    pub fn take_execution_count(&mut self) -> u32 {
        let count = self.execution_count;
        self.execution_count += 1;
        count
    }

    /// The execution count most recently assigned; 0 if none has been.
    pub fn last_execution_count(&self) -> u32 {
        self.execution_count.saturating_sub(1)
    }

    /// Begin a new session: new session ID, execution count back to 1.
    pub fn reset_session(&mut self, session_id: String) {
        log::info!(
            "[session {}] Starting new session {}",
            self.session_id,
            session_id
        );
        self.session_id = session_id;
        self.execution_count = 1;
    }
}
