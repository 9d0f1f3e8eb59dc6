//
// execution_queue.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::collections::VecDeque;

use crate::wire_message::WireMessage;

/// The `execute_request`s the kernel owns: at most one active, the rest
/// waiting in arrival order.
#[derive(Debug, Default)]
pub struct ExecutionQueue {
    pub active: Option<WireMessage>,
    pub pending: VecDeque<WireMessage>,
}

impl ExecutionQueue {
    /// Create a new execution queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the execution queue
    pub fn clear(&mut self) {
        self.active = None;
        if !self.pending.is_empty() {
            log::debug!(
                "Discarding {} pending execution requests",
                self.pending.len()
            );
        }
        self.pending.clear();
    }

    /// Process a given request, either executing it immediately or queueing it
    /// for later execution.
    ///
    /// Returns true if the request can be executed immediately, or false if it
    /// was queued for later execution.
    pub fn process_request(&mut self, request: WireMessage) -> bool {
        match &self.active {
            None => {
                log::trace!(
                    "Executing request {} immediately (no requests are waiting)",
                    request.header.msg_id
                );
                self.active = Some(request);
                true
            }
            Some(active) => {
                log::debug!(
                    "Queueing request {} (active request is {}; there are {} pending requests)",
                    request.header.msg_id,
                    active.header.msg_id,
                    self.pending.len()
                );
                self.pending.push_back(request);
                false
            }
        }
    }

    /// Gets the next request to execute, if any. The previous active request
    /// is considered finished.
    pub fn next_request(&mut self) -> Option<WireMessage> {
        match self.pending.pop_front() {
            Some(req) => {
                log::debug!(
                    "Executing pending request {} ({} pending requests remain)",
                    req.header.msg_id,
                    self.pending.len()
                );
                self.active = Some(req.clone());
                Some(req)
            }
            None => {
                self.active = None;
                None
            }
        }
    }

    /// Remove and return every pending request, leaving the active one in
    /// place. Used to abort the queue after a failed execution.
    pub fn drain_pending(&mut self) -> Vec<WireMessage> {
        if !self.pending.is_empty() {
            log::debug!("Aborting {} pending execution requests", self.pending.len());
        }
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.active.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none() && self.pending.is_empty()
    }
}
