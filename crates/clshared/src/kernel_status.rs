//
// kernel_status.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::fmt;

use serde::{Deserialize, Serialize};

/// The lifecycle status of the kernel itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStatus {
    /// The kernel is binding its channels
    Starting,
    /// The kernel is idle
    Idle,
    /// The kernel is executing a request
    Busy,
    /// The kernel is rebuilding its execution backend
    Restarting,
    /// The kernel has acknowledged a shutdown request and is tearing down
    ShuttingDown,
    /// The kernel has stopped
    Stopped,
}

impl KernelStatus {
    /// Whether the kernel still accepts requests in this status.
    pub fn accepts_requests(&self) -> bool {
        !matches!(self, KernelStatus::ShuttingDown | KernelStatus::Stopped)
    }
}

impl fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            KernelStatus::Starting => "starting",
            KernelStatus::Idle => "idle",
            KernelStatus::Busy => "busy",
            KernelStatus::Restarting => "restarting",
            KernelStatus::ShuttingDown => "shutting down",
            KernelStatus::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// The execution state published on iopub in `status` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Starting,
    Busy,
    Idle,
}
