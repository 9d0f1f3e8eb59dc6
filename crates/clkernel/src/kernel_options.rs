//
// kernel_options.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::time::Duration;

/// Runtime tunables for the kernel.
#[derive(Debug, Clone)]
pub struct KernelOptions {
    /// The longest a channel worker waits on its socket before checking for
    /// new bind requests and shutdown
    pub poll_interval: Duration,

    /// The upper bound on the delay between attempts to bind a socket
    pub bind_backoff_cap: Duration,

    /// How long channel workers may spend flushing queued messages at
    /// shutdown
    pub shutdown_grace: Duration,

    /// The user name written into the header of outbound messages
    pub username: String,

    /// The name of this kernel implementation
    pub implementation: String,

    /// The version of this kernel implementation
    pub implementation_version: String,

    /// The banner shown by front ends
    pub banner: String,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            bind_backoff_cap: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(2000),
            username: String::from("kernel"),
            implementation: String::from(env!("CARGO_PKG_NAME")),
            implementation_version: String::from(env!("CARGO_PKG_VERSION")),
            banner: format!(
                "Callisto {}: a Jupyter kernel protocol engine",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}
