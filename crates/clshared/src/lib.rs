//! Shared Jupyter protocol types for the Callisto kernel and its clients.

/// Jupyter message headers and channels
pub mod jupyter_message;

/// Kernel info reply types
pub mod kernel_info;

/// Kernel and execution status types
pub mod kernel_status;

/// Typed content records for requests, replies and iopub events
pub mod message_content;
