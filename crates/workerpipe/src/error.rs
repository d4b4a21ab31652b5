//! Error types for channel construction

use std::io;
use thiserror::Error;

/// Construction-fatal channel errors
///
/// Per-call failures after construction are reported through
/// [`SendResponse`](crate::SendResponse) and the channel state, never
/// through this type.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The command vector was empty
    #[error("worker command is empty")]
    EmptyCommand,

    /// Failed to create or wire up the inbound pipe
    #[error("inbound pipe setup failed: {0}")]
    PipeSetup(#[source] io::Error),

    /// Failed to spawn the worker process
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(#[source] io::Error),
}

/// Result type for channel construction
pub type Result<T> = std::result::Result<T, ChannelError>;
