//! # workerpipe
//!
//! **Purpose**: Bidirectional pipe channel to a worker subprocess
//!
//! Spawns a long-running worker (e.g. an SMT solver), owns both ends of its
//! stdio plumbing, and exposes a small protocol on top: send bytes, drain
//! whatever output is currently available, or wait (bounded or unbounded)
//! until the worker has produced something.
//!
//! ## Features
//!
//! - **Cross-platform spawning**: anonymous pipes on POSIX-like systems,
//!   named asynchronous pipes on Windows, one contract on both
//! - **Merged inbound stream**: the worker's stdout and stderr arrive as a
//!   single byte stream
//! - **Non-blocking drain**: `receive()` returns what the OS has buffered
//!   and never waits for more
//! - **Readiness polling**: immediate, bounded, or unbounded waits for
//!   worker output
//! - **Deterministic teardown**: pipes closed and the worker terminated
//!   regardless of the channel's state
//!
//! The channel moves raw bytes. Message framing, retries, and any protocol
//! interpretation belong to the caller.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use workerpipe::{ChannelConfig, PipedChannel, SendResponse};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Spawn a solver in incremental mode
//! let config = ChannelConfig::new("z3").args(["-in", "-smt2"]);
//! let mut channel = PipedChannel::spawn(config).await?;
//!
//! // Drive it over the pipes
//! assert_eq!(channel.send(b"(check-sat)\n").await, SendResponse::Succeeded);
//! let reply = channel.wait_receive().await;
//! assert!(!reply.is_empty());
//!
//! // Orderly teardown
//! channel.close().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
mod pipe;

pub use channel::{ChannelState, PipedChannel, ReceiveTimeout, SendResponse};
pub use config::ChannelConfig;
pub use error::{ChannelError, Result};
