//! Platform-opaque inbound pipe
//!
//! Each platform supplies the same surface: attach the pipe's write side to
//! a command's stdout and stderr, a non-blocking `try_read`, and a
//! readiness-driven `read_ready`. The channel never sees the underlying
//! representation.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::InboundPipe;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::InboundPipe;
