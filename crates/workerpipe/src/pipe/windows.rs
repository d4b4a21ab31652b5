//! Named-pipe inbound stream for Windows
//!
//! Windows anonymous pipes cannot be read with overlapped I/O, so the
//! inbound stream is a uniquely named pipe: the parent owns the server
//! (read) side and the worker inherits write handles opened on the client
//! side.

use std::fs::OpenOptions;
use std::io;
use std::process::Stdio;

use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};
use tokio::process::Command;
use uuid::Uuid;

/// Read end of the worker's merged stdout/stderr stream
#[derive(Debug)]
pub struct InboundPipe {
    server: NamedPipeServer,
}

impl InboundPipe {
    /// Create the pipe and bind its write side to `cmd`'s stdout and stderr
    ///
    /// The pipe path carries a fresh UUID so concurrent channels in the same
    /// process never collide.
    pub(crate) async fn attach(cmd: &mut Command) -> io::Result<Self> {
        let name = format!(r"\\.\pipe\workerpipe-{}", Uuid::new_v4());
        let server = ServerOptions::new()
            .access_inbound(true)
            .access_outbound(false)
            .first_pipe_instance(true)
            .create(&name)?;
        let client = OpenOptions::new().write(true).open(&name)?;
        // The client handle is already attached, so connect() completes
        // immediately and arms the server for overlapped reads.
        server.connect().await?;
        cmd.stdout(Stdio::from(client.try_clone()?));
        cmd.stderr(Stdio::from(client));
        Ok(Self { server })
    }

    /// Non-blocking read
    ///
    /// `Ok(0)` is end-of-stream; `WouldBlock` means nothing is currently
    /// buffered in the pipe.
    pub(crate) fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        flatten_eof(self.server.try_read(buf))
    }

    /// Wait until the pipe is readable, then read
    ///
    /// Loops on spurious readiness events, so `WouldBlock` never escapes.
    pub(crate) async fn read_ready(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Err(e) = self.server.readable().await {
                return flatten_eof(Err(e));
            }
            match self.server.try_read(buf) {
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                read => return flatten_eof(read),
            }
        }
    }
}

/// A worker that exited surfaces as `BrokenPipe` on the server side; the
/// channel treats that as orderly end-of-stream, matching POSIX pipes.
fn flatten_eof(read: io::Result<usize>) -> io::Result<usize> {
    match read {
        Err(ref e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(0),
        read => read,
    }
}
