//! Anonymous-pipe inbound stream for POSIX-like systems

use std::io;
use std::process::Stdio;

use tokio::net::unix::pipe;
use tokio::process::Command;

/// Read end of the worker's merged stdout/stderr stream
///
/// The fd is registered with the runtime reactor, so readiness waits go
/// through the native I/O readiness primitive rather than a poll loop.
#[derive(Debug)]
pub struct InboundPipe {
    rx: pipe::Receiver,
}

impl InboundPipe {
    /// Create the pipe and bind its write side to `cmd`'s stdout and stderr
    ///
    /// The write ends handed to the command are converted back to plain
    /// blocking fds; only the parent's read end is non-blocking. Both ends
    /// given to `cmd` are dropped by the caller after spawn, which is what
    /// makes end-of-stream observable once the worker exits.
    pub(crate) async fn attach(cmd: &mut Command) -> io::Result<Self> {
        let (tx, rx) = pipe::pipe()?;
        let fd = tx.into_blocking_fd()?;
        cmd.stdout(Stdio::from(fd.try_clone()?));
        cmd.stderr(Stdio::from(fd));
        Ok(Self { rx })
    }

    /// Non-blocking read
    ///
    /// `Ok(0)` is end-of-stream; `WouldBlock` means nothing is currently
    /// buffered in the OS pipe.
    pub(crate) fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.rx.try_read(buf)
    }

    /// Wait until the pipe is readable, then read
    ///
    /// Loops on spurious readiness events, so `WouldBlock` never escapes.
    pub(crate) async fn read_ready(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            self.rx.readable().await?;
            match self.rx.try_read(buf) {
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                read => return read,
            }
        }
    }
}
