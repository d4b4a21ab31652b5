//! Worker channel - lifecycle, send/receive, readiness polling

use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::time;
use tracing::{debug, info, warn};

use crate::{
    config::ChannelConfig,
    error::{ChannelError, Result},
    pipe::InboundPipe,
};

/// Read chunk size for draining the inbound pipe
const READ_CHUNK: usize = 2048;

/// Grace period between asking the worker to terminate and killing it
const TERM_GRACE: Duration = Duration::from_millis(200);

/// Channel lifecycle state
///
/// `Stopped` and `Errored` are terminal; once the channel leaves `Created`
/// only [`PipedChannel::status`] and [`PipedChannel::close`] remain valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Before the spawn attempt has completed
    NotCreated,
    /// Worker spawned, channel usable
    Created,
    /// Orderly end-of-stream observed on the inbound pipe
    Stopped,
    /// A readiness poll hit an unrecoverable platform error
    Errored,
}

impl ChannelState {
    /// Whether send/receive/poll operations are permitted
    pub fn is_live(&self) -> bool {
        matches!(self, ChannelState::Created)
    }
}

/// Outcome of a [`PipedChannel::send`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResponse {
    /// Bytes were written and flushed to the worker's input
    Succeeded,
    /// The write failed (the worker likely exited and closed its input)
    Failed,
    /// The channel is not in the `Created` state; no I/O was attempted
    Errored,
}

/// How long a readiness poll may wait
///
/// The three cases are explicit so call sites never encode "forever" as a
/// sentinel duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveTimeout {
    /// Check current availability and return at once
    #[default]
    Immediate,
    /// Wait up to the given duration
    Bounded(Duration),
    /// Wait until output arrives or the channel leaves `Created`
    Unbounded,
}

impl From<Duration> for ReceiveTimeout {
    fn from(limit: Duration) -> Self {
        ReceiveTimeout::Bounded(limit)
    }
}

/// Bidirectional pipe channel to a single worker subprocess
///
/// One channel owns exactly one child process, the write end of its stdin
/// and the read end of its merged stdout/stderr stream. The channel moves
/// raw bytes and performs no framing; two worker writes may coalesce into
/// one `receive()` result and a single write may split across two.
///
/// The channel runs no background tasks. The only suspension points are
/// [`can_receive`](Self::can_receive) with a non-immediate timeout and the
/// waits composed from it. A single caller is expected to drive the channel;
/// concurrent callers must serialize above this layer.
#[derive(Debug)]
pub struct PipedChannel {
    /// Lifecycle state
    state: ChannelState,
    /// Immutable spawn configuration
    config: ChannelConfig,
    /// Outbound handle (worker stdin); None once closed
    stdin: Option<ChildStdin>,
    /// Inbound handle (merged worker stdout/stderr); None once closed
    inbound: Option<InboundPipe>,
    /// Bytes a readiness poll had to consume to observe availability;
    /// drained ahead of the OS pipe by `receive()`
    stash: Vec<u8>,
    /// Worker identity, used only for termination
    child: Child,
}

impl PipedChannel {
    /// Spawn a worker and wire up both pipes
    ///
    /// The worker's stdin is bound to the channel's outbound pipe and its
    /// stdout and stderr both feed the inbound pipe. All child-side pipe
    /// ends are closed in the parent before this returns, so end-of-stream
    /// becomes observable as soon as the worker exits.
    ///
    /// Any pipe or spawn failure is construction-fatal: an error is
    /// returned and no channel value exists afterwards.
    pub async fn spawn(config: ChannelConfig) -> Result<PipedChannel> {
        let Some((program, args)) = config.command.split_first() else {
            return Err(ChannelError::EmptyCommand);
        };

        debug!(command = %program, args = ?args, "spawning worker process");

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped());
        // Backstop for channels discarded without an explicit close()
        cmd.kill_on_drop(true);

        let inbound = InboundPipe::attach(&mut cmd)
            .await
            .map_err(ChannelError::PipeSetup)?;
        let mut child = cmd.spawn().map_err(ChannelError::SpawnFailed)?;
        let stdin = child.stdin.take().ok_or_else(|| {
            ChannelError::SpawnFailed(io::Error::new(
                io::ErrorKind::Other,
                "worker stdin was not piped",
            ))
        })?;

        let pid = child.id().unwrap_or(0);
        info!(pid = %pid, command = %program, "worker process spawned");

        // `cmd` still owns the child-side write ends of the inbound pipe;
        // it drops at the end of this function, leaving the parent with
        // only the read end.
        Ok(Self {
            state: ChannelState::Created,
            config,
            stdin: Some(stdin),
            inbound: Some(inbound),
            stash: Vec::new(),
            child,
        })
    }

    /// Current lifecycle state, queryable in any state
    pub fn status(&self) -> ChannelState {
        self.state
    }

    /// Spawn configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Write a byte sequence to the worker's input and flush it
    ///
    /// Returns [`SendResponse::Errored`] without attempting any I/O when the
    /// channel is not in `Created`. A failed send does not change the
    /// channel state; a broken outbound pipe only surfaces again on the next
    /// write or on the inbound side.
    pub async fn send(&mut self, bytes: &[u8]) -> SendResponse {
        if self.state != ChannelState::Created {
            return SendResponse::Errored;
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return SendResponse::Errored;
        };
        match write_flush(stdin, bytes).await {
            Ok(()) => SendResponse::Succeeded,
            Err(e) => {
                debug!(error = %e, "send failed on outbound pipe");
                SendResponse::Failed
            }
        }
    }

    /// Drain the bytes currently buffered on the inbound pipe
    ///
    /// Never waits for more output: reads are appended until the OS reports
    /// nothing available, end-of-stream, or an error, and the accumulated
    /// bytes (possibly none) are returned. End-of-stream seen here is
    /// advisory; recording it as `Stopped` belongs to the readiness poller.
    ///
    /// # Panics
    ///
    /// Panics if the channel is not in `Created`. Calling `receive` on a
    /// dead channel is a programming error, not a recoverable condition.
    pub fn receive(&mut self) -> Vec<u8> {
        assert!(
            self.state == ChannelState::Created,
            "receive() requires a live channel"
        );
        let mut out = std::mem::take(&mut self.stash);
        let Some(inbound) = self.inbound.as_mut() else {
            return out;
        };
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match inbound.try_read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(error = %e, "inbound read failed mid-drain");
                    break;
                }
            }
        }
        out
    }

    /// Poll for at least one byte of worker output
    ///
    /// Returns `true` as soon as output is available, `false` when the
    /// timeout elapses first. End-of-stream marks the channel `Stopped` and
    /// a platform error while waiting marks it `Errored`; both collapse to
    /// `false`, so callers distinguish them through [`status`](Self::status).
    /// With [`ReceiveTimeout::Immediate`] (the default) this never blocks.
    pub async fn can_receive(&mut self, timeout: ReceiveTimeout) -> bool {
        if !self.stash.is_empty() {
            return true;
        }
        if self.state != ChannelState::Created {
            return false;
        }
        let Some(inbound) = self.inbound.as_mut() else {
            return false;
        };
        let mut chunk = [0u8; READ_CHUNK];
        let read = match timeout {
            ReceiveTimeout::Immediate => inbound.try_read(&mut chunk),
            ReceiveTimeout::Bounded(limit) => {
                match time::timeout(limit, inbound.read_ready(&mut chunk)).await {
                    Ok(read) => read,
                    Err(_elapsed) => return false,
                }
            }
            ReceiveTimeout::Unbounded => inbound.read_ready(&mut chunk).await,
        };
        match read {
            Ok(0) => {
                debug!("inbound pipe reached end of stream");
                self.state = ChannelState::Stopped;
                false
            }
            Ok(n) => {
                self.stash.extend_from_slice(&chunk[..n]);
                true
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                warn!(error = %e, "inbound readiness poll failed");
                self.state = ChannelState::Errored;
                false
            }
        }
    }

    /// Block until worker output is available, then drain it
    ///
    /// Returns the accumulated bytes, which are empty when the wait ended
    /// because the channel left `Created` instead of producing output.
    pub async fn wait_receive(&mut self) -> Vec<u8> {
        self.can_receive(ReceiveTimeout::Unbounded).await;
        if self.state == ChannelState::Created {
            self.receive()
        } else {
            std::mem::take(&mut self.stash)
        }
    }

    /// Sleep-poll until output is available or the channel leaves `Created`
    ///
    /// A coarse busy-wait paced by `interval`, for callers that want to
    /// interleave other work between polls rather than park in one blocking
    /// wait.
    pub async fn wait_receivable(&mut self, interval: Duration) {
        while self.state.is_live() && !self.can_receive(ReceiveTimeout::Immediate).await {
            time::sleep(interval).await;
        }
    }

    /// Release both pipes and stop the worker
    ///
    /// Closes the outbound pipe (the worker sees EOF on its stdin), drops
    /// the inbound pipe, then terminates the worker: SIGTERM with a short
    /// grace period and a kill escalation on POSIX-like systems, forced
    /// termination on Windows. Idempotent, tolerant of a worker that
    /// already exited, and never reports an error to the caller.
    ///
    /// Dropping the channel without calling `close` still kills the worker
    /// via the runtime's kill-on-drop backstop.
    pub async fn close(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        self.inbound.take();
        self.terminate_worker().await;
        if self.state == ChannelState::Created {
            self.state = ChannelState::Stopped;
        }
    }

    async fn terminate_worker(&mut self) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => debug!(pid = %pid, "sent SIGTERM to worker"),
                Err(e) => debug!(pid = %pid, error = %e, "SIGTERM delivery failed"),
            }
        }

        #[cfg(windows)]
        {
            let _ = self.child.start_kill();
        }

        match time::timeout(TERM_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!(status = %status, "worker exited"),
            Ok(Err(e)) => warn!(error = %e, "error reaping worker"),
            Err(_elapsed) => {
                if let Err(e) = self.child.start_kill() {
                    warn!(error = %e, "failed to kill worker");
                }
                let _ = self.child.wait().await;
            }
        }
    }
}

async fn write_flush(stdin: &mut ChildStdin, bytes: &[u8]) -> io::Result<()> {
    stdin.write_all(bytes).await?;
    stdin.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn spawn_empty_command_is_rejected() {
        let config = ChannelConfig::from_command(Vec::<String>::new());
        let err = PipedChannel::spawn(config).await.unwrap_err();
        assert!(matches!(err, ChannelError::EmptyCommand));
    }

    #[tokio::test]
    async fn spawn_missing_executable_is_fatal() {
        let config = ChannelConfig::new("workerpipe-test-no-such-binary");
        let err = PipedChannel::spawn(config).await.unwrap_err();
        assert!(matches!(err, ChannelError::SpawnFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn echo_round_trip() {
        let mut channel = PipedChannel::spawn(ChannelConfig::new("cat")).await.unwrap();
        assert_eq!(channel.status(), ChannelState::Created);
        assert_eq!(channel.config().command, ["cat"]);
        assert_eq!(channel.send(b"ping\n").await, SendResponse::Succeeded);
        assert_eq!(channel.wait_receive().await, b"ping\n");
        channel.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn immediate_poll_never_blocks() {
        let config = ChannelConfig::new("sleep").args(["5"]);
        let mut channel = PipedChannel::spawn(config).await.unwrap();

        let start = Instant::now();
        assert!(!channel.can_receive(ReceiveTimeout::Immediate).await);
        assert!(start.elapsed() < Duration::from_millis(100));

        channel.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bounded_poll_waits_full_timeout() {
        let config = ChannelConfig::new("sleep").args(["5"]);
        let mut channel = PipedChannel::spawn(config).await.unwrap();

        let limit = Duration::from_millis(200);
        let start = Instant::now();
        assert!(!channel.can_receive(limit.into()).await);
        let elapsed = start.elapsed();
        assert!(elapsed >= limit);
        assert!(elapsed < Duration::from_secs(2));

        channel.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn receive_after_exit_delivers_bytes_exactly_once() {
        let config = ChannelConfig::new("echo").args(["done"]);
        let mut channel = PipedChannel::spawn(config).await.unwrap();

        assert_eq!(channel.wait_receive().await, b"done\n");
        // The drain loop terminates even though the worker is gone, and
        // already-delivered bytes do not reappear.
        assert!(channel.receive().is_empty());
        assert!(channel.receive().is_empty());

        // The poller observes end-of-stream and records it.
        assert!(!channel.can_receive(ReceiveTimeout::Bounded(Duration::from_secs(2))).await);
        assert_eq!(channel.status(), ChannelState::Stopped);

        channel.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn send_outside_created_is_errored_without_io() {
        let mut channel = PipedChannel::spawn(ChannelConfig::new("cat")).await.unwrap();
        channel.close().await;

        assert_eq!(channel.status(), ChannelState::Stopped);
        assert_eq!(channel.send(b"ignored").await, SendResponse::Errored);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn close_unused_channel_returns_promptly() {
        let mut channel = PipedChannel::spawn(ChannelConfig::new("cat")).await.unwrap();

        let start = Instant::now();
        channel.close().await;
        assert!(start.elapsed() < Duration::from_secs(2));

        // A second close is a no-op.
        channel.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_is_merged_into_inbound_stream() {
        let config = ChannelConfig::new("sh").args(["-c", "echo oops 1>&2"]);
        let mut channel = PipedChannel::spawn(config).await.unwrap();

        assert_eq!(channel.wait_receive().await, b"oops\n");
        channel.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wait_receivable_exits_once_output_arrives() {
        let config = ChannelConfig::new("sh").args(["-c", "sleep 0.2; echo ready"]);
        let mut channel = PipedChannel::spawn(config).await.unwrap();

        channel.wait_receivable(Duration::from_millis(10)).await;
        assert!(channel.can_receive(ReceiveTimeout::Immediate).await);
        assert_eq!(channel.receive(), b"ready\n");

        channel.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    #[should_panic(expected = "receive() requires a live channel")]
    async fn receive_outside_created_panics() {
        let mut channel = PipedChannel::spawn(ChannelConfig::new("cat")).await.unwrap();
        channel.close().await;
        let _ = channel.receive();
    }
}
