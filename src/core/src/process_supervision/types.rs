//! Core types used by the process supervision subsystem.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use std::fmt;
use std::process::ExitStatus;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdin};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::binary_pipe::types::Frame;
use crate::error_handling::types::{PipeClosedError, ProcessFault};
use crate::network::session_router::DestinationAddress;

/// Aggregate counters describing the current and historical transcoder processes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorStats {
    /// Processes spawned and not yet reaped.
    pub active_count: usize,
    /// Total number of processes successfully spawned.
    pub total_spawned: u64,
    /// Spawn attempts rejected by the OS.
    pub failed_spawns: u64,
    /// Interrupt requests issued by `kill`.
    pub interrupts_sent: u64,
    /// Forced terminations issued after the grace period elapsed.
    pub forced_kills: u64,
}

/// How a process terminated, as observed by its reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitReport {
    pub fn from_status(status: &ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        ExitReport {
            code: status.code(),
            signal,
        }
    }

    /// Used when the exit status could not be collected.
    pub fn unknown() -> Self {
        ExitReport {
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn fault(&self) -> Option<ProcessFault> {
        if self.success() {
            None
        } else {
            Some(ProcessFault {
                code: self.code,
                signal: self.signal,
            })
        }
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "code {}, signal {}",
            self.code.map_or_else(|| String::from("none"), |c| c.to_string()),
            self.signal.map_or_else(|| String::from("none"), |s| s.to_string())
        )
    }
}

/// Exit notification of one process.
///
/// The reaper publishes the report exactly once; every clone observes that same report.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    rx: watch::Receiver<Option<ExitReport>>,
}

impl ExitSignal {
    pub(crate) fn new(rx: watch::Receiver<Option<ExitReport>>) -> Self {
        Self { rx }
    }

    /// The report, if the process has already terminated.
    pub fn current(&self) -> Option<ExitReport> {
        *self.rx.borrow()
    }

    /// Waits until the process has terminated.
    pub async fn wait(&mut self) -> ExitReport {
        match self.rx.wait_for(Option::is_some).await {
            Ok(report) => (*report).unwrap_or_else(ExitReport::unknown),
            // The reaper went away without publishing; treat the process as gone.
            Err(_) => ExitReport::unknown(),
        }
    }
}

/// Why the relay asked a process to stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum KillReason {
    ConnectionClosed,
    ConnectionError(String),
    Shutdown,
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillReason::ConnectionClosed => write!(f, "connection closed"),
            KillReason::ConnectionError(e) => write!(f, "connection error: {}", e),
            KillReason::Shutdown => write!(f, "relay shutdown"),
        }
    }
}

/// What `kill` had to do to stop a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillOutcome {
    pub report: ExitReport,
    /// The process had already exited before the interrupt was sent.
    pub already_exited: bool,
    /// The grace period elapsed and forced termination was issued.
    pub forced: bool,
}

/// Requests handled by a process's reaper task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Interrupt,
    ForceKill,
}

/// Write side of a process's standard input.
///
/// Once a write fails the input is considered closed and every later write is refused without
/// touching the underlying pipe.
pub struct ProcessInput<W = ChildStdin> {
    session_id: Uuid,
    writer: Option<W>,
}

impl<W: AsyncWrite + Unpin> ProcessInput<W> {
    pub fn new(session_id: Uuid, writer: W) -> Self {
        Self {
            session_id,
            writer: Some(writer),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    pub async fn write(&mut self, frame: &Frame) -> Result<(), PipeClosedError> {
        let writer = self.writer.as_mut().ok_or(PipeClosedError)?;
        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            debug!("[{}] process input write failed: {}", self.session_id, e);
            self.writer = None;
            return Err(PipeClosedError);
        }
        Ok(())
    }

    /// Signals end-of-input to the process.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("[{}] process input shutdown: {}", self.session_id, e);
            }
        }
    }
}

/// Handle describing one running transcoder process.
///
/// The `tokio::process::Child` itself lives in the reaper task spawned by the supervisor; the
/// handle talks to it through a control channel and observes its exit through [`ExitSignal`].
pub struct ProcessHandle {
    /// Identifier used in logs (`livepush-<session>`).
    pub id: String,
    pub session_id: Uuid,
    pub pid: Option<u32>,
    pub destination: DestinationAddress,
    pub started_at: DateTime<Utc>,
    pub(crate) input: Option<ProcessInput>,
    pub(crate) diagnostics: Option<ChildStderr>,
    pub(crate) exit: ExitSignal,
    pub(crate) control: mpsc::Sender<Control>,
    pub(crate) force_issued: bool,
}

impl ProcessHandle {
    /// Moves the process input out of the handle, for the binary pipe to own.
    pub fn take_input(&mut self) -> Option<ProcessInput> {
        self.input.take()
    }

    /// Moves the diagnostic stream out of the handle.
    pub fn take_diagnostics(&mut self) -> Option<ChildStderr> {
        self.diagnostics.take()
    }

    pub fn exit_signal(&self) -> ExitSignal {
        self.exit.clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.current().is_some()
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("destination", &self.destination)
            .field("exit", &self.exit.current())
            .finish()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.has_exited() && !self.force_issued {
            warn!(
                "ProcessHandle {} dropped while the process is running, forcing termination",
                self.id
            );
            let _ = self.control.try_send(Control::ForceKill);
        }
    }
}
