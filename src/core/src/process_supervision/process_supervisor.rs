use chrono::Utc;
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::transcoder_command::TranscoderCommand;
use super::types::{
    Control, ExitReport, ExitSignal, KillOutcome, KillReason, ProcessHandle, ProcessInput,
    SupervisorStats,
};
use crate::binary_pipe::types::Frame;
use crate::error_handling::types::{PipeClosedError, SpawnError};
use crate::network::session_router::DestinationAddress;

/// Spawns and supervises one transcoder process per session.
///
/// Every spawned `Child` is moved into a dedicated reaper task, which is the only place that
/// waits on it or signals it. This keeps signalling and reaping on one task, so a signal can never
/// reach a recycled pid. The reaper publishes the exit report exactly once through a watch
/// channel.
///
/// Termination is two-staged: [`kill`](Self::kill) first sends an interrupt so the transcoder can
/// flush its output and close the upstream connection cleanly, and only if the process is still
/// alive after the grace period is it forcibly terminated.
pub struct ProcessSupervisor {
    command: Box<dyn TranscoderCommand>,
    kill_grace: Duration,
    stats: Arc<Mutex<SupervisorStats>>,
}

impl ProcessSupervisor {
    pub fn new(command: impl TranscoderCommand + 'static, kill_grace: Duration) -> Self {
        info!(
            "Initializing ProcessSupervisor for '{}' (kill grace {:?})",
            command.program(),
            kill_grace
        );
        Self {
            command: Box::new(command),
            kill_grace,
            stats: Arc::new(Mutex::new(SupervisorStats::default())),
        }
    }

    pub fn kill_grace(&self) -> Duration {
        self.kill_grace
    }

    /// Spawns the transcoder for `destination`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        &self,
        session_id: Uuid,
        destination: &DestinationAddress,
    ) -> Result<ProcessHandle, SpawnError> {
        let id = format!("livepush-{}", session_id);
        let program = self.command.program().to_string();
        let args = self.command.args(destination);

        debug!("[{}] spawning {} {:?}", session_id, program, args);

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        restore_default_interrupt(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.record(|s| s.failed_spawns += 1);
                error!("[{}] failed to spawn {}: {}", session_id, program, e);
                return Err(if e.kind() == ErrorKind::NotFound {
                    SpawnError::ProgramNotFound(program)
                } else {
                    SpawnError::Io(e)
                });
            }
        };

        let pid = child.id();
        let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe("stdin"))?;
        let stderr = child.stderr.take().ok_or(SpawnError::MissingPipe("stderr"))?;

        let (exit_tx, exit_rx) = watch::channel(None);
        let (control_tx, control_rx) = mpsc::channel(4);

        self.record(|s| {
            s.total_spawned += 1;
            s.active_count += 1;
        });
        self.spawn_reaper(id.clone(), child, control_rx, exit_tx);

        info!(
            "[{}] transcoder {} started (pid {:?}) -> {}",
            session_id, id, pid, destination
        );

        Ok(ProcessHandle {
            id,
            session_id,
            pid,
            destination: destination.clone(),
            started_at: Utc::now(),
            input: Some(ProcessInput::new(session_id, stdin)),
            diagnostics: Some(stderr),
            exit: ExitSignal::new(exit_rx),
            control: control_tx,
            force_issued: false,
        })
    }

    /// Writes one frame to the process input, if the handle still owns it.
    pub async fn write(
        &self,
        handle: &mut ProcessHandle,
        frame: &Frame,
    ) -> Result<(), PipeClosedError> {
        match handle.input.as_mut() {
            Some(input) => input.write(frame).await,
            None => Err(PipeClosedError),
        }
    }

    /// Resolves once the process has terminated, for any cause.
    pub async fn observe_exit(&self, handle: &ProcessHandle) -> ExitReport {
        handle.exit_signal().wait().await
    }

    /// Interrupts the process and escalates to forced termination after the grace period.
    pub async fn kill(&self, handle: &mut ProcessHandle, reason: KillReason) -> KillOutcome {
        let mut exit = handle.exit_signal();
        if let Some(report) = exit.current() {
            debug!("[{}] {} already exited ({})", handle.session_id, handle.id, report);
            return KillOutcome {
                report,
                already_exited: true,
                forced: false,
            };
        }

        info!("[{}] interrupting {}: {}", handle.session_id, handle.id, reason);
        if handle.control.send(Control::Interrupt).await.is_ok() {
            self.record(|s| s.interrupts_sent += 1);
        }

        if let Ok(report) = tokio::time::timeout(self.kill_grace, exit.wait()).await {
            info!("[{}] {} stopped ({})", handle.session_id, handle.id, report);
            return KillOutcome {
                report,
                already_exited: false,
                forced: false,
            };
        }

        warn!(
            "[{}] {} still running {:?} after interrupt, forcing termination",
            handle.session_id, handle.id, self.kill_grace
        );
        let forced = self.force_kill(handle).await;
        let report = exit.wait().await;
        info!("[{}] {} terminated ({})", handle.session_id, handle.id, report);
        KillOutcome {
            report,
            already_exited: false,
            forced,
        }
    }

    /// Returns a snapshot of current counters.
    pub fn get_stats(&self) -> SupervisorStats {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn force_kill(&self, handle: &mut ProcessHandle) -> bool {
        if handle.force_issued {
            return false;
        }
        handle.force_issued = true;
        if handle.control.send(Control::ForceKill).await.is_err() {
            // Reaper already finished: the process is gone.
            return false;
        }
        self.record(|s| s.forced_kills += 1);
        true
    }

    fn record(&self, update: impl FnOnce(&mut SupervisorStats)) {
        record(&self.stats, update);
    }

    fn spawn_reaper(
        &self,
        id: String,
        mut child: Child,
        mut control_rx: mpsc::Receiver<Control>,
        exit_tx: watch::Sender<Option<ExitReport>>,
    ) {
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    Some(control) = control_rx.recv() => match control {
                        Control::Interrupt => {
                            if let Err(e) = interrupt(&mut child) {
                                warn!("Failed to interrupt {}: {}", id, e);
                            }
                        }
                        Control::ForceKill => {
                            if let Err(e) = child.start_kill() {
                                warn!("Failed to kill {}: {}", id, e);
                            }
                        }
                    },
                }
            };

            let report = match status {
                Ok(status) => ExitReport::from_status(&status),
                Err(e) => {
                    error!("Failed to collect exit status of {}: {}", id, e);
                    ExitReport::unknown()
                }
            };
            debug!("reaper for {} finished ({})", id, report);
            record(&stats, |s| s.active_count = s.active_count.saturating_sub(1));
            let _ = exit_tx.send(Some(report));
        });
    }
}

fn record(stats: &Mutex<SupervisorStats>, update: impl FnOnce(&mut SupervisorStats)) {
    match stats.lock() {
        Ok(mut stats) => update(&mut stats),
        Err(poisoned) => update(&mut poisoned.into_inner()),
    }
}

#[cfg(unix)]
fn interrupt(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid).map_err(|e| std::io::Error::new(ErrorKind::InvalidInput, e))?;
    kill(Pid::from_raw(pid), Signal::SIGINT).map_err(std::io::Error::from)
}

/// Children inherit ignored signal dispositions; a relay started in the background would
/// otherwise spawn transcoders that cannot be interrupted.
#[cfg(unix)]
fn restore_default_interrupt(cmd: &mut Command) {
    use nix::sys::signal::{signal, SigHandler, Signal};

    // SAFETY: the hook runs between fork and exec and only calls sigaction, which is
    // async-signal-safe.
    unsafe {
        cmd.pre_exec(|| {
            signal(Signal::SIGINT, SigHandler::SigDfl)
                .map(|_| ())
                .map_err(std::io::Error::from)
        });
    }
}

#[cfg(not(unix))]
fn restore_default_interrupt(_cmd: &mut Command) {}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) -> std::io::Result<()> {
    // No interrupt signal to deliver; terminate directly.
    child.start_kill()
}
