use futures::{FutureExt, Sink, SinkExt, Stream};
use log::{debug, error, info, trace, warn};
use std::fmt;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::connection_reader::ConnectionReader;
use super::session::{ProcessState, Session};
use super::session_event::{close_code, InboundMessage, OutboundMessage, SessionEvent};
use crate::binary_pipe::diagnostic_relay::DiagnosticRelay;
use crate::binary_pipe::frame_pipe::{FramePipe, FrameSender, PipeWriter};
use crate::binary_pipe::types::{Frame, PipeStats};
use crate::configuration::types::SessionConfig;
use crate::error_handling::types::TransportError;
use crate::process_supervision::process_supervisor::ProcessSupervisor;
use crate::process_supervision::types::{ExitReport, ExitSignal, KillReason, ProcessHandle};

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    ConnectionClosed,
    ConnectionError(TransportError),
    ProcessExited,
    Shutdown,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::ConnectionClosed => write!(f, "connection closed"),
            SessionEnd::ConnectionError(e) => write!(f, "{}", e),
            SessionEnd::ProcessExited => write!(f, "transcoder exited"),
            SessionEnd::Shutdown => write!(f, "relay shutdown"),
        }
    }
}

/// Final account of a session, produced once it is CLOSED.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: Session,
    pub end: SessionEnd,
    pub pipe: PipeStats,
    pub exit: ExitReport,
    pub forced_kill: bool,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}; {} frames / {} bytes written, {} dropped, {} discarded; transcoder {} ({})",
            self.end,
            self.pipe.frames_written,
            self.pipe.bytes_written,
            self.pipe.frames_dropped,
            self.session.frames_discarded,
            self.session.process_state,
            self.exit
        )
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub frame_queue_capacity: usize,
    pub event_queue_capacity: usize,
    pub mirror_diagnostics: bool,
    pub close_timeout: Duration,
    pub stall_timeout: Duration,
}

impl From<&SessionConfig> for WorkerSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            frame_queue_capacity: config.frame_queue_capacity,
            event_queue_capacity: config.event_queue_capacity,
            mirror_diagnostics: config.mirror_diagnostics,
            close_timeout: Duration::from_millis(config.close_timeout_ms),
            stall_timeout: Duration::from_millis(config.stall_timeout_ms),
        }
    }
}

enum Trigger {
    Closed(Option<(u16, String)>),
    Failed(TransportError),
    Exited(ExitReport),
    Shutdown,
}

/// Drives one OPEN session until both its connection and its process are gone.
///
/// Everything the session reacts to (frames, text, diagnostics, connection end, process exit)
/// arrives through a single event channel and is handled in arrival order. Helper tasks only
/// translate their source into events: a reader for the connection, a watcher for the process
/// exit and the diagnostic relay.
pub struct SessionWorker<'a> {
    state: watch::Sender<Session>,
    handle: ProcessHandle,
    supervisor: &'a ProcessSupervisor,
    settings: WorkerSettings,
    shutdown: CancellationToken,
    /// Set once, when the connection end is first seen.
    drain_until: Option<Instant>,
}

impl<'a> SessionWorker<'a> {
    pub fn new(
        state: watch::Sender<Session>,
        handle: ProcessHandle,
        supervisor: &'a ProcessSupervisor,
        settings: WorkerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state,
            handle,
            supervisor,
            settings,
            shutdown,
            drain_until: None,
        }
    }

    pub async fn run<S, K>(mut self, inbound: S, mut outbound: K) -> SessionReport
    where
        S: Stream<Item = Result<InboundMessage, TransportError>> + Send + Unpin + 'static,
        K: Sink<OutboundMessage> + Send + Unpin,
        K::Error: fmt::Display,
    {
        let id = self.handle.session_id;
        let (events_tx, mut events) = mpsc::channel(self.settings.event_queue_capacity.max(1));
        let reader_done = CancellationToken::new();
        let connection_done = CancellationToken::new();
        let process_done = CancellationToken::new();

        let reader = ConnectionReader::new(
            id,
            inbound,
            events_tx.clone(),
            reader_done.clone(),
            connection_done.clone(),
            self.settings.stall_timeout,
        );
        let discarded = reader.discarded();
        reader.spawn();
        spawn_exit_watcher(
            self.handle.exit_signal(),
            events_tx.clone(),
            process_done.clone(),
        );
        let relay = self.handle.take_diagnostics().map(|stderr| {
            let mirror = self.settings.mirror_diagnostics.then(|| events_tx.clone());
            DiagnosticRelay::spawn(id, stderr, move |line| {
                if let Some(events) = &mirror {
                    // Mirroring is best effort; a busy session skips lines rather than stall.
                    let _ = events.try_send(SessionEvent::Diagnostic(line));
                }
            })
        });
        drop(events_tx);

        let (frames, writer) = match self.handle.take_input() {
            Some(input) => {
                let (frames, writer) = FramePipe::spawn(
                    id,
                    input,
                    self.settings.frame_queue_capacity,
                    CancellationToken::new(),
                );
                (Some(frames), Some(writer))
            }
            None => {
                warn!("[{}] transcoder input unavailable, frames will be dropped", id);
                (None, None)
            }
        };

        debug!("[{}] session worker running", id);

        let trigger = loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Trigger::Shutdown,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break Trigger::Closed(None),
                },
            };

            match event {
                SessionEvent::Frame(frame) => {
                    if let Some(trigger) = self
                        .forward(frames.as_ref(), frame, &process_done, &connection_done)
                        .await
                    {
                        break trigger;
                    }
                }
                SessionEvent::Text(text) => {
                    info!("[{}] text message ignored: {}", id, text);
                }
                SessionEvent::Diagnostic(line) => {
                    self.mirror(&mut outbound, line);
                }
                SessionEvent::ConnectionClosed(frame) => break Trigger::Closed(frame),
                SessionEvent::ConnectionError(e) => break Trigger::Failed(e),
                SessionEvent::ProcessExited(report) => break Trigger::Exited(report),
            }
        };

        let (end, pipe, exit, forced_kill) = match trigger {
            Trigger::Closed(frame) => {
                match frame {
                    Some((code, reason)) => {
                        info!("[{}] connection closed by client ({} {})", id, code, reason)
                    }
                    None => info!("[{}] connection closed by client", id),
                }
                let (pipe, exit, forced) = self
                    .stop_process(frames, writer, KillReason::ConnectionClosed)
                    .await;
                self.close_outbound(&mut outbound, None).await;
                (SessionEnd::ConnectionClosed, pipe, exit, forced)
            }
            Trigger::Failed(e) => {
                warn!("[{}] {}", id, e);
                let (pipe, exit, forced) = self
                    .stop_process(frames, writer, KillReason::ConnectionError(e.to_string()))
                    .await;
                self.close_outbound(&mut outbound, None).await;
                (SessionEnd::ConnectionError(e), pipe, exit, forced)
            }
            Trigger::Exited(report) => {
                self.update(|s| {
                    s.begin_closing();
                    s.process_ended(ProcessState::Exited);
                });
                let close = match report.fault() {
                    Some(fault) => {
                        error!("[{}] {}", id, fault);
                        (close_code::INTERNAL_ERROR, fault.to_string())
                    }
                    None => {
                        info!("[{}] transcoder exited cleanly", id);
                        (close_code::NORMAL, String::from("stream ended"))
                    }
                };
                drop(frames);
                let pipe = match writer {
                    Some(writer) => writer.abandon().await,
                    None => PipeStats::default(),
                };
                self.close_outbound(&mut outbound, Some(close)).await;
                (SessionEnd::ProcessExited, pipe, report, false)
            }
            Trigger::Shutdown => {
                info!("[{}] closing for relay shutdown", id);
                self.update(Session::begin_closing);
                self.close_outbound(
                    &mut outbound,
                    Some((close_code::GOING_AWAY, String::from("server shutting down"))),
                )
                .await;
                let (pipe, exit, forced) = self
                    .stop_process(frames, writer, KillReason::Shutdown)
                    .await;
                (SessionEnd::Shutdown, pipe, exit, forced)
            }
        };

        if let Some(relay) = relay {
            if tokio::time::timeout(self.settings.close_timeout, relay).await.is_err() {
                debug!("[{}] diagnostic stream still open, detaching", id);
            }
        }
        reader_done.cancel();
        drop(events);

        let discarded = discarded.load(Ordering::Relaxed);
        let mut closed = false;
        self.update(|s| {
            s.frames_discarded = discarded;
            closed = s.close();
        });
        if !closed {
            warn!("[{}] session was already closed", id);
        }

        let session = self.state.borrow().clone();
        SessionReport {
            session,
            end,
            pipe,
            exit,
            forced_kill,
        }
    }

    /// Queues one frame for the transcoder. Suspends while the queue is full.
    async fn forward(
        &mut self,
        frames: Option<&FrameSender>,
        frame: Frame,
        process_done: &CancellationToken,
        connection_done: &CancellationToken,
    ) -> Option<Trigger> {
        let id = self.handle.session_id;
        let Some(frames) = frames else {
            return None;
        };
        if process_done.is_cancelled() {
            trace!("[{}] transcoder gone, frame dropped", id);
            return None;
        }

        let len = frame.len();
        let sent = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Some(Trigger::Shutdown),
            _ = process_done.cancelled() => return None,
            sent = frames.send(frame.clone()) => sent.is_ok(),
            // The connection has ended: what it already sent still goes through, within the
            // grace period.
            _ = connection_done.cancelled() => {
                let deadline = self.drain_deadline();
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return Some(Trigger::Shutdown),
                    _ = process_done.cancelled() => return None,
                    sent = tokio::time::timeout_at(deadline, frames.send(frame)) => {
                        matches!(sent, Ok(Ok(())))
                    }
                }
            }
        };

        if sent {
            self.update(|s| s.record_frame(len));
        } else {
            debug!("[{}] frame of {} bytes not delivered", id, len);
        }
        None
    }

    /// Drains the frame queue, closes the process input and kills the process.
    async fn stop_process(
        &mut self,
        frames: Option<FrameSender>,
        writer: Option<PipeWriter>,
        reason: KillReason,
    ) -> (PipeStats, ExitReport, bool) {
        self.update(Session::begin_closing);

        drop(frames);
        let remaining = self.drain_deadline().saturating_duration_since(Instant::now());
        let pipe = match writer {
            Some(writer) => writer.drain(remaining).await,
            None => PipeStats::default(),
        };

        let outcome = self.supervisor.kill(&mut self.handle, reason).await;
        let state = if outcome.already_exited {
            ProcessState::Exited
        } else {
            ProcessState::Killed
        };
        self.update(|s| s.process_ended(state));
        if let Some(fault) = outcome.report.fault().filter(|_| outcome.already_exited) {
            error!("[{}] {}", self.handle.session_id, fault);
        }
        (pipe, outcome.report, outcome.forced)
    }

    /// Queued frames get until this instant to reach the process once the connection has ended.
    fn drain_deadline(&mut self) -> Instant {
        let grace = self.supervisor.kill_grace();
        *self.drain_until.get_or_insert_with(|| Instant::now() + grace)
    }

    /// Sends a diagnostic line only if the connection can take it right away.
    fn mirror<K>(&self, outbound: &mut K, line: String)
    where
        K: Sink<OutboundMessage> + Unpin,
        K::Error: fmt::Display,
    {
        let id = self.handle.session_id;
        match outbound.send(OutboundMessage::Info(line)).now_or_never() {
            Some(Ok(())) => {}
            Some(Err(e)) => debug!("[{}] diagnostic not mirrored: {}", id, e),
            None => trace!("[{}] connection busy, diagnostic not mirrored", id),
        }
    }

    async fn close_outbound<K>(&self, outbound: &mut K, close: Option<(u16, String)>)
    where
        K: Sink<OutboundMessage> + Unpin,
        K::Error: fmt::Display,
    {
        if let Err(e) = close_connection(outbound, close, self.settings.close_timeout).await {
            debug!("[{}] connection close: {}", self.handle.session_id, e);
        }
    }

    fn update(&self, change: impl FnOnce(&mut Session)) {
        self.state.send_modify(change);
    }
}

/// Sends the optional close indication, then closes the connection, within `limit`.
pub(crate) async fn close_connection<K>(
    outbound: &mut K,
    close: Option<(u16, String)>,
    limit: Duration,
) -> Result<(), TransportError>
where
    K: Sink<OutboundMessage> + Unpin,
    K::Error: fmt::Display,
{
    let failed = |e: K::Error| TransportError::SendFailed(e.to_string());
    let closing = async {
        if let Some((code, reason)) = close {
            outbound
                .send(OutboundMessage::Close { code, reason })
                .await
                .map_err(failed)?;
        }
        outbound.close().await.map_err(failed)
    };
    match tokio::time::timeout(limit, closing).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::SendFailed(format!(
            "not closed within {:?}",
            limit
        ))),
    }
}

fn spawn_exit_watcher(
    mut exit: ExitSignal,
    events: mpsc::Sender<SessionEvent>,
    process_done: CancellationToken,
) {
    tokio::spawn(async move {
        let report = exit.wait().await;
        process_done.cancel();
        let _ = events.send(SessionEvent::ProcessExited(report)).await;
    });
}
