use futures::{Sink, Stream};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::active_session::ActiveSession;
use super::session::Session;
use super::session_event::{close_code, InboundMessage, OutboundMessage};
use super::session_worker::{close_connection, SessionReport, SessionWorker, WorkerSettings};
use crate::configuration::types::SessionConfig;
use crate::error_handling::types::{SessionError, TransportError};
use crate::network::session_request::SessionRequest;
use crate::network::session_router::SessionRouter;
use crate::process_supervision::process_supervisor::ProcessSupervisor;
use crate::process_supervision::types::SupervisorStats;

/// The structure related to session management
///
/// Binds each accepted connection to one transcoder process and keeps an explicit registry of
/// the sessions that are still alive.
///
/// # Fields Overview
///
/// - `router`: derives each session's destination from its connection request
/// - `supervisor`: spawns and kills the transcoder processes
/// - `settings`: per-session limits and behaviour
/// - `active_sessions`: sessions not yet CLOSED, by id
/// - `shutdown`: parent of every session's cancellation token
pub struct SessionManager {
    router: SessionRouter,
    supervisor: ProcessSupervisor,
    settings: SessionConfig,
    active_sessions: RwLock<HashMap<Uuid, ActiveSession>>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(router: SessionRouter, supervisor: ProcessSupervisor, settings: SessionConfig) -> Self {
        info!(
            "Initializing SessionManager (max sessions: {}, frame queue: {})",
            if settings.max_sessions == 0 {
                String::from("unlimited")
            } else {
                settings.max_sessions.to_string()
            },
            settings.frame_queue_capacity
        );
        Self {
            router,
            supervisor,
            settings,
            active_sessions: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Runs one session over an upgraded connection, from routing to CLOSED.
    ///
    /// Connections that never become a session (routing failure, session limit, spawn failure,
    /// shutdown) are closed with a close code and the cause is returned as an error.
    pub async fn accept<S, K>(
        &self,
        request: SessionRequest,
        inbound: S,
        mut outbound: K,
    ) -> Result<SessionReport, SessionError>
    where
        S: Stream<Item = Result<InboundMessage, TransportError>> + Send + Unpin + 'static,
        K: Sink<OutboundMessage> + Send + Unpin,
        K::Error: fmt::Display,
    {
        let peer = peer_label(&request);

        if self.shutdown.is_cancelled() {
            self.reject(&mut outbound, &peer, close_code::GOING_AWAY, "server shutting down")
                .await;
            return Err(SessionError::ShuttingDown);
        }

        let route = match self.router.route(&request) {
            Ok(route) => route,
            Err(e) => {
                warn!("Rejecting connection from {}: {}", peer, e);
                self.reject(&mut outbound, &peer, close_code::POLICY_VIOLATION, &e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        let id = Uuid::new_v4();
        let session = Session::new(id, route, request.client_addr);
        let (state, state_rx) = watch::channel(session);
        let cancel = self.shutdown.child_token();

        {
            let mut sessions = self.active_sessions.write().await;
            let max = self.settings.max_sessions;
            if max > 0 && sessions.len() >= max {
                drop(sessions);
                warn!("Rejecting connection from {}: {} sessions active", peer, max);
                self.reject(
                    &mut outbound,
                    &peer,
                    close_code::TRY_AGAIN_LATER,
                    "too many active streams",
                )
                .await;
                return Err(SessionError::SessionLimitReached(max));
            }
            sessions.insert(
                id,
                ActiveSession {
                    state: state_rx,
                    cancel: cancel.clone(),
                },
            );
        }
        info!("[{}] session created for {}", id, peer);

        let destination = state.borrow().destination.clone();
        let handle = match self.supervisor.start(id, &destination) {
            Ok(handle) => handle,
            Err(e) => {
                error!("[{}] {}", id, e);
                state.send_modify(|s| {
                    s.close();
                });
                self.reject(
                    &mut outbound,
                    &peer,
                    close_code::INTERNAL_ERROR,
                    "transcoder unavailable",
                )
                .await;
                self.remove(id).await;
                return Err(e.into());
            }
        };

        state.send_modify(|s| s.open(handle.pid));
        info!("[{}] session open (transcoder pid {:?})", id, handle.pid);

        let worker = SessionWorker::new(
            state,
            handle,
            &self.supervisor,
            WorkerSettings::from(&self.settings),
            cancel,
        );
        let report = worker.run(inbound, outbound).await;

        self.remove(id).await;
        info!("[{}] session closed: {}", id, report);
        Ok(report)
    }

    /// Snapshots of every session not yet CLOSED, oldest first.
    pub async fn sessions(&self) -> Vec<Session> {
        let sessions = self.active_sessions.read().await;
        let mut snapshots: Vec<Session> = sessions.values().map(ActiveSession::snapshot).collect();
        snapshots.sort_by_key(|s| s.started_at);
        snapshots
    }

    pub async fn get_active_session_count(&self) -> usize {
        self.active_sessions.read().await.len()
    }

    pub fn supervisor_stats(&self) -> SupervisorStats {
        self.supervisor.get_stats()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Ends every session and refuses new ones. Waits up to `limit` for sessions to reach CLOSED
    /// and returns how many were active.
    pub async fn shutdown_all_sessions(&self, limit: Duration) -> usize {
        self.shutdown.cancel();
        let count = self.get_active_session_count().await;
        if count > 0 {
            info!("Shutting down {} active session(s)", count);
        }

        let deadline = Instant::now() + limit;
        loop {
            let remaining = self.get_active_session_count().await;
            if remaining == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "{} session(s) still active {:?} after shutdown",
                    remaining, limit
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        count
    }

    async fn remove(&self, id: Uuid) {
        if self.active_sessions.write().await.remove(&id).is_none() {
            debug!("[{}] session was not registered", id);
        }
    }

    async fn reject<K>(&self, outbound: &mut K, peer: &str, code: u16, reason: &str)
    where
        K: Sink<OutboundMessage> + Unpin,
        K::Error: fmt::Display,
    {
        let close = Some((code, reason.to_string()));
        if let Err(e) = close_connection(outbound, close, self.close_timeout()).await {
            debug!("Closing rejected connection from {}: {}", peer, e);
        }
    }

    fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.close_timeout_ms)
    }
}

fn peer_label(request: &SessionRequest) -> String {
    match request.client_addr {
        Some(addr) => addr.to_string(),
        None => String::from("unknown peer"),
    }
}
