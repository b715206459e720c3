use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::network::session_router::{DestinationAddress, Route};

/// Connection side of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Process side of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    NotStarted,
    Running,
    Exited,
    Killed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::NotStarted => "NOT_STARTED",
            ProcessState::Running => "RUNNING",
            ProcessState::Exited => "EXITED",
            ProcessState::Killed => "KILLED",
        };
        f.write_str(name)
    }
}

/// One live stream: a browser connection bound to its transcoder process.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub routing_token: String,
    pub destination: DestinationAddress,
    pub client_addr: Option<SocketAddr>,
    pub connection_state: ConnectionState,
    pub process_state: ProcessState,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub frames_forwarded: u64,
    pub bytes_forwarded: u64,
    /// Frames read past a transcoder stall and never forwarded.
    pub frames_discarded: u64,
}

impl Session {
    pub fn new(id: Uuid, route: Route, client_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            routing_token: route.token,
            destination: route.destination,
            client_addr,
            connection_state: ConnectionState::Connecting,
            process_state: ProcessState::NotStarted,
            pid: None,
            started_at: Utc::now(),
            ended_at: None,
            frames_forwarded: 0,
            bytes_forwarded: 0,
            frames_discarded: 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.connection_state == ConnectionState::Closed
    }

    /// Marks the transcoder as spawned and the connection as open.
    pub fn open(&mut self, pid: Option<u32>) {
        if self.is_closed() {
            return;
        }
        self.pid = pid;
        self.process_state = ProcessState::Running;
        self.connection_state = ConnectionState::Open;
    }

    pub fn begin_closing(&mut self) {
        if !self.is_closed() {
            self.connection_state = ConnectionState::Closing;
        }
    }

    /// Records how the process ended. Only a running process can change state.
    pub fn process_ended(&mut self, state: ProcessState) {
        if self.process_state == ProcessState::Running
            && matches!(state, ProcessState::Exited | ProcessState::Killed)
        {
            self.process_state = state;
        }
    }

    /// Enters the terminal state. Returns `false` if the session was already closed.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.connection_state = ConnectionState::Closed;
        self.ended_at = Some(Utc::now());
        true
    }

    pub fn record_frame(&mut self, len: usize) {
        self.frames_forwarded += 1;
        self.bytes_forwarded += len as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::session_router::SessionRouter;

    fn session() -> Session {
        let router = SessionRouter::new("rtmp://ingest.test/app");
        let route = Route {
            token: String::from("abc123"),
            destination: router.destination_for("abc123"),
        };
        Session::new(Uuid::new_v4(), route, None)
    }

    #[test]
    fn test_lifecycle() {
        let mut session = session();
        assert_eq!(session.connection_state, ConnectionState::Connecting);
        assert_eq!(session.process_state, ProcessState::NotStarted);

        session.open(Some(42));
        assert_eq!(session.connection_state, ConnectionState::Open);
        assert_eq!(session.process_state, ProcessState::Running);
        assert_eq!(session.pid, Some(42));

        session.begin_closing();
        session.process_ended(ProcessState::Killed);
        assert_eq!(session.connection_state, ConnectionState::Closing);
        assert_eq!(session.process_state, ProcessState::Killed);

        assert!(session.close());
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut session = session();
        assert!(session.close());
        let ended_at = session.ended_at;

        assert!(!session.close());
        session.open(Some(1));
        session.begin_closing();
        assert_eq!(session.connection_state, ConnectionState::Closed);
        assert_eq!(session.process_state, ProcessState::NotStarted);
        assert_eq!(session.ended_at, ended_at);
    }

    #[test]
    fn test_process_end_is_recorded_once() {
        let mut session = session();
        session.open(None);
        session.process_ended(ProcessState::Exited);
        session.process_ended(ProcessState::Killed);
        assert_eq!(session.process_state, ProcessState::Exited);
    }

    #[test]
    fn test_states_serialize_in_upper_case() {
        let mut session = session();
        session.open(Some(7));
        session.record_frame(10);

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["connection_state"], "OPEN");
        assert_eq!(json["process_state"], "RUNNING");
        assert_eq!(json["destination"], "rtmp://ingest.test/app/abc123");
        assert_eq!(json["bytes_forwarded"], 10);
    }
}
