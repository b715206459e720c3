//! Session management core module.
//!
//! A session binds one inbound connection to one transcoder process. The [`SessionManager`]
//! routes and admits connections and keeps the registry of live sessions; each admitted session
//! is then driven by a [`SessionWorker`] until both its connection and its process are gone.
//!
//! ```text
//! connection ──▶ SessionManager::accept ──▶ SessionRouter ──▶ ProcessSupervisor::start
//!                                                  │
//!                                                  ▼
//!                       SessionWorker (events: frame / text / diagnostic / closed / exited)
//!                         │                                   │
//!                         ▼                                   ▼
//!                     FramePipe ──▶ transcoder stdin     DiagnosticRelay ◀── transcoder stderr
//! ```

/// Registry entries for sessions not yet closed.
pub mod active_session;
/// Inbound connection to session events, with bounded stalls.
pub mod connection_reader;
/// Session data model and its two state machines.
pub mod session;
/// Messages exchanged with a session's connection and worker.
pub mod session_event;
/// The session lifecycle coordinator.
pub mod session_manager;
/// The per-session task.
pub mod session_worker;

pub use connection_reader::ConnectionReader;
pub use session::{ConnectionState, ProcessState, Session};
pub use session_event::{close_code, InboundMessage, OutboundMessage, SessionEvent};
pub use session_manager::SessionManager;
pub use session_worker::{SessionEnd, SessionReport, SessionWorker, WorkerSettings};
