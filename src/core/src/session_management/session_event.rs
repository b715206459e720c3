use bytes::Bytes;

use crate::binary_pipe::types::Frame;
use crate::error_handling::types::TransportError;
use crate::process_supervision::types::ExitReport;

/// Close codes sent on the inbound connection when the relay ends a session.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

/// A message read from the inbound connection, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Binary(Bytes),
    Text(String),
    /// The far end closed, with its close code and reason if it sent one.
    Close(Option<(u16, String)>),
    /// Transport-level keepalive traffic.
    Control,
}

/// A message the relay writes to the inbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Informational text, such as a mirrored diagnostic line.
    Info(String),
    Close { code: u16, reason: String },
}

/// Everything a session worker reacts to, delivered through one channel in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    Frame(Frame),
    Text(String),
    Diagnostic(String),
    ConnectionClosed(Option<(u16, String)>),
    ConnectionError(TransportError),
    ProcessExited(ExitReport),
}

impl SessionEvent {
    /// Maps one inbound read to an event; `None` for traffic the session ignores.
    pub fn from_inbound(message: Result<InboundMessage, TransportError>) -> Option<Self> {
        match message {
            Ok(InboundMessage::Binary(data)) => Some(SessionEvent::Frame(Frame::from(data))),
            Ok(InboundMessage::Text(text)) => Some(SessionEvent::Text(text)),
            Ok(InboundMessage::Close(frame)) => Some(SessionEvent::ConnectionClosed(frame)),
            Ok(InboundMessage::Control) => None,
            Err(e) => Some(SessionEvent::ConnectionError(e)),
        }
    }

    /// Events after which the connection yields nothing more.
    pub fn ends_connection(&self) -> bool {
        matches!(
            self,
            SessionEvent::ConnectionClosed(_) | SessionEvent::ConnectionError(_)
        )
    }
}
