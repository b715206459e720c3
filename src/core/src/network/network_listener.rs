//! # Network Listener Module
//!
//! Accepts browser WebSocket connections and hands each one to the [`SessionManager`].
//!
//! The WebSocket endpoint answers on any path; the routing token travels in the query string
//! (`wss://host/?key=<stream key>`). Every upgraded socket is split into an inbound stream of
//! [`InboundMessage`]s and an outbound sink of [`OutboundMessage`]s, so the session layer never
//! sees warp types.
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Browser         │───▶│ NetworkListener  │───▶│ SessionManager  │
//! │ (WebSocket)     │    │ - upgrade        │    │ ::accept        │
//! └─────────────────┘    │ - frame size cap │    └─────────────────┘
//!                        │ - message adapt  │
//!                        └──────────────────┘
//! ```

use bytes::Bytes;
use futures::{future, SinkExt, StreamExt};
use log::{debug, trace};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use super::session_request::SessionRequest;
use crate::error_handling::types::{SessionError, TransportError};
use crate::session_management::session_event::{InboundMessage, OutboundMessage};
use crate::session_management::session_manager::SessionManager;

/// WebSocket entry point of the relay.
#[derive(Clone)]
pub struct NetworkListener {
    session_manager: Arc<SessionManager>,
    max_frame_bytes: usize,
}

impl NetworkListener {
    pub fn new(session_manager: Arc<SessionManager>, max_frame_bytes: usize) -> Self {
        Self {
            session_manager,
            max_frame_bytes,
        }
    }

    /// Upgrade filter: matches WebSocket handshakes on any path.
    pub fn route(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let listener = self.clone();
        warp::ws()
            .and(warp::query::<HashMap<String, String>>())
            .and(warp::addr::remote())
            .map(
                move |ws: Ws, params: HashMap<String, String>, addr: Option<SocketAddr>| {
                    let listener = listener.clone();
                    let request = SessionRequest::new(params, addr);
                    ws.max_message_size(listener.max_frame_bytes)
                        .on_upgrade(move |socket| listener.handle_connection(request, socket))
                },
            )
    }

    async fn handle_connection(self, request: SessionRequest, socket: WebSocket) {
        debug!("WebSocket connection from {:?}", request.client_addr);
        let (sink, stream) = socket.split();
        let inbound = stream.map(to_inbound);
        let outbound = sink.with(|message: OutboundMessage| {
            future::ready(Ok::<Message, warp::Error>(to_ws_message(message)))
        });

        match self.session_manager.accept(request, inbound, outbound).await {
            Ok(report) => trace!("[{}] connection handler done", report.session.id),
            // Already logged where it happened; the socket has been closed.
            Err(SessionError::Routing(_))
            | Err(SessionError::SessionLimitReached(_))
            | Err(SessionError::ShuttingDown) => {}
            Err(e) => debug!("Connection ended without a session: {}", e),
        }
    }
}

/// Maps one WebSocket read to the transport-neutral inbound message.
pub fn to_inbound(result: Result<Message, warp::Error>) -> Result<InboundMessage, TransportError> {
    let message = result.map_err(|e| TransportError::Protocol(e.to_string()))?;
    if message.is_binary() {
        return Ok(InboundMessage::Binary(Bytes::copy_from_slice(message.as_bytes())));
    }
    if message.is_close() {
        let frame = message
            .close_frame()
            .map(|(code, reason)| (code, reason.to_string()));
        return Ok(InboundMessage::Close(frame));
    }
    match message.to_str() {
        Ok(text) => Ok(InboundMessage::Text(text.to_string())),
        // ping / pong
        Err(_) => Ok(InboundMessage::Control),
    }
}

pub fn to_ws_message(message: OutboundMessage) -> Message {
    match message {
        OutboundMessage::Info(text) => Message::text(text),
        OutboundMessage::Close { code, reason } => Message::close_with(code, reason),
    }
}
