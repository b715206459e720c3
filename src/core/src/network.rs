//! Inbound side of the relay: the WebSocket listener, request metadata and routing.

pub mod network_listener;
pub mod session_request;
pub mod session_router;

pub use network_listener::NetworkListener;
pub use session_request::SessionRequest;
pub use session_router::{DestinationAddress, Route, SessionRouter, ROUTING_PARAM};
