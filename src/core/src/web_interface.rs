//! HTTP surface of the relay: the WebSocket endpoint plus a small status dashboard.

pub mod routes;
pub mod web_server;

pub use routes::{dashboard_route, list_sessions_route, SessionsResponse};
pub use web_server::WebServer;
