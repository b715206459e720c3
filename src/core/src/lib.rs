//! Browser live-stream relay.
//!
//! Each WebSocket connection carrying a `key` query parameter becomes a session: its binary
//! messages are piped into a dedicated transcoder process that pushes the stream to
//! `<upstream base>/<key>`. Connection and process end together.

pub mod binary_pipe;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod network;
pub mod process_supervision;
pub mod session_management;
pub mod web_interface;
