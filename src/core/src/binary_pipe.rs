//! Byte channels between a session's connection and its transcoder.
//!
//! [`FramePipe`] carries media frames into the process input under a fixed bound, so a stalled
//! transcoder pushes back on the connection rather than buffering without limit.
//! [`DiagnosticRelay`] carries the transcoder's diagnostic output the other way, into the log.

pub mod diagnostic_relay;
pub mod frame_pipe;
pub mod types;

pub use diagnostic_relay::{DiagnosticRelay, LineSplitter, TRANSCODER_LOG_TARGET};
pub use frame_pipe::{FramePipe, FrameSender, PipeWriter};
pub use types::{Frame, PipeStats};
