//! Transcoder process supervision.
//!
//! One external transcoder runs per session. This module spawns it with the argument template
//! built by a [`TranscoderCommand`], hands out its input and diagnostic channels, reports its
//! exit exactly once and terminates it on request.
//!
//! Re-exports:
//! - [`ProcessSupervisor`]: spawn/write/observe/kill entry point.
//! - [`ProcessHandle`], [`ExitReport`], [`KillOutcome`], [`SupervisorStats`]: core types.
//!
//! Example (non-running):
//! ```ignore
//! use livepush::process_supervision::{FfmpegCommand, KillReason, ProcessSupervisor};
//!
//! let supervisor = ProcessSupervisor::new(FfmpegCommand::new(config.transcoder.clone()), grace);
//! let mut handle = supervisor.start(session_id, &destination)?;
//! supervisor.write(&mut handle, &frame).await?;
//! let outcome = supervisor.kill(&mut handle, KillReason::ConnectionClosed).await;
//! println!("exited with {}", outcome.report);
//! ```

#[cfg(all(test, unix))]
pub mod integration_tests;
pub mod process_supervisor;
#[cfg(test)]
pub mod tests;
pub mod transcoder_command;
pub mod types;

pub use process_supervisor::ProcessSupervisor;
pub use transcoder_command::{FfmpegCommand, TranscoderCommand};
pub use types::{
    ExitReport, ExitSignal, KillOutcome, KillReason, ProcessHandle, ProcessInput, SupervisorStats,
};
