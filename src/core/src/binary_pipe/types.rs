//! Common data types used across the binary_pipe subsystem.

use bytes::Bytes;
use serde::Serialize;

/// One opaque chunk of media received on a session's connection.
///
/// The relay never looks inside a frame; it is forwarded to the transcoder byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Frame(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Frame(Bytes::from(data))
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Frame(data)
    }
}

impl From<&'static [u8]> for Frame {
    fn from(data: &'static [u8]) -> Self {
        Frame(Bytes::from_static(data))
    }
}

/// Counters reported by a frame pipe once it has shut down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipeStats {
    /// Frames fully written to the process input.
    pub frames_written: u64,
    /// Bytes fully written to the process input.
    pub bytes_written: u64,
    /// Frames discarded because the process input had closed.
    pub frames_dropped: u64,
}
