use log::{info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Log target of lines read from a transcoder's diagnostic stream.
pub const TRANSCODER_LOG_TARGET: &str = "transcoder";

/// Longest diagnostic line kept whole; longer runs are split.
pub const MAX_LINE_BYTES: usize = 4096;

const READ_CHUNK: usize = 4096;

/// Forwards a transcoder's diagnostic output to the relay log, line by line.
pub struct DiagnosticRelay;

impl DiagnosticRelay {
    /// Reads `stream` until it ends, logging each line under [`TRANSCODER_LOG_TARGET`] and handing
    /// it to `on_line`. Resolves to the number of lines seen.
    ///
    /// `on_line` runs on the reading task and must not block.
    pub fn spawn<R, F>(session_id: Uuid, stream: R, on_line: F) -> JoinHandle<u64>
    where
        R: AsyncRead + Unpin + Send + 'static,
        F: FnMut(String) + Send + 'static,
    {
        tokio::spawn(relay_lines(session_id, stream, on_line))
    }
}

async fn relay_lines<R, F>(session_id: Uuid, mut stream: R, mut on_line: F) -> u64
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut splitter = LineSplitter::new(MAX_LINE_BYTES);
    let mut buf = vec![0u8; READ_CHUNK];
    let mut lines = 0u64;

    let mut emit = |line: String| {
        info!(target: TRANSCODER_LOG_TARGET, "[{}] {}", session_id, line);
        on_line(line);
        lines += 1;
    };

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => splitter.push(&buf[..n]).into_iter().for_each(&mut emit),
            Err(e) => {
                warn!("[{}] diagnostic stream read failed: {}", session_id, e);
                break;
            }
        }
    }
    if let Some(line) = splitter.finish() {
        emit(line);
    }

    trace!("[{}] diagnostic stream ended after {} lines", session_id, lines);
    lines
}

/// Splits a byte stream into text lines.
///
/// Both `\n` and `\r` end a line, since ffmpeg rewrites its progress line in place with carriage
/// returns. Blank lines are skipped and invalid UTF-8 is replaced.
#[derive(Debug)]
pub struct LineSplitter {
    pending: Vec<u8>,
    max_line: usize,
}

impl LineSplitter {
    pub fn new(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line: max_line.max(1),
        }
    }

    /// Consumes `chunk`, returning every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.take_line(&mut lines);
            } else {
                self.pending.push(byte);
                if self.pending.len() >= self.max_line {
                    self.take_line(&mut lines);
                }
            }
        }
        lines
    }

    /// Returns the unterminated tail, if any.
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.take_line(&mut lines);
        lines.pop()
    }

    fn take_line(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        if !line.is_empty() {
            lines.push(line);
        }
    }
}
