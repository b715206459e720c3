use log::{debug, trace, warn};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{Frame, PipeStats};
use crate::error_handling::types::PipeClosedError;
use crate::process_supervision::types::ProcessInput;

/// Bounded, order-preserving channel from a session's connection to its process input.
///
/// At most `capacity` frames wait in the queue, plus the one frame the writer task is currently
/// writing. Once the queue is full, [`FrameSender::send`] suspends until the writer catches up,
/// which in turn stops the session from reading its connection. A slow transcoder therefore slows
/// the browser down instead of growing memory.
pub struct FramePipe;

impl FramePipe {
    /// Starts the writer task for `input`.
    ///
    /// Cancelling `stop` abandons queued frames; dropping the returned sender instead lets the
    /// writer drain the queue, then closes the input.
    pub fn spawn<W>(
        session_id: Uuid,
        input: ProcessInput<W>,
        capacity: usize,
        stop: CancellationToken,
    ) -> (FrameSender, PipeWriter)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(write_frames(session_id, input, rx, stop.clone()));
        (
            FrameSender { tx },
            PipeWriter {
                session_id,
                handle,
                stop,
            },
        )
    }
}

/// Producer side of a [`FramePipe`].
#[derive(Debug)]
pub struct FrameSender {
    tx: mpsc::Sender<Frame>,
}

impl FrameSender {
    /// Queues `frame`, waiting while the queue is full.
    ///
    /// Fails once the writer has stopped.
    pub async fn send(&self, frame: Frame) -> Result<(), PipeClosedError> {
        self.tx.send(frame).await.map_err(|_| PipeClosedError)
    }

    /// Free queue slots.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

/// Writer side of a [`FramePipe`].
pub struct PipeWriter {
    session_id: Uuid,
    handle: JoinHandle<PipeStats>,
    stop: CancellationToken,
}

impl PipeWriter {
    /// Waits for the writer task and returns what it did.
    pub async fn finish(mut self) -> PipeStats {
        let joined = (&mut self.handle).await;
        self.collect(joined)
    }

    /// Waits up to `limit` for the queue to drain, then abandons whatever is left.
    ///
    /// Only drains once every [`FrameSender`] has been dropped.
    pub async fn drain(mut self, limit: Duration) -> PipeStats {
        match tokio::time::timeout(limit, &mut self.handle).await {
            Ok(joined) => self.collect(joined),
            Err(_) => {
                warn!(
                    "[{}] frame queue not drained within {:?}, abandoning it",
                    self.session_id, limit
                );
                self.abandon().await
            }
        }
    }

    /// Stops writing immediately; queued frames are dropped.
    pub async fn abandon(self) -> PipeStats {
        self.stop.cancel();
        self.finish().await
    }

    fn collect(&self, joined: Result<PipeStats, tokio::task::JoinError>) -> PipeStats {
        match joined {
            Ok(stats) => stats,
            Err(e) => {
                warn!("[{}] frame writer task failed: {}", self.session_id, e);
                PipeStats::default()
            }
        }
    }
}

async fn write_frames<W>(
    session_id: Uuid,
    mut input: ProcessInput<W>,
    mut rx: mpsc::Receiver<Frame>,
    stop: CancellationToken,
) -> PipeStats
where
    W: AsyncWrite + Unpin,
{
    let mut stats = PipeStats::default();
    trace!("[{}] frame writer started", session_id);

    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if input.is_closed() {
            stats.frames_dropped += 1;
            continue;
        }

        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                stats.frames_dropped += 1;
                break;
            }
            result = input.write(&frame) => result,
        };

        match result {
            Ok(()) => {
                stats.frames_written += 1;
                stats.bytes_written += frame.len() as u64;
                trace!("[{}] wrote {} bytes to process input", session_id, frame.len());
            }
            Err(PipeClosedError) => {
                warn!(
                    "[{}] process input closed, dropping this and further frames",
                    session_id
                );
                stats.frames_dropped += 1;
            }
        }
    }

    rx.close();
    while rx.try_recv().is_ok() {
        stats.frames_dropped += 1;
    }
    input.close().await;

    debug!(
        "[{}] frame writer finished: {} frames / {} bytes written, {} dropped",
        session_id, stats.frames_written, stats.bytes_written, stats.frames_dropped
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    fn frame(data: &[u8]) -> Frame {
        Frame::from(data.to_vec())
    }

    #[tokio::test]
    async fn test_frames_are_written_in_order() {
        let (writer, mut reader) = tokio::io::duplex(64);
        let id = Uuid::new_v4();
        let (sender, pipe) = FramePipe::spawn(
            id,
            ProcessInput::new(id, writer),
            4,
            CancellationToken::new(),
        );

        let collector = tokio::spawn(async move {
            let mut received = Vec::new();
            reader.read_to_end(&mut received).await.map(|_| received)
        });

        let mut expected = Vec::new();
        for i in 0..200u32 {
            let data = format!("frame-{};", i).into_bytes();
            expected.extend_from_slice(&data);
            assert_ok!(sender.send(Frame::from(data)).await);
        }
        drop(sender);

        let stats = pipe.finish().await;
        assert_eq!(stats.frames_written, 200);
        assert_eq!(stats.bytes_written, expected.len() as u64);
        assert_eq!(stats.frames_dropped, 0);

        let received = collector.await.unwrap().unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_full_queue_suspends_the_producer() {
        let capacity = 3;
        // The read half is never read: the first write blocks once the 16-byte buffer is full.
        let (writer, _reader) = tokio::io::duplex(16);
        let id = Uuid::new_v4();
        let stop = CancellationToken::new();
        let (sender, pipe) =
            FramePipe::spawn(id, ProcessInput::new(id, writer), capacity, stop.clone());

        // One frame held by the writer, `capacity` frames queued.
        for _ in 0..=capacity {
            timeout(Duration::from_secs(1), sender.send(frame(&[1u8; 64])))
                .await
                .expect("send within the bound must not block")
                .unwrap();
        }
        assert_eq!(sender.available(), 0);

        let blocked = timeout(Duration::from_millis(200), sender.send(frame(&[2u8; 64]))).await;
        assert!(blocked.is_err(), "send beyond the bound must suspend");

        stop.cancel();
        let stats = pipe.finish().await;
        assert_eq!(stats.frames_written, 0);
        assert_eq!(stats.frames_dropped, capacity as u64 + 1);
    }

    #[tokio::test]
    async fn test_closed_input_drops_frames_without_failing() {
        let (writer, reader) = tokio::io::duplex(64);
        drop(reader);
        let id = Uuid::new_v4();
        let (sender, pipe) = FramePipe::spawn(
            id,
            ProcessInput::new(id, writer),
            8,
            CancellationToken::new(),
        );

        for _ in 0..3 {
            sender.send(frame(b"data")).await.unwrap();
        }
        drop(sender);

        let stats = pipe.finish().await;
        assert_eq!(stats.frames_written, 0);
        assert_eq!(stats.frames_dropped, 3);
    }

    #[tokio::test]
    async fn test_stop_rejects_further_sends() {
        let (writer, _reader) = tokio::io::duplex(64);
        let id = Uuid::new_v4();
        let stop = CancellationToken::new();
        let (sender, pipe) = FramePipe::spawn(id, ProcessInput::new(id, writer), 2, stop.clone());

        stop.cancel();
        pipe.finish().await;

        assert_eq!(sender.send(frame(b"late")).await, Err(PipeClosedError));
    }

    #[tokio::test]
    async fn test_drain_gives_up_on_a_stalled_process() {
        let (writer, _reader) = tokio::io::duplex(16);
        let id = Uuid::new_v4();
        let (sender, pipe) = FramePipe::spawn(
            id,
            ProcessInput::new(id, writer),
            4,
            CancellationToken::new(),
        );

        sender.send(frame(&[1u8; 8])).await.unwrap();
        sender.send(frame(&[2u8; 64])).await.unwrap();
        sender.send(frame(&[3u8; 8])).await.unwrap();
        drop(sender);

        let stats = timeout(Duration::from_secs(2), pipe.drain(Duration::from_millis(100)))
            .await
            .expect("drain must be bounded");
        assert_eq!(stats.frames_written, 1);
        assert_eq!(stats.frames_dropped, 2);
    }
}
