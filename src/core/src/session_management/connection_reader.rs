use futures::{Stream, StreamExt};
use log::{trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::session_event::{InboundMessage, SessionEvent};
use crate::error_handling::types::TransportError;

enum Delivery {
    Sent,
    /// Sent, and the connection ended while the send was pending.
    SentThenEnded(SessionEvent),
    Stopped,
}

/// Translates a session's inbound connection into [`SessionEvent`]s.
///
/// Reads pause while the worker is not taking events, so a busy transcoder slows the browser
/// down. A pause lasts at most `stall_timeout`: past it the reader keeps reading and discards
/// frames until the worker catches up, so a close or transport error queued behind them is still
/// seen. `connection_done` is cancelled as soon as the connection ends, even if the worker has
/// not received that event yet.
pub struct ConnectionReader<S> {
    session_id: Uuid,
    inbound: S,
    events: mpsc::Sender<SessionEvent>,
    stop: CancellationToken,
    connection_done: CancellationToken,
    stall_timeout: Duration,
    discarded: Arc<AtomicU64>,
}

impl<S> ConnectionReader<S>
where
    S: Stream<Item = Result<InboundMessage, TransportError>> + Send + Unpin + 'static,
{
    pub fn new(
        session_id: Uuid,
        inbound: S,
        events: mpsc::Sender<SessionEvent>,
        stop: CancellationToken,
        connection_done: CancellationToken,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            session_id,
            inbound,
            events,
            stop,
            connection_done,
            stall_timeout,
            discarded: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of frames discarded during stalls, shared with the running reader.
    pub fn discarded(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.discarded)
    }

    pub fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        let mut ended = None;
        loop {
            let event = match ended.take() {
                Some(event) => event,
                None => {
                    let next = tokio::select! {
                        biased;
                        _ = self.stop.cancelled() => break,
                        next = self.inbound.next() => next,
                    };
                    match self.translate(next) {
                        Some(event) => event,
                        None => continue,
                    }
                }
            };

            let last = event.ends_connection();
            match self.deliver(event).await {
                Delivery::Sent if !last => {}
                Delivery::SentThenEnded(event) => ended = Some(event),
                Delivery::Sent | Delivery::Stopped => break,
            }
        }
        trace!("[{}] connection reader stopped", self.session_id);
    }

    fn translate(
        &self,
        next: Option<Result<InboundMessage, TransportError>>,
    ) -> Option<SessionEvent> {
        let event = match next {
            Some(message) => SessionEvent::from_inbound(message)?,
            None => SessionEvent::ConnectionClosed(None),
        };
        if event.ends_connection() {
            self.connection_done.cancel();
        }
        Some(event)
    }

    async fn deliver(&mut self, event: SessionEvent) -> Delivery {
        let id = self.session_id;
        let last = event.ends_connection();
        let send = self.events.send(event);
        tokio::pin!(send);
        let stall = tokio::time::sleep(self.stall_timeout);
        tokio::pin!(stall);

        let mut discarding = false;
        let mut dropped = 0u64;
        let mut ended = None;
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Delivery::Stopped,
                sent = &mut send => {
                    if sent.is_err() {
                        return Delivery::Stopped;
                    }
                    if dropped > 0 {
                        warn!("[{}] {} frame(s) discarded while the transcoder stalled", id, dropped);
                    }
                    return match ended {
                        Some(event) => Delivery::SentThenEnded(event),
                        None => Delivery::Sent,
                    };
                }
                _ = &mut stall, if !discarding && !last => {
                    warn!(
                        "[{}] transcoder not keeping up for {:?}, discarding frames",
                        id, self.stall_timeout
                    );
                    discarding = true;
                }
                next = self.inbound.next(), if discarding && ended.is_none() => {
                    match self.translate(next) {
                        Some(SessionEvent::Frame(_)) => {
                            dropped += 1;
                            self.discarded.fetch_add(1, Ordering::Relaxed);
                        }
                        Some(event) if event.ends_connection() => ended = Some(event),
                        Some(_) | None => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::channel::mpsc as channel;

    type Inbound = channel::UnboundedSender<Result<InboundMessage, TransportError>>;

    struct Fixture {
        inbound: Inbound,
        read: Arc<AtomicU64>,
        discarded: Arc<AtomicU64>,
        stop: CancellationToken,
    }

    fn reader(
        events: mpsc::Sender<SessionEvent>,
        connection_done: &CancellationToken,
        stall_timeout: Duration,
    ) -> Fixture {
        let (inbound, rx) = channel::unbounded();
        let read = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&read);
        let rx = rx.inspect(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let stop = CancellationToken::new();
        let reader = ConnectionReader::new(
            Uuid::new_v4(),
            rx,
            events,
            stop.clone(),
            connection_done.clone(),
            stall_timeout,
        );
        let discarded = reader.discarded();
        reader.spawn();
        Fixture {
            inbound,
            read,
            discarded,
            stop,
        }
    }

    fn frame(byte: u8) -> Result<InboundMessage, TransportError> {
        Ok(InboundMessage::Binary(Bytes::from(vec![byte; 4])))
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_arrive_in_order() {
        let (events_tx, mut events) = mpsc::channel(8);
        let done = CancellationToken::new();
        let Fixture { inbound, .. } = reader(events_tx, &done, Duration::from_secs(3));

        inbound.unbounded_send(frame(1)).unwrap();
        inbound.unbounded_send(Ok(InboundMessage::Control)).unwrap();
        inbound
            .unbounded_send(Ok(InboundMessage::Text(String::from("hi"))))
            .unwrap();
        inbound.unbounded_send(frame(2)).unwrap();
        drop(inbound);

        assert!(matches!(events.recv().await, Some(SessionEvent::Frame(f)) if f.as_bytes() == [1; 4]));
        assert!(matches!(events.recv().await, Some(SessionEvent::Text(t)) if t == "hi"));
        assert!(matches!(events.recv().await, Some(SessionEvent::Frame(f)) if f.as_bytes() == [2; 4]));
        assert!(matches!(events.recv().await, Some(SessionEvent::ConnectionClosed(None))));
        assert!(events.recv().await.is_none());
        assert!(done.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_pause_while_the_worker_is_busy() {
        let (events_tx, mut events) = mpsc::channel(1);
        let done = CancellationToken::new();
        let fixture = reader(events_tx, &done, Duration::from_secs(3));

        for byte in 1..=4 {
            fixture.inbound.unbounded_send(frame(byte)).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        // One event queued and one pending: nothing else has been read.
        assert_eq!(fixture.read.load(Ordering::Relaxed), 2);
        assert_eq!(fixture.discarded.load(Ordering::Relaxed), 0);

        for byte in 1..=4 {
            assert!(matches!(events.recv().await, Some(SessionEvent::Frame(f)) if f.as_bytes() == [byte; 4]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_behind_a_stall_is_seen() {
        let (events_tx, mut events) = mpsc::channel(1);
        let done = CancellationToken::new();
        let Fixture {
            inbound, discarded, ..
        } = reader(events_tx, &done, Duration::from_millis(200));

        for byte in 0..20 {
            inbound.unbounded_send(frame(byte)).unwrap();
        }
        inbound.unbounded_send(Ok(InboundMessage::Close(None))).unwrap();
        drop(inbound);

        tokio::time::timeout(Duration::from_secs(1), done.cancelled())
            .await
            .expect("connection end not observed during the stall");
        // Frames 0 and 1 are queued and pending; everything after them up to the close is gone.
        assert_eq!(discarded.load(Ordering::Relaxed), 18);

        assert!(matches!(events.recv().await, Some(SessionEvent::Frame(f)) if f.as_bytes() == [0; 4]));
        assert!(matches!(events.recv().await, Some(SessionEvent::Frame(f)) if f.as_bytes() == [1; 4]));
        assert!(matches!(events.recv().await, Some(SessionEvent::ConnectionClosed(None))));
        assert!(events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_behind_a_stall_is_seen() {
        let (events_tx, mut events) = mpsc::channel(1);
        let done = CancellationToken::new();
        let Fixture { inbound, .. } = reader(events_tx, &done, Duration::from_millis(200));

        for byte in 0..5 {
            inbound.unbounded_send(frame(byte)).unwrap();
        }
        inbound
            .unbounded_send(Err(TransportError::Protocol(String::from("reset"))))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), done.cancelled())
            .await
            .expect("transport error not observed during the stall");

        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(SessionEvent::ConnectionError(TransportError::Protocol(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_a_pending_delivery() {
        let (events_tx, mut events) = mpsc::channel(1);
        let done = CancellationToken::new();
        let Fixture { inbound, stop, .. } = reader(events_tx, &done, Duration::from_secs(3));

        inbound.unbounded_send(frame(1)).unwrap();
        inbound.unbounded_send(frame(2)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.cancel();

        assert!(events.recv().await.is_some());
        assert!(events.recv().await.is_none());
        assert!(!done.is_cancelled());
    }
}
