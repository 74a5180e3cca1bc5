//! Reconnect loop shared by the broker transports.
//!
//! The first session is established by `subscribe` so an unreachable broker
//! is reported to the listener. After that the supervisor owns the session:
//! when the stream ends or errors it reconnects with exponential backoff,
//! and only the stop signal ends the task.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{EventSink, TransportError, forward};

/// Opens broker sessions and reads payloads from them.
#[async_trait]
pub(crate) trait Connector: Send + 'static {
    type Session: Send + 'static;

    async fn connect(&mut self) -> Result<Self::Session, TransportError>;

    /// Next payload, or `None` once the session has ended.
    async fn next_payload(
        &mut self,
        session: &mut Self::Session,
    ) -> Option<Result<Bytes, TransportError>>;

    async fn disconnect(&mut self, session: Self::Session);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    fn grow(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// A running reconnect loop.
pub(crate) struct Supervised {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Supervised {
    pub(crate) fn spawn<C: Connector>(
        kind: &'static str,
        connector: C,
        session: C::Session,
        sink: EventSink,
        backoff: Backoff,
    ) -> Self {
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(supervise(kind, connector, session, sink, backoff, stop_rx));
        Self { stop, handle }
    }

    /// Signal the loop and wait for it to release its session.
    pub(crate) async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}

enum Outcome {
    Stopped,
    SinkClosed,
    Ended,
}

async fn supervise<C: Connector>(
    kind: &'static str,
    mut connector: C,
    first: C::Session,
    sink: EventSink,
    backoff: Backoff,
    mut stop: oneshot::Receiver<()>,
) {
    let mut session = Some(first);
    let mut delay = backoff.initial;

    loop {
        if let Some(mut live) = session.take() {
            let outcome = pump(kind, &mut connector, &mut live, &sink, &mut stop).await;
            connector.disconnect(live).await;
            match outcome {
                Outcome::Stopped | Outcome::SinkClosed => return,
                Outcome::Ended => {
                    warn!(
                        transport = kind,
                        retry_in_ms = delay.as_millis() as u64,
                        "subscription ended, reconnecting"
                    );
                }
            }
        }

        tokio::select! {
            _ = &mut stop => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let connected = tokio::select! {
            _ = &mut stop => return,
            connected = connector.connect() => connected,
        };
        match connected {
            Ok(live) => {
                info!(transport = kind, "reconnected");
                session = Some(live);
                delay = backoff.initial;
            }
            Err(err) => {
                delay = backoff.grow(delay);
                warn!(
                    transport = kind,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "reconnect failed"
                );
            }
        }
    }
}

async fn pump<C: Connector>(
    kind: &'static str,
    connector: &mut C,
    session: &mut C::Session,
    sink: &EventSink,
    stop: &mut oneshot::Receiver<()>,
) -> Outcome {
    loop {
        let next = tokio::select! {
            _ = &mut *stop => return Outcome::Stopped,
            next = connector.next_payload(session) => next,
        };
        match next {
            Some(Ok(payload)) => {
                if !forward(sink, kind, payload) {
                    return Outcome::SinkClosed;
                }
            }
            Some(Err(err)) => {
                warn!(transport = kind, error = %err, "subscription failed");
                return Outcome::Ended;
            }
            None => return Outcome::Ended,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;
    use crate::cache::transport::TransportMessage;

    /// Each session yields one payload and then ends, like a dropped broker
    /// connection. The first `refuse` connect attempts fail.
    struct ShortLived {
        connects: Arc<AtomicUsize>,
        disconnects: Arc<AtomicUsize>,
        refuse: usize,
    }

    #[async_trait]
    impl Connector for ShortLived {
        type Session = VecDeque<Bytes>;

        async fn connect(&mut self) -> Result<Self::Session, TransportError> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            if n < self.refuse {
                return Err(TransportError::Redis(::redis::RedisError::from((
                    ::redis::ErrorKind::IoError,
                    "connection refused",
                ))));
            }
            Ok(VecDeque::from([Bytes::from(format!("session-{n}"))]))
        }

        async fn next_payload(
            &mut self,
            session: &mut Self::Session,
        ) -> Option<Result<Bytes, TransportError>> {
            session.pop_front().map(Ok)
        }

        async fn disconnect(&mut self, _session: Self::Session) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast() -> Backoff {
        Backoff {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
        }
    }

    fn connector(refuse: usize) -> (ShortLived, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        (
            ShortLived {
                connects: connects.clone(),
                disconnects: disconnects.clone(),
                refuse,
            },
            connects,
            disconnects,
        )
    }

    async fn next(rx: &mut mpsc::Receiver<TransportMessage>) -> Bytes {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("payload before timeout")
            .expect("sink open")
            .payload
    }

    #[tokio::test]
    async fn ended_stream_triggers_a_new_connection() {
        let (connector, connects, disconnects) = connector(0);
        let (sink, mut rx) = mpsc::channel(8);
        let first = VecDeque::from([Bytes::from_static(b"initial")]);

        let supervised = Supervised::spawn("fake", connector, first, sink, fast());

        assert_eq!(next(&mut rx).await, Bytes::from_static(b"initial"));
        assert_eq!(next(&mut rx).await, Bytes::from_static(b"session-0"));
        assert_eq!(next(&mut rx).await, Bytes::from_static(b"session-1"));
        assert!(connects.load(Ordering::SeqCst) >= 2);

        supervised.stop().await;
        assert_eq!(
            disconnects.load(Ordering::SeqCst),
            connects.load(Ordering::SeqCst) + 1
        );
    }

    #[tokio::test]
    async fn failed_reconnects_are_retried() {
        let (connector, connects, _) = connector(3);
        let (sink, mut rx) = mpsc::channel(8);

        let supervised = Supervised::spawn("fake", connector, VecDeque::new(), sink, fast());

        assert_eq!(next(&mut rx).await, Bytes::from_static(b"session-3"));
        assert!(connects.load(Ordering::SeqCst) >= 4);

        supervised.stop().await;
    }

    #[tokio::test]
    async fn stop_interrupts_backoff() {
        let (connector, connects, _) = connector(0);
        let (sink, _rx) = mpsc::channel(8);
        let slow = Backoff {
            initial: Duration::from_secs(60),
            max: Duration::from_secs(60),
        };

        let supervised = Supervised::spawn("fake", connector, VecDeque::new(), sink, slow);
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), supervised.stop())
            .await
            .expect("stop should not wait out the backoff");
        assert_eq!(connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.grow(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(backoff.grow(Duration::from_secs(20)), Duration::from_secs(30));
    }
}
