//! In-process transport backed by a broadcast channel.
//!
//! Used by the webhook route, which publishes request bodies here so they
//! flow through the same decode and dispatch path as broker messages.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use super::{EventSink, EventTransport, TransportError, forward};

/// Publishing half of a [`LocalTransport`].
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    tx: broadcast::Sender<Bytes>,
}

impl LocalPublisher {
    /// Publish a raw payload. Returns the number of active subscribers.
    pub fn publish(&self, payload: impl Into<Bytes>) -> usize {
        self.tx.send(payload.into()).unwrap_or(0)
    }
}

pub struct LocalTransport {
    kind: &'static str,
    tx: broadcast::Sender<Bytes>,
    task: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl LocalTransport {
    pub fn new(kind: &'static str, capacity: usize) -> (Self, LocalPublisher) {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let publisher = LocalPublisher { tx: tx.clone() };
        (
            Self {
                kind,
                tx,
                task: None,
            },
            publisher,
        )
    }
}

#[async_trait]
impl EventTransport for LocalTransport {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn subscribe(&mut self, sink: EventSink) -> Result<(), TransportError> {
        if self.task.is_some() {
            return Err(TransportError::AlreadySubscribed(self.kind));
        }

        let kind = self.kind;
        let mut rx = self.tx.subscribe();
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    _ = &mut stop_rx => break,
                    received = rx.recv() => match received {
                        Ok(payload) => payload,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(transport = kind, skipped, "local transport lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                if !forward(&sink, kind, payload) {
                    break;
                }
            }
        });

        self.task = Some((stop_tx, handle));
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        if let Some((stop, handle)) = self.task.take() {
            let _ = stop.send(());
            let _ = handle.await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.unsubscribe().await
    }
}
