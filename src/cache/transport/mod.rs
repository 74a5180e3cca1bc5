//! Event transports feeding the invalidation listener.
//!
//! A transport owns its connection and forwards raw payloads into an
//! [`EventSink`]; decoding and dispatch happen in the listener. Broker
//! transports reconnect with backoff until they are unsubscribed.

mod local;
mod rabbit;
mod redis;
mod supervisor;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use super::listener::METRIC_EVENTS_DROPPED;

pub use local::{LocalPublisher, LocalTransport};
pub use rabbit::{RabbitSettings, RabbitTransport};
pub use redis::{RedisSettings, RedisTransport};

/// A raw payload received by a transport.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub transport: &'static str,
    pub payload: Bytes,
}

/// Bounded channel into the listener's dispatch loop.
pub type EventSink = mpsc::Sender<TransportMessage>;

/// Hand a payload to the listener without waiting on a full buffer.
///
/// A full buffer drops the payload. Returns `false` once the listener is gone.
pub(crate) fn forward(sink: &EventSink, transport: &'static str, payload: Bytes) -> bool {
    match sink.try_send(TransportMessage { transport, payload }) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            counter!(METRIC_EVENTS_DROPPED, "transport" => transport, "reason" => "overflow")
                .increment(1);
            warn!(transport, "listener buffer full, dropping event");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("redis transport error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("rabbitmq transport error: {0}")]
    Rabbit(#[from] lapin::Error),
    #[error("transport `{0}` is already subscribed")]
    AlreadySubscribed(&'static str),
}

/// Capability set shared by every event transport.
#[async_trait]
pub trait EventTransport: Send {
    /// Short label used in logs and metrics.
    fn kind(&self) -> &'static str;

    /// Connect and start forwarding payloads into `sink`.
    async fn subscribe(&mut self, sink: EventSink) -> Result<(), TransportError>;

    /// Stop forwarding payloads. Calling it when not subscribed is a no-op.
    async fn unsubscribe(&mut self) -> Result<(), TransportError>;

    /// Release the underlying connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let (sink, mut rx) = mpsc::channel(1);

        assert!(forward(&sink, "local", Bytes::from_static(b"first")));
        assert!(forward(&sink, "local", Bytes::from_static(b"second")));

        let message = rx.recv().await.expect("message");
        assert_eq!(message.payload, Bytes::from_static(b"first"));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!forward(&sink, "local", Bytes::from_static(b"late")));
    }
}
