//! Invalidation listener.
//!
//! Collects raw payloads from every subscribed transport into one channel,
//! decodes them, and hands each event to every registered cache. A transport
//! that fails to connect is logged and skipped. A payload that fails to
//! decode, or arrives while the dispatch buffer is full, is logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::InvalidationEvent;
use super::transport::{EventTransport, TransportMessage};

const METRIC_EVENTS_RECEIVED: &str = "vitrine_events_received_total";
pub(crate) const METRIC_EVENTS_DROPPED: &str = "vitrine_events_dropped_total";

/// Payloads buffered between the transports and the dispatch loop.
const DISPATCH_BUFFER: usize = 1024;

/// A cache that reacts to invalidation events.
///
/// Implementations must be idempotent: applying the same event twice only
/// removes entries that are already gone.
#[async_trait]
pub trait InvalidationTarget: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, event: &InvalidationEvent);
}

/// Fans decoded events out to every registered target.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    targets: Vec<Arc<dyn InvalidationTarget>>,
}

impl EventDispatcher {
    pub fn new(targets: Vec<Arc<dyn InvalidationTarget>>) -> Self {
        Self { targets }
    }

    pub fn targets(&self) -> usize {
        self.targets.len()
    }

    pub async fn dispatch(&self, event: &InvalidationEvent) {
        for target in &self.targets {
            debug!(
                cache = target.name(),
                event = event.event.as_str(),
                "applying invalidation event"
            );
            target.apply(event).await;
        }
    }

    /// Decode and dispatch a raw payload. Returns `false` if it was dropped.
    pub async fn dispatch_raw(&self, transport: &'static str, payload: &[u8]) -> bool {
        counter!(METRIC_EVENTS_RECEIVED, "transport" => transport).increment(1);

        match InvalidationEvent::decode(payload) {
            Ok(event) => {
                info!(transport, event = event.event.as_str(), "invalidation event received");
                self.dispatch(&event).await;
                true
            }
            Err(err) => {
                counter!(METRIC_EVENTS_DROPPED, "transport" => transport, "reason" => "decode")
                    .increment(1);
                warn!(transport, error = %err, "dropping undecodable event");
                false
            }
        }
    }
}

/// Subscribes transports and runs the dispatch loop.
pub struct InvalidationListener {
    dispatcher: EventDispatcher,
    transports: Vec<Box<dyn EventTransport>>,
}

impl InvalidationListener {
    pub fn new(dispatcher: EventDispatcher) -> Self {
        Self {
            dispatcher,
            transports: Vec::new(),
        }
    }

    pub fn with_transport(mut self, transport: impl EventTransport + 'static) -> Self {
        self.transports.push(Box::new(transport));
        self
    }

    pub fn add_transport(&mut self, transport: Box<dyn EventTransport>) {
        self.transports.push(transport);
    }

    /// Subscribe every transport and spawn the dispatch loop.
    pub async fn start(self) -> ListenerHandle {
        let (sink, mut rx) = mpsc::channel::<TransportMessage>(DISPATCH_BUFFER);
        let mut active = Vec::with_capacity(self.transports.len());

        for mut transport in self.transports {
            match transport.subscribe(sink.clone()).await {
                Ok(()) => active.push(transport),
                Err(err) => warn!(
                    transport = transport.kind(),
                    error = %err,
                    "transport unavailable, continuing without it"
                ),
            }
        }
        drop(sink);

        info!(
            transports = active.len(),
            caches = self.dispatcher.targets(),
            "invalidation listener started"
        );

        let dispatcher = self.dispatcher;
        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                dispatcher
                    .dispatch_raw(message.transport, &message.payload)
                    .await;
            }
            debug!("invalidation listener channel closed");
        });

        ListenerHandle {
            transports: active,
            task,
        }
    }
}

/// Running listener. Call [`ListenerHandle::shutdown`] to stop it.
pub struct ListenerHandle {
    transports: Vec<Box<dyn EventTransport>>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn active_transports(&self) -> Vec<&'static str> {
        self.transports.iter().map(|t| t.kind()).collect()
    }

    /// Unsubscribe and close every transport, then let the dispatch loop
    /// drain whatever was already received.
    pub async fn shutdown(mut self) {
        for transport in &mut self.transports {
            let kind = transport.kind();
            if let Err(err) = transport.unsubscribe().await {
                warn!(transport = kind, error = %err, "failed to unsubscribe");
            }
            if let Err(err) = transport.close().await {
                warn!(transport = kind, error = %err, "failed to close transport");
            }
        }
        self.transports.clear();

        let _ = self.task.await;
        info!("invalidation listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::cache::events::EventKind;
    use crate::cache::transport::{EventSink, LocalTransport, TransportError};

    #[derive(Default)]
    struct RecordingTarget {
        seen: Mutex<Vec<EventKind>>,
    }

    impl RecordingTarget {
        fn seen(&self) -> Vec<EventKind> {
            self.seen.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl InvalidationTarget for RecordingTarget {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn apply(&self, event: &InvalidationEvent) {
            self.seen.lock().expect("lock").push(event.event);
        }
    }

    struct BrokenTransport;

    #[async_trait]
    impl EventTransport for BrokenTransport {
        fn kind(&self) -> &'static str {
            "broken"
        }

        async fn subscribe(&mut self, _sink: EventSink) -> Result<(), TransportError> {
            Err(TransportError::AlreadySubscribed("broken"))
        }

        async fn unsubscribe(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn every_target_receives_each_event() {
        let first = Arc::new(RecordingTarget::default());
        let second = Arc::new(RecordingTarget::default());
        let dispatcher = EventDispatcher::new(vec![
            first.clone() as Arc<dyn InvalidationTarget>,
            second.clone(),
        ]);

        dispatcher
            .dispatch(&InvalidationEvent::new(EventKind::UsersChange))
            .await;

        assert_eq!(first.seen(), vec![EventKind::UsersChange]);
        assert_eq!(second.seen(), vec![EventKind::UsersChange]);
    }

    #[tokio::test]
    async fn undecodable_payloads_are_dropped() {
        let target = Arc::new(RecordingTarget::default());
        let targets: Vec<Arc<dyn InvalidationTarget>> = vec![target.clone()];
        let dispatcher = EventDispatcher::new(targets);

        assert!(!dispatcher.dispatch_raw("test", b"{oops").await);
        assert!(
            dispatcher
                .dispatch_raw("test", br#"{"event":"on_doc_delete"}"#)
                .await
        );

        assert_eq!(target.seen(), vec![EventKind::DocDelete]);
    }

    #[tokio::test]
    async fn failed_transport_does_not_stop_the_listener() {
        let target = Arc::new(RecordingTarget::default());
        let (local, publisher) = LocalTransport::new("local", 8);

        let targets: Vec<Arc<dyn InvalidationTarget>> = vec![target.clone()];
        let handle = InvalidationListener::new(EventDispatcher::new(targets))
            .with_transport(BrokenTransport)
            .with_transport(local)
            .start()
            .await;

        assert_eq!(handle.active_transports(), vec!["local"]);

        publisher.publish(&br#"{"event":"on_xmlschema_change"}"#[..]);
        publisher.publish(&b"garbage"[..]);
        publisher.publish(&br#"{"event":"on_doc_create"}"#[..]);

        for _ in 0..100 {
            if target.seen().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        handle.shutdown().await;

        assert_eq!(
            target.seen(),
            vec![EventKind::XmlSchemaChange, EventKind::DocCreate]
        );
    }
}
