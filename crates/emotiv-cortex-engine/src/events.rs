//! # Event Topics
//!
//! Everything the engine reports leaves through a typed topic. A host
//! subscribes to a topic and gets a [`Subscription`], an owned handle it
//! drains on its own schedule with [`Subscription::poll`] (or awaits with
//! [`Subscription::recv`], or consumes as a `Stream`). Dropping the handle
//! unsubscribes immediately.
//!
//! Two delivery policies exist:
//!
//! | Policy | Topic type | Used for |
//! |--------|------------|----------|
//! | every item, in order | [`QueueTopic`] | mental commands, system events, facial expressions, lifecycle events, errors, training, profiles |
//! | latest value only | [`LatestTopic`] | connection state, headset list, device info |
//!
//! [`EventPump`] merges the engine-wide topics in publish order for hosts that
//! want a single `poll()` per tick.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_util::task::AtomicWaker;
use tokio::sync::mpsc;

use crate::authorizer::ConnectionState;
use crate::error::CortexError;
use crate::headsets::Headset;
use crate::lock;
use crate::profiles::ProfileEvent;
use crate::protocol::auth::LicenseInfo;
use crate::training::TrainingEvent;

// ─── Subscription ───────────────────────────────────────────────────────

/// Receiving end of a topic.
///
/// Once the topic is gone (its session closed, or the engine dropped) the
/// remaining items can still be drained, after which [`is_closed`](Self::is_closed)
/// reports `true` and [`recv`](Self::recv) returns `None`.
#[derive(Debug)]
pub struct Subscription<T> {
    source: Source<T>,
    closed: bool,
}

#[derive(Debug)]
enum Source<T> {
    Queue(mpsc::UnboundedReceiver<T>),
    Latest(Arc<Slot<T>>),
}

impl<T> Subscription<T> {
    fn queue(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self {
            source: Source::Queue(rx),
            closed: false,
        }
    }

    fn latest(slot: Arc<Slot<T>>) -> Self {
        Self {
            source: Source::Latest(slot),
            closed: false,
        }
    }

    /// Take the next pending item without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        match &mut self.source {
            Source::Queue(rx) => match rx.try_recv() {
                Ok(value) => Some(value),
                Err(mpsc::error::TryRecvError::Empty) => None,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.closed = true;
                    None
                }
            },
            Source::Latest(slot) => {
                let value = slot.take();
                if value.is_none() && slot.closed.load(Ordering::Acquire) {
                    self.closed = true;
                }
                value
            }
        }
    }

    /// Drain everything pending right now. Never blocks.
    pub fn poll(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Wait for the next item. Returns `None` once the topic is gone and drained.
    pub async fn recv(&mut self) -> Option<T> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// `true` once the topic has been dropped and every item drained.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the subscription. Equivalent to dropping it.
    pub fn unsubscribe(self) {}

    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let polled = match &mut self.source {
            Source::Queue(rx) => rx.poll_recv(cx),
            Source::Latest(slot) => slot.poll_take(cx),
        };
        if let Poll::Ready(None) = polled {
            self.closed = true;
        }
        polled
    }
}

impl<T> futures_core::Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().poll_recv(cx)
    }
}

/// Single-value mailbox shared between a [`LatestTopic`] and one subscriber.
#[derive(Debug)]
struct Slot<T> {
    value: Mutex<Option<T>>,
    closed: AtomicBool,
    waker: AtomicWaker,
}

impl<T> Slot<T> {
    fn new(initial: Option<T>) -> Self {
        Self {
            value: Mutex::new(initial),
            closed: AtomicBool::new(false),
            waker: AtomicWaker::new(),
        }
    }

    fn put(&self, value: T) {
        *lock(&self.value) = Some(value);
        self.waker.wake();
    }

    fn take(&self) -> Option<T> {
        lock(&self.value).take()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.waker.wake();
    }

    fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if let Some(value) = self.take() {
            return Poll::Ready(Some(value));
        }
        self.waker.register(cx.waker());
        if let Some(value) = self.take() {
            return Poll::Ready(Some(value));
        }
        if self.closed.load(Ordering::Acquire) {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

// ─── Topics ─────────────────────────────────────────────────────────────

/// A topic that delivers every published item to every subscriber, in order.
#[derive(Debug)]
pub struct QueueTopic<T> {
    senders: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> QueueTopic<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber. It sees items published from now on.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.senders).push(tx);
        Subscription::queue(rx)
    }

    /// Deliver `value` to every live subscriber, pruning released ones.
    pub fn publish(&self, value: T) {
        lock(&self.senders).retain(|tx| tx.send(value.clone()).is_ok());
    }

    /// Number of subscribers that have not been released yet.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut senders = lock(&self.senders);
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }
}

impl<T: Clone> Default for QueueTopic<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A topic that keeps only the most recent value per subscriber.
///
/// New subscribers start with the current value, if any.
#[derive(Debug)]
pub struct LatestTopic<T> {
    inner: Mutex<LatestInner<T>>,
}

#[derive(Debug)]
struct LatestInner<T> {
    current: Option<T>,
    slots: Vec<Weak<Slot<T>>>,
}

impl<T: Clone> LatestTopic<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LatestInner {
                current: None,
                slots: Vec::new(),
            }),
        }
    }

    /// Register a new subscriber, primed with the current value.
    pub fn subscribe(&self) -> Subscription<T> {
        let mut inner = lock(&self.inner);
        let slot = Arc::new(Slot::new(inner.current.clone()));
        inner.slots.push(Arc::downgrade(&slot));
        Subscription::latest(slot)
    }

    /// Replace the value seen by every subscriber.
    pub fn publish(&self, value: T) {
        let mut inner = lock(&self.inner);
        inner.slots.retain(|weak| match weak.upgrade() {
            Some(slot) => {
                slot.put(value.clone());
                true
            }
            None => false,
        });
        inner.current = Some(value);
    }

    /// The last published value.
    #[must_use]
    pub fn current(&self) -> Option<T> {
        lock(&self.inner).current.clone()
    }

    /// Number of subscribers that have not been released yet.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut inner = lock(&self.inner);
        inner.slots.retain(|weak| weak.strong_count() > 0);
        inner.slots.len()
    }
}

impl<T: Clone> Default for LatestTopic<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LatestTopic<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in inner.slots.drain(..).filter_map(|weak| weak.upgrade()) {
            slot.close();
        }
    }
}

// ─── Engine-wide events ─────────────────────────────────────────────────

/// An error surfaced to the host, with enough context to render or retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    /// Cortex method (or engine operation) the error originated from.
    pub method: String,
    /// Cortex error or warning code, when the service supplied one.
    pub code: Option<i32>,
    /// Human-readable description.
    pub message: String,
}

impl ErrorEvent {
    /// Describe `error`, attributing it to `operation` unless it names its own method.
    #[must_use]
    pub fn from_error(operation: &str, error: &CortexError) -> Self {
        let method = match error {
            CortexError::Rpc { method, .. } | CortexError::Timeout { method, .. } => method.clone(),
            CortexError::PartialSubscriptionFailure { .. } => "subscribe".to_string(),
            _ => operation.to_string(),
        };
        Self {
            method,
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// Engine-wide topics.
#[derive(Debug, Default)]
pub struct EventHub {
    pub(crate) connection_state: LatestTopic<ConnectionState>,
    pub(crate) authorized: QueueTopic<LicenseInfo>,
    pub(crate) headsets: LatestTopic<Vec<Headset>>,
    pub(crate) device_connected: QueueTopic<String>,
    pub(crate) stream_started: QueueTopic<String>,
    pub(crate) stream_ended: QueueTopic<String>,
    pub(crate) errors: QueueTopic<ErrorEvent>,
    pub(crate) training: QueueTopic<TrainingEvent>,
    pub(crate) profiles: QueueTopic<ProfileEvent>,
    /// Every event above, in publish order, for [`EventPump`].
    timeline: QueueTopic<EngineEvent>,
}

impl EventHub {
    /// Authorizer state changes (latest only).
    pub fn subscribe_connection_state(&self) -> Subscription<ConnectionState> {
        self.connection_state.subscribe()
    }

    /// License confirmed by a completed handshake.
    pub fn subscribe_authorized(&self) -> Subscription<LicenseInfo> {
        self.authorized.subscribe()
    }

    /// Headset list, published when a query result differs from the last one (latest only).
    pub fn subscribe_headsets(&self) -> Subscription<Vec<Headset>> {
        self.headsets.subscribe()
    }

    /// Headset ids reported by the headset-connected notification.
    pub fn subscribe_device_connected(&self) -> Subscription<String> {
        self.device_connected.subscribe()
    }

    /// Headset ids whose session delivered its first data frame.
    pub fn subscribe_stream_started(&self) -> Subscription<String> {
        self.stream_started.subscribe()
    }

    /// Headset ids whose streaming session ended.
    pub fn subscribe_stream_ended(&self) -> Subscription<String> {
        self.stream_ended.subscribe()
    }

    /// Errors from any engine operation or background flow.
    pub fn subscribe_errors(&self) -> Subscription<ErrorEvent> {
        self.errors.subscribe()
    }

    /// Training stage changes.
    pub fn subscribe_training(&self) -> Subscription<TrainingEvent> {
        self.training.subscribe()
    }

    /// Profile operation results.
    pub fn subscribe_profiles(&self) -> Subscription<ProfileEvent> {
        self.profiles.subscribe()
    }

    pub(crate) fn report(&self, operation: &str, error: &CortexError) {
        let event = ErrorEvent::from_error(operation, error);
        tracing::warn!(method = %event.method, code = ?event.code, "{}", event.message);
        self.emit(EngineEvent::Error(event));
    }

    /// Publish `event` on its own topic and on the pump timeline.
    pub(crate) fn emit(&self, event: EngineEvent) {
        match &event {
            EngineEvent::ConnectionStateChanged(state) => self.connection_state.publish(*state),
            EngineEvent::Authorized(license) => self.authorized.publish(license.clone()),
            EngineEvent::HeadsetsChanged(headsets) => self.headsets.publish(headsets.clone()),
            EngineEvent::DeviceConnected(id) => self.device_connected.publish(id.clone()),
            EngineEvent::StreamStarted(id) => self.stream_started.publish(id.clone()),
            EngineEvent::Training(training) => self.training.publish(training.clone()),
            EngineEvent::StreamEnded(id) => self.stream_ended.publish(id.clone()),
            EngineEvent::Error(error) => self.errors.publish(error.clone()),
            EngineEvent::Profile(profile) => self.profiles.publish(profile.clone()),
        }
        self.timeline.publish(event);
    }
}

/// One engine-wide event, as returned by [`EventPump::poll`].
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ConnectionStateChanged(ConnectionState),
    Authorized(LicenseInfo),
    HeadsetsChanged(Vec<Headset>),
    DeviceConnected(String),
    StreamStarted(String),
    Training(TrainingEvent),
    StreamEnded(String),
    Error(ErrorEvent),
    Profile(ProfileEvent),
}

/// Every engine-wide event, drained together in the order it was published.
///
/// Connection state and the headset list stay latest-value: a `poll` keeps
/// only the last of each, at the position it was published. A new pump starts
/// with their current values.
#[derive(Debug)]
pub struct EventPump {
    primed: Vec<EngineEvent>,
    timeline: Subscription<EngineEvent>,
}

impl EventPump {
    pub(crate) fn new(hub: &EventHub) -> Self {
        let timeline = hub.timeline.subscribe();
        let primed = hub
            .connection_state
            .current()
            .map(EngineEvent::ConnectionStateChanged)
            .into_iter()
            .chain(hub.headsets.current().map(EngineEvent::HeadsetsChanged))
            .collect();
        Self { primed, timeline }
    }

    /// Drain every pending event. Call once per host tick.
    pub fn poll(&mut self) -> Vec<EngineEvent> {
        let mut events = std::mem::take(&mut self.primed);
        events.extend(self.timeline.poll());

        let last_state = events
            .iter()
            .rposition(|e| matches!(e, EngineEvent::ConnectionStateChanged(_)));
        let last_headsets = events
            .iter()
            .rposition(|e| matches!(e, EngineEvent::HeadsetsChanged(_)));
        events
            .into_iter()
            .enumerate()
            .filter(|(index, event)| match event {
                EngineEvent::ConnectionStateChanged(_) => Some(*index) == last_state,
                EngineEvent::HeadsetsChanged(_) => Some(*index) == last_headsets,
                _ => true,
            })
            .map(|(_, event)| event)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_topic_delivers_every_item_in_order() {
        let topic = QueueTopic::new();
        let mut a = topic.subscribe();
        let mut b = topic.subscribe();
        for i in 0..5 {
            topic.publish(i);
        }
        assert_eq!(a.poll(), vec![0, 1, 2, 3, 4]);
        assert_eq!(b.poll(), vec![0, 1, 2, 3, 4]);
        assert!(a.poll().is_empty());
    }

    #[test]
    fn test_queue_topic_prunes_dropped_subscribers() {
        let topic = QueueTopic::new();
        let a = topic.subscribe();
        let _b = topic.subscribe();
        assert_eq!(topic.subscriber_count(), 2);
        a.unsubscribe();
        topic.publish(1);
        assert_eq!(topic.subscriber_count(), 1);
    }

    #[test]
    fn test_queue_subscription_closes_after_drain() {
        let topic = QueueTopic::new();
        let mut sub = topic.subscribe();
        topic.publish("last");
        drop(topic);
        assert!(!sub.is_closed());
        assert_eq!(sub.poll(), vec!["last"]);
        assert!(sub.is_closed());
    }

    #[test]
    fn test_latest_topic_coalesces() {
        let topic = LatestTopic::new();
        let mut sub = topic.subscribe();
        topic.publish(1);
        topic.publish(2);
        topic.publish(3);
        assert_eq!(sub.poll(), vec![3]);
        assert!(sub.poll().is_empty());
        assert_eq!(topic.current(), Some(3));
    }

    #[test]
    fn test_latest_topic_primes_new_subscribers() {
        let topic = LatestTopic::new();
        topic.publish("connected");
        let mut sub = topic.subscribe();
        assert_eq!(sub.try_next(), Some("connected"));
    }

    #[test]
    fn test_latest_topic_drop_closes_subscribers() {
        let topic = LatestTopic::new();
        let mut sub = topic.subscribe();
        topic.publish(7);
        drop(topic);
        assert_eq!(sub.poll(), vec![7]);
        assert!(sub.is_closed());
    }

    #[test]
    fn test_latest_topic_prunes_dropped_subscribers() {
        let topic: LatestTopic<u8> = LatestTopic::new();
        let sub = topic.subscribe();
        assert_eq!(topic.subscriber_count(), 1);
        drop(sub);
        assert_eq!(topic.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_publish() {
        let topic = Arc::new(LatestTopic::new());
        let mut sub = topic.subscribe();
        let publisher = Arc::clone(&topic);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            publisher.publish(42);
        });
        assert_eq!(sub.recv().await, Some(42));
    }

    #[tokio::test]
    async fn test_subscription_is_a_stream() {
        use futures_util::StreamExt;

        let topic = QueueTopic::new();
        let sub = topic.subscribe();
        topic.publish(1);
        topic.publish(2);
        drop(topic);
        let items: Vec<i32> = sub.collect().await;
        assert_eq!(items, vec![1, 2]);
    }

    #[test]
    fn test_error_event_prefers_rpc_method() {
        let err = CortexError::rpc("createSession", -32004, "Headset unavailable");
        let event = ErrorEvent::from_error("startSession", &err);
        assert_eq!(event.method, "createSession");
        assert_eq!(event.code, Some(-32004));

        let event = ErrorEvent::from_error("startSession", &CortexError::NotConnected);
        assert_eq!(event.method, "startSession");
        assert_eq!(event.code, None);
    }

    #[test]
    fn test_event_pump_drains_all_topics() {
        let hub = EventHub::default();
        let mut pump = EventPump::new(&hub);
        let mut ended = hub.subscribe_stream_ended();
        hub.emit(EngineEvent::StreamStarted("INSIGHT-1".into()));
        hub.emit(EngineEvent::StreamEnded("INSIGHT-1".into()));
        hub.report("queryHeadsets", &CortexError::NotConnected);

        let events = pump.poll();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], EngineEvent::StreamStarted(id) if id == "INSIGHT-1"));
        assert!(matches!(&events[1], EngineEvent::StreamEnded(id) if id == "INSIGHT-1"));
        assert!(matches!(&events[2], EngineEvent::Error(e) if e.method == "queryHeadsets"));
        assert!(pump.poll().is_empty());
        assert_eq!(ended.poll(), vec!["INSIGHT-1".to_string()]);
    }

    #[test]
    fn test_event_pump_keeps_publish_order_across_kinds() {
        let hub = EventHub::default();
        let mut pump = EventPump::new(&hub);
        hub.emit(EngineEvent::StreamStarted("H".into()));
        hub.emit(EngineEvent::StreamEnded("H".into()));
        hub.emit(EngineEvent::StreamStarted("H".into()));

        let order: Vec<&str> = pump
            .poll()
            .iter()
            .map(|event| match event {
                EngineEvent::StreamStarted(_) => "started",
                EngineEvent::StreamEnded(_) => "ended",
                _ => "other",
            })
            .collect();
        assert_eq!(order, ["started", "ended", "started"]);
    }

    #[test]
    fn test_event_pump_coalesces_connection_state() {
        let hub = EventHub::default();
        hub.emit(EngineEvent::ConnectionStateChanged(ConnectionState::ServiceConnecting));
        let mut pump = EventPump::new(&hub);
        assert!(matches!(
            pump.poll().as_slice(),
            [EngineEvent::ConnectionStateChanged(ConnectionState::ServiceConnecting)]
        ));

        hub.emit(EngineEvent::ConnectionStateChanged(ConnectionState::LoginWaiting));
        hub.emit(EngineEvent::StreamEnded("H".into()));
        hub.emit(EngineEvent::ConnectionStateChanged(ConnectionState::Authorized));
        let events = pump.poll();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], EngineEvent::StreamEnded(_)));
        assert!(matches!(
            &events[1],
            EngineEvent::ConnectionStateChanged(ConnectionState::Authorized)
        ));
    }
}
