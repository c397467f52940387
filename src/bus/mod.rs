//! Event bus
//!
//! Synchronous publish/subscribe dispatcher connecting the transport bridge,
//! the router, the type handlers and any number of outside observers.
//!
//! # Delivery
//!
//! ```text
//! emit(topic) → [listener₁, listener₂, ...]   (exact + wildcard, registration order)
//!                     │ Err / panic
//!                     ▼
//!               emit(error:bus)               (never for a fault on error:bus itself)
//! ```
//!
//! Listeners run one after another on the emitting thread. A failing
//! listener is reported and skipped; the rest still see the event. Listeners
//! may emit from inside a callback: the listener list is snapshotted before
//! delivery starts.

mod envelope;
mod log;

pub use envelope::{Envelope, EventMeta, ListenerFault, ListenerId, Payload, Topic};
pub use log::{EventLog, EventRecord, DEFAULT_LOG_CAPACITY};

use chrono::Utc;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Callback registered on the bus
pub type Listener = Arc<dyn Fn(&Envelope) -> anyhow::Result<()> + Send + Sync>;

/// What a listener wants to receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Topic(Topic),
    /// Every event on the bus
    All,
}

impl Subscription {
    fn matches(self, topic: Topic) -> bool {
        match self {
            Self::Topic(t) => t == topic,
            Self::All => true,
        }
    }
}

impl From<Topic> for Subscription {
    fn from(topic: Topic) -> Self {
        Self::Topic(topic)
    }
}

struct Registration {
    id: ListenerId,
    subscription: Subscription,
    listener: Listener,
}

struct BusInner {
    registrations: Mutex<Vec<Registration>>,
    next_listener: AtomicU64,
    next_sequence: AtomicU64,
    log: EventLog,
    /// Integration points that must only be installed once
    installed: Mutex<HashSet<&'static str>>,
}

/// Cheap-to-clone handle to one bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Non-owning bus handle for listeners that need to emit
///
/// Listeners live inside the bus, so holding a strong handle in one would
/// keep the bus alive forever.
#[derive(Clone)]
pub struct WeakBus(Weak<BusInner>);

impl WeakBus {
    pub fn upgrade(&self) -> Option<EventBus> {
        self.0.upgrade().map(|inner| EventBus { inner })
    }
}

/// Returned by `on`; unsubscribes the listener
///
/// Dropping the handle does not unsubscribe. Calling `unsubscribe` more than
/// once is a no-op.
pub struct ListenerHandle {
    id: ListenerId,
    bus: WeakBus,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns true only for the call that actually removed the listener
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.off(self.id),
            None => false,
        }
    }
}

impl EventBus {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registrations: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                next_sequence: AtomicU64::new(0),
                log: EventLog::new(log_capacity),
                installed: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakBus {
        WeakBus(Arc::downgrade(&self.inner))
    }

    fn registrations(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.inner
            .registrations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a listener for one topic or for everything
    pub fn on<F>(&self, subscription: impl Into<Subscription>, listener: F) -> ListenerHandle
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed) + 1);
        let subscription = subscription.into();
        self.registrations().push(Registration {
            id,
            subscription,
            listener: Arc::new(listener),
        });
        tracing::trace!(listener = %id, subscription = ?subscription, "Listener registered");
        ListenerHandle {
            id,
            bus: self.downgrade(),
        }
    }

    /// Remove a listener; unknown ids are ignored
    pub fn off(&self, id: ListenerId) -> bool {
        let mut registrations = self.registrations();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    /// Listeners registered for exactly this topic (wildcards not counted)
    pub fn listener_count(&self, topic: Topic) -> usize {
        self.registrations()
            .iter()
            .filter(|r| r.subscription == Subscription::Topic(topic))
            .count()
    }

    pub fn wildcard_count(&self) -> usize {
        self.registrations()
            .iter()
            .filter(|r| r.subscription == Subscription::All)
            .count()
    }

    /// Claim an integration point; false if it was already installed
    pub fn install_once(&self, key: &'static str) -> bool {
        self.inner
            .installed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key)
    }

    /// Emit on behalf of the core itself
    pub fn emit(&self, topic: Topic, data: Payload) -> u64 {
        self.emit_from("core", topic, data)
    }

    /// Emit with an explicit source; returns the event's sequence number
    pub fn emit_from(&self, source: &'static str, topic: Topic, data: Payload) -> u64 {
        let sequence = self.inner.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let envelope = Envelope {
            topic,
            data,
            meta: EventMeta {
                source,
                timestamp: Utc::now(),
                sequence,
            },
        };
        self.dispatch(&envelope);
        sequence
    }

    fn dispatch(&self, envelope: &Envelope) {
        self.inner.log.record(envelope);

        let targets: Vec<(ListenerId, Listener)> = self
            .registrations()
            .iter()
            .filter(|r| r.subscription.matches(envelope.topic))
            .map(|r| (r.id, Arc::clone(&r.listener)))
            .collect();

        for (id, listener) in targets {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(envelope)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => self.report_fault(envelope, id, format!("{error:#}"), false),
                Err(panic) => self.report_fault(envelope, id, panic_message(panic.as_ref()), true),
            }
        }
    }

    fn report_fault(&self, envelope: &Envelope, listener: ListenerId, message: String, panicked: bool) {
        tracing::error!(
            topic = envelope.topic.name(),
            listener = %listener,
            panicked,
            "Listener failed: {}",
            message
        );

        // A fault while reporting a fault stays in the log
        if envelope.topic == Topic::BusError {
            return;
        }

        self.emit_from(
            "bus",
            Topic::BusError,
            Payload::Fault(ListenerFault {
                topic: envelope.topic.name(),
                listener,
                message,
                panicked,
            }),
        );
    }

    /// Recent emissions, most recent last
    pub fn recent_events(&self) -> Vec<EventRecord> {
        self.inner.log.snapshot()
    }

    pub fn log_len(&self) -> usize {
        self.inner.log.len()
    }

    pub fn clear_log(&self) {
        self.inner.log.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AnalyticsEvent, MessageKind};
    use std::sync::Mutex;

    fn analytics(name: &'static str) -> Payload {
        Payload::Analytics(AnalyticsEvent {
            name,
            session_id: None,
            properties: serde_json::Value::Null,
        })
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Listener) {
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let seen_for_factory = Arc::clone(&seen);
        let factory = move |label: &'static str| -> Listener {
            let seen = Arc::clone(&seen_for_factory);
            Arc::new(move |env: &Envelope| {
                seen.lock().unwrap().push(format!("{label}:{}", env.topic));
                Ok(())
            })
        };
        (seen, factory)
    }

    #[test]
    fn test_exact_and_wildcard_in_registration_order() {
        let bus = EventBus::default();
        let (seen, make) = recorder();
        let a = make("a");
        let w = make("w");
        let b = make("b");
        bus.on(Topic::Analytics, move |e| a(e));
        bus.on(Subscription::All, move |e| w(e));
        bus.on(Topic::Analytics, move |e| b(e));

        bus.emit(Topic::Analytics, analytics("x"));
        bus.emit(Topic::Metric, analytics("y"));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "a:analytics:event",
                "w:analytics:event",
                "b:analytics:event",
                "w:performance:metric",
            ]
        );
    }

    #[test]
    fn test_failing_listener_does_not_stop_the_next() {
        let bus = EventBus::default();
        let received: Arc<Mutex<Vec<Payload>>> = Arc::default();
        let faults: Arc<Mutex<Vec<ListenerFault>>> = Arc::default();

        bus.on(Topic::Analytics, |_| anyhow::bail!("first listener broke"));
        let received_clone = Arc::clone(&received);
        bus.on(Topic::Analytics, move |e| {
            received_clone.lock().unwrap().push(e.data.clone());
            Ok(())
        });
        let faults_clone = Arc::clone(&faults);
        bus.on(Topic::BusError, move |e| {
            if let Payload::Fault(fault) = &e.data {
                faults_clone.lock().unwrap().push(fault.clone());
            }
            Ok(())
        });

        bus.emit(Topic::Analytics, analytics("original"));

        assert_eq!(*received.lock().unwrap(), vec![analytics("original")]);
        let faults = faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].topic, "analytics:event");
        assert!(faults[0].message.contains("first listener broke"));
        assert!(!faults[0].panicked);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus = EventBus::default();
        let reached = Arc::new(Mutex::new(false));
        bus.on(Topic::Metric, |_| panic!("kaboom"));
        let reached_clone = Arc::clone(&reached);
        bus.on(Topic::Metric, move |_| {
            *reached_clone.lock().unwrap() = true;
            Ok(())
        });

        bus.emit(Topic::Metric, analytics("m"));
        assert!(*reached.lock().unwrap());

        let fault = bus
            .recent_events()
            .into_iter()
            .find(|r| r.topic == "error:bus")
            .expect("fault was reported");
        assert_eq!(fault.source, "bus");
    }

    #[test]
    fn test_fault_in_error_listener_does_not_loop() {
        let bus = EventBus::default();
        let error_calls = Arc::new(Mutex::new(0));
        bus.on(Topic::Analytics, |_| anyhow::bail!("boom"));
        let calls = Arc::clone(&error_calls);
        bus.on(Topic::BusError, move |_| {
            *calls.lock().unwrap() += 1;
            anyhow::bail!("error handler also broke")
        });

        bus.emit(Topic::Analytics, analytics("x"));
        assert_eq!(*error_calls.lock().unwrap(), 1);
        let errors = bus
            .recent_events()
            .iter()
            .filter(|r| r.topic == "error:bus")
            .count();
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::default();
        let handle = bus.on(Topic::Render, |_| Ok(()));
        assert_eq!(bus.listener_count(Topic::Render), 1);
        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());
        assert!(!bus.off(handle.id()));
        assert_eq!(bus.listener_count(Topic::Render), 0);
    }

    #[test]
    fn test_listener_count_is_per_topic() {
        let bus = EventBus::default();
        bus.on(Topic::Message(MessageKind::AssistantDelta), |_| Ok(()));
        bus.on(Topic::Message(MessageKind::AssistantDelta), |_| Ok(()));
        bus.on(Subscription::All, |_| Ok(()));
        assert_eq!(bus.listener_count(Topic::Message(MessageKind::AssistantDelta)), 2);
        assert_eq!(bus.listener_count(Topic::Message(MessageKind::AssistantEnd)), 0);
        assert_eq!(bus.wildcard_count(), 1);
    }

    #[test]
    fn test_reentrant_emit() {
        let bus = EventBus::default();
        let weak = bus.downgrade();
        bus.on(Topic::Analytics, move |_| {
            if let Some(bus) = weak.upgrade() {
                bus.emit(Topic::Metric, analytics("nested"));
            }
            Ok(())
        });
        let nested = Arc::new(Mutex::new(0));
        let nested_clone = Arc::clone(&nested);
        bus.on(Topic::Metric, move |_| {
            *nested_clone.lock().unwrap() += 1;
            Ok(())
        });

        bus.emit(Topic::Analytics, analytics("outer"));
        assert_eq!(*nested.lock().unwrap(), 1);
    }

    #[test]
    fn test_rolling_log_is_bounded() {
        let bus = EventBus::new(3);
        for _ in 0..5 {
            bus.emit(Topic::Analytics, analytics("tick"));
        }
        let log = bus.recent_events();
        assert_eq!(log.len(), 3);
        let sequences: Vec<u64> = log.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);

        bus.clear_log();
        assert_eq!(bus.log_len(), 0);
    }

    #[test]
    fn test_install_once() {
        let bus = EventBus::default();
        assert!(bus.install_once("router"));
        assert!(!bus.install_once("router"));
        assert!(bus.clone().install_once("handlers"));
    }
}
