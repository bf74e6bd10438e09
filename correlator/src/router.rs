use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::event::{Event, EventKind};
use crate::gate::Gate;
use crate::predicate::Predicate;
use crate::subscription::Subscription;

/// The single ingestion point a control service delivers event batches to.
pub trait EventSink: Send + Sync {
    fn deliver(&self, batch: Vec<Event>);
}

#[derive(Default)]
struct Registry {
    gates: HashMap<EventKind, Vec<Gate>>,
    subscriptions: HashMap<EventKind, Vec<Subscription>>,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    matched: AtomicU64,
    unmatched: AtomicU64,
    unrecognized: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub delivered: u64,
    pub matched: u64,
    pub unmatched: u64,
    pub unrecognized: u64,
}

/// Matches incoming events against the pending gates and live
/// subscriptions of the event's kind.
///
/// Registration and routing share one lock, so a gate registered before an
/// action is issued sees every event that action causes. Resolved gates
/// leave the registry as they resolve. Events that match nothing are
/// counted and dropped.
#[derive(Default)]
pub struct Router {
    registry: Mutex<Registry>,
    counters: Counters,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, gate: &Gate) {
        let mut registry = self.registry.lock();
        registry.gates.entry(gate.kind()).or_default().push(gate.clone());
    }

    /// Creates and registers a gate in one step.
    pub fn arm(&self, predicate: Predicate) -> Gate {
        let gate = Gate::new(predicate);
        self.register(&gate);
        gate
    }

    pub fn arm_unbound(&self, kind: EventKind) -> Gate {
        let gate = Gate::unbound(kind);
        self.register(&gate);
        gate
    }

    /// Replaces `gate` with a fresh pending gate for `predicate`. The swap
    /// happens under the registry lock, so no event is routed while neither
    /// gate is registered.
    pub fn rearm(&self, gate: &Gate, predicate: Predicate) -> Gate {
        let next = gate.rearm(predicate);
        let mut registry = self.registry.lock();
        if let Some(gates) = registry.gates.get_mut(&gate.kind()) {
            gates.retain(|g| g.id() != gate.id());
        }
        registry.gates.entry(next.kind()).or_default().push(next.clone());
        next
    }

    /// Drops a gate that is no longer awaited. Returns whether it was still
    /// registered.
    pub fn discard(&self, gate: &Gate) -> bool {
        let mut registry = self.registry.lock();
        let Some(gates) = registry.gates.get_mut(&gate.kind()) else {
            return false;
        };
        let before = gates.len();
        gates.retain(|g| g.id() != gate.id());
        before != gates.len()
    }

    pub fn subscribe(&self, predicate: Predicate, capacity: usize) -> Subscription {
        let subscription = Subscription::new(predicate, capacity);
        let mut registry = self.registry.lock();
        registry
            .subscriptions
            .entry(subscription.kind())
            .or_default()
            .push(subscription.clone());
        subscription
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut registry = self.registry.lock();
        let Some(subscriptions) = registry.subscriptions.get_mut(&subscription.kind()) else {
            return false;
        };
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id() != subscription.id());
        before != subscriptions.len()
    }

    /// Number of gates still waiting to resolve.
    pub fn pending(&self) -> usize {
        self.registry.lock().gates.values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            matched: self.counters.matched.load(Ordering::Relaxed),
            unmatched: self.counters.unmatched.load(Ordering::Relaxed),
            unrecognized: self.counters.unrecognized.load(Ordering::Relaxed),
        }
    }

    /// Routes one event, returning how many gates and subscriptions took it.
    pub fn route(&self, event: &Event) -> usize {
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        let kind = event.kind();
        if kind == EventKind::Unrecognized {
            self.counters.unrecognized.fetch_add(1, Ordering::Relaxed);
            warn!(category = %event.category(), "ignoring unrecognized event {event}");
            return 0;
        }
        info!("    Received--> {event}");

        let mut matched = 0;
        let mut registry = self.registry.lock();
        if let Some(gates) = registry.gates.get_mut(&kind) {
            gates.retain(|gate| {
                if gate.resolve(event) {
                    matched += 1;
                    false
                } else {
                    !gate.is_resolved()
                }
            });
        }
        if let Some(subscriptions) = registry.subscriptions.get(&kind) {
            for subscription in subscriptions {
                if subscription.offer(event) {
                    matched += 1;
                }
            }
        }
        drop(registry);

        if matched == 0 {
            self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!("no pending wait for {event}");
        } else {
            self.counters.matched.fetch_add(1, Ordering::Relaxed);
        }
        matched
    }
}

impl EventSink for Router {
    fn deliver(&self, batch: Vec<Event>) {
        for event in &batch {
            self.route(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AddressChange, CallChange, CallEvent};
    use crate::ids::{AddressId, CallId, ConnectionId};
    use crate::predicate::Correlation;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn call_event(change: CallChange, call: &str, called: &str) -> Event {
        Event::Call(
            CallEvent::new(CallId::from(call), change)
                .on_connection(AddressId::from(called), ConnectionId::from(format!("{call}/{called}")))
                .parties(Some(AddressId::from("1000")), Some(AddressId::from(called))),
        )
    }

    fn called(kind: EventKind, address: &str) -> Predicate {
        Predicate::new(kind, Correlation::Called(AddressId::from(address)))
    }

    #[test]
    fn resolves_only_the_correlated_gate() {
        let router = Router::new();
        let g1 = router.arm(called(EventKind::TermConnRinging, "A"));
        let g2 = router.arm(called(EventKind::TermConnRinging, "B"));
        router.deliver(vec![call_event(CallChange::TermConnRinging, "c1", "A")]);
        assert!(g1.is_resolved());
        assert!(!g2.is_resolved());
        assert_eq!(router.pending(), 1);
    }

    #[test]
    fn resolves_every_matching_gate() {
        let router = Router::new();
        let generic = router.arm(Predicate::any(EventKind::AddressInService));
        let specific = router.arm(Predicate::new(
            EventKind::AddressInService,
            Correlation::Address(AddressId::from("1001")),
        ));
        let matched = router.route(&Event::address_change(
            AddressId::from("1001"),
            AddressChange::InService,
        ));
        assert_eq!(matched, 2);
        assert!(generic.is_resolved());
        assert!(specific.is_resolved());
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn unmatched_and_unrecognized_events_are_counted() {
        let router = Router::new();
        router.deliver(vec![
            call_event(CallChange::TermConnHeld, "c1", "A"),
            Event::Other { category: crate::event::Category::Call, name: "Weird".into() },
        ]);
        let stats = router.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.unrecognized, 1);
        assert_eq!(stats.matched, 0);
    }

    #[test]
    fn batch_order_is_preserved_for_one_leg() {
        let router = Router::new();
        let ringing = router.arm(called(EventKind::TermConnRinging, "B"));
        let talking = router.arm(called(EventKind::TermConnTalking, "B"));
        let held = router.arm(called(EventKind::TermConnHeld, "B"));
        let sub = router.subscribe(
            Predicate::new(EventKind::TermConnRinging, Correlation::Any),
            8,
        );
        router.deliver(vec![
            call_event(CallChange::TermConnRinging, "c1", "B"),
            call_event(CallChange::TermConnTalking, "c1", "B"),
            call_event(CallChange::TermConnHeld, "c1", "B"),
        ]);
        let deadline = Duration::from_millis(10);
        assert_eq!(ringing.wait_timeout(deadline).unwrap().kind(), EventKind::TermConnRinging);
        assert_eq!(talking.wait_timeout(deadline).unwrap().kind(), EventKind::TermConnTalking);
        assert_eq!(held.wait_timeout(deadline).unwrap().kind(), EventKind::TermConnHeld);
        assert_eq!(sub.len(), 1);
    }

    #[test]
    fn rearm_swaps_registration() {
        let router = Router::new();
        let first = router.arm(called(EventKind::TermConnRinging, "P"));
        router.route(&call_event(CallChange::TermConnRinging, "c1", "P"));
        assert!(first.is_resolved());

        let second = router.rearm(&first, called(EventKind::TermConnRinging, "P"));
        assert_eq!(router.pending(), 1);
        router.route(&call_event(CallChange::TermConnRinging, "c2", "P"));
        let event = second.wait_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(event.call(), Some(&CallId::from("c2")));
        assert_eq!(first.payload().unwrap().call(), Some(&CallId::from("c1")));
    }

    #[test]
    fn discard_and_unsubscribe() {
        let router = Router::new();
        let gate = router.arm(called(EventKind::TermConnRinging, "A"));
        let sub = router.subscribe(called(EventKind::TermConnRinging, "A"), 4);
        assert!(router.discard(&gate));
        assert!(!router.discard(&gate));
        assert!(router.unsubscribe(&sub));
        router.route(&call_event(CallChange::TermConnRinging, "c1", "A"));
        assert!(!gate.is_resolved());
        assert!(sub.is_empty());
    }

    #[test]
    fn concurrent_delivery_and_registration() {
        let router = Arc::new(Router::new());
        let gates: Vec<Gate> = (0..64)
            .map(|i| router.arm(called(EventKind::TermConnTalking, &format!("D{i}"))))
            .collect();
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let router = router.clone();
                thread::spawn(move || {
                    for i in (p..64).step_by(4) {
                        let address = format!("D{i}");
                        router.deliver(vec![call_event(
                            CallChange::TermConnTalking,
                            &format!("c{i}"),
                            &address,
                        )]);
                    }
                })
            })
            .collect();
        for (i, gate) in gates.iter().enumerate() {
            let event = gate.wait_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(event.called(), Some(&AddressId::from(format!("D{i}"))));
        }
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(router.pending(), 0);
    }
}
