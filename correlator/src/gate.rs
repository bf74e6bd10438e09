//! One-shot latch resolved by the router and awaited by a scenario.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::predicate::{Correlation, Predicate};

/// Events an unbound gate keeps while it waits for its correlation.
const UNBOUND_BACKLOG: usize = 256;

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GateId(u64);

impl GateId {
    pub(crate) fn next() -> Self {
        Self(NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gate#{}", self.0)
    }
}

struct State {
    correlation: Option<Correlation>,
    backlog: VecDeque<Event>,
    payload: Option<Event>,
}

struct Inner {
    id: GateId,
    kind: EventKind,
    state: Mutex<State>,
    resolved: Condvar,
}

/// Pending until the first matching event, then resolved for good with
/// that event as its payload. Clones share the same latch.
///
/// A gate can be created unbound: it knows the event kind but not yet the
/// identity to correlate on. While unbound it buffers events of its kind,
/// and [`Gate::bind`] replays them in arrival order. This lets a scenario
/// register the gate before issuing an action whose result names the
/// identity to wait for.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<Inner>,
}

impl Gate {
    pub fn new(predicate: Predicate) -> Self {
        Self::with_correlation(predicate.kind(), Some(predicate.correlation().clone()))
    }

    pub fn unbound(kind: EventKind) -> Self {
        Self::with_correlation(kind, None)
    }

    fn with_correlation(kind: EventKind, correlation: Option<Correlation>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: GateId::next(),
                kind,
                state: Mutex::new(State {
                    correlation,
                    backlog: VecDeque::new(),
                    payload: None,
                }),
                resolved: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> GateId {
        self.inner.id
    }

    pub fn kind(&self) -> EventKind {
        self.inner.kind
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.state.lock().payload.is_some()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.state.lock().correlation.is_some()
    }

    pub fn payload(&self) -> Option<Event> {
        self.inner.state.lock().payload.clone()
    }

    pub fn describe(&self) -> String {
        let state = self.inner.state.lock();
        match &state.correlation {
            Some(correlation) => format!("{} where {}", self.inner.kind, correlation),
            None => format!("{} (unbound)", self.inner.kind),
        }
    }

    /// Supplies the correlation of an unbound gate and evaluates the events
    /// it buffered meanwhile. Returns whether the gate is now resolved.
    /// Binding an already bound gate is a no-op.
    pub fn bind(&self, correlation: Correlation) -> bool {
        let mut state = self.inner.state.lock();
        if state.correlation.is_some() {
            return state.payload.is_some();
        }
        let backlog = std::mem::take(&mut state.backlog);
        if let Some(event) = backlog.into_iter().find(|ev| correlation.matches(ev)) {
            state.payload = Some(event);
        }
        state.correlation = Some(correlation);
        let resolved = state.payload.is_some();
        drop(state);
        if resolved {
            self.inner.resolved.notify_all();
        }
        resolved
    }

    /// Stores `event` and wakes waiters if the gate is pending and the event
    /// matches. A resolved gate ignores everything after its first match.
    pub fn resolve(&self, event: &Event) -> bool {
        if event.kind() != self.inner.kind {
            return false;
        }
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.payload.is_some() {
            return false;
        }
        match &state.correlation {
            None => {
                if state.backlog.len() >= UNBOUND_BACKLOG {
                    warn!(gate = %self.inner.id, "unbound gate backlog full, dropping oldest");
                    state.backlog.pop_front();
                }
                state.backlog.push_back(event.clone());
                return false;
            }
            Some(correlation) if !correlation.matches(event) => return false,
            Some(_) => {}
        }
        state.payload = Some(event.clone());
        drop(guard);
        self.inner.resolved.notify_all();
        true
    }

    /// Blocks until resolved or `deadline` passes.
    pub fn wait(&self, deadline: Instant) -> Result<Event> {
        let started = Instant::now();
        let mut state = self.inner.state.lock();
        loop {
            if let Some(event) = &state.payload {
                return Ok(event.clone());
            }
            if self.inner.resolved.wait_until(&mut state, deadline).timed_out() {
                if let Some(event) = &state.payload {
                    return Ok(event.clone());
                }
                let correlation = match &state.correlation {
                    Some(correlation) => correlation.to_string(),
                    None => "unbound".to_string(),
                };
                return Err(Error::CorrelationTimeout {
                    gate: self.inner.id.to_string(),
                    kind: self.inner.kind,
                    correlation,
                    waited: started.elapsed(),
                });
            }
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<Event> {
        self.wait(Instant::now() + timeout)
    }

    /// A fresh pending gate for the next occurrence of the same logical
    /// wait. This gate is left untouched. Use [`crate::Router::rearm`] to
    /// swap the registration atomically.
    pub fn rearm(&self, predicate: Predicate) -> Gate {
        Gate::new(predicate)
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("id", &self.inner.id)
            .field("predicate", &self.describe())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CallChange, CallEvent};
    use crate::ids::{AddressId, CallId, ConnectionId};
    use rand::Rng;
    use std::thread;

    fn talking(call: &str, called: &str) -> Event {
        Event::Call(
            CallEvent::new(CallId::from(call), CallChange::TermConnTalking)
                .on_connection(AddressId::from(called), ConnectionId::from(format!("{call}/{called}")))
                .parties(Some(AddressId::from("1000")), Some(AddressId::from(called))),
        )
    }

    fn called(address: &str) -> Predicate {
        Predicate::new(
            EventKind::TermConnTalking,
            Correlation::Called(AddressId::from(address)),
        )
    }

    #[test]
    fn resolves_at_most_once() {
        let gate = Gate::new(called("1001"));
        let first = talking("c1", "1001");
        let second = talking("c2", "1001");
        assert!(gate.resolve(&first));
        assert!(!gate.resolve(&second));
        assert_eq!(gate.payload(), Some(first.clone()));
        assert_eq!(gate.wait_timeout(Duration::from_millis(1)).unwrap(), first);
    }

    #[test]
    fn ignores_other_identities_and_kinds() {
        let gate = Gate::new(called("1001"));
        assert!(!gate.resolve(&talking("c1", "1002")));
        let ringing = Event::Call(
            CallEvent::new(CallId::from("c1"), CallChange::TermConnRinging)
                .parties(None, Some(AddressId::from("1001"))),
        );
        assert!(!gate.resolve(&ringing));
        assert!(!gate.is_resolved());
    }

    #[test]
    fn times_out_no_earlier_than_deadline() {
        let gate = Gate::new(called("1001"));
        let timeout = Duration::from_millis(50);
        let started = Instant::now();
        let err = gate.wait_timeout(timeout).unwrap_err();
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout, "returned early after {elapsed:?}");
        assert!(elapsed < timeout + Duration::from_millis(500), "returned late after {elapsed:?}");
        match err {
            Error::CorrelationTimeout { kind, correlation, .. } => {
                assert_eq!(kind, EventKind::TermConnTalking);
                assert_eq!(correlation, "called=1001");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn unbound_gate_replays_backlog_on_bind() {
        let gate = Gate::unbound(EventKind::TermConnTalking);
        assert!(!gate.resolve(&talking("c1", "1002")));
        assert!(!gate.resolve(&talking("c2", "1001")));
        assert!(!gate.is_resolved());
        assert!(gate.bind(Correlation::Called(AddressId::from("1001"))));
        assert_eq!(gate.payload(), Some(talking("c2", "1001")));
        // later matches no longer count
        assert!(!gate.resolve(&talking("c3", "1001")));
    }

    #[test]
    fn full_backlog_drops_oldest() {
        let gate = Gate::unbound(EventKind::TermConnTalking);
        for i in 0..=UNBOUND_BACKLOG {
            gate.resolve(&talking(&format!("c{i}"), "1001"));
        }
        assert!(gate.bind(Correlation::Called(AddressId::from("1001"))));
        assert_eq!(gate.payload(), Some(talking("c1", "1001")));
    }

    #[test]
    fn unbound_gate_keeps_waiting_after_bind_without_match() {
        let gate = Gate::unbound(EventKind::TermConnTalking);
        gate.resolve(&talking("c1", "1002"));
        assert!(!gate.bind(Correlation::Called(AddressId::from("1001"))));
        assert!(gate.resolve(&talking("c2", "1001")));
    }

    #[test]
    fn rearm_gives_independent_pending_gate() {
        let gate = Gate::new(called("1001"));
        assert!(gate.resolve(&talking("c1", "1001")));
        let next = gate.rearm(called("1001"));
        assert_ne!(gate.id(), next.id());
        assert!(!next.is_resolved());
        assert!(next.resolve(&talking("c2", "1001")));
        assert_eq!(gate.payload(), Some(talking("c1", "1001")));
    }

    #[test]
    fn no_lost_wakeup_under_random_interleavings() {
        let mut rng = rand::thread_rng();
        for round in 0..500 {
            let gate = Gate::new(called("1001"));
            let resolver = gate.clone();
            let delay_us = rng.gen_range(0..200u64);
            let spin = rng.gen_bool(0.5);
            let handle = thread::spawn(move || {
                if spin {
                    for _ in 0..delay_us {
                        std::hint::spin_loop();
                    }
                } else {
                    thread::sleep(Duration::from_micros(delay_us));
                }
                resolver.resolve(&talking(&format!("c{round}"), "1001"))
            });
            let event = gate
                .wait_timeout(Duration::from_secs(5))
                .unwrap_or_else(|err| panic!("round {round} hung: {err}"));
            assert_eq!(event.call(), Some(&CallId::from(format!("c{round}"))));
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn many_waiters_all_wake() {
        let gate = Gate::new(called("1001"));
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                thread::spawn(move || gate.wait_timeout(Duration::from_secs(5)))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        assert!(gate.resolve(&talking("c1", "1001")));
        for waiter in waiters {
            assert!(waiter.join().unwrap().is_ok());
        }
    }
}
