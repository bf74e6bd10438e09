use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::gate::GateId;
use crate::predicate::{Correlation, Predicate};

pub const DEFAULT_CAPACITY: usize = 32;

struct Queue {
    events: VecDeque<Event>,
    dropped: u64,
}

struct Inner {
    id: GateId,
    predicate: Predicate,
    capacity: usize,
    queue: Mutex<Queue>,
    available: Condvar,
}

/// An always-live, bounded queue of the events matching one predicate.
///
/// Used for waits that recur (the same DN ringing once per redirected leg,
/// device state changes): the router enqueues every match whether or not
/// anyone is waiting, so nothing falls into the gap between consuming one
/// occurrence and waiting for the next. When full, the oldest event is
/// dropped.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

impl Subscription {
    pub fn new(predicate: Predicate, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: GateId::next(),
                predicate,
                capacity: capacity.max(1),
                queue: Mutex::new(Queue { events: VecDeque::new(), dropped: 0 }),
                available: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> GateId {
        self.inner.id
    }

    pub fn kind(&self) -> EventKind {
        self.inner.predicate.kind()
    }

    pub fn predicate(&self) -> &Predicate {
        &self.inner.predicate
    }

    /// Enqueues `event` if it matches.
    pub fn offer(&self, event: &Event) -> bool {
        if !self.inner.predicate.matches(event) {
            return false;
        }
        let mut queue = self.inner.queue.lock();
        if queue.events.len() >= self.inner.capacity {
            queue.events.pop_front();
            queue.dropped += 1;
            warn!(
                subscription = %self.inner.id,
                predicate = %self.inner.predicate,
                "subscription full, dropped oldest event"
            );
        }
        queue.events.push_back(event.clone());
        drop(queue);
        self.inner.available.notify_all();
        true
    }

    pub fn try_next(&self) -> Option<Event> {
        self.inner.queue.lock().events.pop_front()
    }

    /// Takes the oldest queued match, blocking until one arrives or
    /// `deadline` passes.
    pub fn next(&self, deadline: Instant) -> Result<Event> {
        let predicate = &self.inner.predicate;
        self.take(deadline, predicate.kind(), predicate.correlation().to_string(), |_| true)
    }

    /// Takes the oldest queued event of `kind` that also satisfies
    /// `correlation`, blocking until one arrives or `deadline` passes.
    /// Events it passes over stay queued for later waits.
    pub fn next_matching(
        &self,
        kind: EventKind,
        correlation: &Correlation,
        deadline: Instant,
    ) -> Result<Event> {
        self.take(deadline, kind, correlation.to_string(), |event| {
            event.kind() == kind && correlation.matches(event)
        })
    }

    fn take<F>(
        &self,
        deadline: Instant,
        kind: EventKind,
        correlation: String,
        pick: F,
    ) -> Result<Event>
    where
        F: Fn(&Event) -> bool,
    {
        let started = Instant::now();
        let mut queue = self.inner.queue.lock();
        loop {
            if let Some(event) = take_first(&mut queue.events, &pick) {
                return Ok(event);
            }
            if self.inner.available.wait_until(&mut queue, deadline).timed_out() {
                if let Some(event) = take_first(&mut queue.events, &pick) {
                    return Ok(event);
                }
                return Err(Error::CorrelationTimeout {
                    gate: self.inner.id.to_string(),
                    kind,
                    correlation,
                    waited: started.elapsed(),
                });
            }
        }
    }

    pub fn next_timeout(&self, timeout: Duration) -> Result<Event> {
        self.next(Instant::now() + timeout)
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.inner.queue.lock().dropped
    }
}

fn take_first<F>(events: &mut VecDeque<Event>, pick: &F) -> Option<Event>
where
    F: Fn(&Event) -> bool,
{
    let at = events.iter().position(pick)?;
    events.remove(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CallChange, CallEvent};
    use crate::ids::{AddressId, CallId};
    use std::thread;

    fn ringing(call: &str, called: &str) -> Event {
        Event::Call(
            CallEvent::new(CallId::from(call), CallChange::TermConnRinging)
                .parties(None, Some(AddressId::from(called))),
        )
    }

    fn port_ringing(capacity: usize) -> Subscription {
        Subscription::new(
            Predicate::new(
                EventKind::TermConnRinging,
                Correlation::Called(AddressId::from("3000")),
            ),
            capacity,
        )
    }

    #[test]
    fn queues_matches_in_order() {
        let sub = port_ringing(4);
        assert!(sub.offer(&ringing("c1", "3000")));
        assert!(!sub.offer(&ringing("c2", "1001")));
        assert!(sub.offer(&ringing("c3", "3000")));
        assert_eq!(sub.len(), 2);
        let first = sub.next_timeout(Duration::from_millis(10)).unwrap();
        let second = sub.next_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(first.call(), Some(&CallId::from("c1")));
        assert_eq!(second.call(), Some(&CallId::from("c3")));
        assert!(sub.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let sub = port_ringing(2);
        for call in ["c1", "c2", "c3"] {
            sub.offer(&ringing(call, "3000"));
        }
        assert_eq!(sub.dropped(), 1);
        assert_eq!(sub.try_next().unwrap().call(), Some(&CallId::from("c2")));
    }

    #[test]
    fn match_before_wait_is_not_lost() {
        let sub = port_ringing(4);
        sub.offer(&ringing("c1", "3000"));
        thread::sleep(Duration::from_millis(5));
        assert!(sub.next_timeout(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn blocks_until_offered() {
        let sub = port_ringing(4);
        let producer = sub.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.offer(&ringing("c9", "3000"));
        });
        let event = sub.next_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.call(), Some(&CallId::from("c9")));
        handle.join().unwrap();
    }

    #[test]
    fn matching_wait_leaves_other_calls_queued() {
        let sub = port_ringing(4);
        sub.offer(&ringing("a", "3000"));
        sub.offer(&ringing("b", "3000"));
        let take = |call: &str| {
            sub.next_matching(
                EventKind::TermConnRinging,
                &Correlation::Call(CallId::from(call)),
                Instant::now() + Duration::from_millis(50),
            )
        };
        let b = take("b").unwrap();
        assert_eq!(b.call(), Some(&CallId::from("b")));
        assert_eq!(sub.len(), 1);
        let a = take("a").unwrap();
        assert_eq!(a.call(), Some(&CallId::from("a")));
        assert!(sub.is_empty());
    }

    #[test]
    fn matching_wait_wakes_for_a_later_match() {
        let sub = port_ringing(4);
        sub.offer(&ringing("a", "3000"));
        let producer = sub.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.offer(&ringing("b", "3000"));
        });
        let b = sub
            .next_matching(
                EventKind::TermConnRinging,
                &Correlation::Call(CallId::from("b")),
                Instant::now() + Duration::from_secs(5),
            )
            .unwrap();
        assert_eq!(b.call(), Some(&CallId::from("b")));
        assert_eq!(sub.try_next().unwrap().call(), Some(&CallId::from("a")));
        handle.join().unwrap();
    }

    #[test]
    fn matching_timeout_reports_the_awaited_identity() {
        let sub = port_ringing(4);
        sub.offer(&ringing("b", "3000"));
        let err = sub
            .next_matching(
                EventKind::TermConnRinging,
                &Correlation::Call(CallId::from("a")),
                Instant::now() + Duration::from_millis(20),
            )
            .unwrap_err();
        match err {
            Error::CorrelationTimeout { kind, correlation, .. } => {
                assert_eq!(kind, EventKind::TermConnRinging);
                assert_eq!(correlation, "call=a");
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(sub.len(), 1);
    }

    #[test]
    fn times_out_when_empty() {
        let sub = port_ringing(4);
        let err = sub.next_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_timeout());
    }
}
