use std::fmt;
use std::sync::Arc;

use crate::event::{Event, EventKind};
use crate::ids::{AddressId, CallId, ConnectionId, TerminalId};

type Test = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Identity test applied to events that already have the right kind.
#[derive(Clone)]
pub enum Correlation {
    Any,
    Provider(String),
    /// The address the event was raised for (line, or the connection's
    /// address for call events).
    Address(AddressId),
    Terminal(TerminalId),
    Called(AddressId),
    Calling(AddressId),
    Call(CallId),
    Connection(ConnectionId),
    All(Vec<Correlation>),
    Custom { label: String, test: Test },
}

impl Correlation {
    pub fn custom<F>(label: impl Into<String>, test: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Correlation::Custom { label: label.into(), test: Arc::new(test) }
    }

    pub fn and(self, other: Correlation) -> Self {
        match (self, other) {
            (Correlation::Any, other) | (other, Correlation::Any) => other,
            (Correlation::All(mut all), Correlation::All(more)) => {
                all.extend(more);
                Correlation::All(all)
            }
            (Correlation::All(mut all), other) | (other, Correlation::All(mut all)) => {
                all.push(other);
                Correlation::All(all)
            }
            (one, other) => Correlation::All(vec![one, other]),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Correlation::Any => true,
            Correlation::Provider(name) => event.provider() == Some(name.as_str()),
            Correlation::Address(address) => event.address() == Some(address),
            Correlation::Terminal(terminal) => event.terminal() == Some(terminal),
            Correlation::Called(address) => event.called() == Some(address),
            Correlation::Calling(address) => event.calling() == Some(address),
            Correlation::Call(call) => event.call() == Some(call),
            Correlation::Connection(connection) => event.connection() == Some(connection),
            Correlation::All(all) => all.iter().all(|c| c.matches(event)),
            Correlation::Custom { test, .. } => test(event),
        }
    }
}

impl fmt::Display for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Correlation::Any => f.write_str("any"),
            Correlation::Provider(name) => write!(f, "provider={name}"),
            Correlation::Address(address) => write!(f, "address={address}"),
            Correlation::Terminal(terminal) => write!(f, "terminal={terminal}"),
            Correlation::Called(address) => write!(f, "called={address}"),
            Correlation::Calling(address) => write!(f, "calling={address}"),
            Correlation::Call(call) => write!(f, "call={call}"),
            Correlation::Connection(connection) => write!(f, "connection={connection}"),
            Correlation::All(all) => {
                for (i, c) in all.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    write!(f, "{c}")?;
                }
                Ok(())
            }
            Correlation::Custom { label, .. } => f.write_str(label),
        }
    }
}

impl fmt::Debug for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Correlation({self})")
    }
}

/// Decides whether an event satisfies a pending wait: the event kind the
/// router indexes on, plus the identity it must carry.
#[derive(Clone, Debug)]
pub struct Predicate {
    kind: EventKind,
    correlation: Correlation,
}

impl Predicate {
    pub fn new(kind: EventKind, correlation: Correlation) -> Self {
        Self { kind, correlation }
    }

    pub fn any(kind: EventKind) -> Self {
        Self::new(kind, Correlation::Any)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn correlation(&self) -> &Correlation {
        &self.correlation
    }

    pub fn matches(&self, event: &Event) -> bool {
        event.kind() == self.kind && self.correlation.matches(event)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} where {}", self.kind, self.correlation)
    }
}
