use std::fmt;
use std::time::Duration;

use crate::directory::{IdentitySource, Role, RoleDirectory};
use crate::error::Result;
use crate::event::{DeviceState, EventKind};
use crate::predicate::Correlation;
use crate::slots::{Field, Slots};
use crate::subscription::DEFAULT_CAPACITY;

/// Who an action dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dial {
    /// The address of a resolved role.
    Role(Role),
    /// A raw directory number.
    Number(String),
}

impl Dial {
    pub fn number(&self, directory: &RoleDirectory) -> Result<String> {
        match self {
            Dial::Role(role) => Ok(directory.identity_of(role)?.address()?.to_string()),
            Dial::Number(number) => Ok(number.clone()),
        }
    }
}

impl fmt::Display for Dial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dial::Role(role) => write!(f, "{role}"),
            Dial::Number(number) => f.write_str(number),
        }
    }
}

/// Correlation written against roles and slots, turned into a concrete
/// [`Correlation`] when the wait is bound.
#[derive(Debug, Clone)]
pub enum Correlate {
    Any,
    AddressOf(Role),
    TerminalOf(Role),
    CalledIs(Role),
    CallingIs(Role),
    CallIn(String),
    AddressIn(String),
    ConnectionIn(String),
    All(Vec<Correlate>),
    Exactly(Correlation),
}

impl Correlate {
    pub fn and(self, other: Correlate) -> Self {
        match (self, other) {
            (Correlate::Any, other) | (other, Correlate::Any) => other,
            (Correlate::All(mut all), other) => {
                all.push(other);
                Correlate::All(all)
            }
            (one, other) => Correlate::All(vec![one, other]),
        }
    }

    pub fn resolve(&self, directory: &RoleDirectory, slots: &Slots) -> Result<Correlation> {
        let correlation = match self {
            Correlate::Any => Correlation::Any,
            Correlate::AddressOf(role) => {
                Correlation::Address(directory.identity_of(role)?.address()?.clone())
            }
            Correlate::TerminalOf(role) => {
                Correlation::Terminal(directory.identity_of(role)?.terminal)
            }
            Correlate::CalledIs(role) => {
                Correlation::Called(directory.identity_of(role)?.address()?.clone())
            }
            Correlate::CallingIs(role) => {
                Correlation::Calling(directory.identity_of(role)?.address()?.clone())
            }
            Correlate::CallIn(slot) => Correlation::Call(slots.call(slot)?),
            Correlate::AddressIn(slot) => Correlation::Address(slots.address(slot)?),
            Correlate::ConnectionIn(slot) => Correlation::Connection(slots.connection(slot)?),
            Correlate::All(all) => {
                let mut correlation = Correlation::Any;
                for c in all {
                    correlation = correlation.and(c.resolve(directory, slots)?);
                }
                correlation
            }
            Correlate::Exactly(correlation) => correlation.clone(),
        };
        Ok(correlation)
    }
}

impl fmt::Display for Correlate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Correlate::Any => f.write_str("any"),
            Correlate::AddressOf(role) => write!(f, "address of {role}"),
            Correlate::TerminalOf(role) => write!(f, "terminal of {role}"),
            Correlate::CalledIs(role) => write!(f, "called {role}"),
            Correlate::CallingIs(role) => write!(f, "calling {role}"),
            Correlate::CallIn(slot) => write!(f, "call {slot}"),
            Correlate::AddressIn(slot) => write!(f, "address {slot}"),
            Correlate::ConnectionIn(slot) => write!(f, "connection {slot}"),
            Correlate::All(all) => {
                for (i, c) in all.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    write!(f, "{c}")?;
                }
                Ok(())
            }
            Correlate::Exactly(correlation) => write!(f, "{correlation}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A one-shot gate registered just before the paired action of a
    /// [`Step::ActAwait`]. A plain [`Step::Await`] cannot use it.
    Gate,
    /// A subscription opened by an earlier [`Step::Subscribe`].
    Subscription(String),
    /// A gate registered by an earlier [`Step::Arm`].
    Armed(String),
}

#[derive(Debug, Clone)]
pub struct Wait {
    pub kind: EventKind,
    pub correlate: Correlate,
    pub captures: Vec<(String, Field)>,
    pub source: Source,
}

impl Wait {
    pub fn on(kind: EventKind) -> Self {
        Self {
            kind,
            correlate: Correlate::Any,
            captures: Vec::new(),
            source: Source::Gate,
        }
    }

    pub fn matching(mut self, correlate: Correlate) -> Self {
        self.correlate = self.correlate.and(correlate);
        self
    }

    pub fn capture(mut self, slot: impl Into<String>, field: Field) -> Self {
        self.captures.push((slot.into(), field));
        self
    }

    pub fn from_subscription(mut self, name: impl Into<String>) -> Self {
        self.source = Source::Subscription(name.into());
        self
    }

    pub fn armed(mut self, name: impl Into<String>) -> Self {
        self.source = Source::Armed(name.into());
        self
    }
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} where {}", self.kind, self.correlate)?;
        match &self.source {
            Source::Gate => Ok(()),
            Source::Subscription(name) => write!(f, " from {name}"),
            Source::Armed(name) => write!(f, " armed as {name}"),
        }
    }
}

/// A control request. Slot names refer to values captured earlier.
#[derive(Debug, Clone)]
pub enum Action {
    /// Places a call. The call id lands in `call`, the connections in
    /// `{call}.near` and `{call}.far`, the far address in
    /// `{call}.far_address`.
    Connect { from: Role, to: Dial, call: String },
    Answer { terminal_connection: String },
    Hold { terminal_connection: String },
    Redirect { connection: String, to: Dial },
    Transfer { call: String, other: String },
    Conference { call: String, other: String },
    Drop { call: String },
    SendData { role: Role, data: String },
    SetDeviceFilters { role: Role, states: Vec<DeviceState> },
    ReportDeviceState { role: Role, into: String },
    SetRtpParams { role: Role, handle: String },
    AutoAccept { role: Role },
    PlayMedia { destination: String },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Connect { .. } => "connect",
            Action::Answer { .. } => "answer",
            Action::Hold { .. } => "hold",
            Action::Redirect { .. } => "redirect",
            Action::Transfer { .. } => "transfer",
            Action::Conference { .. } => "conference",
            Action::Drop { .. } => "drop",
            Action::SendData { .. } => "send data",
            Action::SetDeviceFilters { .. } => "set device filters",
            Action::ReportDeviceState { .. } => "report device state",
            Action::SetRtpParams { .. } => "set rtp params",
            Action::AutoAccept { .. } => "auto accept",
            Action::PlayMedia { .. } => "play media",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match self {
            Action::Connect { from, to, call } => write!(f, "{name} {from} -> {to} as {call}"),
            Action::Answer { terminal_connection } | Action::Hold { terminal_connection } => {
                write!(f, "{name} {terminal_connection}")
            }
            Action::Redirect { connection, to } => write!(f, "{name} {connection} to {to}"),
            Action::Transfer { call, other } | Action::Conference { call, other } => {
                write!(f, "{name} {call} with {other}")
            }
            Action::Drop { call } => write!(f, "{name} {call}"),
            Action::SendData { role, data } => write!(f, "{name} to {role}: {data}"),
            Action::SetDeviceFilters { role, states } => {
                write!(f, "{name} on {role}: {states:?}")
            }
            Action::ReportDeviceState { role, into } => write!(f, "{name} of {role} into {into}"),
            Action::SetRtpParams { role, handle } => write!(f, "{name} on {role} for {handle}"),
            Action::AutoAccept { role } => write!(f, "{name} on {role}"),
            Action::PlayMedia { destination } => write!(f, "{name} to {destination}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Resolve {
        role: Role,
        source: IdentitySource,
    },
    /// Opens an always-live queue for a recurring event.
    Subscribe {
        name: String,
        kind: EventKind,
        correlate: Correlate,
        capacity: usize,
    },
    /// Registers an unbound gate now, for an event triggered by a later
    /// action and awaited after that.
    Arm {
        name: String,
        kind: EventKind,
    },
    Act(Action),
    Await(Wait),
    /// Registers the wait's gate, issues the action, then waits.
    ActAwait(Action, Wait),
    Pause(Duration),
    /// Drains a subscription until the stop signal is raised, or `limit`
    /// events were seen.
    Monitor {
        subscription: String,
        captures: Vec<(String, Field)>,
        limit: Option<usize>,
    },
}

impl Step {
    pub fn subscribe(name: impl Into<String>, kind: EventKind, correlate: Correlate) -> Self {
        Step::Subscribe {
            name: name.into(),
            kind,
            correlate,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Resolve { role, source } => write!(f, "resolve {role} from {source}"),
            Step::Subscribe { name, kind, correlate, .. } => {
                write!(f, "subscribe {name} to {kind} where {correlate}")
            }
            Step::Arm { name, kind } => write!(f, "arm {name} for {kind}"),
            Step::Act(action) => write!(f, "{action}"),
            Step::Await(wait) => write!(f, "await {wait}"),
            Step::ActAwait(action, wait) => write!(f, "{action}, await {wait}"),
            Step::Pause(duration) => write!(f, "pause {duration:?}"),
            Step::Monitor { subscription, .. } => write!(f, "monitor {subscription}"),
        }
    }
}

/// A named call flow.
#[derive(Debug, Clone)]
pub struct Scenario {
    name: String,
    steps: Vec<Step>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), steps: Vec::new() }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}
