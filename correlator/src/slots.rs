use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use strum_macros::EnumString;

use crate::error::{Error, Result};
use crate::event::{DeviceState, Event};
use crate::ids::{AddressId, CallId, ConnectionId, RtpHandle, TerminalConnectionId, TerminalId};

/// A value captured from an event or an action result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Call(CallId),
    Connection(ConnectionId),
    TerminalConnection(TerminalConnectionId),
    Terminal(TerminalId),
    Address(AddressId),
    Rtp(RtpHandle),
    Media(SocketAddr),
    DeviceState(DeviceState),
    Event(Event),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Call(_) => "call",
            Value::Connection(_) => "connection",
            Value::TerminalConnection(_) => "terminal connection",
            Value::Terminal(_) => "terminal",
            Value::Address(_) => "address",
            Value::Rtp(_) => "rtp handle",
            Value::Media(_) => "media address",
            Value::DeviceState(_) => "device state",
            Value::Event(_) => "event",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Call(v) => write!(f, "{v}"),
            Value::Connection(v) => write!(f, "{v}"),
            Value::TerminalConnection(v) => write!(f, "{v}"),
            Value::Terminal(v) => write!(f, "{v}"),
            Value::Address(v) => write!(f, "{v}"),
            Value::Rtp(v) => write!(f, "{v}"),
            Value::Media(v) => write!(f, "{v}"),
            Value::DeviceState(v) => write!(f, "{v}"),
            Value::Event(v) => write!(f, "{v}"),
        }
    }
}

/// Event field a wait captures into a slot.
#[derive(strum_macros::Display, EnumString, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum Field {
    Call,
    Connection,
    TerminalConnection,
    Terminal,
    Address,
    Calling,
    Called,
    RtpHandle,
    RemoteMedia,
    DeviceState,
    Event,
}

impl Field {
    pub fn extract(self, event: &Event) -> Option<Value> {
        match self {
            Field::Call => event.call().cloned().map(Value::Call),
            Field::Connection => event.connection().cloned().map(Value::Connection),
            Field::TerminalConnection => {
                event.terminal_connection().cloned().map(Value::TerminalConnection)
            }
            Field::Terminal => event.terminal().cloned().map(Value::Terminal),
            Field::Address => event.address().cloned().map(Value::Address),
            Field::Calling => event.calling().cloned().map(Value::Address),
            Field::Called => event.called().cloned().map(Value::Address),
            Field::RtpHandle => event.rtp_handle().map(Value::Rtp),
            Field::RemoteMedia => event.remote_media().map(Value::Media),
            Field::DeviceState => event.device_state().map(Value::DeviceState),
            Field::Event => Some(Value::Event(event.clone())),
        }
    }
}

macro_rules! typed_slot {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self, slot: &str) -> Result<$ty> {
            match self.get(slot)? {
                Value::$variant(v) => Ok(v.clone()),
                other => Err(Error::SlotType {
                    slot: slot.to_string(),
                    expected: stringify!($name),
                    found: other.type_name(),
                }),
            }
        }
    };
}

/// Named working set of a running scenario.
#[derive(Debug, Default)]
pub struct Slots {
    values: HashMap<String, Value>,
}

impl Slots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, slot: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(slot.into(), value)
    }

    pub fn get(&self, slot: &str) -> Result<&Value> {
        self.values
            .get(slot)
            .ok_or_else(|| Error::MissingSlot(slot.to_string()))
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.values.contains_key(slot)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    typed_slot!(call, Call, CallId);
    typed_slot!(connection, Connection, ConnectionId);
    typed_slot!(terminal_connection, TerminalConnection, TerminalConnectionId);
    typed_slot!(terminal, Terminal, TerminalId);
    typed_slot!(address, Address, AddressId);
    typed_slot!(rtp, Rtp, RtpHandle);
    typed_slot!(media, Media, SocketAddr);
    typed_slot!(device_state, DeviceState, DeviceState);
    typed_slot!(event, Event, Event);
}
