use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

use crate::ids::{
    AddressId, CallId, ConnectionId, RtpHandle, TerminalConnectionId, TerminalId,
};

#[derive(
    strum_macros::Display,
    EnumString,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
)]
pub enum Category {
    Provider,
    Terminal,
    Address,
    Call,
}

/// Flat classification of every event the router understands, used to
/// index pending gates.
#[derive(
    strum_macros::Display,
    EnumString,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
)]
pub enum EventKind {
    ProviderInService,
    ProviderOutOfService,
    ProviderShutdown,

    TerminalInService,
    TerminalOutOfService,
    OpenLogicalChannel,
    RtpOutputStarted,
    DeviceStateChanged,

    AddressInService,
    AddressOutOfService,

    CallActive,
    CallInvalid,
    ConnEstablished,
    ConnDisconnected,
    TermConnRinging,
    TermConnTalking,
    TermConnHeld,
    TransferEnd,
    ConferenceEnd,

    Unrecognized,
}

impl EventKind {
    pub fn category(self) -> Option<Category> {
        use EventKind::*;
        match self {
            ProviderInService | ProviderOutOfService | ProviderShutdown => {
                Some(Category::Provider)
            }
            TerminalInService | TerminalOutOfService | OpenLogicalChannel
            | RtpOutputStarted | DeviceStateChanged => Some(Category::Terminal),
            AddressInService | AddressOutOfService => Some(Category::Address),
            CallActive | CallInvalid | ConnEstablished | ConnDisconnected
            | TermConnRinging | TermConnTalking | TermConnHeld | TransferEnd
            | ConferenceEnd => Some(Category::Call),
            Unrecognized => None,
        }
    }
}

#[derive(
    strum_macros::Display,
    EnumString,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    Idle,
    Active,
    Alerting,
    Held,
    Whisper,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderChange {
    InService,
    OutOfService,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEvent {
    pub provider: String,
    pub change: ProviderChange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalChange {
    InService,
    OutOfService,
    OpenLogicalChannel { rtp_handle: RtpHandle },
    RtpOutputStarted { remote: SocketAddr },
    DeviceState(DeviceState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerminalEvent {
    pub terminal: TerminalId,
    pub change: TerminalChange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AddressChange {
    InService,
    OutOfService,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddressEvent {
    pub address: AddressId,
    pub change: AddressChange,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CallChange {
    Active,
    Invalid,
    ConnEstablished,
    ConnDisconnected,
    TermConnRinging,
    TermConnTalking,
    TermConnHeld,
    TransferEnd,
    ConferenceEnd,
}

/// A call-level event. Connection and terminal connection events carry the
/// leg they happened on: `address` is the address of that connection,
/// `called`/`calling` are the parties of the call as seen from it.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEvent {
    pub call: CallId,
    pub change: CallChange,
    pub address: Option<AddressId>,
    pub connection: Option<ConnectionId>,
    pub terminal: Option<TerminalId>,
    pub terminal_connection: Option<TerminalConnectionId>,
    pub calling: Option<AddressId>,
    pub called: Option<AddressId>,
}

impl CallEvent {
    pub fn new(call: CallId, change: CallChange) -> Self {
        Self {
            call,
            change,
            address: None,
            connection: None,
            terminal: None,
            terminal_connection: None,
            calling: None,
            called: None,
        }
    }

    pub fn on_connection(mut self, address: AddressId, connection: ConnectionId) -> Self {
        self.address = Some(address);
        self.connection = Some(connection);
        self
    }

    pub fn on_terminal(
        mut self,
        terminal: TerminalId,
        terminal_connection: TerminalConnectionId,
    ) -> Self {
        self.terminal = Some(terminal);
        self.terminal_connection = Some(terminal_connection);
        self
    }

    pub fn parties(mut self, calling: Option<AddressId>, called: Option<AddressId>) -> Self {
        self.calling = calling;
        self.called = called;
        self
    }
}

/// Everything the control service can tell us, as one tagged union so a
/// single sink can ingest all categories.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Provider(ProviderEvent),
    Terminal(TerminalEvent),
    Address(AddressEvent),
    Call(CallEvent),
    /// An event the service emitted that this crate has no model for.
    Other { category: Category, name: String },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Provider(ev) => match ev.change {
                ProviderChange::InService => EventKind::ProviderInService,
                ProviderChange::OutOfService => EventKind::ProviderOutOfService,
                ProviderChange::Shutdown => EventKind::ProviderShutdown,
            },
            Event::Terminal(ev) => match ev.change {
                TerminalChange::InService => EventKind::TerminalInService,
                TerminalChange::OutOfService => EventKind::TerminalOutOfService,
                TerminalChange::OpenLogicalChannel { .. } => {
                    EventKind::OpenLogicalChannel
                }
                TerminalChange::RtpOutputStarted { .. } => EventKind::RtpOutputStarted,
                TerminalChange::DeviceState(_) => EventKind::DeviceStateChanged,
            },
            Event::Address(ev) => match ev.change {
                AddressChange::InService => EventKind::AddressInService,
                AddressChange::OutOfService => EventKind::AddressOutOfService,
            },
            Event::Call(ev) => match ev.change {
                CallChange::Active => EventKind::CallActive,
                CallChange::Invalid => EventKind::CallInvalid,
                CallChange::ConnEstablished => EventKind::ConnEstablished,
                CallChange::ConnDisconnected => EventKind::ConnDisconnected,
                CallChange::TermConnRinging => EventKind::TermConnRinging,
                CallChange::TermConnTalking => EventKind::TermConnTalking,
                CallChange::TermConnHeld => EventKind::TermConnHeld,
                CallChange::TransferEnd => EventKind::TransferEnd,
                CallChange::ConferenceEnd => EventKind::ConferenceEnd,
            },
            Event::Other { .. } => EventKind::Unrecognized,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Event::Provider(_) => Category::Provider,
            Event::Terminal(_) => Category::Terminal,
            Event::Address(_) => Category::Address,
            Event::Call(_) => Category::Call,
            Event::Other { category, .. } => *category,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Event::Provider(ev) => Some(&ev.provider),
            _ => None,
        }
    }

    /// The address the event was raised for: the line itself for address
    /// events, the connection's address for call events.
    pub fn address(&self) -> Option<&AddressId> {
        match self {
            Event::Address(ev) => Some(&ev.address),
            Event::Call(ev) => ev.address.as_ref(),
            _ => None,
        }
    }

    pub fn terminal(&self) -> Option<&TerminalId> {
        match self {
            Event::Terminal(ev) => Some(&ev.terminal),
            Event::Call(ev) => ev.terminal.as_ref(),
            _ => None,
        }
    }

    pub fn call(&self) -> Option<&CallId> {
        match self {
            Event::Call(ev) => Some(&ev.call),
            _ => None,
        }
    }

    pub fn connection(&self) -> Option<&ConnectionId> {
        match self {
            Event::Call(ev) => ev.connection.as_ref(),
            _ => None,
        }
    }

    pub fn terminal_connection(&self) -> Option<&TerminalConnectionId> {
        match self {
            Event::Call(ev) => ev.terminal_connection.as_ref(),
            _ => None,
        }
    }

    pub fn calling(&self) -> Option<&AddressId> {
        match self {
            Event::Call(ev) => ev.calling.as_ref(),
            _ => None,
        }
    }

    pub fn called(&self) -> Option<&AddressId> {
        match self {
            Event::Call(ev) => ev.called.as_ref(),
            _ => None,
        }
    }

    pub fn rtp_handle(&self) -> Option<RtpHandle> {
        match self {
            Event::Terminal(TerminalEvent {
                change: TerminalChange::OpenLogicalChannel { rtp_handle },
                ..
            }) => Some(*rtp_handle),
            _ => None,
        }
    }

    pub fn remote_media(&self) -> Option<SocketAddr> {
        match self {
            Event::Terminal(TerminalEvent {
                change: TerminalChange::RtpOutputStarted { remote },
                ..
            }) => Some(*remote),
            _ => None,
        }
    }

    pub fn device_state(&self) -> Option<DeviceState> {
        match self {
            Event::Terminal(TerminalEvent {
                change: TerminalChange::DeviceState(state),
                ..
            }) => Some(*state),
            _ => None,
        }
    }

    pub fn provider_in_service(provider: impl Into<String>) -> Self {
        Event::Provider(ProviderEvent {
            provider: provider.into(),
            change: ProviderChange::InService,
        })
    }

    pub fn terminal_change(terminal: TerminalId, change: TerminalChange) -> Self {
        Event::Terminal(TerminalEvent { terminal, change })
    }

    pub fn address_change(address: AddressId, change: AddressChange) -> Self {
        Event::Address(AddressEvent { address, change })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category(), self.kind())?;
        match self {
            Event::Provider(ev) => write!(f, " provider={}", ev.provider),
            Event::Terminal(ev) => {
                write!(f, " terminal={}", ev.terminal)?;
                match &ev.change {
                    TerminalChange::OpenLogicalChannel { rtp_handle } => {
                        write!(f, " handle={rtp_handle}")
                    }
                    TerminalChange::RtpOutputStarted { remote } => {
                        write!(f, " remote={remote}")
                    }
                    TerminalChange::DeviceState(state) => write!(f, " state={state}"),
                    _ => Ok(()),
                }
            }
            Event::Address(ev) => write!(f, " address={}", ev.address),
            Event::Call(ev) => {
                write!(f, " call={}", ev.call)?;
                if let Some(address) = &ev.address {
                    write!(f, " address={address}")?;
                }
                if let Some(terminal) = &ev.terminal {
                    write!(f, " terminal={terminal}")?;
                }
                if let Some(calling) = &ev.calling {
                    write!(f, " calling={calling}")?;
                }
                if let Some(called) = &ev.called {
                    write!(f, " called={called}")?;
                }
                Ok(())
            }
            Event::Other { name, .. } => write!(f, " name={name}"),
        }
    }
}
