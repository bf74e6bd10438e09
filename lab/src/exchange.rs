use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use callgate_correlator::event::{
    AddressChange, CallChange, CallEvent, DeviceState, Event, TerminalChange,
};
use callgate_correlator::ids::{
    AddressId, CallId, ConnectionId, RtpHandle, TerminalConnectionId, TerminalId,
};
use callgate_correlator::leg::{Leg, LegInput, LegState};
use callgate_correlator::service::{
    CallLegs, Connection, MediaRegistration, ServiceError, ServiceResult,
};
use tracing::debug;

use crate::config::{DeviceConfig, DeviceKind, LabConfig};

/// Used when the OS hands out no ephemeral port for a simulated far end.
const FALLBACK_RTP_PORT: u16 = 16384;

const PHONE_RESPONSE: &str =
    r#"<CiscoIPPhoneResponse><ResponseItem Status="0" Data="Success" URL=""/></CiscoIPPhoneResponse>"#;

struct Device {
    config: DeviceConfig,
    terminal: TerminalId,
    address: Option<AddressId>,
    opened: bool,
    media: Option<MediaRegistration>,
    auto_accept: bool,
    filters: HashSet<DeviceState>,
    state: DeviceState,
    display: Vec<String>,
}

impl Device {
    /// Whether a call offered to this device starts ringing right away.
    fn alerts(&self) -> bool {
        self.config.kind == DeviceKind::Phone || self.auto_accept
    }
}

struct LegRecord {
    call: CallId,
    connection: ConnectionId,
    terminal_connection: TerminalConnectionId,
    address: AddressId,
    terminal: TerminalId,
    leg: Leg,
    calling: AddressId,
    called: AddressId,
}

impl LegRecord {
    fn event(&self, change: CallChange) -> Event {
        Event::Call(
            CallEvent::new(self.call.clone(), change)
                .on_connection(self.address.clone(), self.connection.clone())
                .on_terminal(self.terminal.clone(), self.terminal_connection.clone())
                .parties(Some(self.calling.clone()), Some(self.called.clone())),
        )
    }

    fn apply(&mut self, input: LegInput) -> ServiceResult<LegState> {
        self.leg
            .apply(input)
            .map_err(|e| ServiceError::InvalidState(format!("{}: {e}", self.terminal_connection)))
    }
}

/// A persona about to place a call.
pub(crate) struct Caller {
    pub terminal: TerminalId,
    pub address: AddressId,
    pub number: String,
    pub hang_up_after: Option<Duration>,
}

/// What an operation produced: the events to publish on one delivery lane,
/// plus the persona reactions it triggers.
#[derive(Default)]
pub(crate) struct Outcome {
    pub key: String,
    pub events: Vec<Event>,
    pub answers: Vec<(TerminalConnectionId, Duration)>,
    pub callers: Vec<Caller>,
}

impl Outcome {
    fn on(key: impl ToString) -> Self {
        Self { key: key.to_string(), ..Default::default() }
    }

    fn with(key: impl ToString, event: Event) -> Self {
        let mut outcome = Self::on(key);
        outcome.events.push(event);
        outcome
    }
}

/// The simulated switch: devices, lines and calls, advanced by the leg
/// state machine.
pub(crate) struct Exchange {
    provider: String,
    open: bool,
    call_prefix: String,
    next_call: u64,
    next_leg: u64,
    devices: HashMap<TerminalId, Device>,
    lines: HashMap<AddressId, TerminalId>,
    legs: HashMap<ConnectionId, LegRecord>,
    terminal_connections: HashMap<TerminalConnectionId, ConnectionId>,
    calls: HashMap<CallId, Vec<ConnectionId>>,
    channels: HashMap<(TerminalId, RtpHandle), ConnectionId>,
    triggered: HashSet<String>,
}

impl Exchange {
    pub fn new(config: &LabConfig) -> Self {
        let mut devices = HashMap::new();
        let mut lines = HashMap::new();
        for device in &config.devices {
            let terminal = TerminalId::from(device.name.as_str());
            let address = device.dn.as_deref().map(AddressId::from);
            if let Some(address) = &address {
                lines.insert(address.clone(), terminal.clone());
            }
            devices.insert(
                terminal.clone(),
                Device {
                    config: device.clone(),
                    terminal,
                    address,
                    opened: false,
                    media: None,
                    auto_accept: false,
                    filters: HashSet::new(),
                    state: DeviceState::Idle,
                    display: Vec::new(),
                },
            );
        }
        Self {
            provider: config.provider.clone(),
            open: false,
            call_prefix: callgate_utils::rand_number(6),
            next_call: 0,
            next_leg: 0,
            devices,
            lines,
            legs: HashMap::new(),
            terminal_connections: HashMap::new(),
            calls: HashMap::new(),
            channels: HashMap::new(),
            triggered: HashSet::new(),
        }
    }

    pub fn open(&mut self) -> Outcome {
        self.open = true;
        Outcome::with("provider", Event::provider_in_service(self.provider.as_str()))
    }

    fn require_open(&self) -> ServiceResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(ServiceError::Unavailable(format!("provider {} is not in service", self.provider)))
        }
    }

    fn device(&self, terminal: &TerminalId) -> ServiceResult<&Device> {
        self.devices
            .get(terminal)
            .ok_or_else(|| ServiceError::InvalidArgument(format!("unknown terminal {terminal}")))
    }

    fn device_mut(&mut self, terminal: &TerminalId) -> ServiceResult<&mut Device> {
        self.devices
            .get_mut(terminal)
            .ok_or_else(|| ServiceError::InvalidArgument(format!("unknown terminal {terminal}")))
    }

    fn line(&self, address: &AddressId) -> ServiceResult<&Device> {
        self.lines
            .get(address)
            .and_then(|terminal| self.devices.get(terminal))
            .ok_or_else(|| ServiceError::InvalidArgument(format!("unknown address {address}")))
    }

    fn leg(&mut self, connection: &ConnectionId) -> ServiceResult<&mut LegRecord> {
        self.legs
            .get_mut(connection)
            .ok_or_else(|| ServiceError::InvalidArgument(format!("unknown connection {connection}")))
    }

    fn connection_of(&self, tc: &TerminalConnectionId) -> ServiceResult<ConnectionId> {
        self.terminal_connections
            .get(tc)
            .cloned()
            .ok_or_else(|| ServiceError::InvalidArgument(format!("unknown terminal connection {tc}")))
    }

    pub fn resolve_address(&self, dn: &str) -> ServiceResult<AddressId> {
        self.require_open()?;
        let address = AddressId::from(dn);
        self.line(&address)?;
        Ok(address)
    }

    pub fn terminals(&self, address: &AddressId) -> ServiceResult<Vec<TerminalId>> {
        Ok(vec![self.line(address)?.terminal.clone()])
    }

    pub fn create_terminal(&self, name: &str) -> ServiceResult<TerminalId> {
        self.require_open()?;
        let terminal = TerminalId::from(name);
        self.device(&terminal)?;
        Ok(terminal)
    }

    pub fn open_address(&mut self, address: &AddressId) -> ServiceResult<Outcome> {
        self.line(address)?;
        Ok(Outcome::with(
            address,
            Event::address_change(address.clone(), AddressChange::InService),
        ))
    }

    /// Phones come in service when opened; media terminals only once they
    /// register their media.
    pub fn open_terminal(&mut self, terminal: &TerminalId) -> ServiceResult<Outcome> {
        let device = self.device_mut(terminal)?;
        device.opened = true;
        if device.config.kind != DeviceKind::Phone {
            return Ok(Outcome::on(terminal));
        }
        Ok(Outcome::with(
            terminal,
            Event::terminal_change(terminal.clone(), TerminalChange::InService),
        ))
    }

    pub fn register_media(
        &mut self,
        terminal: &TerminalId,
        registration: MediaRegistration,
    ) -> ServiceResult<Outcome> {
        let device = self.device_mut(terminal)?;
        let fits = matches!(
            (device.config.kind, registration),
            (DeviceKind::RoutePoint, MediaRegistration::Dynamic)
                | (DeviceKind::CtiPort, MediaRegistration::Static(_))
        );
        if !fits {
            return Err(ServiceError::InvalidArgument(format!(
                "{terminal} cannot register {registration:?} media"
            )));
        }
        if !device.opened {
            return Err(ServiceError::InvalidState(format!("{terminal} is not open")));
        }
        device.media = Some(registration);
        Ok(Outcome::with(
            terminal,
            Event::terminal_change(terminal.clone(), TerminalChange::InService),
        ))
    }

    pub fn set_auto_accept(
        &mut self,
        address: &AddressId,
        terminal: &TerminalId,
    ) -> ServiceResult<Outcome> {
        let device = self.device_mut(terminal)?;
        if device.address.as_ref() != Some(address) {
            return Err(ServiceError::InvalidArgument(format!("{terminal} is not on {address}")));
        }
        device.auto_accept = true;
        let mut outcome = Outcome::on(address);
        outcome.callers = self.callers_for(address);
        Ok(outcome)
    }

    /// Personas waiting for `address` to become ready. Each persona dials
    /// once.
    fn callers_for(&mut self, address: &AddressId) -> Vec<Caller> {
        let mut callers = Vec::new();
        for device in self.devices.values() {
            let (Some(number), Some(from)) = (&device.config.dial_when_ready, &device.address)
            else {
                continue;
            };
            if number.as_str() != address.as_str() || self.triggered.contains(&device.config.name) {
                continue;
            }
            callers.push(Caller {
                terminal: device.terminal.clone(),
                address: from.clone(),
                number: number.clone(),
                hang_up_after: device.config.hangup_after_ms.map(Duration::from_millis),
            });
        }
        for caller in &callers {
            self.triggered.insert(caller.terminal.to_string());
        }
        callers
    }

    fn new_leg(
        &mut self,
        call: &CallId,
        address: &AddressId,
        terminal: &TerminalId,
        calling: &AddressId,
        called: &AddressId,
    ) -> ConnectionId {
        self.next_leg += 1;
        let connection = ConnectionId::from(format!("{call}:{}:{address}", self.next_leg));
        let tc = TerminalConnectionId::from(format!("{connection}:{terminal}"));
        self.legs.insert(
            connection.clone(),
            LegRecord {
                call: call.clone(),
                connection: connection.clone(),
                terminal_connection: tc.clone(),
                address: address.clone(),
                terminal: terminal.clone(),
                leg: Leg::new(),
                calling: calling.clone(),
                called: called.clone(),
            },
        );
        self.terminal_connections.insert(tc, connection.clone());
        self.calls.entry(call.clone()).or_default().push(connection.clone());
        connection
    }

    fn remove_leg(&mut self, connection: &ConnectionId) -> Option<LegRecord> {
        let record = self.legs.remove(connection)?;
        self.terminal_connections.remove(&record.terminal_connection);
        self.channels.retain(|_, c| c != connection);
        if let Some(connections) = self.calls.get_mut(&record.call) {
            connections.retain(|c| c != connection);
        }
        Some(record)
    }

    /// Offers `call` to `called`. Phones and auto-accepting media terminals
    /// ring immediately; others stay offered.
    fn offer(
        &mut self,
        call: &CallId,
        called: &AddressId,
        calling: &AddressId,
        outcome: &mut Outcome,
    ) -> ServiceResult<ConnectionId> {
        let device = self
            .line(called)
            .map_err(|_| ServiceError::InvalidParty(format!("{called} is not reachable")))?;
        let terminal = device.terminal.clone();
        let alerts = device.alerts();
        let auto_answer = device.config.auto_answer_ms.map(Duration::from_millis);

        let connection = self.new_leg(call, called, &terminal, calling, called);
        let record = self.leg(&connection)?;
        record.apply(LegInput::Offer)?;
        if alerts {
            record.apply(LegInput::Alert)?;
            outcome.events.push(record.event(CallChange::TermConnRinging));
            if let Some(delay) = auto_answer {
                outcome.answers.push((record.terminal_connection.clone(), delay));
            }
        } else {
            debug!(%called, %call, "offered, waiting for auto accept");
        }
        self.refresh(&terminal, outcome);
        Ok(connection)
    }

    pub fn connect(
        &mut self,
        terminal: &TerminalId,
        from: &AddressId,
        dial: &str,
    ) -> ServiceResult<(CallLegs, Outcome)> {
        self.require_open()?;
        let device = self.device(terminal)?;
        if device.address.as_ref() != Some(from) {
            return Err(ServiceError::InvalidArgument(format!("{terminal} is not on {from}")));
        }
        let called = AddressId::from(dial);
        self.line(&called)
            .map_err(|_| ServiceError::InvalidParty(format!("{dial} is not reachable")))?;

        self.next_call += 1;
        let call = CallId::from(format!("{}/{}", self.call_prefix, self.next_call));
        let mut outcome = Outcome::on(&call);
        outcome.events.push(Event::Call(CallEvent::new(call.clone(), CallChange::Active)));

        let near = self.new_leg(&call, from, terminal, from, &called);
        self.leg(&near)?.apply(LegInput::Dial)?;
        self.refresh(terminal, &mut outcome);
        let far = self.offer(&call, &called, from, &mut outcome)?;

        let legs = CallLegs {
            call,
            connections: vec![
                Connection { id: near, address: from.clone() },
                Connection { id: far, address: called },
            ],
        };
        Ok((legs, outcome))
    }

    fn far_end_media() -> SocketAddr {
        let port = callgate_utils::ephemeral_udp_port().unwrap_or(FALLBACK_RTP_PORT);
        SocketAddr::new(IpAddr::V4(callgate_utils::local_media_ip()), port)
    }

    pub fn answer(&mut self, tc: &TerminalConnectionId) -> ServiceResult<Outcome> {
        let connection = self.connection_of(tc)?;
        let record = self.leg(&connection)?;
        let call = record.call.clone();
        let terminal = record.terminal.clone();
        let mut outcome = Outcome::on(&call);
        let media = self.device(&terminal)?.media;

        let record = self.leg(&connection)?;
        if !record.leg.accepts(LegInput::Answer) {
            return Err(ServiceError::InvalidState(format!(
                "{tc} is {} and cannot be answered",
                record.leg.state()
            )));
        }
        record.apply(LegInput::Answer)?;
        outcome.events.push(record.event(CallChange::ConnEstablished));
        match media {
            Some(MediaRegistration::Dynamic) => {
                let handle = RtpHandle(callgate_utils::rand_i32());
                self.channels.insert((terminal.clone(), handle), connection.clone());
                outcome.events.push(Event::terminal_change(
                    terminal.clone(),
                    TerminalChange::OpenLogicalChannel { rtp_handle: handle },
                ));
            }
            Some(MediaRegistration::Static(_)) => {
                record.apply(LegInput::MediaUp)?;
                outcome.events.push(record.event(CallChange::TermConnTalking));
                outcome.events.push(Event::terminal_change(
                    terminal.clone(),
                    TerminalChange::RtpOutputStarted { remote: Self::far_end_media() },
                ));
            }
            None => {
                record.apply(LegInput::MediaUp)?;
                outcome.events.push(record.event(CallChange::TermConnTalking));
            }
        }

        // the originating side connects once the far end answers
        let others: Vec<ConnectionId> = self
            .calls
            .get(&call)
            .map(|c| c.iter().filter(|c| **c != connection).cloned().collect())
            .unwrap_or_default();
        let mut touched = vec![terminal];
        for other in others {
            let record = self.leg(&other)?;
            if record.leg.state() == LegState::Dialed {
                record.apply(LegInput::Answer)?;
                outcome.events.push(record.event(CallChange::ConnEstablished));
                record.apply(LegInput::MediaUp)?;
                outcome.events.push(record.event(CallChange::TermConnTalking));
                touched.push(record.terminal.clone());
            }
        }
        for terminal in touched {
            self.refresh(&terminal, &mut outcome);
        }
        Ok(outcome)
    }

    pub fn set_rtp_params(
        &mut self,
        terminal: &TerminalId,
        handle: RtpHandle,
        destination: SocketAddr,
    ) -> ServiceResult<Outcome> {
        let connection = self
            .channels
            .remove(&(terminal.clone(), handle))
            .ok_or_else(|| {
                ServiceError::InvalidArgument(format!("no open channel {handle} on {terminal}"))
            })?;
        let record = self.leg(&connection)?;
        debug!(%terminal, %handle, %destination, "rtp destination set");
        record.apply(LegInput::MediaUp)?;
        let mut outcome = Outcome::with(&record.call, record.event(CallChange::TermConnTalking));
        self.refresh(terminal, &mut outcome);
        Ok(outcome)
    }

    pub fn hold(&mut self, tc: &TerminalConnectionId) -> ServiceResult<Outcome> {
        let connection = self.connection_of(tc)?;
        let record = self.leg(&connection)?;
        if record.leg.state() == LegState::Held || !record.leg.accepts(LegInput::Hold) {
            return Err(ServiceError::InvalidState(format!(
                "{tc} is {} and cannot be held",
                record.leg.state()
            )));
        }
        record.apply(LegInput::Hold)?;
        let terminal = record.terminal.clone();
        let mut outcome = Outcome::with(&record.call, record.event(CallChange::TermConnHeld));
        self.refresh(&terminal, &mut outcome);
        Ok(outcome)
    }

    pub fn redirect(&mut self, connection: &ConnectionId, destination: &str) -> ServiceResult<Outcome> {
        let called = AddressId::from(destination);
        self.line(&called)
            .map_err(|_| ServiceError::InvalidParty(format!("{destination} is not reachable")))?;
        let record = self.leg(connection)?;
        record.apply(LegInput::Redirect)?;
        let call = record.call.clone();
        let mut outcome = Outcome::with(&call, record.event(CallChange::ConnDisconnected));
        let Some(record) = self.remove_leg(connection) else {
            return Ok(outcome);
        };
        self.refresh(&record.terminal, &mut outcome);

        // the redirected call shows the remaining party as the caller
        let calling = self
            .calls
            .get(&call)
            .and_then(|c| c.first())
            .and_then(|c| self.legs.get(c))
            .map(|other| other.address.clone())
            .unwrap_or(record.calling);
        self.offer(&call, &called, &calling, &mut outcome)?;
        Ok(outcome)
    }

    /// The address taking part in both calls, and its connection in each.
    fn controller(
        &self,
        call: &CallId,
        other: &CallId,
    ) -> ServiceResult<(ConnectionId, ConnectionId)> {
        let connections = |id: &CallId| {
            self.calls
                .get(id)
                .cloned()
                .ok_or_else(|| ServiceError::InvalidArgument(format!("unknown call {id}")))
        };
        let ours = connections(call)?;
        let theirs = connections(other)?;
        for a in &ours {
            for b in &theirs {
                if self.legs[a].address == self.legs[b].address {
                    return Ok((a.clone(), b.clone()));
                }
            }
        }
        Err(ServiceError::InvalidArgument(format!("{call} and {other} share no party")))
    }

    /// Moves every leg of `from` except `keep_out` into `into`.
    fn merge(&mut self, from: &CallId, into: &CallId, keep_out: &ConnectionId) {
        let moved: Vec<ConnectionId> = self
            .calls
            .remove(from)
            .unwrap_or_default()
            .into_iter()
            .filter(|c| c != keep_out)
            .collect();
        for connection in &moved {
            if let Some(record) = self.legs.get_mut(connection) {
                record.call = into.clone();
            }
        }
        self.calls.entry(into.clone()).or_default().extend(moved);
        // keep_out still points at `from` until removed
        self.calls.insert(from.clone(), vec![keep_out.clone()]);
    }

    pub fn transfer(&mut self, call: &CallId, other: &CallId) -> ServiceResult<Outcome> {
        let (ours, theirs) = self.controller(call, other)?;
        for connection in [&ours, &theirs] {
            let record = &self.legs[connection];
            if !record.leg.accepts(LegInput::Transfer) {
                return Err(ServiceError::InvalidState(format!(
                    "{} is {} and cannot be transferred",
                    record.terminal_connection,
                    record.leg.state()
                )));
            }
        }
        let mut outcome = Outcome::on(call);
        self.merge(other, call, &theirs);
        for connection in [&ours, &theirs] {
            let record = self.leg(connection)?;
            record.apply(LegInput::Transfer)?;
            outcome.events.push(record.event(CallChange::ConnDisconnected));
        }
        outcome.events.push(self.legs[&ours].event(CallChange::TransferEnd));
        outcome.events.push(Event::Call(CallEvent::new(other.clone(), CallChange::Invalid)));
        let terminal = self.legs[&ours].terminal.clone();
        self.remove_leg(&ours);
        self.remove_leg(&theirs);
        self.calls.remove(other);
        self.refresh(&terminal, &mut outcome);
        Ok(outcome)
    }

    pub fn conference(&mut self, call: &CallId, other: &CallId) -> ServiceResult<Outcome> {
        let (ours, theirs) = self.controller(call, other)?;
        for id in [call, other] {
            for connection in &self.calls[id] {
                let record = &self.legs[connection];
                if !matches!(record.leg.state(), LegState::Talking | LegState::Held) {
                    return Err(ServiceError::InvalidState(format!(
                        "{} is {}, conference needs answered calls",
                        record.terminal_connection,
                        record.leg.state()
                    )));
                }
            }
        }
        let mut outcome = Outcome::on(call);
        self.merge(other, call, &theirs);
        let record = self.leg(&theirs)?;
        record.apply(LegInput::Drop)?;
        outcome.events.push(record.event(CallChange::ConnDisconnected));
        outcome.events.push(self.legs[&ours].event(CallChange::ConferenceEnd));
        outcome.events.push(Event::Call(CallEvent::new(other.clone(), CallChange::Invalid)));
        let terminal = self.legs[&ours].terminal.clone();
        self.remove_leg(&theirs);
        self.calls.remove(other);
        self.refresh(&terminal, &mut outcome);
        Ok(outcome)
    }

    pub fn drop_call(&mut self, call: &CallId) -> ServiceResult<Outcome> {
        let connections = self
            .calls
            .remove(call)
            .ok_or_else(|| ServiceError::InvalidArgument(format!("unknown call {call}")))?;
        let mut outcome = Outcome::on(call);
        let mut terminals = Vec::new();
        for connection in &connections {
            let Some(mut record) = self.remove_leg(connection) else {
                continue;
            };
            record.apply(LegInput::Drop)?;
            outcome.events.push(record.event(CallChange::ConnDisconnected));
            terminals.push(record.terminal);
        }
        outcome.events.push(Event::Call(CallEvent::new(call.clone(), CallChange::Invalid)));
        for terminal in terminals {
            self.refresh(&terminal, &mut outcome);
        }
        Ok(outcome)
    }

    pub fn send_data(&mut self, terminal: &TerminalId, data: &str) -> ServiceResult<String> {
        let device = self.device_mut(terminal)?;
        if device.config.kind != DeviceKind::Phone {
            return Err(ServiceError::MethodNotSupported(format!("{terminal} has no display")));
        }
        if !device.opened {
            return Err(ServiceError::InvalidState(format!("{terminal} is not in service")));
        }
        device.display.push(data.to_string());
        Ok(PHONE_RESPONSE.to_string())
    }

    pub fn set_device_filters(
        &mut self,
        terminal: &TerminalId,
        states: &[DeviceState],
    ) -> ServiceResult<Outcome> {
        let device = self.device_mut(terminal)?;
        device.filters = states.iter().copied().collect();
        let address = device.address.clone();
        let mut outcome = Outcome::on(terminal);
        if let Some(address) = address {
            outcome.callers = self.callers_for(&address);
        }
        Ok(outcome)
    }

    pub fn device_state(&self, terminal: &TerminalId) -> ServiceResult<DeviceState> {
        Ok(self.device(terminal)?.state)
    }

    pub fn display(&self, terminal: &TerminalId) -> Vec<String> {
        self.devices
            .get(terminal)
            .map(|device| device.display.clone())
            .unwrap_or_default()
    }

    pub fn leg_state(&self, tc: &TerminalConnectionId) -> Option<LegState> {
        let connection = self.terminal_connections.get(tc)?;
        self.legs.get(connection).map(|record| record.leg.state())
    }

    pub fn active_calls(&self) -> usize {
        self.calls.len()
    }

    /// Recomputes a device's state from its legs and reports the change if
    /// the device filters for it.
    fn refresh(&mut self, terminal: &TerminalId, outcome: &mut Outcome) {
        let states: Vec<LegState> = self
            .legs
            .values()
            .filter(|record| &record.terminal == terminal)
            .map(|record| record.leg.state())
            .collect();
        let state = if states
            .iter()
            .any(|s| matches!(s, LegState::Dialed | LegState::Established | LegState::Talking))
        {
            DeviceState::Active
        } else if states
            .iter()
            .any(|s| matches!(s, LegState::Offered | LegState::Ringing))
        {
            DeviceState::Alerting
        } else if states.contains(&LegState::Held) {
            DeviceState::Held
        } else {
            DeviceState::Idle
        };
        let Some(device) = self.devices.get_mut(terminal) else {
            return;
        };
        if device.state == state {
            return;
        }
        device.state = state;
        if device.filters.contains(&state) {
            outcome.events.push(Event::terminal_change(
                terminal.clone(),
                TerminalChange::DeviceState(state),
            ));
        }
    }
}
