use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use callgate_correlator::event::{DeviceState, Event};
use callgate_correlator::ids::{
    AddressId, CallId, ConnectionId, RtpHandle, TerminalConnectionId, TerminalId,
};
use callgate_correlator::leg::LegState;
use callgate_correlator::service::{
    CallLegs, ControlService, MediaRegistration, ServiceError, ServiceResult,
};
use callgate_correlator::EventSink;
use callgate_task::Dispatcher;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::LabConfig;
use crate::exchange::{Caller, Exchange, Outcome};

/// In-process call-control service. Devices, lines and the people behind
/// them come from a [`LabConfig`]; events are delivered on a pool of lanes,
/// one lane per call, so a call's events keep their order while different
/// calls interleave.
#[derive(Clone)]
pub struct LabService {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    dial_delay: Duration,
    exchange: Mutex<Exchange>,
    sink: Mutex<Option<Arc<dyn EventSink>>>,
    lanes: Dispatcher,
}

impl LabService {
    pub fn new(config: LabConfig) -> Self {
        let lanes = match config.lanes {
            0 => Dispatcher::per_cpu("lab-events"),
            lanes => Dispatcher::new("lab-events", lanes),
        };
        debug!(provider = %config.provider, lanes = lanes.lanes(), "lab starting");
        let inner = Inner {
            name: config.provider.clone(),
            dial_delay: Duration::from_millis(config.dial_delay_ms),
            exchange: Mutex::new(Exchange::new(&config)),
            sink: Mutex::new(None),
            lanes,
        };
        Self { inner: Arc::new(inner) }
    }

    /// Places a call the way a person at `from_dn` would.
    pub fn dial(&self, from_dn: &str, to_dn: &str) -> ServiceResult<CallLegs> {
        let from = AddressId::from(from_dn);
        let terminal = {
            let exchange = self.inner.exchange.lock();
            exchange.terminals(&from)?.into_iter().next()
        }
        .ok_or_else(|| ServiceError::InvalidArgument(format!("{from_dn} has no terminal")))?;
        self.inner.apply(|exchange| exchange.connect(&terminal, &from, to_dn))
    }

    /// Everything pushed to a phone's display so far.
    pub fn display(&self, terminal: &TerminalId) -> Vec<String> {
        self.inner.exchange.lock().display(terminal)
    }

    pub fn leg_state(&self, terminal_connection: &TerminalConnectionId) -> Option<LegState> {
        self.inner.exchange.lock().leg_state(terminal_connection)
    }

    pub fn active_calls(&self) -> usize {
        self.inner.exchange.lock().active_calls()
    }
}

fn done(outcome: Outcome) -> ServiceResult<((), Outcome)> {
    Ok(((), outcome))
}

impl Inner {
    /// Runs one operation against the exchange and publishes its events
    /// before the next operation can change state again.
    fn apply<T>(
        self: &Arc<Self>,
        op: impl FnOnce(&mut Exchange) -> ServiceResult<(T, Outcome)>,
    ) -> ServiceResult<T> {
        let mut exchange = self.exchange.lock();
        let (value, mut outcome) = op(&mut exchange)?;
        self.publish(&outcome.key, std::mem::take(&mut outcome.events));
        drop(exchange);
        self.react(outcome);
        Ok(value)
    }

    fn publish(&self, key: &str, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let Some(sink) = self.sink.lock().clone() else {
            debug!(key, count = events.len(), "no sink attached, dropping events");
            return;
        };
        self.lanes.dispatch(key, move || sink.deliver(events));
    }

    fn react(self: &Arc<Self>, outcome: Outcome) {
        for (terminal_connection, delay) in outcome.answers {
            let inner = self.clone();
            self.after(format!("answer-{terminal_connection}"), delay, move || {
                match inner.apply(|exchange| exchange.answer(&terminal_connection).and_then(done)) {
                    Ok(()) => info!("lab answered {terminal_connection}"),
                    Err(e) => debug!("lab could not answer {terminal_connection}: {e}"),
                }
            });
        }
        for caller in outcome.callers {
            let inner = self.clone();
            self.after(format!("dial-{}", caller.address), self.dial_delay, move || {
                inner.place(caller)
            });
        }
    }

    fn place(self: &Arc<Self>, caller: Caller) {
        let legs = match self
            .apply(|exchange| exchange.connect(&caller.terminal, &caller.address, &caller.number))
        {
            Ok(legs) => legs,
            Err(e) => {
                warn!("lab {} could not dial {}: {e}", caller.address, caller.number);
                return;
            }
        };
        info!("lab {} dialed {} on call {}", caller.address, caller.number, legs.call);
        let Some(after) = caller.hang_up_after else {
            return;
        };
        thread::sleep(after);
        match self.apply(|exchange| exchange.drop_call(&legs.call).and_then(done)) {
            Ok(()) => info!("lab {} hung up call {}", caller.address, legs.call),
            Err(e) => debug!("call {} already gone: {e}", legs.call),
        }
    }

    fn after(&self, name: String, delay: Duration, job: impl FnOnce() + Send + 'static) {
        let spawned = thread::Builder::new().name(name).spawn(move || {
            thread::sleep(delay);
            job()
        });
        if let Err(e) = spawned {
            warn!("lab could not start a persona thread: {e}");
        }
    }
}

impl ControlService for LabService {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn open(&self, sink: Arc<dyn EventSink>) -> ServiceResult<()> {
        *self.inner.sink.lock() = Some(sink);
        self.inner.apply(|exchange| done(exchange.open()))
    }

    fn resolve_address(&self, dn: &str) -> ServiceResult<AddressId> {
        self.inner.exchange.lock().resolve_address(dn)
    }

    fn resolve_terminals(&self, address: &AddressId) -> ServiceResult<Vec<TerminalId>> {
        self.inner.exchange.lock().terminals(address)
    }

    fn create_terminal(&self, device: &str) -> ServiceResult<TerminalId> {
        self.inner.exchange.lock().create_terminal(device)
    }

    fn open_address(&self, address: &AddressId) -> ServiceResult<()> {
        self.inner.apply(|exchange| exchange.open_address(address).and_then(done))
    }

    fn open_terminal(&self, terminal: &TerminalId) -> ServiceResult<()> {
        self.inner.apply(|exchange| exchange.open_terminal(terminal).and_then(done))
    }

    fn register_media(
        &self,
        terminal: &TerminalId,
        registration: MediaRegistration,
    ) -> ServiceResult<()> {
        self.inner
            .apply(|exchange| exchange.register_media(terminal, registration).and_then(done))
    }

    fn set_auto_accept(&self, address: &AddressId, terminal: &TerminalId) -> ServiceResult<()> {
        self.inner
            .apply(|exchange| exchange.set_auto_accept(address, terminal).and_then(done))
    }

    fn connect(
        &self,
        terminal: &TerminalId,
        from: &AddressId,
        dial: &str,
    ) -> ServiceResult<CallLegs> {
        self.inner.apply(|exchange| exchange.connect(terminal, from, dial))
    }

    fn answer(&self, terminal_connection: &TerminalConnectionId) -> ServiceResult<()> {
        self.inner.apply(|exchange| exchange.answer(terminal_connection).and_then(done))
    }

    fn hold(&self, terminal_connection: &TerminalConnectionId) -> ServiceResult<()> {
        self.inner.apply(|exchange| exchange.hold(terminal_connection).and_then(done))
    }

    fn redirect(&self, connection: &ConnectionId, destination: &str) -> ServiceResult<()> {
        self.inner
            .apply(|exchange| exchange.redirect(connection, destination).and_then(done))
    }

    fn transfer(&self, call: &CallId, other: &CallId) -> ServiceResult<()> {
        self.inner.apply(|exchange| exchange.transfer(call, other).and_then(done))
    }

    fn conference(&self, call: &CallId, other: &CallId) -> ServiceResult<()> {
        self.inner.apply(|exchange| exchange.conference(call, other).and_then(done))
    }

    fn drop_call(&self, call: &CallId) -> ServiceResult<()> {
        self.inner.apply(|exchange| exchange.drop_call(call).and_then(done))
    }

    fn send_data(&self, terminal: &TerminalId, data: &str) -> ServiceResult<String> {
        self.inner.exchange.lock().send_data(terminal, data)
    }

    fn set_device_filters(
        &self,
        terminal: &TerminalId,
        states: &[DeviceState],
    ) -> ServiceResult<()> {
        self.inner
            .apply(|exchange| exchange.set_device_filters(terminal, states).and_then(done))
    }

    fn device_state(&self, terminal: &TerminalId) -> ServiceResult<DeviceState> {
        self.inner.exchange.lock().device_state(terminal)
    }

    fn set_rtp_params(
        &self,
        terminal: &TerminalId,
        handle: RtpHandle,
        destination: SocketAddr,
    ) -> ServiceResult<()> {
        self.inner.apply(|exchange| {
            exchange.set_rtp_params(terminal, handle, destination).and_then(done)
        })
    }
}

#[cfg(test)]
mod tests {

    use callgate_correlator::event::EventKind;
    use callgate_correlator::predicate::{Correlation, Predicate};
    use callgate_correlator::Router;

    use super::*;
    use crate::config::DeviceConfig;

    const WAIT: Duration = Duration::from_secs(2);

    fn lab(config: LabConfig) -> (LabService, Arc<Router>) {
        callgate_log::init_test();
        let service = LabService::new(config);
        let router = Arc::new(Router::default());
        let gate = router.arm(Predicate::new(
            EventKind::ProviderInService,
            Correlation::Provider("lab".into()),
        ));
        service.open(router.clone()).unwrap();
        gate.wait_timeout(WAIT).unwrap();
        (service, router)
    }

    fn office() -> LabConfig {
        LabConfig::default()
            .device(DeviceConfig::phone("SEP0001", "1000"))
            .device(DeviceConfig::phone("SEP0002", "1001").auto_answer(10))
            .device(DeviceConfig::route_point("RP1", "2000"))
            .device(DeviceConfig::cti_port("PORT1", "3000"))
    }

    fn address(dn: &str) -> Correlation {
        Correlation::Address(AddressId::from(dn))
    }

    fn wait(router: &Router, kind: EventKind, correlation: Correlation) -> Event {
        router
            .arm(Predicate::new(kind, correlation))
            .wait_timeout(WAIT)
            .unwrap()
    }

    #[test]
    fn operations_need_an_open_provider() {
        let service = LabService::new(office());
        assert!(matches!(service.resolve_address("1000"), Err(ServiceError::Unavailable(_))));
    }

    #[test]
    fn unknown_numbers() {
        let (service, _) = lab(office());
        assert!(matches!(service.resolve_address("9999"), Err(ServiceError::InvalidArgument(_))));
        assert!(matches!(service.dial("1000", "9999"), Err(ServiceError::InvalidParty(_))));
    }

    #[test]
    fn phone_comes_in_service_when_opened() {
        let (service, router) = lab(office());
        let address = service.resolve_address("1000").unwrap();
        let terminal = service.resolve_terminals(&address).unwrap().remove(0);
        let gate = router.arm(Predicate::new(
            EventKind::TerminalInService,
            Correlation::Terminal(terminal.clone()),
        ));
        service.open_terminal(&terminal).unwrap();
        assert_eq!(gate.wait_timeout(WAIT).unwrap().terminal(), Some(&terminal));
    }

    #[test]
    fn media_registration_must_fit_the_device() {
        let (service, _) = lab(office());
        let rp = service.create_terminal("RP1").unwrap();
        service.open_terminal(&rp).unwrap();
        let fixed = MediaRegistration::Static("127.0.0.1:4000".parse().unwrap());
        assert!(matches!(service.register_media(&rp, fixed), Err(ServiceError::InvalidArgument(_))));
        service.register_media(&rp, MediaRegistration::Dynamic).unwrap();
    }

    #[test]
    fn auto_answered_call_reaches_talking_on_both_sides() {
        let (service, router) = lab(office());
        let talking = router.arm(Predicate::new(EventKind::TermConnTalking, address("1000")));
        let legs = service.dial("1000", "1001").unwrap();

        let event = talking.wait_timeout(WAIT).unwrap();
        assert_eq!(event.call(), Some(&legs.call));
        let near = event.terminal_connection().unwrap().clone();
        assert_eq!(service.leg_state(&near), Some(LegState::Talking));

        let gone = router.arm(Predicate::new(
            EventKind::CallInvalid,
            Correlation::Call(legs.call.clone()),
        ));
        service.drop_call(&legs.call).unwrap();
        gone.wait_timeout(WAIT).unwrap();
        assert_eq!(service.active_calls(), 0);
        assert_eq!(service.leg_state(&near), None);
    }

    #[test]
    fn route_point_talks_after_rtp_params() {
        let (service, router) = lab(office());
        let rp_address = service.resolve_address("2000").unwrap();
        let rp = service.create_terminal("RP1").unwrap();
        service.open_terminal(&rp).unwrap();
        service.register_media(&rp, MediaRegistration::Dynamic).unwrap();
        service.set_auto_accept(&rp_address, &rp).unwrap();

        let ringing = router.arm(Predicate::new(EventKind::TermConnRinging, address("2000")));
        service.dial("1000", "2000").unwrap();
        let ringing = ringing.wait_timeout(WAIT).unwrap();
        assert_eq!(ringing.calling(), Some(&AddressId::from("1000")));

        let channel = router.arm(Predicate::new(
            EventKind::OpenLogicalChannel,
            Correlation::Terminal(rp.clone()),
        ));
        let tc = ringing.terminal_connection().unwrap().clone();
        service.answer(&tc).unwrap();
        let handle = channel.wait_timeout(WAIT).unwrap().rtp_handle().unwrap();
        assert_eq!(service.leg_state(&tc), Some(LegState::Established));

        let talking = router.arm(Predicate::new(EventKind::TermConnTalking, address("2000")));
        service.set_rtp_params(&rp, handle, "127.0.0.1:5004".parse().unwrap()).unwrap();
        talking.wait_timeout(WAIT).unwrap();
        assert!(matches!(
            service.set_rtp_params(&rp, handle, "127.0.0.1:5004".parse().unwrap()),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn redirect_then_transfer_through_a_port() {
        let (service, router) = lab(office());
        let port_address = service.resolve_address("3000").unwrap();
        let port = service.create_terminal("PORT1").unwrap();
        service.open_terminal(&port).unwrap();
        let local = MediaRegistration::Static("127.0.0.1:4000".parse().unwrap());
        service.register_media(&port, local).unwrap();
        service.set_auto_accept(&port_address, &port).unwrap();

        // 1000 calls 1001, which answers; 1001's leg goes to the port
        let talking = router.arm(Predicate::new(EventKind::TermConnTalking, address("1001")));
        let first = service.dial("1000", "1001").unwrap();
        talking.wait_timeout(WAIT).unwrap();
        let ringing = router.arm(Predicate::new(EventKind::TermConnRinging, address("3000")));
        service.redirect(&first.far().unwrap().id, "3000").unwrap();
        let ringing = ringing.wait_timeout(WAIT).unwrap();
        assert_eq!(ringing.calling(), Some(&AddressId::from("1000")));

        let media = router.arm(Predicate::new(
            EventKind::RtpOutputStarted,
            Correlation::Terminal(port.clone()),
        ));
        let port_in = ringing.terminal_connection().unwrap().clone();
        service.answer(&port_in).unwrap();
        assert!(media.wait_timeout(WAIT).unwrap().remote_media().is_some());
        service.hold(&port_in).unwrap();
        assert!(matches!(service.hold(&port_in), Err(ServiceError::InvalidState(_))));

        // the port calls 1001 again and joins both calls
        let port_out = router.arm(Predicate::new(EventKind::TermConnTalking, address("3000")));
        let second = service.connect(&port, &port_address, "1001").unwrap();
        port_out.wait_timeout(WAIT).unwrap();
        let transferred = wait_transfer(&router, &service, &first.call, &second.call);
        assert_eq!(transferred.address(), Some(&port_address));
        assert_eq!(service.active_calls(), 1);
    }

    fn wait_transfer(router: &Router, service: &LabService, call: &CallId, other: &CallId) -> Event {
        let end = router.arm(Predicate::new(
            EventKind::TransferEnd,
            Correlation::Call(call.clone()),
        ));
        service.transfer(call, other).unwrap();
        end.wait_timeout(WAIT).unwrap()
    }

    #[test]
    fn conference_needs_answered_calls() {
        let config = LabConfig::default()
            .device(DeviceConfig::phone("SEP0001", "1000"))
            .device(DeviceConfig::phone("SEP0002", "1001").auto_answer(10))
            .device(DeviceConfig::phone("SEP0003", "1002"));
        let (service, router) = lab(config);
        let talking = router.arm(Predicate::new(EventKind::TermConnTalking, address("1001")));
        let first = service.dial("1000", "1001").unwrap();
        talking.wait_timeout(WAIT).unwrap();

        let ringing = router.arm(Predicate::new(EventKind::TermConnRinging, address("1000")));
        let second = service.dial("1002", "1000").unwrap();
        let ringing = ringing.wait_timeout(WAIT).unwrap();
        assert!(matches!(
            service.conference(&first.call, &second.call),
            Err(ServiceError::InvalidState(_))
        ));

        service.answer(ringing.terminal_connection().unwrap()).unwrap();
        let end = router.arm(Predicate::new(
            EventKind::ConferenceEnd,
            Correlation::Call(first.call.clone()),
        ));
        service.conference(&first.call, &second.call).unwrap();
        assert_eq!(end.wait_timeout(WAIT).unwrap().address(), Some(&AddressId::from("1000")));
        assert_eq!(service.active_calls(), 1);
    }

    #[test]
    fn filtered_device_states_follow_the_call() {
        let config = LabConfig::default()
            .device(DeviceConfig::phone("SEP0001", "1000").dial_when_ready("1001").hang_up_after(50))
            .device(DeviceConfig::phone("SEP0002", "1001").auto_answer(10));
        let (service, router) = lab(config);
        let monitored = service.create_terminal("SEP0002").unwrap();
        let states = router.subscribe(
            Predicate::new(EventKind::DeviceStateChanged, Correlation::Terminal(monitored.clone())),
            8,
        );
        service
            .set_device_filters(&monitored, &[DeviceState::Alerting, DeviceState::Active, DeviceState::Idle])
            .unwrap();

        let seen: Vec<DeviceState> = (0..3)
            .map(|_| states.next_timeout(WAIT).unwrap().device_state().unwrap())
            .collect();
        assert_eq!(seen, vec![DeviceState::Alerting, DeviceState::Active, DeviceState::Idle]);
        assert_eq!(service.device_state(&monitored).unwrap(), DeviceState::Idle);
    }

    #[test]
    fn send_data_lands_on_the_display() {
        let (service, _) = lab(office());
        let phone = service.create_terminal("SEP0001").unwrap();
        assert!(matches!(service.send_data(&phone, "<x/>"), Err(ServiceError::InvalidState(_))));
        service.open_terminal(&phone).unwrap();
        let reply = service.send_data(&phone, "<CiscoIPPhoneText/>").unwrap();
        assert!(reply.contains("CiscoIPPhoneResponse"));
        assert_eq!(service.display(&phone), vec!["<CiscoIPPhoneText/>".to_string()]);

        let port = service.create_terminal("PORT1").unwrap();
        assert!(matches!(service.send_data(&port, "<x/>"), Err(ServiceError::MethodNotSupported(_))));
    }
}
