//! Runs a [`Scenario`] step by step against a [`ControlService`].

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, info};

use crate::directory::RoleDirectory;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::gate::Gate;
use crate::media::{MediaPlayer, SilentPlayer};
use crate::predicate::{Correlation, Predicate};
use crate::router::{Router, RouterStats};
use crate::service::{ControlService, ServiceError};
use crate::slots::{Field, Slots, Value};
use crate::step::{Action, Scenario, Source, Step, Wait};
use crate::subscription::Subscription;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a monitor blocks on its subscription before looking at the
/// stop signal again.
const MONITOR_POLL: Duration = Duration::from_millis(200);

/// Raised once to end a scenario. Sleeps taken through it wake early.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        let (raised, cvar) = &*self.inner;
        *raised.lock() = true;
        cvar.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleeps for `duration`, returning `true` if woken by the signal.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let (raised, cvar) = &*self.inner;
        let mut raised = raised.lock();
        while !*raised {
            if cvar.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        *raised
    }
}

/// Everything a running scenario owns.
pub struct ScenarioContext {
    pub service: Arc<dyn ControlService>,
    pub router: Arc<Router>,
    pub directory: RoleDirectory,
    pub slots: Slots,
    pub timeout: Duration,
    pub stop: StopSignal,
    pub player: Arc<dyn MediaPlayer>,
    subscriptions: HashMap<String, Subscription>,
    armed: HashMap<String, Gate>,
}

impl ScenarioContext {
    pub fn new(service: Arc<dyn ControlService>) -> Self {
        Self {
            service,
            router: Arc::new(Router::new()),
            directory: RoleDirectory::new(),
            slots: Slots::new(),
            timeout: DEFAULT_TIMEOUT,
            stop: StopSignal::new(),
            player: Arc::new(SilentPlayer::default()),
            subscriptions: HashMap::new(),
            armed: HashMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_player(mut self, player: Arc<dyn MediaPlayer>) -> Self {
        self.player = player;
        self
    }

    /// Attaches the router to the service and waits for the provider to
    /// come in service.
    pub fn open(&self) -> Result<()> {
        let name = self.service.name().to_string();
        info!(provider = %name, "awaiting ProviderInService");
        let gate = self.router.arm(Predicate::new(
            EventKind::ProviderInService,
            Correlation::Provider(name.clone()),
        ));
        if let Err(source) = self.service.open(self.router.clone()) {
            self.router.discard(&gate);
            return Err(Error::Action { action: "open".to_string(), target: name, source });
        }
        gate.wait_timeout(self.timeout)?;
        Ok(())
    }

    pub fn subscription(&self, name: &str) -> Result<&Subscription> {
        self.subscriptions
            .get(name)
            .ok_or_else(|| Error::UnknownSubscription(name.to_string()))
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub scenario: String,
    pub steps: usize,
    pub elapsed: Duration,
    pub router: RouterStats,
}

#[derive(Debug, Error)]
#[error(
    "scenario {scenario} failed at `{failed}` (last completed: `{}`): {error}",
    .last_completed.as_deref().unwrap_or("none")
)]
pub struct ScenarioFailure {
    pub scenario: String,
    pub last_completed: Option<String>,
    pub failed: String,
    #[source]
    pub error: Error,
}

fn rejected(action: &Action, target: impl Display) -> impl FnOnce(ServiceError) -> Error {
    let action = action.name().to_string();
    let target = target.to_string();
    move |source| Error::Action { action, target, source }
}

pub struct Sequencer<'a> {
    ctx: &'a mut ScenarioContext,
}

impl<'a> Sequencer<'a> {
    pub fn new(ctx: &'a mut ScenarioContext) -> Self {
        Self { ctx }
    }

    /// Executes every step in order and stops at the first error.
    pub fn run(&mut self, scenario: &Scenario) -> Result<RunReport, ScenarioFailure> {
        let started = Instant::now();
        let mut last_completed: Option<String> = None;
        info!(scenario = scenario.name(), steps = scenario.steps().len(), "starting");
        for (i, step) in scenario.steps().iter().enumerate() {
            info!(scenario = scenario.name(), step = i + 1, "{step}");
            let outcome = if self.ctx.stop.is_raised() {
                Err(Error::Stopped)
            } else {
                self.execute(step)
            };
            if let Err(error) = outcome {
                self.release();
                return Err(ScenarioFailure {
                    scenario: scenario.name().to_string(),
                    last_completed,
                    failed: step.to_string(),
                    error,
                });
            }
            last_completed = Some(step.to_string());
        }
        self.release();
        let report = RunReport {
            scenario: scenario.name().to_string(),
            steps: scenario.steps().len(),
            elapsed: started.elapsed(),
            router: self.ctx.router.stats(),
        };
        info!(scenario = scenario.name(), elapsed = ?report.elapsed, "done");
        Ok(report)
    }

    /// Drops the gates and subscriptions the scenario left behind.
    fn release(&mut self) {
        for (_, gate) in self.ctx.armed.drain() {
            self.ctx.router.discard(&gate);
        }
        for (_, subscription) in self.ctx.subscriptions.drain() {
            self.ctx.router.unsubscribe(&subscription);
        }
    }

    fn execute(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Resolve { role, source } => {
                let ctx = &*self.ctx;
                ctx.directory.resolve(
                    role,
                    source,
                    ctx.service.as_ref(),
                    &ctx.router,
                    ctx.timeout,
                )?;
            }
            Step::Subscribe { name, kind, correlate, capacity } => {
                if self.ctx.subscriptions.contains_key(name) {
                    return Err(Error::DuplicateSubscription(name.clone()));
                }
                let correlation = correlate.resolve(&self.ctx.directory, &self.ctx.slots)?;
                let subscription =
                    self.ctx.router.subscribe(Predicate::new(*kind, correlation), *capacity);
                self.ctx.subscriptions.insert(name.clone(), subscription);
            }
            Step::Arm { name, kind } => {
                if self.ctx.armed.contains_key(name) {
                    return Err(Error::DuplicateGate(name.clone()));
                }
                let gate = self.ctx.router.arm_unbound(*kind);
                self.ctx.armed.insert(name.clone(), gate);
            }
            Step::Act(action) => self.act(action)?,
            Step::Await(wait) => {
                self.await_event(wait)?;
            }
            Step::ActAwait(action, wait) => {
                if wait.source == Source::Gate {
                    let gate = self.ctx.router.arm_unbound(wait.kind);
                    if let Err(e) = self.act(action) {
                        self.ctx.router.discard(&gate);
                        return Err(e);
                    }
                    self.bind_and_wait(&gate, wait)?;
                } else {
                    self.act(action)?;
                    self.await_event(wait)?;
                }
            }
            Step::Pause(duration) => {
                if self.ctx.stop.sleep(*duration) {
                    return Err(Error::Stopped);
                }
            }
            Step::Monitor { subscription, captures, limit } => {
                self.monitor(subscription, captures, *limit)?;
            }
        }
        Ok(())
    }

    fn act(&mut self, action: &Action) -> Result<()> {
        let ctx = &mut *self.ctx;
        let service = ctx.service.clone();
        match action {
            Action::Connect { from, to, call } => {
                let identity = ctx.directory.identity_of(from)?;
                let address = identity.address()?;
                let number = to.number(&ctx.directory)?;
                let legs = service
                    .connect(&identity.terminal, address, &number)
                    .map_err(rejected(action, &number))?;
                info!(call = %legs.call, "connected {address} to {number}");
                ctx.slots.set(call.as_str(), Value::Call(legs.call.clone()));
                if let Some(near) = legs.near() {
                    ctx.slots.set(format!("{call}.near"), Value::Connection(near.id.clone()));
                }
                if let Some(far) = legs.far() {
                    ctx.slots.set(format!("{call}.far"), Value::Connection(far.id.clone()));
                    ctx.slots
                        .set(format!("{call}.far_address"), Value::Address(far.address.clone()));
                }
            }
            Action::Answer { terminal_connection } => {
                let tc = ctx.slots.terminal_connection(terminal_connection)?;
                service.answer(&tc).map_err(rejected(action, &tc))?;
            }
            Action::Hold { terminal_connection } => {
                let tc = ctx.slots.terminal_connection(terminal_connection)?;
                service.hold(&tc).map_err(rejected(action, &tc))?;
            }
            Action::Redirect { connection, to } => {
                let connection = ctx.slots.connection(connection)?;
                let number = to.number(&ctx.directory)?;
                service
                    .redirect(&connection, &number)
                    .map_err(rejected(action, &connection))?;
            }
            Action::Transfer { call, other } => {
                let call = ctx.slots.call(call)?;
                let other = ctx.slots.call(other)?;
                service.transfer(&call, &other).map_err(rejected(action, &call))?;
            }
            Action::Conference { call, other } => {
                let call = ctx.slots.call(call)?;
                let other = ctx.slots.call(other)?;
                service.conference(&call, &other).map_err(rejected(action, &call))?;
            }
            Action::Drop { call } => {
                let call = ctx.slots.call(call)?;
                service.drop_call(&call).map_err(rejected(action, &call))?;
            }
            Action::SendData { role, data } => {
                let terminal = ctx.directory.identity_of(role)?.terminal;
                let reply = service
                    .send_data(&terminal, data)
                    .map_err(rejected(action, &terminal))?;
                info!(%terminal, %reply, "data sent");
            }
            Action::SetDeviceFilters { role, states } => {
                let terminal = ctx.directory.identity_of(role)?.terminal;
                service
                    .set_device_filters(&terminal, states)
                    .map_err(rejected(action, &terminal))?;
            }
            Action::ReportDeviceState { role, into } => {
                let terminal = ctx.directory.identity_of(role)?.terminal;
                let state = service
                    .device_state(&terminal)
                    .map_err(rejected(action, &terminal))?;
                info!(%terminal, "device state: {state}");
                ctx.slots.set(into.as_str(), Value::DeviceState(state));
            }
            Action::SetRtpParams { role, handle } => {
                let identity = ctx.directory.identity_of(role)?;
                let destination = identity.media_endpoint()?;
                let handle = ctx.slots.rtp(handle)?;
                service
                    .set_rtp_params(&identity.terminal, handle, destination)
                    .map_err(rejected(action, &identity.terminal))?;
            }
            Action::AutoAccept { role } => {
                let identity = ctx.directory.identity_of(role)?;
                let address = identity.address()?;
                service
                    .set_auto_accept(address, &identity.terminal)
                    .map_err(rejected(action, address))?;
            }
            Action::PlayMedia { destination } => {
                let destination = ctx.slots.media(destination)?;
                ctx.player.play(destination, &ctx.stop)?;
            }
        }
        Ok(())
    }

    fn await_event(&mut self, wait: &Wait) -> Result<Event> {
        match &wait.source {
            Source::Gate => Err(Error::UnarmedWait(wait.to_string())),
            Source::Armed(name) => {
                let gate = self
                    .ctx
                    .armed
                    .remove(name)
                    .ok_or_else(|| Error::NotArmed(name.clone()))?;
                if gate.kind() != wait.kind {
                    self.ctx.router.discard(&gate);
                    return Err(Error::ArmedKind {
                        name: name.clone(),
                        armed: gate.kind(),
                        awaited: wait.kind,
                    });
                }
                self.bind_and_wait(&gate, wait)
            }
            Source::Subscription(name) => {
                let subscription = self.ctx.subscription(name)?.clone();
                let correlation = wait.correlate.resolve(&self.ctx.directory, &self.ctx.slots)?;
                let event = subscription.next_matching(wait.kind, &correlation, self.ctx.deadline())?;
                self.capture(&wait.captures, &event)?;
                Ok(event)
            }
        }
    }

    fn bind_and_wait(&mut self, gate: &Gate, wait: &Wait) -> Result<Event> {
        let correlation = match wait.correlate.resolve(&self.ctx.directory, &self.ctx.slots) {
            Ok(correlation) => correlation,
            Err(e) => {
                self.ctx.router.discard(gate);
                return Err(e);
            }
        };
        gate.bind(correlation);
        let outcome = gate.wait(self.ctx.deadline());
        // resolved from its backlog on bind, the gate is still registered
        self.ctx.router.discard(gate);
        let event = outcome?;
        self.capture(&wait.captures, &event)?;
        Ok(event)
    }

    fn capture(&mut self, captures: &[(String, Field)], event: &Event) -> Result<()> {
        for (slot, field) in captures {
            let value = field.extract(event).ok_or_else(|| Error::MissingField {
                kind: event.kind(),
                field: field.to_string(),
                slot: slot.clone(),
            })?;
            debug!(%slot, %value, "captured");
            self.ctx.slots.set(slot.as_str(), value);
        }
        Ok(())
    }

    fn monitor(
        &mut self,
        name: &str,
        captures: &[(String, Field)],
        limit: Option<usize>,
    ) -> Result<()> {
        let subscription = self.ctx.subscription(name)?.clone();
        info!(subscription = name, "monitoring {} until stopped", subscription.predicate());
        let mut seen = 0;
        while !self.ctx.stop.is_raised() {
            match subscription.next_timeout(MONITOR_POLL) {
                Ok(event) => {
                    info!(subscription = name, "{event}");
                    self.capture(captures, &event)?;
                    seen += 1;
                    if limit.is_some_and(|limit| seen >= limit) {
                        break;
                    }
                }
                Err(e) if e.is_timeout() => continue,
                Err(e) => return Err(e),
            }
        }
        info!(subscription = name, seen, "monitor finished");
        Ok(())
    }
}
