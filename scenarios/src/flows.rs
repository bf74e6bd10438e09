use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use callgate_correlator::event::{DeviceState, EventKind};
use callgate_correlator::slots::Field;
use callgate_correlator::{
    Action, Correlate, Dial, IdentitySource, Role, Scenario, Step, Wait,
};
use strum_macros::{Display, EnumIter, EnumString};

use crate::config::{Binding, Config, ALICE, BOB, CHARLIE, MONITOR, PORT, ROUTE_POINT};

pub const HELLO_TEXT: &str = "<CiscoIPPhoneText><Title>callgate</Title><Text>Hello World</Text></CiscoIPPhoneText>";
pub const INIT_SERVICES: &str =
    r#"<CiscoIPPhoneExecute><ExecuteItem Priority="0" URL="Init:Services"/></CiscoIPPhoneExecute>"#;

/// The device states device-state monitors.
pub const MONITORED_STATES: [DeviceState; 4] =
    [DeviceState::Active, DeviceState::Alerting, DeviceState::Held, DeviceState::Idle];

#[derive(Display, EnumString, EnumIter, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "kebab-case")]
pub enum ScenarioKind {
    MakeCall,
    Conference,
    DialViaOffice,
    PlayMedia,
    SendData,
    DeviceState,
}

fn role(binding: &Binding) -> Role {
    Role::from(binding.role)
}

fn line(config: &Config, binding: &Binding) -> Result<Step> {
    Ok(Step::Resolve {
        role: role(binding),
        source: IdentitySource::Line { dn: config.roles.get(binding)?.to_string() },
    })
}

/// A local RTP endpoint for a media terminal.
fn local_rtp() -> Result<SocketAddr> {
    let port = callgate_utils::ephemeral_udp_port().context("allocating a local rtp port")?;
    Ok(SocketAddr::new(IpAddr::V4(callgate_utils::local_media_ip()), port))
}

fn slot(name: &str) -> String {
    name.to_string()
}

pub fn build(kind: ScenarioKind, config: &Config) -> Result<Scenario> {
    match kind {
        ScenarioKind::MakeCall => make_call(config),
        ScenarioKind::Conference => conference(config),
        ScenarioKind::DialViaOffice => dial_via_office(config),
        ScenarioKind::PlayMedia => play_media(config),
        ScenarioKind::SendData => send_data(config),
        ScenarioKind::DeviceState => device_state(config, None),
    }
}

/// ALICE calls BOB, stays on the call for a pause and hangs up.
pub fn make_call(config: &Config) -> Result<Scenario> {
    let bob = config.roles.get(&BOB)?.to_string();
    Ok(Scenario::new(ScenarioKind::MakeCall.to_string())
        .step(line(config, &ALICE)?)
        .step(Step::ActAwait(
            Action::Connect { from: role(&ALICE), to: Dial::Number(bob), call: slot("call") },
            Wait::on(EventKind::CallActive).matching(Correlate::CallIn(slot("call"))),
        ))
        .step(Step::Pause(config.timeouts.pause()))
        .step(Step::ActAwait(
            Action::Drop { call: slot("call") },
            Wait::on(EventKind::CallInvalid).matching(Correlate::CallIn(slot("call"))),
        )))
}

/// ALICE calls BOB, CHARLIE calls ALICE, and ALICE joins both calls.
pub fn conference(config: &Config) -> Result<Scenario> {
    let (alice, bob, charlie) = (role(&ALICE), role(&BOB), role(&CHARLIE));
    Ok(Scenario::new(ScenarioKind::Conference.to_string())
        .step(line(config, &ALICE)?)
        .step(line(config, &BOB)?)
        .step(line(config, &CHARLIE)?)
        .step(Step::ActAwait(
            Action::Connect { from: alice.clone(), to: Dial::Role(bob.clone()), call: slot("first") },
            Wait::on(EventKind::TermConnRinging)
                .matching(Correlate::AddressOf(bob))
                .matching(Correlate::CallIn(slot("first")))
                .capture("first.bob", Field::TerminalConnection),
        ))
        .step(Step::ActAwait(
            Action::Answer { terminal_connection: slot("first.bob") },
            Wait::on(EventKind::TermConnTalking)
                .matching(Correlate::AddressOf(alice.clone()))
                .matching(Correlate::CallIn(slot("first"))),
        ))
        .step(Step::ActAwait(
            Action::Connect { from: charlie.clone(), to: Dial::Role(alice.clone()), call: slot("second") },
            Wait::on(EventKind::TermConnRinging)
                .matching(Correlate::AddressOf(alice.clone()))
                .matching(Correlate::CallIn(slot("second")))
                .capture("second.alice", Field::TerminalConnection),
        ))
        .step(Step::ActAwait(
            Action::Answer { terminal_connection: slot("second.alice") },
            Wait::on(EventKind::TermConnTalking)
                .matching(Correlate::AddressOf(charlie))
                .matching(Correlate::CallIn(slot("second"))),
        ))
        .step(Step::ActAwait(
            Action::Conference { call: slot("first"), other: slot("second") },
            Wait::on(EventKind::ConferenceEnd)
                .matching(Correlate::AddressOf(alice))
                .matching(Correlate::CallIn(slot("first"))),
        )))
}

/// A call into the route point is parked on hold while the route point
/// dials BOB; both legs are then redirected to the CTI port, which joins
/// them with a transfer.
pub fn dial_via_office(config: &Config) -> Result<Scenario> {
    let (rp, port) = (role(&ROUTE_POINT), role(&PORT));
    let bob = config.roles.get(&BOB)?.to_string();
    let port_ringing = |call: &str, tc: &str| {
        Wait::on(EventKind::TermConnRinging)
            .from_subscription("port ringing")
            .matching(Correlate::CallIn(slot(call)))
            .capture(tc, Field::TerminalConnection)
    };
    let port_talking = |call: &str| {
        Wait::on(EventKind::TermConnTalking)
            .from_subscription("port talking")
            .matching(Correlate::CallIn(slot(call)))
    };

    Ok(Scenario::new(ScenarioKind::DialViaOffice.to_string())
        .step(Step::Resolve {
            role: rp.clone(),
            source: IdentitySource::RoutePoint {
                dn: config.roles.get(&ROUTE_POINT)?.to_string(),
                rtp: local_rtp()?,
            },
        })
        .step(Step::Resolve {
            role: port.clone(),
            source: IdentitySource::CtiPort {
                dn: config.roles.get(&PORT)?.to_string(),
                rtp: local_rtp()?,
            },
        })
        .step(Step::subscribe(
            "port ringing",
            EventKind::TermConnRinging,
            Correlate::AddressOf(port.clone()),
        ))
        .step(Step::subscribe(
            "port talking",
            EventKind::TermConnTalking,
            Correlate::AddressOf(port.clone()),
        ))
        .step(Step::Act(Action::AutoAccept { role: port.clone() }))
        .step(Step::ActAwait(
            Action::AutoAccept { role: rp.clone() },
            Wait::on(EventKind::TermConnRinging)
                .matching(Correlate::AddressOf(rp.clone()))
                .capture("dialin", Field::Call)
                .capture("dialin.tc", Field::TerminalConnection)
                .capture("dialin.conn", Field::Connection),
        ))
        .step(Step::ActAwait(
            Action::Answer { terminal_connection: slot("dialin.tc") },
            Wait::on(EventKind::OpenLogicalChannel)
                .matching(Correlate::TerminalOf(rp.clone()))
                .capture("rp.handle", Field::RtpHandle),
        ))
        .step(Step::ActAwait(
            Action::SetRtpParams { role: rp.clone(), handle: slot("rp.handle") },
            Wait::on(EventKind::TermConnTalking)
                .matching(Correlate::AddressOf(rp.clone()))
                .matching(Correlate::CallIn(slot("dialin"))),
        ))
        .step(Step::ActAwait(
            Action::Hold { terminal_connection: slot("dialin.tc") },
            Wait::on(EventKind::TermConnHeld)
                .matching(Correlate::AddressOf(rp.clone()))
                .matching(Correlate::CallIn(slot("dialin"))),
        ))
        .step(Step::ActAwait(
            Action::Connect { from: rp, to: Dial::Number(bob), call: slot("dialout") },
            Wait::on(EventKind::ConnEstablished)
                .matching(Correlate::AddressIn(slot("dialout.far_address")))
                .matching(Correlate::CallIn(slot("dialout"))),
        ))
        .step(Step::ActAwait(
            Action::Redirect { connection: slot("dialin.conn"), to: Dial::Role(port.clone()) },
            port_ringing("dialin", "port in.tc"),
        ))
        .step(Step::ActAwait(
            Action::Answer { terminal_connection: slot("port in.tc") },
            port_talking("dialin"),
        ))
        .step(Step::ActAwait(
            Action::Hold { terminal_connection: slot("port in.tc") },
            Wait::on(EventKind::TermConnHeld)
                .matching(Correlate::AddressOf(port.clone()))
                .matching(Correlate::CallIn(slot("dialin"))),
        ))
        .step(Step::ActAwait(
            Action::Redirect { connection: slot("dialout.near"), to: Dial::Role(port.clone()) },
            port_ringing("dialout", "port out.tc"),
        ))
        .step(Step::ActAwait(
            Action::Answer { terminal_connection: slot("port out.tc") },
            port_talking("dialout"),
        ))
        .step(Step::ActAwait(
            Action::Transfer { call: slot("dialin"), other: slot("dialout") },
            Wait::on(EventKind::TransferEnd)
                .matching(Correlate::AddressOf(port))
                .matching(Correlate::CallIn(slot("dialin"))),
        )))
}

/// The CTI port takes an inbound call, plays a clip to the far end and
/// hangs up.
pub fn play_media(config: &Config) -> Result<Scenario> {
    let port = role(&PORT);
    Ok(Scenario::new(ScenarioKind::PlayMedia.to_string())
        .step(Step::Resolve {
            role: port.clone(),
            source: IdentitySource::CtiPort {
                dn: config.roles.get(&PORT)?.to_string(),
                rtp: local_rtp()?,
            },
        })
        .step(Step::ActAwait(
            Action::AutoAccept { role: port.clone() },
            Wait::on(EventKind::TermConnRinging)
                .matching(Correlate::AddressOf(port.clone()))
                .capture("inbound", Field::Call)
                .capture("inbound.tc", Field::TerminalConnection),
        ))
        .step(Step::ActAwait(
            Action::Answer { terminal_connection: slot("inbound.tc") },
            Wait::on(EventKind::RtpOutputStarted)
                .matching(Correlate::TerminalOf(port))
                .capture("far end", Field::RemoteMedia),
        ))
        .step(Step::Act(Action::PlayMedia { destination: slot("far end") }))
        .step(Step::ActAwait(
            Action::Drop { call: slot("inbound") },
            Wait::on(EventKind::CallInvalid).matching(Correlate::CallIn(slot("inbound"))),
        )))
}

/// Pushes a text page to ALICE's phone display, then sends it back to the
/// services menu.
pub fn send_data(config: &Config) -> Result<Scenario> {
    let alice = role(&ALICE);
    Ok(Scenario::new(ScenarioKind::SendData.to_string())
        .step(line(config, &ALICE)?)
        .step(Step::Act(Action::SendData { role: alice.clone(), data: HELLO_TEXT.to_string() }))
        .step(Step::Pause(config.timeouts.pause()))
        .step(Step::Act(Action::SendData { role: alice, data: INIT_SERVICES.to_string() })))
}

/// Reports the monitored device's state, then logs every state change
/// until stopped or until `limit` changes were seen.
pub fn device_state(config: &Config, limit: Option<usize>) -> Result<Scenario> {
    let monitor = role(&MONITOR);
    Ok(Scenario::new(ScenarioKind::DeviceState.to_string())
        .step(Step::Resolve {
            role: monitor.clone(),
            source: IdentitySource::Device { name: config.roles.get(&MONITOR)?.to_string() },
        })
        .step(Step::Act(Action::ReportDeviceState { role: monitor.clone(), into: slot("initial") }))
        .step(Step::subscribe(
            "device states",
            EventKind::DeviceStateChanged,
            Correlate::TerminalOf(monitor.clone()),
        ))
        .step(Step::Act(Action::SetDeviceFilters {
            role: monitor,
            states: MONITORED_STATES.to_vec(),
        }))
        .step(Step::Monitor {
            subscription: slot("device states"),
            captures: vec![(slot("state"), Field::DeviceState)],
            limit,
        }))
}
