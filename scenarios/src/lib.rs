//! # Scenarios
//!
//! The call flows callgate ships with, built as step lists for the
//! correlator's sequencer, plus the configuration that binds their roles to
//! real numbers and devices.
//!
//! Every scenario runs against the in-process lab service; the lab config
//! for a scenario supplies the people on the other end of the calls.

pub mod config;
pub mod flows;
pub mod lab;

use std::sync::Arc;

use anyhow::{Context, Result};
use callgate_correlator::media::SilentPlayer;
use callgate_correlator::{ControlService, RunReport, Scenario, ScenarioContext, Sequencer, StopSignal};
use callgate_lab::LabService;
use tracing::info;

pub use config::{Config, ConfigError};
pub use flows::{build, ScenarioKind};
pub use lab::lab_for;

/// Builds `kind`, starts a lab for it and runs it to completion.
pub fn run(kind: ScenarioKind, config: &Config, stop: StopSignal) -> Result<RunReport> {
    let scenario = build(kind, config)?;
    let service = Arc::new(LabService::new(lab_for(kind, config)?));
    run_on(service, &scenario, config, stop)
}

/// Runs a scenario against an already constructed service.
pub fn run_on(
    service: Arc<dyn ControlService>,
    scenario: &Scenario,
    config: &Config,
    stop: StopSignal,
) -> Result<RunReport> {
    let run_id = callgate_utils::uuid();
    if let Some(address) = &config.provider.address {
        info!(
            run = %run_id,
            provider = service.name(),
            address = %address,
            username = config.provider.username.as_deref().unwrap_or(""),
            "provider configured"
        );
    }
    let mut ctx = ScenarioContext::new(service)
        .with_timeout(config.timeouts.await_timeout())
        .with_stop(stop)
        .with_player(Arc::new(SilentPlayer::new(config.timeouts.pause())));
    ctx.open().context("opening provider")?;
    let report = Sequencer::new(&mut ctx).run(scenario)?;
    info!(
        run = %run_id,
        scenario = %report.scenario,
        steps = report.steps,
        elapsed = ?report.elapsed,
        delivered = report.router.delivered,
        matched = report.router.matched,
        unmatched = report.router.unmatched,
        "scenario complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use callgate_correlator::event::DeviceState;
    use callgate_correlator::ids::TerminalId;
    use callgate_correlator::ScenarioFailure;

    use super::*;
    use crate::flows::{device_state, HELLO_TEXT, INIT_SERVICES};

    fn config() -> Config {
        callgate_log::init_test();
        Config::parse(
            r#"
            [roles]
            alice_dn = "1000"
            bob_dn = "1001"
            charlie_dn = "1002"
            cti_route_point_dn = "2000"
            cti_port_dn = "3000"
            monitor_device_name = "SEPMONITOR"

            [timeouts]
            await_secs = 5
            pause_secs = 0

            [lab]
            dial_delay_ms = 20
            "#,
        )
        .unwrap()
    }

    #[test]
    fn make_call() {
        let report = run(ScenarioKind::MakeCall, &config(), StopSignal::new()).unwrap();
        assert_eq!(report.scenario, "make-call");
        assert_eq!(report.steps, 4);
    }

    #[test]
    fn conference() {
        let report = run(ScenarioKind::Conference, &config(), StopSignal::new()).unwrap();
        assert_eq!(report.steps, 8);
    }

    #[test]
    fn dial_via_office() {
        let report = run(ScenarioKind::DialViaOffice, &config(), StopSignal::new()).unwrap();
        assert_eq!(report.scenario, "dial-via-office");
        assert!(report.router.delivered > 0);
    }

    #[test]
    fn play_media() {
        run(ScenarioKind::PlayMedia, &config(), StopSignal::new()).unwrap();
    }

    #[test]
    fn send_data_reaches_the_display() {
        let config = config();
        let lab = Arc::new(LabService::new(lab_for(ScenarioKind::SendData, &config).unwrap()));
        let scenario = build(ScenarioKind::SendData, &config).unwrap();
        run_on(lab.clone(), &scenario, &config, StopSignal::new()).unwrap();
        assert_eq!(
            lab.display(&TerminalId::from("SEP000000001000")),
            vec![HELLO_TEXT.to_string(), INIT_SERVICES.to_string()]
        );
    }

    #[test]
    fn device_state_sees_a_whole_call() {
        let config = config();
        let lab = Arc::new(LabService::new(lab_for(ScenarioKind::DeviceState, &config).unwrap()));
        let scenario = device_state(&config, Some(3)).unwrap();
        let report = run_on(lab.clone(), &scenario, &config, StopSignal::new()).unwrap();
        assert_eq!(report.steps, 5);
        assert_eq!(
            lab.device_state(&TerminalId::from("SEPMONITOR")).unwrap(),
            DeviceState::Idle
        );
    }

    #[test]
    fn device_state_runs_until_stopped() {
        let config = config();
        let stop = StopSignal::new();
        let raiser = stop.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(1500));
            raiser.raise();
        });
        run(ScenarioKind::DeviceState, &config, stop).unwrap();
    }

    #[test]
    fn failure_names_the_step() {
        let mut config = config();
        config.timeouts.await_secs = 1;
        // nobody calls the port
        config.lab = config.lab.clone().device(callgate_lab::DeviceConfig::cti_port("PORT3000", "3000"));
        let err = run(ScenarioKind::PlayMedia, &config, StopSignal::new()).unwrap_err();
        let failure = err.downcast_ref::<ScenarioFailure>().unwrap();
        assert!(failure.error.is_timeout());
        assert!(failure.failed.starts_with("auto accept on PORT"), "{}", failure.failed);
    }
}
