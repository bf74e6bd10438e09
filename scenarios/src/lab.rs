use std::time::Duration;

use anyhow::Result;
use callgate_lab::{DeviceConfig, LabConfig};

use crate::config::{Config, ALICE, BOB, CHARLIE, MONITOR, PORT, ROUTE_POINT};
use crate::flows::ScenarioKind;

/// How long the simulated people take to pick up.
const ANSWER_DELAY_MS: u64 = 300;

fn phone(dn: &str) -> DeviceConfig {
    DeviceConfig::phone(&format!("SEP{dn:0>12}"), dn)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// The lab devices a scenario needs, with personas playing the people the
/// scenario does not drive itself. Devices listed under `[lab]` replace the
/// generated set.
pub fn lab_for(kind: ScenarioKind, config: &Config) -> Result<LabConfig> {
    let mut lab = config.lab.clone();
    lab.provider = config.provider_name().to_string();
    if !lab.devices.is_empty() {
        return Ok(lab);
    }

    let roles = &config.roles;
    let devices = match kind {
        ScenarioKind::MakeCall => vec![
            phone(roles.get(&ALICE)?),
            phone(roles.get(&BOB)?).auto_answer(ANSWER_DELAY_MS),
        ],
        ScenarioKind::Conference => vec![
            phone(roles.get(&ALICE)?),
            phone(roles.get(&BOB)?),
            phone(roles.get(&CHARLIE)?),
        ],
        ScenarioKind::DialViaOffice => {
            let rp = roles.get(&ROUTE_POINT)?;
            vec![
                phone(roles.get(&ALICE)?).dial_when_ready(rp),
                phone(roles.get(&BOB)?).auto_answer(ANSWER_DELAY_MS),
                DeviceConfig::route_point(&format!("RP{rp}"), rp),
                DeviceConfig::cti_port(&format!("PORT{}", roles.get(&PORT)?), roles.get(&PORT)?),
            ]
        }
        ScenarioKind::PlayMedia => {
            let port = roles.get(&PORT)?;
            vec![
                phone(roles.get(&ALICE)?).dial_when_ready(port),
                DeviceConfig::cti_port(&format!("PORT{port}"), port),
            ]
        }
        ScenarioKind::SendData => vec![phone(roles.get(&ALICE)?)],
        ScenarioKind::DeviceState => {
            // the monitored device sits on BOB's line so ALICE has something
            // to call
            let bob = roles.get(&BOB)?;
            let hang_up = millis(config.timeouts.pause()) + 2 * ANSWER_DELAY_MS;
            vec![
                phone(roles.get(&ALICE)?).dial_when_ready(bob).hang_up_after(hang_up),
                DeviceConfig::phone(roles.get(&MONITOR)?, bob).auto_answer(ANSWER_DELAY_MS),
            ]
        }
    };
    lab.devices = devices;
    Ok(lab)
}
