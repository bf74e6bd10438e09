use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Phone,
    RoutePoint,
    CtiPort,
}

/// One device of the lab, with its line and the behavior of the person (or
/// application) behind it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default)]
    pub dn: Option<String>,
    #[serde(default)]
    pub kind: DeviceKind,
    /// Answers ringing calls after this many milliseconds.
    #[serde(default)]
    pub auto_answer_ms: Option<u64>,
    /// Calls this number as soon as it is ready to take calls: auto accept
    /// enabled on it, or device state filters set on its device.
    #[serde(default)]
    pub dial_when_ready: Option<String>,
    /// Hangs up a call it placed after this many milliseconds.
    #[serde(default)]
    pub hangup_after_ms: Option<u64>,
}

impl DeviceConfig {
    pub fn phone(name: &str, dn: &str) -> Self {
        Self::new(name, dn, DeviceKind::Phone)
    }

    pub fn route_point(name: &str, dn: &str) -> Self {
        Self::new(name, dn, DeviceKind::RoutePoint)
    }

    pub fn cti_port(name: &str, dn: &str) -> Self {
        Self::new(name, dn, DeviceKind::CtiPort)
    }

    fn new(name: &str, dn: &str, kind: DeviceKind) -> Self {
        Self {
            name: name.to_string(),
            dn: Some(dn.to_string()),
            kind,
            auto_answer_ms: None,
            dial_when_ready: None,
            hangup_after_ms: None,
        }
    }

    pub fn auto_answer(mut self, delay_ms: u64) -> Self {
        self.auto_answer_ms = Some(delay_ms);
        self
    }

    pub fn dial_when_ready(mut self, number: &str) -> Self {
        self.dial_when_ready = Some(number.to_string());
        self
    }

    pub fn hang_up_after(mut self, delay_ms: u64) -> Self {
        self.hangup_after_ms = Some(delay_ms);
        self
    }
}

fn default_provider() -> String {
    "lab".to_string()
}

fn default_lanes() -> usize {
    4
}

fn default_dial_delay_ms() -> u64 {
    50
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LabConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Event delivery threads, 0 for one per CPU.
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    /// Pause before a persona dials a number that became ready.
    #[serde(default = "default_dial_delay_ms")]
    pub dial_delay_ms: u64,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            lanes: default_lanes(),
            dial_delay_ms: default_dial_delay_ms(),
            devices: Vec::new(),
        }
    }
}

impl LabConfig {
    pub fn device(mut self, device: DeviceConfig) -> Self {
        self.devices.push(device);
        self
    }
}
