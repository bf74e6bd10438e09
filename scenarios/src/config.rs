use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use callgate_lab::LabConfig;
use serde::Deserialize;
use thiserror::Error;

pub const CONF_ENV: &str = "CALLGATE_CONF";
pub const DEFAULT_CONF: &str = "callgate.toml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("role {role} has no binding, set roles.{key} or {env}")]
    MissingRole {
        role: &'static str,
        key: &'static str,
        env: &'static str,
    },
    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider name the service reports itself in service as.
    pub name: Option<String>,
    pub address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Directory numbers and device names behind the logical roles.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Roles {
    pub alice_dn: Option<String>,
    pub bob_dn: Option<String>,
    pub charlie_dn: Option<String>,
    pub cti_route_point_dn: Option<String>,
    pub cti_port_dn: Option<String>,
    pub monitor_device_name: Option<String>,
}

/// One role binding with the config key and environment variable that set
/// it.
pub struct Binding {
    pub role: &'static str,
    pub key: &'static str,
    pub env: &'static str,
}

pub const ALICE: Binding = Binding { role: "ALICE", key: "alice_dn", env: "ALICE_DN" };
pub const BOB: Binding = Binding { role: "BOB", key: "bob_dn", env: "BOB_DN" };
pub const CHARLIE: Binding = Binding { role: "CHARLIE", key: "charlie_dn", env: "CHARLIE_DN" };
pub const ROUTE_POINT: Binding =
    Binding { role: "RP", key: "cti_route_point_dn", env: "CTI_ROUTE_POINT_DN" };
pub const PORT: Binding = Binding { role: "PORT", key: "cti_port_dn", env: "CTI_PORT_DN" };
pub const MONITOR: Binding =
    Binding { role: "MONITOR", key: "monitor_device_name", env: "MONITOR_DEVICE_NAME" };

impl Roles {
    fn slot(&mut self, binding: &Binding) -> &mut Option<String> {
        match binding.key {
            "alice_dn" => &mut self.alice_dn,
            "bob_dn" => &mut self.bob_dn,
            "charlie_dn" => &mut self.charlie_dn,
            "cti_route_point_dn" => &mut self.cti_route_point_dn,
            "cti_port_dn" => &mut self.cti_port_dn,
            _ => &mut self.monitor_device_name,
        }
    }

    /// The value bound to a role.
    pub fn get(&self, binding: &Binding) -> Result<&str, ConfigError> {
        let value = match binding.key {
            "alice_dn" => &self.alice_dn,
            "bob_dn" => &self.bob_dn,
            "charlie_dn" => &self.charlie_dn,
            "cti_route_point_dn" => &self.cti_route_point_dn,
            "cti_port_dn" => &self.cti_port_dn,
            _ => &self.monitor_device_name,
        };
        value.as_deref().ok_or(ConfigError::MissingRole {
            role: binding.role,
            key: binding.key,
            env: binding.env,
        })
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for binding in [&ALICE, &BOB, &CHARLIE, &ROUTE_POINT, &PORT, &MONITOR] {
            if let Some(value) = lookup(binding.env).filter(|v| !v.is_empty()) {
                *self.slot(binding) = Some(value);
            }
        }
    }
}

fn default_await_secs() -> u64 {
    30
}

fn default_pause_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct Timeouts {
    /// Bound on every correlated wait.
    #[serde(default = "default_await_secs")]
    pub await_secs: u64,
    /// Length of the pauses scenarios take between actions.
    #[serde(default = "default_pause_secs")]
    pub pause_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { await_secs: default_await_secs(), pause_secs: default_pause_secs() }
    }
}

impl Timeouts {
    pub fn await_timeout(&self) -> Duration {
        Duration::from_secs(self.await_secs)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub roles: Roles,
    pub timeouts: Timeouts,
    pub lab: LabConfig,
}

impl Config {
    /// Reads the config from `path`, else from `CALLGATE_CONF`, else from
    /// `./callgate.toml`. A missing default file is not an error; roles can
    /// come from the environment alone.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match std::env::var(CONF_ENV) {
                Ok(path) => (PathBuf::from(path), true),
                Err(_) => (PathBuf::from(DEFAULT_CONF), false),
            },
        };
        let mut config = if explicit || path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Self::parse(&contents).with_context(|| format!("parsing config {}", path.display()))?
        } else {
            Self::default()
        };
        config.roles.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeouts.await_secs == 0 {
            return Err(ConfigError::ZeroTimeout("await_secs"));
        }
        Ok(())
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name.as_deref().unwrap_or(&self.lab.provider)
    }
}
