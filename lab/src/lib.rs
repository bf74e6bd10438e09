//! # Lab
//!
//! An in-process call-control service for running scenarios without a
//! switch. It keeps a model of devices, lines and calls, advances every
//! leg through the correlator's leg state machine and reports each change
//! as an event batch on a delivery lane owned by the call.
//!
//! Devices can carry a persona: a phone that answers after a delay, a
//! caller that dials a number once it becomes ready, or a caller that
//! hangs up after a while. That is enough to drive every scenario to
//! completion unattended.

mod config;
mod exchange;
mod service;

pub use config::{DeviceConfig, DeviceKind, LabConfig};
pub use service::LabService;
