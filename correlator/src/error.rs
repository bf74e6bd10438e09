use std::time::Duration;

use thiserror::Error;

use crate::directory::Role;
use crate::event::EventKind;
use crate::service::ServiceError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("role {role} could not be resolved: {reason}")]
    Resolution { role: Role, reason: String },

    #[error("{action} failed on {target}: {source}")]
    Action {
        action: String,
        target: String,
        #[source]
        source: ServiceError,
    },

    #[error("{gate} timed out after {waited:?} waiting for {kind} where {correlation}")]
    CorrelationTimeout {
        gate: String,
        kind: EventKind,
        correlation: String,
        waited: Duration,
    },

    #[error("role {0} is not in the directory")]
    UnknownRole(Role),

    #[error("role {0} has no media address")]
    NoMedia(Role),

    #[error("slot {0} has not been captured")]
    MissingSlot(String),

    #[error("slot {slot} holds a {found}, expected a {expected}")]
    SlotType {
        slot: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{kind} event has no {field} to capture into {slot}")]
    MissingField {
        kind: EventKind,
        field: String,
        slot: String,
    },

    #[error("subscription {0} is not open")]
    UnknownSubscription(String),

    #[error("gate {0} was armed twice")]
    DuplicateGate(String),

    #[error("no gate armed as {0}")]
    NotArmed(String),

    #[error("gate {name} is armed for {armed}, not {awaited}")]
    ArmedKind {
        name: String,
        armed: EventKind,
        awaited: EventKind,
    },

    #[error("`{0}` has no gate registered ahead of it; pair it with its action or arm it")]
    UnarmedWait(String),

    #[error("subscription {0} was opened twice")]
    DuplicateSubscription(String),

    #[error("scenario stopped")]
    Stopped,
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::CorrelationTimeout { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
