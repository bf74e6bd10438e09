//! # Correlator
//!
//! Event-correlation engine for scripted call flows. A call-control service
//! reports provider, terminal, address and call state changes on its own
//! threads; this crate turns that stream into blocking, identity-correlated
//! waits that a linear scenario can issue one after the other.
//!
//! ## Core Components
//!
//! - **gate**: one-shot latch resolved by the first matching event
//! - **subscription**: always-live bounded queue for recurring events
//! - **predicate**: event kind plus the identity a wait is interested in
//! - **router**: single ingestion point that resolves gates and feeds
//!   subscriptions
//! - **directory**: logical roles resolved to addresses and terminals
//! - **sequencer**: runs a [`Scenario`] of steps against a
//!   [`ControlService`]
//! - **leg**: per-leg state machine
//!
//! ## Flow
//!
//! 1. A step registers a gate with the router (unbound if the identity is
//!    not known yet).
//! 2. The step issues its action against the service.
//! 3. The service delivers event batches to the router's [`EventSink`].
//! 4. The router resolves every matching gate; the waiting step wakes and
//!    captures event fields into slots for the next step.

pub mod directory;
pub mod error;
pub mod event;
pub mod gate;
pub mod ids;
pub mod leg;
pub mod media;
pub mod predicate;
pub mod router;
pub mod sequencer;
pub mod service;
pub mod slots;
pub mod step;
pub mod subscription;

pub use directory::{Identity, IdentitySource, Role, RoleDirectory};
pub use error::{Error, Result};
pub use event::{DeviceState, Event, EventKind};
pub use gate::Gate;
pub use predicate::{Correlation, Predicate};
pub use router::{EventSink, Router, RouterStats};
pub use sequencer::{RunReport, ScenarioContext, ScenarioFailure, Sequencer, StopSignal};
pub use service::{ControlService, ServiceError};
pub use step::{Action, Correlate, Dial, Scenario, Step, Wait};
pub use subscription::Subscription;
