use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::gate::Gate;
use crate::ids::{AddressId, TerminalId};
use crate::predicate::{Correlation, Predicate};
use crate::router::Router;
use crate::service::{ControlService, MediaRegistration, ServiceResult};

/// A logical participant of a scenario ("ALICE", "ROUTE_POINT").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Where a role's identity comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    /// A plain line, looked up by directory number.
    Line { dn: String },
    /// A CTI route point. Media is negotiated per call; `rtp` is where the
    /// route point wants it sent.
    RoutePoint { dn: String, rtp: SocketAddr },
    /// A CTI port with a fixed local RTP endpoint.
    CtiPort { dn: String, rtp: SocketAddr },
    /// A device looked up by name, with no line of its own.
    Device { name: String },
}

impl IdentitySource {
    fn media(&self) -> Option<MediaRegistration> {
        match self {
            IdentitySource::RoutePoint { .. } => Some(MediaRegistration::Dynamic),
            IdentitySource::CtiPort { rtp, .. } => Some(MediaRegistration::Static(*rtp)),
            _ => None,
        }
    }

    fn rtp(&self) -> Option<SocketAddr> {
        match self {
            IdentitySource::RoutePoint { rtp, .. } | IdentitySource::CtiPort { rtp, .. } => {
                Some(*rtp)
            }
            _ => None,
        }
    }
}

impl fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentitySource::Line { dn } => write!(f, "line {dn}"),
            IdentitySource::RoutePoint { dn, rtp } => write!(f, "route point {dn} rtp {rtp}"),
            IdentitySource::CtiPort { dn, rtp } => write!(f, "cti port {dn} rtp {rtp}"),
            IdentitySource::Device { name } => write!(f, "device {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub role: Role,
    pub address: Option<AddressId>,
    pub terminal: TerminalId,
    pub terminals: Vec<TerminalId>,
    pub media: Option<MediaRegistration>,
    pub rtp: Option<SocketAddr>,
}

impl Identity {
    pub fn address(&self) -> Result<&AddressId> {
        self.address.as_ref().ok_or_else(|| Error::Resolution {
            role: self.role.clone(),
            reason: "role has no address".to_string(),
        })
    }

    /// The local RTP endpoint of a route point or CTI port.
    pub fn media_endpoint(&self) -> Result<SocketAddr> {
        self.rtp.ok_or_else(|| Error::NoMedia(self.role.clone()))
    }
}

/// Role name to resolved identity. Entries are written once, during
/// resolution, and only read afterwards.
#[derive(Default)]
pub struct RoleDirectory {
    roles: RwLock<HashMap<Role, Identity>>,
}

impl RoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity_of(&self, role: &Role) -> Result<Identity> {
        self.roles
            .read()
            .get(role)
            .cloned()
            .ok_or_else(|| Error::UnknownRole(role.clone()))
    }

    pub fn insert(&self, identity: Identity) {
        self.roles.write().insert(identity.role.clone(), identity);
    }

    pub fn roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self.roles.read().keys().cloned().collect();
        roles.sort();
        roles
    }

    /// Looks up the identity behind `source`, opens it, and waits until the
    /// service reports it in service. The in-service gates are registered
    /// before anything is opened.
    pub fn resolve(
        &self,
        role: &Role,
        source: &IdentitySource,
        service: &dyn ControlService,
        router: &Router,
        timeout: Duration,
    ) -> Result<Identity> {
        let failed = |reason: String| Error::Resolution { role: role.clone(), reason };

        let (address, terminals) = match source {
            IdentitySource::Line { dn }
            | IdentitySource::RoutePoint { dn, .. }
            | IdentitySource::CtiPort { dn, .. } => {
                let address = service
                    .resolve_address(dn)
                    .map_err(|e| failed(format!("address {dn}: {e}")))?;
                let terminals = service
                    .resolve_terminals(&address)
                    .map_err(|e| failed(format!("terminals of {address}: {e}")))?;
                (Some(address), terminals)
            }
            IdentitySource::Device { name } => {
                let terminal = service
                    .create_terminal(name)
                    .map_err(|e| failed(format!("device {name}: {e}")))?;
                (None, vec![terminal])
            }
        };
        let terminal = terminals
            .first()
            .cloned()
            .ok_or_else(|| failed(format!("{source} has no terminals")))?;

        let mut gates: Vec<Gate> = Vec::with_capacity(2);
        if let Some(address) = &address {
            gates.push(router.arm(Predicate::new(
                EventKind::AddressInService,
                Correlation::Address(address.clone()),
            )));
        }
        gates.push(router.arm(Predicate::new(
            EventKind::TerminalInService,
            Correlation::Terminal(terminal.clone()),
        )));

        let media = source.media();
        if let Err(e) = open(service, address.as_ref(), &terminal, media) {
            for gate in &gates {
                router.discard(gate);
            }
            return Err(failed(format!("open {source}: {e}")));
        }

        let deadline = Instant::now() + timeout;
        for gate in &gates {
            if let Err(e) = gate.wait(deadline) {
                for gate in &gates {
                    router.discard(gate);
                }
                return Err(failed(e.to_string()));
            }
        }

        let identity = Identity {
            role: role.clone(),
            address,
            terminal,
            terminals,
            media,
            rtp: source.rtp(),
        };
        info!(
            role = %role,
            address = identity.address.as_ref().map(|a| a.as_str()).unwrap_or("-"),
            terminal = %identity.terminal,
            "resolved {source}"
        );
        self.insert(identity.clone());
        Ok(identity)
    }
}

fn open(
    service: &dyn ControlService,
    address: Option<&AddressId>,
    terminal: &TerminalId,
    media: Option<MediaRegistration>,
) -> ServiceResult<()> {
    if let Some(address) = address {
        service.open_address(address)?;
    }
    service.open_terminal(terminal)?;
    if let Some(registration) = media {
        service.register_media(terminal, registration)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AddressChange, DeviceState, Event, TerminalChange};
    use crate::ids::{CallId, ConnectionId, RtpHandle, TerminalConnectionId};
    use crate::router::EventSink;
    use crate::service::{CallLegs, ServiceError};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Answers lookups for "1001" only; opening reports in service unless
    /// `silent` is set.
    #[derive(Default)]
    struct Lines {
        sink: Mutex<Option<Arc<dyn EventSink>>>,
        silent: bool,
        registered: Mutex<Vec<(TerminalId, MediaRegistration)>>,
    }

    impl Lines {
        fn emit(&self, event: Event) {
            if self.silent {
                return;
            }
            if let Some(sink) = self.sink.lock().clone() {
                sink.deliver(vec![event]);
            }
        }
    }

    fn unsupported<T>() -> ServiceResult<T> {
        Err(ServiceError::MethodNotSupported("test".into()))
    }

    impl ControlService for Lines {
        fn name(&self) -> &str {
            "lines"
        }
        fn open(&self, sink: Arc<dyn EventSink>) -> ServiceResult<()> {
            *self.sink.lock() = Some(sink);
            Ok(())
        }
        fn resolve_address(&self, dn: &str) -> ServiceResult<AddressId> {
            if dn == "1001" {
                Ok(AddressId::from(dn))
            } else {
                Err(ServiceError::InvalidArgument(format!("unknown dn {dn}")))
            }
        }
        fn resolve_terminals(&self, address: &AddressId) -> ServiceResult<Vec<TerminalId>> {
            Ok(vec![TerminalId::from(format!("SEP{address}"))])
        }
        fn create_terminal(&self, device: &str) -> ServiceResult<TerminalId> {
            Ok(TerminalId::from(device))
        }
        fn open_address(&self, address: &AddressId) -> ServiceResult<()> {
            self.emit(Event::address_change(address.clone(), AddressChange::InService));
            Ok(())
        }
        fn open_terminal(&self, terminal: &TerminalId) -> ServiceResult<()> {
            self.emit(Event::terminal_change(terminal.clone(), TerminalChange::InService));
            Ok(())
        }
        fn register_media(
            &self,
            terminal: &TerminalId,
            registration: MediaRegistration,
        ) -> ServiceResult<()> {
            self.registered.lock().push((terminal.clone(), registration));
            Ok(())
        }
        fn set_auto_accept(&self, _: &AddressId, _: &TerminalId) -> ServiceResult<()> {
            unsupported()
        }
        fn connect(&self, _: &TerminalId, _: &AddressId, _: &str) -> ServiceResult<CallLegs> {
            unsupported()
        }
        fn answer(&self, _: &TerminalConnectionId) -> ServiceResult<()> {
            unsupported()
        }
        fn hold(&self, _: &TerminalConnectionId) -> ServiceResult<()> {
            unsupported()
        }
        fn redirect(&self, _: &ConnectionId, _: &str) -> ServiceResult<()> {
            unsupported()
        }
        fn transfer(&self, _: &CallId, _: &CallId) -> ServiceResult<()> {
            unsupported()
        }
        fn conference(&self, _: &CallId, _: &CallId) -> ServiceResult<()> {
            unsupported()
        }
        fn drop_call(&self, _: &CallId) -> ServiceResult<()> {
            unsupported()
        }
        fn send_data(&self, _: &TerminalId, _: &str) -> ServiceResult<String> {
            unsupported()
        }
        fn set_device_filters(&self, _: &TerminalId, _: &[DeviceState]) -> ServiceResult<()> {
            unsupported()
        }
        fn device_state(&self, _: &TerminalId) -> ServiceResult<DeviceState> {
            unsupported()
        }
        fn set_rtp_params(&self, _: &TerminalId, _: RtpHandle, _: SocketAddr) -> ServiceResult<()> {
            unsupported()
        }
    }

    fn opened(service: Lines) -> (Arc<Lines>, Arc<Router>) {
        let service = Arc::new(service);
        let router = Arc::new(Router::new());
        service.open(router.clone()).unwrap();
        (service, router)
    }

    #[test]
    fn resolves_line_once_in_service() {
        let (service, router) = opened(Lines::default());
        let directory = RoleDirectory::new();
        let role = Role::from("ALICE");
        let identity = directory
            .resolve(
                &role,
                &IdentitySource::Line { dn: "1001".into() },
                service.as_ref(),
                &router,
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(identity.address().unwrap(), &AddressId::from("1001"));
        assert_eq!(identity.terminal, TerminalId::from("SEP1001"));
        assert_eq!(directory.identity_of(&role).unwrap(), identity);
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn cti_port_registers_static_media() {
        let (service, router) = opened(Lines::default());
        let directory = RoleDirectory::new();
        let rtp: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let identity = directory
            .resolve(
                &Role::from("PORT"),
                &IdentitySource::CtiPort { dn: "1001".into(), rtp },
                service.as_ref(),
                &router,
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(identity.media_endpoint().unwrap(), rtp);
        assert_eq!(
            service.registered.lock().as_slice(),
            &[(TerminalId::from("SEP1001"), MediaRegistration::Static(rtp))]
        );
    }

    #[test]
    fn unknown_dn_fails_fast() {
        let (service, router) = opened(Lines::default());
        let directory = RoleDirectory::new();
        let err = directory
            .resolve(
                &Role::from("BOB"),
                &IdentitySource::Line { dn: "9999".into() },
                service.as_ref(),
                &router,
                Duration::from_secs(1),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }), "{err}");
        assert!(directory.identity_of(&Role::from("BOB")).is_err());
    }

    #[test]
    fn never_in_service_times_out() {
        let (service, router) = opened(Lines { silent: true, ..Default::default() });
        let directory = RoleDirectory::new();
        let err = directory
            .resolve(
                &Role::from("ALICE"),
                &IdentitySource::Line { dn: "1001".into() },
                service.as_ref(),
                &router,
                Duration::from_millis(30),
            )
            .unwrap_err();
        match err {
            Error::Resolution { role, reason } => {
                assert_eq!(role, Role::from("ALICE"));
                assert!(reason.contains("AddressInService"), "{reason}");
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn device_has_no_address() {
        let (service, router) = opened(Lines::default());
        let directory = RoleDirectory::new();
        let identity = directory
            .resolve(
                &Role::from("MONITOR"),
                &IdentitySource::Device { name: "SEPMONITOR".into() },
                service.as_ref(),
                &router,
                Duration::from_secs(1),
            )
            .unwrap();
        assert!(identity.address.is_none());
        assert!(identity.address().is_err());
        assert!(matches!(identity.media_endpoint(), Err(Error::NoMedia(_))));
    }
}
