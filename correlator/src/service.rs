use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::event::DeviceState;
use crate::ids::{AddressId, CallId, ConnectionId, RtpHandle, TerminalConnectionId, TerminalId};
use crate::router::EventSink;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("privilege violation: {0}")]
    PrivilegeViolation(String),
    #[error("invalid party: {0}")]
    InvalidParty(String),
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("method not supported: {0}")]
    MethodNotSupported(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// How a media terminal tells the service where its RTP goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaRegistration {
    /// The destination is supplied per call with
    /// [`ControlService::set_rtp_params`] after the logical channel opens.
    Dynamic,
    /// Fixed local RTP endpoint for every call.
    Static(SocketAddr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub address: AddressId,
}

/// What a connect returns: the call and its connections, originating side
/// first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLegs {
    pub call: CallId,
    pub connections: Vec<Connection>,
}

impl CallLegs {
    pub fn near(&self) -> Option<&Connection> {
        self.connections.first()
    }

    pub fn far(&self) -> Option<&Connection> {
        self.connections.get(1)
    }
}

/// Opaque call-control service. Every method issues one request and
/// returns once the service accepted it; state changes arrive later, as
/// events, through the sink given to [`ControlService::open`].
pub trait ControlService: Send + Sync {
    fn name(&self) -> &str;

    /// Attaches the event sink and starts the provider. The provider
    /// reports `ProviderInService` through the sink.
    fn open(&self, sink: Arc<dyn EventSink>) -> ServiceResult<()>;

    fn resolve_address(&self, dn: &str) -> ServiceResult<AddressId>;
    fn resolve_terminals(&self, address: &AddressId) -> ServiceResult<Vec<TerminalId>>;
    /// Creates (or looks up) a terminal by device name.
    fn create_terminal(&self, device: &str) -> ServiceResult<TerminalId>;

    fn open_address(&self, address: &AddressId) -> ServiceResult<()>;
    fn open_terminal(&self, terminal: &TerminalId) -> ServiceResult<()>;
    fn register_media(
        &self,
        terminal: &TerminalId,
        registration: MediaRegistration,
    ) -> ServiceResult<()>;
    fn set_auto_accept(&self, address: &AddressId, terminal: &TerminalId) -> ServiceResult<()>;

    fn connect(
        &self,
        terminal: &TerminalId,
        from: &AddressId,
        dial: &str,
    ) -> ServiceResult<CallLegs>;
    fn answer(&self, terminal_connection: &TerminalConnectionId) -> ServiceResult<()>;
    fn hold(&self, terminal_connection: &TerminalConnectionId) -> ServiceResult<()>;
    fn redirect(&self, connection: &ConnectionId, destination: &str) -> ServiceResult<()>;
    fn transfer(&self, call: &CallId, other: &CallId) -> ServiceResult<()>;
    fn conference(&self, call: &CallId, other: &CallId) -> ServiceResult<()>;
    fn drop_call(&self, call: &CallId) -> ServiceResult<()>;

    fn send_data(&self, terminal: &TerminalId, data: &str) -> ServiceResult<String>;
    fn set_device_filters(
        &self,
        terminal: &TerminalId,
        states: &[DeviceState],
    ) -> ServiceResult<()>;
    fn device_state(&self, terminal: &TerminalId) -> ServiceResult<DeviceState>;
    fn set_rtp_params(
        &self,
        terminal: &TerminalId,
        handle: RtpHandle,
        destination: SocketAddr,
    ) -> ServiceResult<()>;
}
