//! Connection-oriented transport interface

use crate::core::DeviceId;
use crate::hardware::TransportResult;
use crossbeam::channel::{Receiver, Sender};
use std::fmt;
use uuid::Uuid;

/// Identifies one open connection to one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u32);

impl SessionHandle {
    pub fn new(id: u32) -> Self {
        SessionHandle(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Characteristic found during service discovery
#[derive(Debug, Clone, PartialEq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub readable: bool,
}

/// Service found during service discovery
#[derive(Debug, Clone, PartialEq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }
}

/// Asynchronous result of a transport request
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected {
        session: SessionHandle,
    },
    Disconnected {
        session: SessionHandle,
    },
    ServicesDiscovered {
        session: SessionHandle,
        success: bool,
        services: Vec<GattService>,
    },
    CharacteristicRead {
        session: SessionHandle,
        characteristic: Uuid,
        value: Vec<u8>,
        success: bool,
    },
    /// Stack-level failure on the session
    Error {
        session: SessionHandle,
        code: i32,
    },
}

impl TransportEvent {
    pub fn session(&self) -> SessionHandle {
        match self {
            TransportEvent::Connected { session }
            | TransportEvent::Disconnected { session }
            | TransportEvent::ServicesDiscovered { session, .. }
            | TransportEvent::CharacteristicRead { session, .. }
            | TransportEvent::Error { session, .. } => *session,
        }
    }
}

/// Where a transport publishes its events
pub type TransportEventSender = Sender<TransportEvent>;

/// Where the owner of a ranging run consumes transport events
pub type TransportEventReceiver = Receiver<TransportEvent>;

/// Request side of the connection transport.
///
/// Every method only queues work. Completion is reported later through the
/// transport's event channel, keyed by the returned [`SessionHandle`].
pub trait GattTransport {
    /// Open a connection; `Connected` or `Error` follows
    fn connect(&mut self, device: &DeviceId) -> TransportResult<SessionHandle>;

    /// Enumerate services; `ServicesDiscovered` follows
    fn discover_services(&mut self, session: SessionHandle) -> TransportResult<()>;

    /// Read one characteristic; `CharacteristicRead` follows
    fn read_characteristic(
        &mut self,
        session: SessionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> TransportResult<()>;

    /// Tear the link down; `Disconnected` follows
    fn disconnect(&mut self, session: SessionHandle) -> TransportResult<()>;

    /// Release every resource held for the session. No event follows.
    fn close(&mut self, session: SessionHandle);
}
