//! Mock transport for testing and development
//!
//! Answers every request immediately by pushing the matching event onto its
//! channel, driven by a per-device script of beacon data and faults.

use crate::core::DeviceId;
use crate::hardware::codec::{encode_i32, encode_meters};
use crate::hardware::{
    GattCharacteristic, GattService, GattTransport, SessionHandle, TransportError,
    TransportEvent, TransportEventReceiver, TransportEventSender, TransportResult,
};
use crate::utils::ProtocolConfig;
use crossbeam::channel;
use std::collections::HashMap;
use uuid::Uuid;

/// Misbehaviour a scripted beacon exhibits
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockFault {
    /// `connect` itself fails
    RefuseConnection,
    /// The connection attempt ends in an error event
    ConnectError { code: i32 },
    /// The connection attempt is accepted and never answered
    Unresponsive,
    /// Service discovery reports failure
    DiscoveryFailure,
    /// The reference RSSI characteristic is not readable
    ReferenceUnreadable,
    /// Reading this characteristic reports failure
    ReadFailure { characteristic: Uuid },
    /// This characteristic returns fewer than four bytes
    TruncatedValue { characteristic: Uuid },
    /// Service discovery is accepted and never answered
    SilentDiscovery,
    /// Discovery succeeds but the ranging service is missing
    MissingService,
    /// Reading this characteristic is accepted and never answered
    SilentRead { characteristic: Uuid },
    /// `disconnect` is accepted but no event follows
    SilentDisconnect,
    /// `disconnect` itself fails
    RefuseDisconnect,
    /// `disconnect` is answered with an error event
    DisconnectError { code: i32 },
}

/// Data a scripted beacon serves
#[derive(Debug, Clone, PartialEq)]
pub struct MockBeacon {
    pub reference_rssi: i32,
    /// Meters; served in whole centimeters
    pub x_location: f64,
    pub y_location: f64,
    pub fault: Option<MockFault>,
}

impl MockBeacon {
    pub fn new(reference_rssi: i32, x_location: f64, y_location: f64) -> Self {
        Self {
            reference_rssi,
            x_location,
            y_location,
            fault: None,
        }
    }

    pub fn with_fault(mut self, fault: MockFault) -> Self {
        self.fault = Some(fault);
        self
    }
}

/// Request received by the mock, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum MockRequest {
    Connect(DeviceId),
    DiscoverServices(SessionHandle),
    Read { session: SessionHandle, characteristic: Uuid },
    Disconnect(SessionHandle),
    Close(SessionHandle),
}

/// In-memory transport
pub struct MockTransport {
    protocol: ProtocolConfig,
    events: TransportEventSender,
    beacons: HashMap<DeviceId, MockBeacon>,
    sessions: HashMap<SessionHandle, DeviceId>,
    next_session: u32,
    requests: Vec<MockRequest>,
    max_open_sessions: usize,
}

impl MockTransport {
    pub fn new(protocol: ProtocolConfig, events: TransportEventSender) -> Self {
        Self {
            protocol,
            events,
            beacons: HashMap::new(),
            sessions: HashMap::new(),
            next_session: 0,
            requests: Vec::new(),
            max_open_sessions: 0,
        }
    }

    /// Mock plus the receiving end of its event channel
    pub fn channel(protocol: ProtocolConfig) -> (Self, TransportEventReceiver) {
        let (sender, receiver) = channel::unbounded();
        (Self::new(protocol, sender), receiver)
    }

    pub fn add_beacon(&mut self, device: DeviceId, beacon: MockBeacon) {
        self.beacons.insert(device, beacon);
    }

    pub fn requests(&self) -> &[MockRequest] {
        &self.requests
    }

    /// Devices connected to, in order
    pub fn connect_order(&self) -> Vec<DeviceId> {
        self.requests
            .iter()
            .filter_map(|request| match request {
                MockRequest::Connect(device) => Some(device.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn open_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Most sessions ever open at once
    pub fn max_open_sessions(&self) -> usize {
        self.max_open_sessions
    }

    fn emit(&self, event: TransportEvent) -> TransportResult<()> {
        self.events.send(event).map_err(|_| TransportError::ChannelClosed)
    }

    fn beacon_for(&self, session: SessionHandle) -> TransportResult<&MockBeacon> {
        self.sessions
            .get(&session)
            .and_then(|device| self.beacons.get(device))
            .ok_or(TransportError::UnknownSession { session })
    }

    fn characteristic_value(&self, beacon: &MockBeacon, characteristic: Uuid) -> TransportResult<Vec<u8>> {
        let encoded = if characteristic == self.protocol.reference_rssi_uuid {
            encode_i32(beacon.reference_rssi)
        } else if characteristic == self.protocol.x_location_uuid {
            encode_meters(beacon.x_location).map_err(rejected)?
        } else if characteristic == self.protocol.y_location_uuid {
            encode_meters(beacon.y_location).map_err(rejected)?
        } else {
            return Err(TransportError::RequestRejected {
                reason: format!("unknown characteristic {}", characteristic),
            });
        };
        Ok(encoded.to_vec())
    }
}

fn rejected(error: impl std::fmt::Display) -> TransportError {
    TransportError::RequestRejected {
        reason: error.to_string(),
    }
}

impl GattTransport for MockTransport {
    fn connect(&mut self, device: &DeviceId) -> TransportResult<SessionHandle> {
        self.requests.push(MockRequest::Connect(device.clone()));

        let fault = match self.beacons.get(device) {
            Some(beacon) => beacon.fault,
            None => {
                return Err(TransportError::DeviceUnavailable {
                    device: device.clone(),
                })
            }
        };
        if fault == Some(MockFault::RefuseConnection) {
            return Err(TransportError::DeviceUnavailable {
                device: device.clone(),
            });
        }

        self.next_session += 1;
        let session = SessionHandle::new(self.next_session);
        match fault {
            Some(MockFault::ConnectError { code }) => self.emit(TransportEvent::Error { session, code })?,
            Some(MockFault::Unresponsive) => {}
            _ => self.emit(TransportEvent::Connected { session })?,
        }

        self.sessions.insert(session, device.clone());
        self.max_open_sessions = self.max_open_sessions.max(self.sessions.len());
        Ok(session)
    }

    fn discover_services(&mut self, session: SessionHandle) -> TransportResult<()> {
        self.requests.push(MockRequest::DiscoverServices(session));
        let fault = self.beacon_for(session)?.fault;

        if fault == Some(MockFault::SilentDiscovery) {
            return Ok(());
        }
        if fault == Some(MockFault::DiscoveryFailure) {
            return self.emit(TransportEvent::ServicesDiscovered {
                session,
                success: false,
                services: Vec::new(),
            });
        }

        let readable = |uuid: Uuid| GattCharacteristic {
            uuid,
            readable: !(fault == Some(MockFault::ReferenceUnreadable)
                && uuid == self.protocol.reference_rssi_uuid),
        };
        let service_uuid = match fault {
            Some(MockFault::MissingService) => Uuid::from_u128(0x180f),
            _ => self.protocol.service_uuid,
        };
        let service = GattService {
            uuid: service_uuid,
            characteristics: vec![
                readable(self.protocol.reference_rssi_uuid),
                readable(self.protocol.x_location_uuid),
                readable(self.protocol.y_location_uuid),
            ],
        };
        self.emit(TransportEvent::ServicesDiscovered {
            session,
            success: true,
            services: vec![service],
        })
    }

    fn read_characteristic(
        &mut self,
        session: SessionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> TransportResult<()> {
        self.requests.push(MockRequest::Read { session, characteristic });
        if service != self.protocol.service_uuid {
            return Err(TransportError::RequestRejected {
                reason: format!("unknown service {}", service),
            });
        }

        let beacon = self.beacon_for(session)?;
        let mut value = self.characteristic_value(beacon, characteristic)?;
        let success = match beacon.fault {
            Some(MockFault::ReadFailure { characteristic: failing }) if failing == characteristic => {
                value.clear();
                false
            }
            Some(MockFault::TruncatedValue { characteristic: short }) if short == characteristic => {
                value.truncate(2);
                true
            }
            Some(MockFault::SilentRead { characteristic: silent }) if silent == characteristic => {
                return Ok(());
            }
            _ => true,
        };

        self.emit(TransportEvent::CharacteristicRead {
            session,
            characteristic,
            value,
            success,
        })
    }

    fn disconnect(&mut self, session: SessionHandle) -> TransportResult<()> {
        self.requests.push(MockRequest::Disconnect(session));
        let fault = self.beacon_for(session)?.fault;
        match fault {
            Some(MockFault::SilentDisconnect) => Ok(()),
            Some(MockFault::RefuseDisconnect) => Err(TransportError::RequestRejected {
                reason: "disconnect refused".to_string(),
            }),
            Some(MockFault::DisconnectError { code }) => self.emit(TransportEvent::Error { session, code }),
            _ => self.emit(TransportEvent::Disconnected { session }),
        }
    }

    fn close(&mut self, session: SessionHandle) {
        self.requests.push(MockRequest::Close(session));
        self.sessions.remove(&session);
    }
}
