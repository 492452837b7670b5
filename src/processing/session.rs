//! Per-beacon connection protocol
//!
//! A session walks one beacon through connect, service discovery, three
//! characteristic reads (reference RSSI, x, y) and disconnect. Every state
//! that waits on the transport carries a deadline.

use crate::api::types::RangingError;
use crate::core::{Beacon, SessionState};
use crate::hardware::codec::{decode_i32, decode_meters};
use crate::hardware::{GattService, GattTransport, SessionHandle, TransportEvent};
use crate::utils::RangingConfig;
use log::{debug, warn};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Complete,
    Failed(RangingError),
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    window: Duration,
}

/// State machine for ranging one beacon
#[derive(Debug, Clone)]
pub struct BeaconSession {
    beacon: Beacon,
    handle: Option<SessionHandle>,
    deadline: Option<Deadline>,
    failure: Option<RangingError>,
}

impl BeaconSession {
    pub fn new(beacon: Beacon) -> Self {
        Self {
            beacon,
            handle: None,
            deadline: None,
            failure: None,
        }
    }

    pub fn beacon(&self) -> &Beacon {
        &self.beacon
    }

    pub fn into_beacon(self) -> Beacon {
        self.beacon
    }

    pub fn state(&self) -> SessionState {
        self.beacon.session_state
    }

    /// Transport session currently held, if any
    pub fn handle(&self) -> Option<SessionHandle> {
        self.handle
    }

    pub fn failure(&self) -> Option<&RangingError> {
        self.failure.as_ref()
    }

    /// Terminal outcome, once there is one
    pub fn outcome(&self) -> Option<SessionOutcome> {
        match self.state() {
            SessionState::Complete => Some(SessionOutcome::Complete),
            SessionState::Failed => self.failure.clone().map(SessionOutcome::Failed),
            _ => None,
        }
    }

    /// Leave `Idle`. Preloaded beacons complete on the spot.
    pub fn start(
        &mut self,
        transport: &mut dyn GattTransport,
        config: &RangingConfig,
        now: Instant,
    ) -> Option<SessionOutcome> {
        if self.state() != SessionState::Idle {
            warn!("Ignoring start of {} while {}", self.beacon.identifier, self.state());
            return self.outcome();
        }

        if self.beacon.preloaded {
            return self.complete_preloaded(config);
        }

        self.enter(SessionState::Connecting, config.timeouts.connect(), now);
        match transport.connect(&self.beacon.identifier) {
            Ok(handle) => {
                self.handle = Some(handle);
                None
            }
            Err(e) => {
                let device = self.beacon.identifier.clone();
                self.fail(
                    transport,
                    RangingError::TransportConnectError {
                        device,
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    fn complete_preloaded(&mut self, config: &RangingConfig) -> Option<SessionOutcome> {
        if let Some(reference) = self.beacon.reference_signal_strength {
            self.beacon.distance =
                Some(config.distance_estimator().estimate(self.beacon.signal_strength, reference));
        }
        if self.beacon.range_point().map_or(true, |p| !usable_distance(p.distance)) {
            let device = self.beacon.identifier.clone();
            self.beacon.session_state = SessionState::Failed;
            self.failure = Some(RangingError::ServiceDiscoveryError {
                device,
                reason: "preloaded beacon is missing ranging data".to_string(),
            });
            return self.outcome();
        }
        debug!("Beacon {} preloaded, distance {:?} m", self.beacon.identifier, self.beacon.distance);
        self.beacon.session_state = SessionState::Complete;
        Some(SessionOutcome::Complete)
    }

    /// Feed a transport event addressed to this session
    pub fn handle_event(
        &mut self,
        event: &TransportEvent,
        transport: &mut dyn GattTransport,
        config: &RangingConfig,
        now: Instant,
    ) -> Option<SessionOutcome> {
        let state = self.state();
        if !state.is_active() {
            debug!("Dropping {:?} for {} in state {}", event, self.beacon.identifier, state);
            return None;
        }

        match event {
            TransportEvent::Error { code, .. } => {
                let error = self.error_for_code(*code, config);
                self.fail(transport, error)
            }
            TransportEvent::Connected { .. } if state == SessionState::Connecting => {
                debug!("Connected to {}", self.beacon.identifier);
                self.enter(SessionState::DiscoveringServices, config.timeouts.discovery(), now);
                let handle = self.handle?;
                match transport.discover_services(handle) {
                    Ok(()) => None,
                    Err(e) => {
                        let device = self.beacon.identifier.clone();
                        self.fail(
                            transport,
                            RangingError::ServiceDiscoveryError {
                                device,
                                reason: e.to_string(),
                            },
                        )
                    }
                }
            }
            TransportEvent::ServicesDiscovered { success, services, .. }
                if state == SessionState::DiscoveringServices =>
            {
                self.on_services_discovered(*success, services, transport, config, now)
            }
            TransportEvent::CharacteristicRead {
                characteristic,
                value,
                success,
                ..
            } if matches!(
                state,
                SessionState::ReadingReferenceRssi | SessionState::ReadingX | SessionState::ReadingY
            ) =>
            {
                self.on_characteristic_read(*characteristic, value, *success, transport, config, now)
            }
            TransportEvent::Disconnected { .. } if state == SessionState::Disconnecting => {
                self.release(transport, false);
                debug!("Disconnected from {}", self.beacon.identifier);
                self.finish_complete()
            }
            TransportEvent::Disconnected { .. } => {
                self.release(transport, false);
                let device = self.beacon.identifier.clone();
                self.fail(transport, RangingError::ConnectionLost { device, state })
            }
            other => {
                warn!("Unexpected {:?} for {} while {}", other, self.beacon.identifier, state);
                None
            }
        }
    }

    /// Expire the current state if its deadline has passed.
    ///
    /// A session stuck in `Disconnecting` already holds all three values, so
    /// it is closed and completed instead of failed.
    pub fn poll_timeout(&mut self, transport: &mut dyn GattTransport, now: Instant) -> Option<SessionOutcome> {
        let deadline = self.deadline?;
        let state = self.state();
        if !state.is_active() || now < deadline.at {
            return None;
        }

        if state == SessionState::Disconnecting {
            warn!("No disconnect confirmation from {}; closing", self.beacon.identifier);
            self.release(transport, false);
            return self.finish_complete();
        }

        let device = self.beacon.identifier.clone();
        self.fail(
            transport,
            RangingError::SessionTimeout {
                device,
                state,
                timeout_ms: deadline.window.as_millis() as u32,
            },
        )
    }

    /// Abandon the session, releasing any open connection
    pub fn abort(&mut self, transport: &mut dyn GattTransport) -> Option<SessionOutcome> {
        if !self.state().is_active() {
            return self.outcome();
        }
        let device = self.beacon.identifier.clone();
        self.fail(transport, RangingError::Cancelled { device })
    }

    fn on_services_discovered(
        &mut self,
        success: bool,
        services: &[GattService],
        transport: &mut dyn GattTransport,
        config: &RangingConfig,
        now: Instant,
    ) -> Option<SessionOutcome> {
        let device = self.beacon.identifier.clone();
        if !success {
            return self.fail(
                transport,
                RangingError::ServiceDiscoveryError {
                    device,
                    reason: "transport reported failure".to_string(),
                },
            );
        }

        let protocol = &config.protocol;
        let service = match services.iter().find(|s| s.uuid == protocol.service_uuid) {
            Some(service) => service,
            None => {
                return self.fail(
                    transport,
                    RangingError::ServiceDiscoveryError {
                        device,
                        reason: format!("service {} not offered", protocol.service_uuid),
                    },
                )
            }
        };

        let readable = |uuid: &Uuid| service.characteristic(uuid).map_or(false, |c| c.readable);
        let reference_readable = readable(&protocol.reference_rssi_uuid);
        debug!(
            "{} characteristics readable: reference rssi {}, x {}, y {}",
            device,
            reference_readable,
            readable(&protocol.x_location_uuid),
            readable(&protocol.y_location_uuid)
        );

        if !reference_readable {
            return self.fail(
                transport,
                RangingError::CharacteristicUnreadable {
                    device,
                    characteristic: protocol.reference_rssi_uuid,
                },
            );
        }

        self.enter(SessionState::ReadingReferenceRssi, config.timeouts.read(), now);
        self.request_read(protocol.reference_rssi_uuid, transport, config)
    }

    fn on_characteristic_read(
        &mut self,
        characteristic: Uuid,
        value: &[u8],
        success: bool,
        transport: &mut dyn GattTransport,
        config: &RangingConfig,
        now: Instant,
    ) -> Option<SessionOutcome> {
        let state = self.state();
        let protocol = &config.protocol;
        if Some(characteristic) != self.pending_characteristic(config) {
            warn!(
                "Ignoring read of {} from {} while {}",
                characteristic, self.beacon.identifier, state
            );
            return None;
        }

        let device = self.beacon.identifier.clone();
        let read_error = |reason: String| RangingError::CharacteristicReadError {
            device: device.clone(),
            characteristic,
            reason,
        };
        if !success {
            return self.fail(transport, read_error("transport reported failure".to_string()));
        }

        match state {
            SessionState::ReadingReferenceRssi => {
                let reference = match decode_i32(value) {
                    Ok(reference) => reference,
                    Err(e) => return self.fail(transport, read_error(e.to_string())),
                };
                let distance = config.distance_estimator().estimate(self.beacon.signal_strength, reference);
                if !usable_distance(distance) {
                    return self.fail(
                        transport,
                        read_error(format!("reference rssi {} dBm gives no usable distance", reference)),
                    );
                }
                debug!("{} reference rssi {} dBm, distance {:.2} m", device, reference, distance);
                self.beacon.reference_signal_strength = Some(reference);
                self.beacon.distance = Some(distance);

                self.enter(SessionState::ReadingX, config.timeouts.read(), now);
                self.request_read(protocol.x_location_uuid, transport, config)
            }
            SessionState::ReadingX => {
                let x = match decode_meters(value) {
                    Ok(x) => x,
                    Err(e) => return self.fail(transport, read_error(e.to_string())),
                };
                debug!("{} x location {} m", device, x);
                self.beacon.x_location = Some(x);

                self.enter(SessionState::ReadingY, config.timeouts.read(), now);
                self.request_read(protocol.y_location_uuid, transport, config)
            }
            _ => {
                let y = match decode_meters(value) {
                    Ok(y) => y,
                    Err(e) => return self.fail(transport, read_error(e.to_string())),
                };
                debug!("{} y location {} m", device, y);
                self.beacon.y_location = Some(y);

                self.enter(SessionState::Disconnecting, config.timeouts.disconnect(), now);
                let handle = self.handle?;
                match transport.disconnect(handle) {
                    Ok(()) => None,
                    Err(e) => self.fail(
                        transport,
                        RangingError::DisconnectError {
                            device: device.clone(),
                            reason: e.to_string(),
                        },
                    ),
                }
            }
        }
    }

    fn request_read(
        &mut self,
        characteristic: Uuid,
        transport: &mut dyn GattTransport,
        config: &RangingConfig,
    ) -> Option<SessionOutcome> {
        let handle = self.handle?;
        match transport.read_characteristic(handle, config.protocol.service_uuid, characteristic) {
            Ok(()) => None,
            Err(e) => {
                let device = self.beacon.identifier.clone();
                self.fail(
                    transport,
                    RangingError::CharacteristicReadError {
                        device,
                        characteristic,
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    fn enter(&mut self, state: SessionState, window: Duration, now: Instant) {
        debug!("{}: {} -> {}", self.beacon.identifier, self.state(), state);
        self.beacon.session_state = state;
        self.deadline = Some(Deadline {
            at: now + window,
            window,
        });
    }

    fn finish_complete(&mut self) -> Option<SessionOutcome> {
        self.beacon.session_state = SessionState::Complete;
        self.deadline = None;
        Some(SessionOutcome::Complete)
    }

    fn fail(&mut self, transport: &mut dyn GattTransport, error: RangingError) -> Option<SessionOutcome> {
        warn!("Ranging {} failed: {}", self.beacon.identifier, error);
        let linked = matches!(
            self.state(),
            SessionState::DiscoveringServices
                | SessionState::ReadingReferenceRssi
                | SessionState::ReadingX
                | SessionState::ReadingY
        );
        self.release(transport, linked);
        self.beacon.session_state = SessionState::Failed;
        self.deadline = None;
        self.failure = Some(error.clone());
        Some(SessionOutcome::Failed(error))
    }

    /// Give the transport session back, disconnecting first if still linked
    fn release(&mut self, transport: &mut dyn GattTransport, disconnect: bool) {
        if let Some(handle) = self.handle.take() {
            if disconnect {
                if let Err(e) = transport.disconnect(handle) {
                    debug!("Disconnect of {} during release failed: {}", self.beacon.identifier, e);
                }
            }
            transport.close(handle);
        }
    }

    /// Characteristic the current read state is waiting for
    fn pending_characteristic(&self, config: &RangingConfig) -> Option<Uuid> {
        let protocol = &config.protocol;
        match self.state() {
            SessionState::ReadingReferenceRssi => Some(protocol.reference_rssi_uuid),
            SessionState::ReadingX => Some(protocol.x_location_uuid),
            SessionState::ReadingY => Some(protocol.y_location_uuid),
            _ => None,
        }
    }

    fn error_for_code(&self, code: i32, config: &RangingConfig) -> RangingError {
        let device = self.beacon.identifier.clone();
        let reason = format!("transport error code {}", code);
        if let Some(characteristic) = self.pending_characteristic(config) {
            return RangingError::CharacteristicReadError {
                device,
                characteristic,
                reason,
            };
        }
        match self.state() {
            SessionState::Connecting => RangingError::TransportConnectError { device, reason },
            SessionState::DiscoveringServices => RangingError::ServiceDiscoveryError { device, reason },
            _ => RangingError::DisconnectError { device, reason },
        }
    }
}

/// Distances the solver can work with
fn usable_distance(distance: f64) -> bool {
    distance.is_finite() && distance > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DeviceId;
    use crate::hardware::mock::MockRequest;
    use crate::hardware::{MockBeacon, MockFault, MockTransport, TransportEventReceiver};

    const ADDRESS: &str = "AA:00";

    fn setup(fault: Option<MockFault>) -> (BeaconSession, MockTransport, TransportEventReceiver, RangingConfig) {
        let mut scripted = MockBeacon::new(-59, 2.5, -1.25);
        scripted.fault = fault;
        setup_scripted(scripted)
    }

    fn setup_scripted(
        scripted: MockBeacon,
    ) -> (BeaconSession, MockTransport, TransportEventReceiver, RangingConfig) {
        let config = RangingConfig::default();
        let (mut transport, events) = MockTransport::channel(config.protocol.clone());
        transport.add_beacon(DeviceId::from(ADDRESS), scripted);

        let beacon = Beacon::new(DeviceId::from(ADDRESS), "LocationBeacon", -65);
        (BeaconSession::new(beacon), transport, events, config)
    }

    /// Deliver queued events until the session finishes or the queue drains
    fn pump(
        session: &mut BeaconSession,
        transport: &mut MockTransport,
        events: &TransportEventReceiver,
        config: &RangingConfig,
        now: Instant,
    ) -> Option<SessionOutcome> {
        while let Ok(event) = events.try_recv() {
            if session.handle() != Some(event.session()) {
                continue;
            }
            if let Some(outcome) = session.handle_event(&event, transport, config, now) {
                return Some(outcome);
            }
        }
        None
    }

    #[test]
    fn test_full_read_chain_completes() {
        let (mut session, mut transport, events, config) = setup(None);
        let now = Instant::now();

        assert_eq!(session.start(&mut transport, &config, now), None);
        assert_eq!(session.state(), SessionState::Connecting);

        let outcome = pump(&mut session, &mut transport, &events, &config, now);
        assert_eq!(outcome, Some(SessionOutcome::Complete));

        let beacon = session.beacon();
        assert_eq!(beacon.session_state, SessionState::Complete);
        assert_eq!(beacon.reference_signal_strength, Some(-59));
        assert_eq!(beacon.x_location, Some(2.5));
        assert_eq!(beacon.y_location, Some(-1.25));
        let expected = 10f64.powf(6.0 / 20.0);
        assert!((beacon.distance.unwrap() - expected).abs() < 1e-9);
        assert_eq!(transport.open_session_count(), 0);
        assert!(session.handle().is_none());
    }

    #[test]
    fn test_reads_in_fixed_order() {
        let (mut session, mut transport, events, config) = setup(None);
        let now = Instant::now();
        session.start(&mut transport, &config, now);
        pump(&mut session, &mut transport, &events, &config, now);

        let reads: Vec<Uuid> = transport
            .requests()
            .iter()
            .filter_map(|r| match r {
                MockRequest::Read { characteristic, .. } => Some(*characteristic),
                _ => None,
            })
            .collect();
        let protocol = &config.protocol;
        assert_eq!(
            reads,
            vec![protocol.reference_rssi_uuid, protocol.x_location_uuid, protocol.y_location_uuid]
        );
        assert!(matches!(transport.requests().last(), Some(MockRequest::Close(_))));
    }

    #[test]
    fn test_steps_through_each_state() {
        let (mut session, mut transport, events, config) = setup(None);
        let now = Instant::now();
        session.start(&mut transport, &config, now);

        let expected = [
            SessionState::DiscoveringServices,
            SessionState::ReadingReferenceRssi,
            SessionState::ReadingX,
            SessionState::ReadingY,
            SessionState::Disconnecting,
            SessionState::Complete,
        ];
        for state in expected {
            let event = events.try_recv().unwrap();
            session.handle_event(&event, &mut transport, &config, now);
            assert_eq!(session.state(), state);
        }
    }

    #[test]
    fn test_refused_connection_fails_at_start() {
        let (mut session, mut transport, _events, config) = setup(Some(MockFault::RefuseConnection));
        let outcome = session.start(&mut transport, &config, Instant::now());

        assert!(matches!(
            outcome,
            Some(SessionOutcome::Failed(RangingError::TransportConnectError { .. }))
        ));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_connect_error_event_fails() {
        let (mut session, mut transport, events, config) = setup(Some(MockFault::ConnectError { code: 133 }));
        let now = Instant::now();
        session.start(&mut transport, &config, now);

        let outcome = pump(&mut session, &mut transport, &events, &config, now);
        match outcome {
            Some(SessionOutcome::Failed(RangingError::TransportConnectError { reason, .. })) => {
                assert!(reason.contains("133"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(transport.open_session_count(), 0);
    }

    #[test]
    fn test_discovery_failure() {
        let (mut session, mut transport, events, config) = setup(Some(MockFault::DiscoveryFailure));
        let now = Instant::now();
        session.start(&mut transport, &config, now);

        let outcome = pump(&mut session, &mut transport, &events, &config, now);
        assert!(matches!(
            outcome,
            Some(SessionOutcome::Failed(RangingError::ServiceDiscoveryError { .. }))
        ));
    }

    #[test]
    fn test_unreadable_reference_fails_without_reading() {
        let (mut session, mut transport, events, config) = setup(Some(MockFault::ReferenceUnreadable));
        let now = Instant::now();
        session.start(&mut transport, &config, now);

        let outcome = pump(&mut session, &mut transport, &events, &config, now);
        assert!(matches!(
            outcome,
            Some(SessionOutcome::Failed(RangingError::CharacteristicUnreadable { .. }))
        ));
        assert!(!transport
            .requests()
            .iter()
            .any(|r| matches!(r, MockRequest::Read { .. })));
        assert!(transport
            .requests()
            .iter()
            .any(|r| matches!(r, MockRequest::Disconnect(_))));
        assert_eq!(transport.open_session_count(), 0);
    }

    #[test]
    fn test_read_failure_keeps_earlier_values_only() {
        let protocol = RangingConfig::default().protocol;
        let fault = MockFault::ReadFailure {
            characteristic: protocol.x_location_uuid,
        };
        let (mut session, mut transport, events, config) = setup(Some(fault));
        let now = Instant::now();
        session.start(&mut transport, &config, now);

        let outcome = pump(&mut session, &mut transport, &events, &config, now);
        match outcome {
            Some(SessionOutcome::Failed(RangingError::CharacteristicReadError { characteristic, .. })) => {
                assert_eq!(characteristic, protocol.x_location_uuid);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        let beacon = session.beacon();
        assert!(beacon.distance.is_some());
        assert!(beacon.x_location.is_none());
        assert!(beacon.y_location.is_none());
    }

    #[test]
    fn test_truncated_value_fails() {
        let protocol = RangingConfig::default().protocol;
        let fault = MockFault::TruncatedValue {
            characteristic: protocol.reference_rssi_uuid,
        };
        let (mut session, mut transport, events, config) = setup(Some(fault));
        let now = Instant::now();
        session.start(&mut transport, &config, now);

        let outcome = pump(&mut session, &mut transport, &events, &config, now);
        assert!(matches!(
            outcome,
            Some(SessionOutcome::Failed(RangingError::CharacteristicReadError { .. }))
        ));
        assert!(session.beacon().reference_signal_strength.is_none());
        assert!(session.beacon().distance.is_none());
    }

    #[test]
    fn test_connect_timeout() {
        let (mut session, mut transport, events, config) = setup(Some(MockFault::Unresponsive));
        let start = Instant::now();
        session.start(&mut transport, &config, start);
        assert_eq!(pump(&mut session, &mut transport, &events, &config, start), None);

        let early = start + config.timeouts.connect() - Duration::from_millis(1);
        assert_eq!(session.poll_timeout(&mut transport, early), None);
        assert_eq!(session.state(), SessionState::Connecting);

        let late = start + config.timeouts.connect();
        match session.poll_timeout(&mut transport, late) {
            Some(SessionOutcome::Failed(RangingError::SessionTimeout { state, timeout_ms, .. })) => {
                assert_eq!(state, SessionState::Connecting);
                assert_eq!(timeout_ms, config.timeouts.connect_ms);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(transport.open_session_count(), 0);
    }

    #[test]
    fn test_discovery_timeout() {
        let (mut session, mut transport, events, config) = setup(Some(MockFault::SilentDiscovery));
        let start = Instant::now();
        session.start(&mut transport, &config, start);
        assert_eq!(pump(&mut session, &mut transport, &events, &config, start), None);
        assert_eq!(session.state(), SessionState::DiscoveringServices);

        let late = start + config.timeouts.discovery();
        match session.poll_timeout(&mut transport, late) {
            Some(SessionOutcome::Failed(RangingError::SessionTimeout { state, timeout_ms, .. })) => {
                assert_eq!(state, SessionState::DiscoveringServices);
                assert_eq!(timeout_ms, config.timeouts.discovery_ms);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(transport
            .requests()
            .iter()
            .any(|r| matches!(r, MockRequest::Disconnect(_))));
        assert_eq!(transport.open_session_count(), 0);
        assert!(session.handle().is_none());
    }

    #[test]
    fn test_read_timeout_keeps_earlier_values() {
        let config = RangingConfig::default();
        let silent = MockFault::SilentRead {
            characteristic: config.protocol.x_location_uuid,
        };
        let (mut session, mut transport, events, config) = setup(Some(silent));
        let start = Instant::now();
        session.start(&mut transport, &config, start);
        assert_eq!(pump(&mut session, &mut transport, &events, &config, start), None);
        assert_eq!(session.state(), SessionState::ReadingX);

        let early = start + config.timeouts.read() - Duration::from_millis(1);
        assert_eq!(session.poll_timeout(&mut transport, early), None);

        match session.poll_timeout(&mut transport, start + config.timeouts.read()) {
            Some(SessionOutcome::Failed(RangingError::SessionTimeout { state, timeout_ms, .. })) => {
                assert_eq!(state, SessionState::ReadingX);
                assert_eq!(timeout_ms, config.timeouts.read_ms);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(session.beacon().reference_signal_strength, Some(-59));
        assert!(session.beacon().x_location.is_none());
        assert_eq!(transport.open_session_count(), 0);
    }

    #[test]
    fn test_missing_service_fails_discovery() {
        let (mut session, mut transport, events, config) = setup(Some(MockFault::MissingService));
        session.start(&mut transport, &config, Instant::now());

        match pump(&mut session, &mut transport, &events, &config, Instant::now()) {
            Some(SessionOutcome::Failed(RangingError::ServiceDiscoveryError { reason, .. })) => {
                assert!(reason.contains("not offered"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!transport
            .requests()
            .iter()
            .any(|r| matches!(r, MockRequest::Read { .. })));
        assert_eq!(transport.open_session_count(), 0);
    }

    #[test]
    fn test_disconnect_error_event_fails() {
        let (mut session, mut transport, events, config) = setup(Some(MockFault::DisconnectError { code: 19 }));
        session.start(&mut transport, &config, Instant::now());

        match pump(&mut session, &mut transport, &events, &config, Instant::now()) {
            Some(SessionOutcome::Failed(RangingError::DisconnectError { reason, .. })) => {
                assert!(reason.contains("19"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(session.beacon().session_state, SessionState::Failed);
        assert_eq!(session.beacon().y_location, Some(-1.25));
        assert!(session.handle().is_none());
        assert_eq!(transport.open_session_count(), 0);
    }

    #[test]
    fn test_refused_disconnect_fails() {
        let (mut session, mut transport, events, config) = setup(Some(MockFault::RefuseDisconnect));
        session.start(&mut transport, &config, Instant::now());

        let outcome = pump(&mut session, &mut transport, &events, &config, Instant::now());
        assert!(matches!(
            outcome,
            Some(SessionOutcome::Failed(RangingError::DisconnectError { .. }))
        ));
        let disconnects = transport
            .requests()
            .iter()
            .filter(|r| matches!(r, MockRequest::Disconnect(_)))
            .count();
        assert_eq!(disconnects, 1);
        assert!(session.handle().is_none());
        assert_eq!(transport.open_session_count(), 0);
    }

    #[test]
    fn test_extreme_reference_rssi_fails_read() {
        for reference in [i32::MAX, i32::MIN] {
            let (mut session, mut transport, events, config) =
                setup_scripted(MockBeacon::new(reference, 2.5, -1.25));
            session.start(&mut transport, &config, Instant::now());

            match pump(&mut session, &mut transport, &events, &config, Instant::now()) {
                Some(SessionOutcome::Failed(RangingError::CharacteristicReadError { characteristic, .. })) => {
                    assert_eq!(characteristic, config.protocol.reference_rssi_uuid);
                }
                other => panic!("unexpected outcome for {}: {:?}", reference, other),
            }
            assert!(session.beacon().distance.is_none());
            assert!(session.handle().is_none());
            assert_eq!(transport.open_session_count(), 0);
        }
    }

    #[test]
    fn test_silent_disconnect_completes_on_timeout() {
        let (mut session, mut transport, events, config) = setup(Some(MockFault::SilentDisconnect));
        let start = Instant::now();
        session.start(&mut transport, &config, start);
        assert_eq!(pump(&mut session, &mut transport, &events, &config, start), None);
        assert_eq!(session.state(), SessionState::Disconnecting);

        let outcome = session.poll_timeout(&mut transport, start + config.timeouts.disconnect());
        assert_eq!(outcome, Some(SessionOutcome::Complete));
        assert!(session.beacon().range_point().is_some());
        assert_eq!(transport.open_session_count(), 0);
    }

    #[test]
    fn test_link_drop_mid_read() {
        let (mut session, mut transport, events, config) = setup(None);
        let now = Instant::now();
        session.start(&mut transport, &config, now);

        // Connected, then services discovered
        for _ in 0..2 {
            let event = events.try_recv().unwrap();
            session.handle_event(&event, &mut transport, &config, now);
        }
        assert_eq!(session.state(), SessionState::ReadingReferenceRssi);

        let handle = session.handle().unwrap();
        let outcome = session.handle_event(
            &TransportEvent::Disconnected { session: handle },
            &mut transport,
            &config,
            now,
        );
        assert!(matches!(
            outcome,
            Some(SessionOutcome::Failed(RangingError::ConnectionLost {
                state: SessionState::ReadingReferenceRssi,
                ..
            }))
        ));
    }

    #[test]
    fn test_unexpected_characteristic_ignored() {
        let (mut session, mut transport, events, config) = setup(None);
        let now = Instant::now();
        session.start(&mut transport, &config, now);
        for _ in 0..2 {
            let event = events.try_recv().unwrap();
            session.handle_event(&event, &mut transport, &config, now);
        }

        let stray = TransportEvent::CharacteristicRead {
            session: session.handle().unwrap(),
            characteristic: config.protocol.y_location_uuid,
            value: vec![0, 0, 0, 0],
            success: true,
        };
        assert_eq!(session.handle_event(&stray, &mut transport, &config, now), None);
        assert_eq!(session.state(), SessionState::ReadingReferenceRssi);
        assert!(session.beacon().y_location.is_none());
    }

    #[test]
    fn test_abort_releases_connection() {
        let (mut session, mut transport, events, config) = setup(None);
        let now = Instant::now();
        session.start(&mut transport, &config, now);
        let event = events.try_recv().unwrap();
        session.handle_event(&event, &mut transport, &config, now);

        let outcome = session.abort(&mut transport);
        assert!(matches!(outcome, Some(SessionOutcome::Failed(RangingError::Cancelled { .. }))));
        assert_eq!(transport.open_session_count(), 0);
        let requests = transport.requests();
        assert!(matches!(
            &requests[requests.len() - 2..],
            [MockRequest::Disconnect(_), MockRequest::Close(_)]
        ));
    }

    #[test]
    fn test_preloaded_beacon_skips_transport() {
        let config = RangingConfig::default();
        let (mut transport, _events) = MockTransport::channel(config.protocol.clone());
        let beacon = Beacon::preloaded(DeviceId::from("AA:01"), "LocationBeacon", -59, -59, 1.0, 2.0);
        let mut session = BeaconSession::new(beacon);

        let outcome = session.start(&mut transport, &config, Instant::now());
        assert_eq!(outcome, Some(SessionOutcome::Complete));
        assert_eq!(session.beacon().distance, Some(1.0));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_preloaded_beacon_with_unusable_reference_fails() {
        let config = RangingConfig::default();
        let (mut transport, _events) = MockTransport::channel(config.protocol.clone());
        let beacon = Beacon::preloaded(DeviceId::from("AA:01"), "LocationBeacon", -59, i32::MAX, 1.0, 2.0);
        let mut session = BeaconSession::new(beacon);

        let outcome = session.start(&mut transport, &config, Instant::now());
        assert!(matches!(outcome, Some(SessionOutcome::Failed(_))));
        assert_eq!(session.beacon().session_state, SessionState::Failed);
    }
}
