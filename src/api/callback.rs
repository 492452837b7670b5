//! Callback-based ranging API
//!
//! `CallbackRangingApi` is the single owner of all ranging state. Scan and
//! transport events may be produced on any thread; they are queued on
//! channels and consumed only by [`CallbackRangingApi::process`], which runs
//! the discovery filter, the sequencer and the registered presentation
//! callbacks on the caller's thread.

use crate::api::formatting::RangingReport;
use crate::api::types::{ApiResult, RangingError, RangingNotice, ScanEvent};
use crate::core::{Beacon, PositionEstimate};
use crate::hardware::{GattTransport, TransportEvent, TransportEventReceiver};
use crate::processing::{
    AdmitDecision, CandidateList, DiscoveryEvent, DiscoveryFilter, RangingSequencer, RunStatistics, SequencerPhase,
};
use crate::utils::RangingConfig;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Callback for changes to the candidate list
pub type BeaconListCallback = Box<dyn Fn(&[Beacon]) + Send>;

/// Callback for a beacon reaching `Complete` or `Failed`
pub type BeaconCompleteCallback = Box<dyn Fn(&Beacon) + Send>;

/// Callback for a new position estimate
pub type PositionCallback = Box<dyn Fn(PositionEstimate) + Send>;

/// Callback for a run that ended without a position
pub type UnavailableCallback = Box<dyn Fn(&RangingError) + Send>;

pub type ScanEventSender = Sender<ScanEvent>;

/// Callback registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u32);

impl CallbackHandle {
    fn new(id: u32) -> Self {
        CallbackHandle(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

pub struct CallbackRangingApi<T: GattTransport> {
    config: RangingConfig,
    filter: DiscoveryFilter,
    sequencer: RangingSequencer,
    transport: T,
    transport_events: TransportEventReceiver,
    scan_sender: ScanEventSender,
    scan_events: Receiver<ScanEvent>,
    scanning: bool,
    callback_counter: u32,
    list_callbacks: HashMap<CallbackHandle, BeaconListCallback>,
    complete_callbacks: HashMap<CallbackHandle, BeaconCompleteCallback>,
    position_callbacks: HashMap<CallbackHandle, PositionCallback>,
    unavailable_callbacks: HashMap<CallbackHandle, UnavailableCallback>,
}

impl<T: GattTransport> CallbackRangingApi<T> {
    /// Build the API around a transport and the receiving end of its event
    /// channel. Fails if the configuration does not validate.
    pub fn new(config: RangingConfig, transport: T, transport_events: TransportEventReceiver) -> ApiResult<Self> {
        let validation = config.validate()?;
        for warning in &validation.warnings {
            warn!("Configuration: {}", warning);
        }
        validation.into_result()?;

        let (scan_sender, scan_events) = channel::unbounded();
        Ok(Self {
            filter: DiscoveryFilter::new(config.protocol.broadcast_name.clone()),
            sequencer: RangingSequencer::new(config.clone()),
            config,
            transport,
            transport_events,
            scan_sender,
            scan_events,
            scanning: false,
            callback_counter: 0,
            list_callbacks: HashMap::new(),
            complete_callbacks: HashMap::new(),
            position_callbacks: HashMap::new(),
            unavailable_callbacks: HashMap::new(),
        })
    }

    pub fn register_beacon_list_callback(&mut self, callback: BeaconListCallback) -> CallbackHandle {
        let handle = self.next_handle();
        self.list_callbacks.insert(handle, callback);
        handle
    }

    pub fn register_beacon_complete_callback(&mut self, callback: BeaconCompleteCallback) -> CallbackHandle {
        let handle = self.next_handle();
        self.complete_callbacks.insert(handle, callback);
        handle
    }

    pub fn register_position_callback(&mut self, callback: PositionCallback) -> CallbackHandle {
        let handle = self.next_handle();
        self.position_callbacks.insert(handle, callback);
        handle
    }

    pub fn register_unavailable_callback(&mut self, callback: UnavailableCallback) -> CallbackHandle {
        let handle = self.next_handle();
        self.unavailable_callbacks.insert(handle, callback);
        handle
    }

    /// Returns false if the handle was not registered
    pub fn unregister_callback(&mut self, handle: CallbackHandle) -> bool {
        self.list_callbacks.remove(&handle).is_some()
            || self.complete_callbacks.remove(&handle).is_some()
            || self.position_callbacks.remove(&handle).is_some()
            || self.unavailable_callbacks.remove(&handle).is_some()
    }

    pub fn callback_count(&self) -> usize {
        self.list_callbacks.len()
            + self.complete_callbacks.len()
            + self.position_callbacks.len()
            + self.unavailable_callbacks.len()
    }

    fn next_handle(&mut self) -> CallbackHandle {
        self.callback_counter += 1;
        CallbackHandle::new(self.callback_counter)
    }

    /// Sender for the scanning subsystem, usable from any thread
    pub fn scan_sender(&self) -> ScanEventSender {
        self.scan_sender.clone()
    }

    /// Begin a new scan. Any run still in progress is cancelled and the
    /// candidate list starts empty.
    pub fn start_scan(&mut self) {
        if self.sequencer.is_ranging() {
            let notices = self.sequencer.cancel(&mut self.transport);
            self.dispatch(notices);
        }
        self.filter.clear();
        self.scanning = true;
        info!("Scanning for {}", self.config.protocol.broadcast_name);
        self.dispatch(vec![RangingNotice::BeaconListChanged(Vec::new())]);
    }

    /// Offer a scan result. Returns `None` when no scan is active.
    pub fn on_device_discovered(&mut self, event: &DiscoveryEvent) -> Option<AdmitDecision> {
        if !self.scanning {
            debug!("Not scanning; ignoring {}", event.identifier);
            return None;
        }
        let decision = self.filter.admit(event);
        self.after_admission(decision);
        Some(decision)
    }

    /// Add a beacon whose ranging data is already known
    pub fn add_preloaded_beacon(&mut self, beacon: Beacon) -> Option<AdmitDecision> {
        if !self.scanning {
            debug!("Not scanning; ignoring preloaded {}", beacon.identifier);
            return None;
        }
        let decision = self.filter.admit_beacon(beacon);
        self.after_admission(decision);
        Some(decision)
    }

    fn after_admission(&mut self, decision: AdmitDecision) {
        if decision == AdmitDecision::Accepted {
            let list = self.filter.candidates().as_slice().to_vec();
            self.dispatch(vec![RangingNotice::BeaconListChanged(list)]);
        }
    }

    /// End the scan and range the admitted candidates
    pub fn on_scan_stopped(&mut self) -> ApiResult<()> {
        if !self.scanning {
            debug!("Scan stop with no scan active");
            return Ok(());
        }
        self.scanning = false;

        let candidates = self.filter.take_candidates();
        info!("Scan stopped with {} candidate(s)", candidates.len());
        let notices = self.sequencer.begin(candidates, &mut self.transport, Instant::now())?;
        self.dispatch(notices);
        Ok(())
    }

    /// Handle queued events, waiting up to `wait` for the first one, then
    /// expire overdue sessions. Returns the number of events handled.
    pub fn process(&mut self, wait: Duration) -> ApiResult<u32> {
        let transport_events = self.transport_events.clone();
        let scan_events = self.scan_events.clone();
        let mut handled = 0;

        select! {
            recv(scan_events) -> event => {
                if let Ok(event) = event {
                    self.handle_scan_event(event)?;
                    handled += 1;
                }
            }
            recv(transport_events) -> event => {
                if let Ok(event) = event {
                    self.handle_transport_event(&event);
                    handled += 1;
                }
            }
            default(wait) => {}
        }

        loop {
            let before = handled;
            while let Ok(event) = scan_events.try_recv() {
                self.handle_scan_event(event)?;
                handled += 1;
            }
            while let Ok(event) = transport_events.try_recv() {
                self.handle_transport_event(&event);
                handled += 1;
            }
            if handled == before {
                break;
            }
        }

        let notices = self.sequencer.poll_timeouts(&mut self.transport, Instant::now());
        self.dispatch(notices);
        Ok(handled)
    }

    fn handle_scan_event(&mut self, event: ScanEvent) -> ApiResult<()> {
        match event {
            ScanEvent::DeviceDiscovered(discovery) => {
                self.on_device_discovered(&discovery);
                Ok(())
            }
            ScanEvent::ScanStopped => self.on_scan_stopped(),
        }
    }

    fn handle_transport_event(&mut self, event: &TransportEvent) {
        let notices = self.sequencer.handle_event(event, &mut self.transport, Instant::now());
        self.dispatch(notices);
    }

    /// Abandon the current run, if any
    pub fn cancel(&mut self) {
        let notices = self.sequencer.cancel(&mut self.transport);
        self.dispatch(notices);
    }

    fn dispatch(&self, notices: Vec<RangingNotice>) {
        for notice in notices {
            match notice {
                RangingNotice::BeaconListChanged(list) => {
                    for callback in self.list_callbacks.values() {
                        callback(&list);
                    }
                }
                RangingNotice::BeaconRangingComplete(beacon) => {
                    for callback in self.complete_callbacks.values() {
                        callback(&beacon);
                    }
                }
                RangingNotice::PositionEstimated(position) => {
                    for callback in self.position_callbacks.values() {
                        callback(position);
                    }
                }
                RangingNotice::PositionUnavailable(reason) => {
                    for callback in self.unavailable_callbacks.values() {
                        callback(&reason);
                    }
                }
            }
        }
    }

    /// Report of the last finished run
    pub fn report(&self) -> Option<RangingReport> {
        self.sequencer.last_outcome().map(RangingReport::from_outcome)
    }

    pub fn candidates(&self) -> &CandidateList {
        self.filter.candidates()
    }

    pub fn phase(&self) -> SequencerPhase {
        self.sequencer.phase()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn statistics(&self) -> &RunStatistics {
        self.sequencer.statistics()
    }

    pub fn get_config(&self) -> &RangingConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Cancel any run and drop every callback
    pub fn shutdown(&mut self) {
        self.cancel();
        self.scanning = false;
        self.filter.clear();
        self.list_callbacks.clear();
        self.complete_callbacks.clear();
        self.position_callbacks.clear();
        self.unavailable_callbacks.clear();
        self.callback_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DeviceId;
    use crate::hardware::{MockBeacon, MockTransport};
    use std::sync::{Arc, Mutex};

    fn api() -> CallbackRangingApi<MockTransport> {
        let config = RangingConfig::default();
        let (transport, events) = MockTransport::channel(config.protocol.clone());
        CallbackRangingApi::new(config, transport, events).unwrap()
    }

    fn discovery(address: &str) -> DiscoveryEvent {
        DiscoveryEvent::new(address, Some("LocationBeacon"), -60)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RangingConfig::default();
        config.path_loss_exponent = 0.0;
        let (transport, events) = MockTransport::channel(config.protocol.clone());

        let result = CallbackRangingApi::new(config, transport, events);
        assert!(matches!(result, Err(RangingError::Configuration(_))));
    }

    #[test]
    fn test_callback_registration() {
        let mut api = api();
        let a = api.register_position_callback(Box::new(|_| {}));
        let b = api.register_unavailable_callback(Box::new(|_| {}));
        assert_ne!(a, b);
        assert_eq!(api.callback_count(), 2);

        assert!(api.unregister_callback(a));
        assert!(!api.unregister_callback(a));
        assert_eq!(api.callback_count(), 1);
    }

    #[test]
    fn test_discoveries_ignored_until_scan_starts() {
        let mut api = api();
        assert_eq!(api.on_device_discovered(&discovery("AA:01")), None);

        api.start_scan();
        assert_eq!(api.on_device_discovered(&discovery("AA:01")), Some(AdmitDecision::Accepted));
        assert_eq!(api.candidates().len(), 1);
    }

    #[test]
    fn test_list_callback_sees_admissions() {
        let mut api = api();
        let lists: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lists);
        api.register_beacon_list_callback(Box::new(move |list| sink.lock().unwrap().push(list.len())));

        api.start_scan();
        api.on_device_discovered(&discovery("AA:01"));
        api.on_device_discovered(&discovery("AA:01"));
        api.on_device_discovered(&DiscoveryEvent::new("AA:02", Some("Headphones"), -40));
        api.on_device_discovered(&discovery("AA:02"));

        // Rejections do not notify
        assert_eq!(*lists.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_scan_events_processed_from_channel() {
        let beacons = [("AA:01", 0.0, 0.0), ("AA:02", 2.0, 0.0), ("AA:03", 1.0, 1.0)];
        let config = RangingConfig::default();
        let (mut transport, events) = MockTransport::channel(config.protocol.clone());
        for (address, x, y) in beacons {
            transport.add_beacon(DeviceId::from(address), MockBeacon::new(-60, x, y));
        }
        let mut api = CallbackRangingApi::new(config, transport, events).unwrap();
        let positions = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&positions);
        api.register_position_callback(Box::new(move |p| sink.lock().unwrap().push(p)));

        api.start_scan();
        let sender = api.scan_sender();
        for (address, _, _) in beacons {
            sender.send(ScanEvent::DeviceDiscovered(discovery(address))).unwrap();
        }
        sender.send(ScanEvent::ScanStopped).unwrap();

        let handled = api.process(Duration::from_millis(10)).unwrap();
        assert!(handled >= 4);
        assert_eq!(api.phase(), SequencerPhase::Done);

        let found = positions.lock().unwrap();
        assert_eq!(found.len(), 1);
        assert!((found[0].x - 1.0).abs() < 1e-6);
        assert!(found[0].y.abs() < 1e-6);
        assert!(api.report().unwrap().position.is_some());
    }

    #[test]
    fn test_process_times_out_when_idle() {
        let mut api = api();
        assert_eq!(api.process(Duration::from_millis(1)).unwrap(), 0);
    }

    #[test]
    fn test_stop_without_scan_is_noop() {
        let mut api = api();
        api.on_scan_stopped().unwrap();
        assert_eq!(api.phase(), SequencerPhase::NotStarted);
    }

    #[test]
    fn test_shutdown_clears_callbacks() {
        let mut api = api();
        api.register_beacon_complete_callback(Box::new(|_| {}));
        api.start_scan();
        api.shutdown();
        assert_eq!(api.callback_count(), 0);
        assert!(!api.is_scanning());
    }
}
