//! Admission of scan results into the candidate list

use crate::core::{Beacon, DeviceId, MAX_BEACONS};
use log::debug;

/// One peripheral reported by the scanner
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryEvent {
    pub identifier: DeviceId,
    /// Advertised name, if the advertisement carried one
    pub display_name: Option<String>,
    /// RSSI of this advertisement (dBm)
    pub signal_strength: i32,
}

impl DiscoveryEvent {
    pub fn new(identifier: impl Into<String>, display_name: Option<&str>, signal_strength: i32) -> Self {
        Self {
            identifier: DeviceId::new(identifier),
            display_name: display_name.map(str::to_string),
            signal_strength,
        }
    }
}

/// Outcome of offering a discovery to the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitDecision {
    Accepted,
    RejectedDuplicate,
    RejectedNameMismatch,
    RejectedCapacityFull,
}

/// Beacons admitted for ranging, in discovery order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateList {
    beacons: Vec<Beacon>,
}

impl CandidateList {
    pub fn new() -> Self {
        Self {
            beacons: Vec::with_capacity(MAX_BEACONS),
        }
    }

    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.beacons.len() >= MAX_BEACONS
    }

    pub fn contains(&self, identifier: &DeviceId) -> bool {
        self.beacons.iter().any(|b| &b.identifier == identifier)
    }

    pub fn as_slice(&self) -> &[Beacon] {
        &self.beacons
    }

    pub fn into_beacons(self) -> Vec<Beacon> {
        self.beacons
    }
}

/// First-N matching, deduplicated admission policy
#[derive(Debug, Clone)]
pub struct DiscoveryFilter {
    broadcast_name: String,
    candidates: CandidateList,
}

impl DiscoveryFilter {
    pub fn new(broadcast_name: impl Into<String>) -> Self {
        Self {
            broadcast_name: broadcast_name.into(),
            candidates: CandidateList::new(),
        }
    }

    /// Offer a scan result.
    ///
    /// Capacity is checked first, then the name, then the identifier. A
    /// rejection leaves the list untouched.
    pub fn admit(&mut self, event: &DiscoveryEvent) -> AdmitDecision {
        if let Some(decision) = self.check(&event.identifier, event.display_name.as_deref()) {
            return decision;
        }

        let name = event.display_name.clone().unwrap_or_default();
        self.push(Beacon::new(event.identifier.clone(), name, event.signal_strength))
    }

    /// Offer an already-built beacon under the same rules as [`admit`](Self::admit)
    pub fn admit_beacon(&mut self, beacon: Beacon) -> AdmitDecision {
        if let Some(decision) = self.check(&beacon.identifier, Some(&beacon.display_name)) {
            return decision;
        }
        self.push(beacon)
    }

    fn check(&self, identifier: &DeviceId, display_name: Option<&str>) -> Option<AdmitDecision> {
        if self.candidates.is_full() {
            return Some(AdmitDecision::RejectedCapacityFull);
        }
        if display_name != Some(self.broadcast_name.as_str()) {
            return Some(AdmitDecision::RejectedNameMismatch);
        }
        if self.candidates.contains(identifier) {
            return Some(AdmitDecision::RejectedDuplicate);
        }
        None
    }

    fn push(&mut self, beacon: Beacon) -> AdmitDecision {
        debug!(
            "Admitted beacon {} at {} dBm ({} of {})",
            beacon.identifier,
            beacon.signal_strength,
            self.candidates.len() + 1,
            MAX_BEACONS
        );
        self.candidates.beacons.push(beacon);
        AdmitDecision::Accepted
    }

    pub fn candidates(&self) -> &CandidateList {
        &self.candidates
    }

    /// Hand the admitted beacons over, leaving the filter empty
    pub fn take_candidates(&mut self) -> CandidateList {
        std::mem::take(&mut self.candidates)
    }

    pub fn clear(&mut self) {
        self.candidates = CandidateList::new();
    }
}
