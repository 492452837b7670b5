//! Sequential ranging over the admitted candidates
//!
//! Only one beacon session is ever in flight: the next candidate is started
//! when the previous one reaches `Complete` or `Failed`. When the last one
//! finishes, the completed beacons (in discovery order) are trilaterated.

use crate::algorithms::Trilaterator;
use crate::api::types::{ApiResult, RangingError, RangingNotice};
use crate::core::{Beacon, PositionEstimate, RangePoint, MAX_BEACONS, MIN_TRILATERATION_BEACONS};
use crate::hardware::{GattTransport, TransportEvent};
use crate::processing::discovery::CandidateList;
use crate::processing::session::{BeaconSession, SessionOutcome};
use crate::utils::RangingConfig;
use log::{debug, info, warn};
use std::time::Instant;

/// Where the sequencer is in its scan-to-position cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerPhase {
    NotStarted,
    Ranging { index: usize },
    Done,
}

/// One scan-to-position cycle
#[derive(Debug)]
pub struct RangingRun {
    sessions: Vec<BeaconSession>,
    index: usize,
    usable: usize,
}

impl RangingRun {
    pub fn new(candidates: CandidateList) -> Self {
        let sessions: Vec<BeaconSession> = candidates.into_beacons().into_iter().map(BeaconSession::new).collect();
        let usable = sessions.len().min(MAX_BEACONS);
        Self {
            sessions,
            index: 0,
            usable,
        }
    }

    /// Index of the beacon currently being ranged
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of beacons this run will range
    pub fn usable(&self) -> usize {
        self.usable
    }

    pub fn active_session(&self) -> Option<&BeaconSession> {
        self.sessions.get(self.index).filter(|_| self.index < self.usable)
    }

    fn active_session_mut(&mut self) -> Option<&mut BeaconSession> {
        if self.index < self.usable {
            self.sessions.get_mut(self.index)
        } else {
            None
        }
    }

    pub fn beacons(&self) -> Vec<Beacon> {
        self.sessions.iter().map(|s| s.beacon().clone()).collect()
    }
}

/// Final result of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RangingOutcome {
    pub beacons: Vec<Beacon>,
    pub position: Result<PositionEstimate, RangingError>,
}

/// Counters across runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatistics {
    pub runs_started: u32,
    pub runs_finished: u32,
    pub beacons_completed: u32,
    pub beacons_failed: u32,
    pub solve_attempts: u32,
    pub positions_estimated: u32,
}

pub struct RangingSequencer {
    config: RangingConfig,
    trilaterator: Trilaterator,
    phase: SequencerPhase,
    run: Option<RangingRun>,
    last_outcome: Option<RangingOutcome>,
    stats: RunStatistics,
}

impl RangingSequencer {
    pub fn new(config: RangingConfig) -> Self {
        Self {
            trilaterator: config.trilaterator(),
            config,
            phase: SequencerPhase::NotStarted,
            run: None,
            last_outcome: None,
            stats: RunStatistics::default(),
        }
    }

    pub fn phase(&self) -> SequencerPhase {
        self.phase
    }

    pub fn is_ranging(&self) -> bool {
        matches!(self.phase, SequencerPhase::Ranging { .. })
    }

    pub fn run(&self) -> Option<&RangingRun> {
        self.run.as_ref()
    }

    pub fn last_outcome(&self) -> Option<&RangingOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn statistics(&self) -> &RunStatistics {
        &self.stats
    }

    /// Start ranging the candidates. Returns immediately; progress arrives
    /// through [`handle_event`](Self::handle_event) and
    /// [`poll_timeouts`](Self::poll_timeouts).
    pub fn begin(
        &mut self,
        candidates: CandidateList,
        transport: &mut dyn GattTransport,
        now: Instant,
    ) -> ApiResult<Vec<RangingNotice>> {
        if self.is_ranging() {
            return Err(RangingError::RunInProgress);
        }

        let run = RangingRun::new(candidates);
        info!("Ranging {} beacon(s)", run.usable);
        self.stats.runs_started += 1;
        self.last_outcome = None;
        self.run = Some(run);

        let mut notices = Vec::new();
        self.drive(None, transport, now, &mut notices);
        Ok(notices)
    }

    /// Route a transport event to the active session
    pub fn handle_event(
        &mut self,
        event: &TransportEvent,
        transport: &mut dyn GattTransport,
        now: Instant,
    ) -> Vec<RangingNotice> {
        let mut notices = Vec::new();
        let outcome = match self.run.as_mut().and_then(RangingRun::active_session_mut) {
            Some(session) if session.handle() == Some(event.session()) => {
                session.handle_event(event, transport, &self.config, now)
            }
            _ => {
                debug!("Dropping stale transport event {:?}", event);
                None
            }
        };

        if outcome.is_some() {
            self.drive(outcome, transport, now, &mut notices);
        }
        notices
    }

    /// Expire the active session if it has waited too long
    pub fn poll_timeouts(&mut self, transport: &mut dyn GattTransport, now: Instant) -> Vec<RangingNotice> {
        let mut notices = Vec::new();
        let outcome = self
            .run
            .as_mut()
            .and_then(RangingRun::active_session_mut)
            .and_then(|session| session.poll_timeout(transport, now));

        if outcome.is_some() {
            self.drive(outcome, transport, now, &mut notices);
        }
        notices
    }

    /// Abandon the run, releasing the active beacon's connection
    pub fn cancel(&mut self, transport: &mut dyn GattTransport) -> Vec<RangingNotice> {
        let mut notices = Vec::new();
        if let Some(session) = self.run.as_mut().and_then(RangingRun::active_session_mut) {
            if session.abort(transport).is_some() {
                notices.push(RangingNotice::BeaconRangingComplete(session.beacon().clone()));
            }
        }
        if self.run.take().is_some() {
            info!("Ranging run cancelled");
            self.phase = SequencerPhase::NotStarted;
        }
        notices
    }

    /// Record a finished session, then start candidates until one is left
    /// waiting on the transport or the run is exhausted
    fn drive(
        &mut self,
        mut outcome: Option<SessionOutcome>,
        transport: &mut dyn GattTransport,
        now: Instant,
        notices: &mut Vec<RangingNotice>,
    ) {
        loop {
            let run = match self.run.as_mut() {
                Some(run) => run,
                None => return,
            };

            if let Some(finished) = outcome.take() {
                let beacon = run.sessions[run.index].beacon().clone();
                match finished {
                    SessionOutcome::Complete => self.stats.beacons_completed += 1,
                    SessionOutcome::Failed(_) => self.stats.beacons_failed += 1,
                }
                info!(
                    "Beacon {} finished {} ({}/{})",
                    beacon.identifier,
                    beacon.session_state,
                    run.index + 1,
                    run.usable
                );
                notices.push(RangingNotice::BeaconRangingComplete(beacon));
                run.index += 1;
            }

            if run.index >= run.usable {
                self.finish(notices);
                return;
            }

            let index = run.index;
            self.phase = SequencerPhase::Ranging { index };
            debug!("Asking beacon {} for data", run.sessions[index].beacon().identifier);
            outcome = run.sessions[index].start(transport, &self.config, now);
            if outcome.is_none() {
                return;
            }
        }
    }

    fn finish(&mut self, notices: &mut Vec<RangingNotice>) {
        let run = match self.run.take() {
            Some(run) => run,
            None => return,
        };
        self.phase = SequencerPhase::Done;
        self.stats.runs_finished += 1;

        let beacons: Vec<Beacon> = run.sessions.into_iter().map(BeaconSession::into_beacon).collect();
        let points: Vec<RangePoint> = beacons
            .iter()
            .filter(|b| b.is_complete())
            .filter_map(Beacon::range_point)
            .collect();

        let position = match self.trilaterator.solve_slice(&points) {
            Some(solved) => {
                self.stats.solve_attempts += 1;
                solved.map_err(RangingError::from)
            }
            None => Err(RangingError::InsufficientBeacons {
                available: points.len(),
                required: MIN_TRILATERATION_BEACONS,
            }),
        };

        match &position {
            Ok(estimate) => {
                self.stats.positions_estimated += 1;
                info!("Central at {:.2}, {:.2}", estimate.x, estimate.y);
                notices.push(RangingNotice::PositionEstimated(*estimate));
            }
            Err(e) => {
                warn!("Position unavailable: {}", e);
                notices.push(RangingNotice::PositionUnavailable(e.clone()));
            }
        }

        self.last_outcome = Some(RangingOutcome { beacons, position });
    }
}
