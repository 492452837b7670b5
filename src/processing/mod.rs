//! Discovery admission, per-beacon sessions and run sequencing

pub mod discovery;
pub mod sequencer;
pub mod session;

pub use discovery::{AdmitDecision, CandidateList, DiscoveryEvent, DiscoveryFilter};
pub use sequencer::{RangingOutcome, RangingRun, RangingSequencer, RunStatistics, SequencerPhase};
pub use session::{BeaconSession, SessionOutcome};
