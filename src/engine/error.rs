use crate::model::{BoatId, TimeslotId};

#[derive(Debug)]
pub enum EngineError {
    TimeslotNotFound(TimeslotId),
    BoatNotFound(BoatId),
    AlreadyAssigned {
        timeslot: TimeslotId,
        boat: BoatId,
    },
    /// No assigned boat has `available >= size`.
    NoCapacity {
        timeslot: TimeslotId,
        size: u32,
    },
    InvalidSize(u32),
    InvalidCapacity(u32),
    InvalidSpan(&'static str),
    LimitExceeded(&'static str),
    /// The timeslot and boat ledgers disagree. Never caused by user input.
    Inconsistent(String),
    WalError(String),
}

impl EngineError {
    /// True for faults that indicate a bug rather than a bad request.
    pub fn is_internal(&self) -> bool {
        matches!(self, EngineError::Inconsistent(_) | EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::TimeslotNotFound(id) => write!(f, "timeslot not found: {id}"),
            EngineError::BoatNotFound(id) => write!(f, "boat not found: {id}"),
            EngineError::AlreadyAssigned { timeslot, boat } => {
                write!(f, "boat {boat} already assigned to timeslot {timeslot}")
            }
            EngineError::NoCapacity { timeslot, size } => {
                write!(f, "no room for {size} in timeslot {timeslot}")
            }
            EngineError::InvalidSize(size) => write!(f, "booking size must be positive, got {size}"),
            EngineError::InvalidCapacity(cap) => {
                write!(f, "boat capacity must be positive, got {cap}")
            }
            EngineError::InvalidSpan(msg) => write!(f, "invalid timeslot: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Inconsistent(msg) => write!(f, "ledger inconsistency: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
