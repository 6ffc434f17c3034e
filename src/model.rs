use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MS_PER_SECOND: Ms = 1_000;
pub const MS_PER_MINUTE: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Three-way comparison where overlapping spans are `Equal`.
    ///
    /// This is not a strict weak order: `[1,3)` and `[4,6)` are both `Equal`
    /// to `[2,5)` while `[1,3) < [4,6)`. Never bisect or sort with it; use it
    /// only to test one pair of spans.
    pub fn compare(&self, other: &Span) -> Ordering {
        if self.end <= other.start {
            Ordering::Less
        } else if self.start >= other.end {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// Arena handle for a timeslot. Issued densely in creation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeslotId(pub u32);

/// Arena handle for a boat. Issued densely in creation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BoatId(pub u32);

impl TimeslotId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BoatId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TimeslotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BoatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timeslot-side half of an assignment: `(available, boat, booked)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoatSlot {
    pub available: u32,
    pub boat: BoatId,
    pub booked: u32,
}

impl BoatSlot {
    /// Sort key inside a timeslot ledger: remaining capacity, then boat id.
    pub fn key(&self) -> (u32, BoatId) {
        (self.available, self.boat)
    }
}

/// Boat-side half of an assignment. Carries a copy of the timeslot span so
/// the assignment list can be bisected without touching the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub timeslot: TimeslotId,
    pub span: Span,
    pub available: u32,
    pub booked: u32,
}

/// Flat event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TimeslotCreated {
        id: TimeslotId,
        span: Span,
    },
    BoatCreated {
        id: BoatId,
        capacity: u32,
        name: String,
    },
    BoatAssigned {
        timeslot_id: TimeslotId,
        boat_id: BoatId,
    },
    BookingPlaced {
        id: Ulid,
        timeslot_id: TimeslotId,
        boat_id: BoatId,
        size: u32,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeslotInfo {
    pub id: TimeslotId,
    /// Epoch seconds.
    pub start_time: i64,
    /// Minutes.
    pub duration: i64,
    /// Largest remaining capacity of any single assigned boat.
    pub availability: u32,
    pub customer_count: u32,
    pub boats: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoatInfo {
    pub id: BoatId,
    pub capacity: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingInfo {
    pub id: Ulid,
    pub timeslot_id: TimeslotId,
    pub size: u32,
}

/// Result of a booking request. Running out of room is an answer, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Booked(BookingInfo),
    NoRoom { timeslot_id: TimeslotId, size: u32 },
}
