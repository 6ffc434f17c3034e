use tracing::debug;

use crate::limits::*;
use crate::model::*;

use super::assignments::AssignmentIndex;
use super::boat_ledger::BoatLedger;
use super::EngineError;

#[derive(Debug, Clone)]
pub struct Timeslot {
    pub id: TimeslotId,
    pub span: Span,
    pub boats: BoatLedger,
}

#[derive(Debug, Clone)]
pub struct Boat {
    pub id: BoatId,
    pub capacity: u32,
    pub name: String,
    pub assignments: AssignmentIndex,
}

/// A validated assignment, ready to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignPlan {
    pub timeslot: TimeslotId,
    pub boat: BoatId,
    pub available: u32,
}

/// A validated booking. Every index in here was resolved against the ledger
/// the plan was made from; it must be committed before anything else mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPlan {
    pub timeslot: TimeslotId,
    pub size: u32,
    pub chosen: BoatSlot,
    slot_idx: usize,
    own: usize,
    busy: Vec<BusyTarget>,
}

impl BookingPlan {
    pub fn boat(&self) -> BoatId {
        self.chosen.boat
    }

    /// Timeslots that lose this boat because they overlap the booked one.
    pub fn withdrawn_from(&self) -> impl Iterator<Item = TimeslotId> + '_ {
        self.busy.iter().map(|b| b.timeslot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BusyTarget {
    /// Position in the boat's assignment index.
    assignment: usize,
    timeslot: TimeslotId,
    /// Position in the other timeslot's boat ledger.
    slot_idx: usize,
}

/// Arena of timeslots and boats. Handles are dense indices.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    timeslots: Vec<Timeslot>,
    boats: Vec<Boat>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeslot_count(&self) -> usize {
        self.timeslots.len()
    }

    pub fn boat_count(&self) -> usize {
        self.boats.len()
    }

    pub fn next_timeslot_id(&self) -> TimeslotId {
        TimeslotId(self.timeslots.len() as u32)
    }

    pub fn next_boat_id(&self) -> BoatId {
        BoatId(self.boats.len() as u32)
    }

    pub fn timeslot(&self, id: TimeslotId) -> Result<&Timeslot, EngineError> {
        self.timeslots
            .get(id.index())
            .ok_or(EngineError::TimeslotNotFound(id))
    }

    pub fn boat(&self, id: BoatId) -> Result<&Boat, EngineError> {
        self.boats.get(id.index()).ok_or(EngineError::BoatNotFound(id))
    }

    pub fn boats(&self) -> impl Iterator<Item = &Boat> {
        self.boats.iter()
    }

    // ── Creation ─────────────────────────────────────────────

    fn validate_span(span: &Span) -> Result<(), EngineError> {
        if span.end <= span.start {
            return Err(EngineError::InvalidSpan("duration must be positive"));
        }
        if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
        if span.duration_ms() > MAX_TIMESLOT_DURATION_MS {
            return Err(EngineError::LimitExceeded("timeslot too long"));
        }
        Ok(())
    }

    /// Validate a new timeslot and return the id it would get.
    pub fn plan_timeslot(&self, span: &Span) -> Result<TimeslotId, EngineError> {
        Self::validate_span(span)?;
        if self.timeslots.len() >= MAX_TIMESLOTS {
            return Err(EngineError::LimitExceeded("too many timeslots"));
        }
        Ok(self.next_timeslot_id())
    }

    pub fn create_timeslot(&mut self, span: Span) -> Result<TimeslotId, EngineError> {
        let id = self.plan_timeslot(&span)?;
        self.timeslots.push(Timeslot {
            id,
            span,
            boats: BoatLedger::new(),
        });
        Ok(id)
    }

    fn validate_boat(capacity: u32, name: &str) -> Result<(), EngineError> {
        if capacity == 0 {
            return Err(EngineError::InvalidCapacity(capacity));
        }
        if capacity > MAX_BOAT_CAPACITY {
            return Err(EngineError::LimitExceeded("boat capacity too large"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("boat name too long"));
        }
        Ok(())
    }

    pub fn plan_boat(&self, capacity: u32, name: &str) -> Result<BoatId, EngineError> {
        Self::validate_boat(capacity, name)?;
        if self.boats.len() >= MAX_BOATS {
            return Err(EngineError::LimitExceeded("too many boats"));
        }
        Ok(self.next_boat_id())
    }

    pub fn create_boat(&mut self, capacity: u32, name: String) -> Result<BoatId, EngineError> {
        let id = self.plan_boat(capacity, &name)?;
        self.boats.push(Boat {
            id,
            capacity,
            name,
            assignments: AssignmentIndex::new(),
        });
        Ok(id)
    }

    // ── Assignment ───────────────────────────────────────────

    /// A boat starts out at full capacity in a new timeslot, or at zero if it
    /// is already booked in a timeslot overlapping it.
    pub fn plan_assignment(
        &self,
        timeslot: TimeslotId,
        boat: BoatId,
    ) -> Result<AssignPlan, EngineError> {
        let ts = self.timeslot(timeslot)?;
        let b = self.boat(boat)?;
        if ts.boats.contains_boat(boat) {
            return Err(EngineError::AlreadyAssigned { timeslot, boat });
        }
        if ts.boats.len() >= MAX_BOATS_PER_TIMESLOT {
            return Err(EngineError::LimitExceeded("too many boats on timeslot"));
        }
        if b.assignments.len() >= MAX_ASSIGNMENTS_PER_BOAT {
            return Err(EngineError::LimitExceeded("too many assignments on boat"));
        }
        let available = if b.assignments.is_available(&ts.span) {
            b.capacity
        } else {
            0
        };
        Ok(AssignPlan {
            timeslot,
            boat,
            available,
        })
    }

    pub fn commit_assignment(&mut self, plan: AssignPlan) {
        let ts = &mut self.timeslots[plan.timeslot.index()];
        ts.boats.insert(BoatSlot {
            available: plan.available,
            boat: plan.boat,
            booked: 0,
        });
        let span = ts.span;
        self.boats[plan.boat.index()]
            .assignments
            .record(plan.timeslot, span, plan.available);
    }

    pub fn assign(&mut self, timeslot: TimeslotId, boat: BoatId) -> Result<u32, EngineError> {
        let plan = self.plan_assignment(timeslot, boat)?;
        self.commit_assignment(plan);
        Ok(plan.available)
    }

    // ── Booking ──────────────────────────────────────────────

    /// Choose the best-fit boat and resolve every ledger position the booking
    /// will touch. Fails without side effects.
    pub fn plan_booking(
        &self,
        timeslot: TimeslotId,
        size: u32,
    ) -> Result<BookingPlan, EngineError> {
        if size == 0 {
            return Err(EngineError::InvalidSize(size));
        }
        let ts = self.timeslot(timeslot)?;
        let slot_idx = ts
            .boats
            .best_fit(size)
            .ok_or(EngineError::NoCapacity { timeslot, size })?;
        let chosen = ts.boats.slots()[slot_idx];
        let boat = self.boat(chosen.boat).map_err(|_| {
            EngineError::Inconsistent(format!(
                "timeslot {timeslot} lists unknown boat {}",
                chosen.boat
            ))
        })?;

        debug!("book {size} on timeslot {timeslot}: boat {}", boat.id);

        let mut own = None;
        let mut busy: Vec<BusyTarget> = Vec::new();
        for j in boat.assignments.overlapping(&ts.span) {
            let a = &boat.assignments.entries()[j];
            if a.timeslot == timeslot {
                if a.available != chosen.available || a.booked != chosen.booked {
                    return Err(EngineError::Inconsistent(format!(
                        "boat {} disagrees with timeslot {timeslot}: ({}, {}) vs ({}, {})",
                        boat.id, a.available, a.booked, chosen.available, chosen.booked
                    )));
                }
                own = Some(j);
                continue;
            }
            if a.booked > 0 {
                return Err(EngineError::Inconsistent(format!(
                    "boat {} booked in overlapping timeslots {} and {timeslot}",
                    boat.id, a.timeslot
                )));
            }
            if busy.iter().any(|t| t.timeslot == a.timeslot) {
                return Err(EngineError::Inconsistent(format!(
                    "boat {} assigned twice to timeslot {}",
                    boat.id, a.timeslot
                )));
            }
            let other = self.timeslot(a.timeslot).map_err(|_| {
                EngineError::Inconsistent(format!(
                    "boat {} references unknown timeslot {}",
                    boat.id, a.timeslot
                ))
            })?;
            let other_idx = other.boats.position_of(boat.id, a.available).ok_or_else(|| {
                EngineError::Inconsistent(format!(
                    "timeslot {} never heard of boat {} with {} available",
                    a.timeslot, boat.id, a.available
                ))
            })?;
            busy.push(BusyTarget {
                assignment: j,
                timeslot: a.timeslot,
                slot_idx: other_idx,
            });
        }

        let own = own.ok_or_else(|| {
            EngineError::Inconsistent(format!(
                "boat {} has no assignment for timeslot {timeslot}",
                boat.id
            ))
        })?;

        Ok(BookingPlan {
            timeslot,
            size,
            chosen,
            slot_idx,
            own,
            busy,
        })
    }

    /// Apply a plan from [`Ledger::plan_booking`]. Returns the updated slot.
    pub fn commit_booking(&mut self, plan: &BookingPlan) -> BoatSlot {
        let booked = BoatSlot {
            available: plan.chosen.available - plan.size,
            boat: plan.chosen.boat,
            booked: plan.chosen.booked + plan.size,
        };
        let ts = &mut self.timeslots[plan.timeslot.index()];
        ts.boats.remove(plan.slot_idx);
        ts.boats.insert(booked);

        for target in &plan.busy {
            let previous = self.timeslots[target.timeslot.index()]
                .boats
                .mark_busy_at(target.slot_idx);
            debug!(
                "boat {} withdrawn from timeslot {} (had {} available)",
                plan.chosen.boat, target.timeslot, previous.available
            );
        }

        let assignments = &mut self.boats[plan.chosen.boat.index()].assignments;
        if let Some(own) = assignments.get_mut(plan.own) {
            own.available = booked.available;
            own.booked = booked.booked;
        }
        for target in &plan.busy {
            if let Some(other) = assignments.get_mut(target.assignment) {
                other.available = 0;
            }
        }
        booked
    }

    pub fn book(&mut self, timeslot: TimeslotId, size: u32) -> Result<BoatSlot, EngineError> {
        let plan = self.plan_booking(timeslot, size)?;
        Ok(self.commit_booking(&plan))
    }

    // ── Views ────────────────────────────────────────────────

    pub fn timeslot_info(&self, id: TimeslotId) -> Result<TimeslotInfo, EngineError> {
        let ts = self.timeslot(id)?;
        let boats = ts
            .boats
            .boats()
            .map(|b| self.boat(b).map(|boat| boat.name.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TimeslotInfo {
            id,
            start_time: ts.span.start.div_euclid(MS_PER_SECOND),
            duration: ts.span.duration_ms() / MS_PER_MINUTE,
            availability: ts.boats.availability(),
            customer_count: ts.boats.customer_count(),
            boats,
        })
    }

    pub fn boat_info(&self, id: BoatId) -> Result<BoatInfo, EngineError> {
        let b = self.boat(id)?;
        Ok(BoatInfo {
            id,
            capacity: b.capacity,
            name: b.name.clone(),
        })
    }

    /// Check every cross-ledger invariant. O(assignments²) per boat.
    pub fn verify(&self) -> Result<(), EngineError> {
        let fault = |msg: String| Err(EngineError::Inconsistent(msg));

        let mut mirrored = vec![0usize; self.boats.len()];
        for ts in &self.timeslots {
            let slots = ts.boats.slots();
            if slots.windows(2).any(|w| w[0].key() > w[1].key()) {
                return fault(format!("timeslot {} ledger out of order", ts.id));
            }
            for slot in slots {
                let boat = self.boat(slot.boat)?;
                mirrored[slot.boat.index()] += 1;
                if slot.available + slot.booked > boat.capacity {
                    return fault(format!(
                        "boat {} over capacity in timeslot {}",
                        boat.id, ts.id
                    ));
                }
                let matches: Vec<&Assignment> = boat
                    .assignments
                    .entries()
                    .iter()
                    .filter(|a| a.timeslot == ts.id)
                    .collect();
                match matches.as_slice() {
                    [a] if a.available == slot.available && a.booked == slot.booked => {}
                    _ => {
                        return fault(format!(
                            "boat {} and timeslot {} disagree",
                            boat.id, ts.id
                        ));
                    }
                }
            }
        }

        for boat in &self.boats {
            let entries = boat.assignments.entries();
            if entries.len() != mirrored[boat.id.index()] {
                return fault(format!("boat {} has unmirrored assignments", boat.id));
            }
            for (i, a) in entries.iter().enumerate() {
                for b in &entries[i + 1..] {
                    if a.span.overlaps(&b.span) && a.booked > 0 && b.booked > 0 {
                        return fault(format!(
                            "boat {} booked in overlapping timeslots {} and {}",
                            boat.id, a.timeslot, b.timeslot
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
