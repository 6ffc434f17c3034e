use tracing::{error, info};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{BOATS, BOATS_WITHDRAWN_TOTAL, BOOKINGS_TOTAL, TIMESLOTS};

use super::{Engine, EngineError};

impl Engine {
    /// Create a timeslot starting at `start_secs` (epoch seconds) lasting
    /// `duration_minutes`.
    pub async fn create_timeslot(
        &self,
        start_secs: i64,
        duration_minutes: i64,
    ) -> Result<TimeslotInfo, EngineError> {
        if duration_minutes <= 0 {
            return Err(EngineError::InvalidSpan("duration must be positive"));
        }
        let start = start_secs
            .checked_mul(MS_PER_SECOND)
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
        let end = duration_minutes
            .checked_mul(MS_PER_MINUTE)
            .and_then(|d| start.checked_add(d))
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
        let span = Span { start, end };

        let mut ledger = self.ledger.write().await;
        let id = ledger.plan_timeslot(&span)?;
        self.wal_append(&Event::TimeslotCreated { id, span }).await?;
        ledger.create_timeslot(span)?;
        self.days.insert(id, &span);

        info!("timeslot {id} created: start {start_secs}s, {duration_minutes} min");
        metrics::gauge!(TIMESLOTS).set(ledger.timeslot_count() as f64);
        ledger.timeslot_info(id)
    }

    pub async fn create_boat(&self, capacity: u32, name: String) -> Result<BoatInfo, EngineError> {
        let mut ledger = self.ledger.write().await;
        let id = ledger.plan_boat(capacity, &name)?;
        self.wal_append(&Event::BoatCreated {
            id,
            capacity,
            name: name.clone(),
        })
        .await?;
        ledger.create_boat(capacity, name)?;

        info!("boat {id} created with capacity {capacity}");
        metrics::gauge!(BOATS).set(ledger.boat_count() as f64);
        ledger.boat_info(id)
    }

    /// Put a boat on a timeslot. The boat enters with its full capacity, or
    /// with zero if it is already booked in an overlapping timeslot.
    pub async fn assign_boat(&self, timeslot_id: TimeslotId, boat_id: BoatId) -> Result<(), EngineError> {
        let mut ledger = self.ledger.write().await;
        let plan = ledger.plan_assignment(timeslot_id, boat_id)?;
        self.wal_append(&Event::BoatAssigned {
            timeslot_id,
            boat_id,
        })
        .await?;
        ledger.commit_assignment(plan);

        info!(
            "boat {boat_id} assigned to timeslot {timeslot_id} with {} available",
            plan.available
        );
        Ok(())
    }

    /// Book `size` seats on the best-fitting boat of a timeslot. Running out
    /// of room is reported as [`BookingOutcome::NoRoom`].
    pub async fn book(&self, timeslot_id: TimeslotId, size: u32) -> Result<BookingOutcome, EngineError> {
        let mut ledger = self.ledger.write().await;
        let plan = match ledger.plan_booking(timeslot_id, size) {
            Ok(plan) => plan,
            Err(EngineError::NoCapacity { timeslot, size }) => {
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => "no_room").increment(1);
                info!("no room for {size} in timeslot {timeslot}");
                return Ok(BookingOutcome::NoRoom {
                    timeslot_id: timeslot,
                    size,
                });
            }
            Err(e) => {
                if let EngineError::Inconsistent(msg) = &e {
                    error!("booking {size} on timeslot {timeslot_id} aborted: {msg}");
                }
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => "error").increment(1);
                return Err(e);
            }
        };

        let id = Ulid::new();
        self.wal_append(&Event::BookingPlaced {
            id,
            timeslot_id,
            boat_id: plan.boat(),
            size,
        })
        .await?;
        let slot = ledger.commit_booking(&plan);

        let withdrawn = plan.withdrawn_from().count();
        info!(
            "booking {id}: {size} on timeslot {timeslot_id} boat {} ({} left, withdrawn from {withdrawn})",
            slot.boat, slot.available
        );
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => "booked").increment(1);
        metrics::counter!(BOATS_WITHDRAWN_TOTAL).increment(withdrawn as u64);

        Ok(BookingOutcome::Booked(BookingInfo {
            id,
            timeslot_id,
            size,
        }))
    }
}
