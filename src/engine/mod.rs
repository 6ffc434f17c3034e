mod assignments;
mod boat_ledger;
mod calendar;
mod error;
mod ledger;
mod mutations;
mod queries;

pub use assignments::AssignmentIndex;
pub use boat_ledger::BoatLedger;
pub use calendar::{days_touched, DayIndex};
pub use error::EngineError;
pub use ledger::{AssignPlan, Boat, BookingPlan, Ledger, Timeslot};

use std::io;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) struct WalAppend {
    event: Event,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first append arrives.
/// 2. Drain all immediately available appends (the batch window).
/// 3. Single flush_sync for the whole batch.
/// 4. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalAppend>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);
    }
    info!("WAL writer for {} stopped after {} appends", wal.path().display(), wal.appended());
}

fn flush_batch(wal: &mut Wal, batch: &[WalAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for append in batch {
        if let Err(e) = wal.append_buffered(&append.event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes don't leak
    // into the next batch; callers were told this batch failed.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: Vec<WalAppend>, result: &io::Result<()>) {
    for append in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = append.response.send(r);
    }
}

/// The allocation engine. One write lock serializes every mutation, so both
/// halves of an assignment always change together from a reader's view.
pub struct Engine {
    pub(super) ledger: RwLock<Ledger>,
    /// Day buckets, readable without the ledger lock. A timeslot is only
    /// published here after it exists in the ledger.
    pub(super) days: DayIndex,
    pub(super) wal_tx: mpsc::Sender<WalAppend>,
}

/// Apply a logged event to a ledger. Replays through the same plan/commit
/// path as live requests, so ids and best-fit choices come out identical.
fn apply_event(ledger: &mut Ledger, days: &DayIndex, event: &Event) -> Result<(), EngineError> {
    match event {
        Event::TimeslotCreated { id, span } => {
            let expected = ledger.next_timeslot_id();
            if expected != *id {
                return Err(EngineError::Inconsistent(format!(
                    "replay: timeslot {id} logged where {expected} was due"
                )));
            }
            ledger.create_timeslot(*span)?;
            days.insert(*id, span);
        }
        Event::BoatCreated { id, capacity, name } => {
            let expected = ledger.next_boat_id();
            if expected != *id {
                return Err(EngineError::Inconsistent(format!(
                    "replay: boat {id} logged where {expected} was due"
                )));
            }
            ledger.create_boat(*capacity, name.clone())?;
        }
        Event::BoatAssigned {
            timeslot_id,
            boat_id,
        } => {
            ledger.assign(*timeslot_id, *boat_id)?;
        }
        Event::BookingPlaced {
            id,
            timeslot_id,
            boat_id,
            size,
        } => {
            let plan = ledger.plan_booking(*timeslot_id, *size)?;
            if plan.boat() != *boat_id {
                return Err(EngineError::Inconsistent(format!(
                    "replay: booking {id} went to boat {boat_id} but best fit is now {}",
                    plan.boat()
                )));
            }
            ledger.commit_booking(&plan);
        }
    }
    Ok(())
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;

        let mut ledger = Ledger::new();
        let days = DayIndex::new();
        for (n, event) in events.iter().enumerate() {
            apply_event(&mut ledger, &days, event).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: event {n}: {e}", wal_path.display()),
                )
            })?;
        }
        ledger
            .verify()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        if !events.is_empty() {
            info!(
                "replayed {} events from {}: {} timeslots over {} days, {} boats",
                events.len(),
                wal_path.display(),
                ledger.timeslot_count(),
                days.day_count(),
                ledger.boat_count()
            );
        }
        metrics::gauge!(crate::observability::TIMESLOTS).set(ledger.timeslot_count() as f64);
        metrics::gauge!(crate::observability::BOATS).set(ledger.boat_count() as f64);

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            ledger: RwLock::new(ledger),
            days,
            wal_tx,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalAppend {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Check every cross-ledger invariant under a read lock.
    pub async fn verify(&self) -> Result<(), EngineError> {
        let ledger = self.ledger.read().await;
        ledger.verify().inspect_err(|e| warn!("ledger verification failed: {e}"))
    }
}
