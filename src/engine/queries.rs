use chrono::NaiveDate;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn timeslot(&self, id: TimeslotId) -> Result<TimeslotInfo, EngineError> {
        self.ledger.read().await.timeslot_info(id)
    }

    /// Timeslots touching the UTC calendar day `date`, ascending by id.
    /// Day buckets are read before the ledger lock is taken; any id found
    /// there already exists in the ledger.
    pub async fn timeslots_on(&self, date: NaiveDate) -> Result<Vec<TimeslotInfo>, EngineError> {
        let ids = self.days.on(date);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ledger = self.ledger.read().await;
        ids.into_iter().map(|id| ledger.timeslot_info(id)).collect()
    }

    pub async fn boat(&self, id: BoatId) -> Result<BoatInfo, EngineError> {
        self.ledger.read().await.boat_info(id)
    }

    pub async fn list_boats(&self) -> Vec<BoatInfo> {
        self.ledger
            .read()
            .await
            .boats()
            .map(|b| BoatInfo {
                id: b.id,
                capacity: b.capacity,
                name: b.name.clone(),
            })
            .collect()
    }

    pub async fn timeslot_count(&self) -> usize {
        self.ledger.read().await.timeslot_count()
    }

    pub async fn boat_count(&self) -> usize {
        self.ledger.read().await.boat_count()
    }
}
