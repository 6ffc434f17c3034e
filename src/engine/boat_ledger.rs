use crate::model::{BoatId, BoatSlot};

/// The boats assigned to one timeslot, sorted ascending by
/// `(available, boat)`. The smallest boat that still fits a request is the
/// left-most entry with enough room.
#[derive(Debug, Clone, Default)]
pub struct BoatLedger {
    slots: Vec<BoatSlot>,
}

impl BoatLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[BoatSlot] {
        &self.slots
    }

    pub fn get(&self, idx: usize) -> Option<&BoatSlot> {
        self.slots.get(idx)
    }

    pub fn contains_boat(&self, boat: BoatId) -> bool {
        self.slots.iter().any(|s| s.boat == boat)
    }

    /// Insert maintaining sort order; lands after any entry with an equal key.
    pub fn insert(&mut self, slot: BoatSlot) {
        let key = slot.key();
        let pos = self.slots.partition_point(|s| s.key() <= key);
        self.slots.insert(pos, slot);
    }

    pub fn remove(&mut self, idx: usize) -> BoatSlot {
        self.slots.remove(idx)
    }

    /// Index of the left-most slot with `available >= size`, if any.
    pub fn best_fit(&self, size: u32) -> Option<usize> {
        let idx = self.slots.partition_point(|s| s.available < size);
        (idx < self.slots.len()).then_some(idx)
    }

    /// Find `boat` among the slots currently offering exactly `available`.
    pub fn position_of(&self, boat: BoatId, available: u32) -> Option<usize> {
        let lo = self.slots.partition_point(|s| s.available < available);
        let hi = self.slots.partition_point(|s| s.available <= available);
        (lo..hi).find(|&i| self.slots[i].boat == boat)
    }

    /// Replace the slot at `idx` with `(0, boat, 0)`: the boat stays listed
    /// here but is committed to an overlapping timeslot.
    pub fn mark_busy_at(&mut self, idx: usize) -> BoatSlot {
        let previous = self.slots.remove(idx);
        self.insert(BoatSlot {
            available: 0,
            boat: previous.boat,
            booked: 0,
        });
        previous
    }

    /// Largest single remaining capacity. A booking must fit one boat, so
    /// this is a maximum, not a sum.
    pub fn availability(&self) -> u32 {
        self.slots.last().map_or(0, |s| s.available)
    }

    pub fn customer_count(&self) -> u32 {
        self.slots.iter().map(|s| s.booked).sum()
    }

    pub fn boats(&self) -> impl Iterator<Item = BoatId> + '_ {
        self.slots.iter().map(|s| s.boat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(available: u32, boat: u32, booked: u32) -> BoatSlot {
        BoatSlot {
            available,
            boat: BoatId(boat),
            booked,
        }
    }

    fn ledger(slots: &[BoatSlot]) -> BoatLedger {
        let mut l = BoatLedger::new();
        for s in slots {
            l.insert(*s);
        }
        l
    }

    #[test]
    fn insert_keeps_ascending_available() {
        let l = ledger(&[slot(8, 0, 0), slot(4, 1, 0), slot(6, 2, 0)]);
        let avail: Vec<u32> = l.slots().iter().map(|s| s.available).collect();
        assert_eq!(avail, vec![4, 6, 8]);
    }

    #[test]
    fn ties_broken_by_boat_id() {
        let l = ledger(&[slot(4, 5, 0), slot(4, 2, 0), slot(4, 9, 0)]);
        let boats: Vec<BoatId> = l.boats().collect();
        assert_eq!(boats, vec![BoatId(2), BoatId(5), BoatId(9)]);
    }

    #[test]
    fn best_fit_picks_smallest_sufficient() {
        let l = ledger(&[slot(8, 0, 0), slot(4, 1, 0)]);
        let idx = l.best_fit(6).unwrap();
        assert_eq!(l.get(idx).unwrap().boat, BoatId(0));
        let idx = l.best_fit(4).unwrap();
        assert_eq!(l.get(idx).unwrap().boat, BoatId(1));
        let idx = l.best_fit(1).unwrap();
        assert_eq!(l.get(idx).unwrap().boat, BoatId(1));
    }

    #[test]
    fn best_fit_none_when_too_large() {
        let l = ledger(&[slot(8, 0, 0), slot(4, 1, 0)]);
        assert!(l.best_fit(9).is_none());
        assert!(BoatLedger::new().best_fit(1).is_none());
    }

    #[test]
    fn best_fit_skips_busy_boats() {
        let l = ledger(&[slot(0, 0, 0), slot(0, 1, 3), slot(5, 2, 0)]);
        let idx = l.best_fit(1).unwrap();
        assert_eq!(l.get(idx).unwrap().boat, BoatId(2));
    }

    #[test]
    fn position_of_scans_equal_band() {
        let l = ledger(&[slot(4, 1, 0), slot(4, 3, 0), slot(4, 7, 0), slot(8, 3, 0)]);
        let idx = l.position_of(BoatId(7), 4).unwrap();
        assert_eq!(l.get(idx).unwrap().boat, BoatId(7));
        assert!(l.position_of(BoatId(7), 8).is_none());
        assert!(l.position_of(BoatId(2), 4).is_none());
    }

    #[test]
    fn mark_busy_moves_to_front() {
        let mut l = ledger(&[slot(4, 1, 0), slot(8, 2, 0)]);
        let idx = l.position_of(BoatId(2), 8).unwrap();
        let previous = l.mark_busy_at(idx);
        assert_eq!(previous, slot(8, 2, 0));
        assert_eq!(l.slots(), &[slot(0, 2, 0), slot(4, 1, 0)]);
        assert!(l.contains_boat(BoatId(2)));
    }

    #[test]
    fn availability_is_max_not_sum() {
        let l = ledger(&[slot(2, 0, 6), slot(4, 1, 0)]);
        assert_eq!(l.availability(), 4);
        assert_eq!(l.customer_count(), 6);
    }

    #[test]
    fn empty_ledger_reports_zero() {
        let l = BoatLedger::new();
        assert_eq!(l.availability(), 0);
        assert_eq!(l.customer_count(), 0);
        assert!(l.is_empty());
    }
}
