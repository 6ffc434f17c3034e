use std::cmp::Ordering;
use std::ops::Range;

use crate::model::{Assignment, Ms, Span, TimeslotId};

/// One boat's assignments, ordered by timeslot start.
///
/// Spans have different lengths, so overlapping entries need not be
/// contiguous. Lookups bisect a candidate window using the start order and the
/// longest span seen, then keep only the entries that really overlap.
#[derive(Debug, Clone, Default)]
pub struct AssignmentIndex {
    entries: Vec<Assignment>,
    longest: Ms,
}

impl AssignmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Assignment] {
        &self.entries
    }

    pub fn get(&self, idx: usize) -> Option<&Assignment> {
        self.entries.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Assignment> {
        self.entries.get_mut(idx)
    }

    /// Insert `(timeslot, available, 0)` after every entry starting no later
    /// than `span`.
    pub fn record(&mut self, timeslot: TimeslotId, span: Span, available: u32) {
        let pos = self.entries.partition_point(|a| a.span.start <= span.start);
        self.longest = self.longest.max(span.duration_ms());
        self.entries.insert(
            pos,
            Assignment {
                timeslot,
                span,
                available,
                booked: 0,
            },
        );
    }

    /// Index range that holds every assignment overlapping `span`. Entries in
    /// it may still miss `span`; see [`AssignmentIndex::overlapping`].
    fn candidates(&self, span: &Span) -> Range<usize> {
        // Nothing starting at or before `span.start - longest` can reach it.
        let earliest = span.start.saturating_sub(self.longest);
        let lo = self.entries.partition_point(|a| a.span.start <= earliest);
        let hi = self.entries.partition_point(|a| a.span.start < span.end);
        lo..hi.max(lo)
    }

    /// Positions of the assignments whose span overlaps `span`, in start order.
    pub fn overlapping<'a>(&'a self, span: &'a Span) -> impl Iterator<Item = usize> + 'a {
        self.candidates(span)
            .filter(move |&i| self.entries[i].span.compare(span) == Ordering::Equal)
    }

    /// False if the boat already carries a booking in a timeslot overlapping `span`.
    pub fn is_available(&self, span: &Span) -> bool {
        self.overlapping(span).all(|i| self.entries[i].booked == 0)
    }
}
