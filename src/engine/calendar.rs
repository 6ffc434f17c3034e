use std::collections::BTreeSet;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use dashmap::DashMap;

use crate::model::{Ms, Span, TimeslotId};

/// UTC calendar date containing the instant `ms`.
pub fn date_of(ms: Ms) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}

/// Every UTC calendar day touched by `span`. The day `span.end` falls on is
/// included unless `span.end` is exactly midnight.
pub fn days_touched(span: &Span) -> Vec<NaiveDate> {
    let (Some(first), Some(end)) = (
        date_of(span.start),
        DateTime::<Utc>::from_timestamp_millis(span.end),
    ) else {
        return Vec::new();
    };
    let end_date = end.date_naive();
    let last_exclusive = if end.time() == NaiveTime::MIN {
        end_date
    } else {
        end_date + Days::new(1)
    };

    let mut days = Vec::new();
    let mut day = first;
    while day < last_exclusive {
        days.push(day);
        day = day + Days::new(1);
    }
    days
}

/// Day-bucketed lookup of timeslots. Insert-only; readable without the
/// ledger lock.
#[derive(Debug, Default)]
pub struct DayIndex {
    by_date: DashMap<NaiveDate, BTreeSet<TimeslotId>>,
}

impl DayIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: TimeslotId, span: &Span) {
        for day in days_touched(span) {
            self.by_date.entry(day).or_default().insert(id);
        }
    }

    /// Timeslots touching `date`, ascending by id.
    pub fn on(&self, date: NaiveDate) -> Vec<TimeslotId> {
        self.by_date
            .get(&date)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Distinct days holding at least one timeslot.
    pub fn day_count(&self) -> usize {
        self.by_date.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, hour: u32) -> Ms {
        ymd(y, m, d)
            .and_hms_opt(hour, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    #[test]
    fn same_day_span() {
        let span = Span::new(at(2014, 7, 22, 13), at(2014, 7, 22, 15));
        assert_eq!(days_touched(&span), vec![ymd(2014, 7, 22)]);
    }

    #[test]
    fn span_across_midnight_touches_both_days() {
        let span = Span::new(at(2014, 7, 22, 23), at(2014, 7, 22, 23) + 2 * H);
        assert_eq!(days_touched(&span), vec![ymd(2014, 7, 22), ymd(2014, 7, 23)]);
    }

    #[test]
    fn span_ending_at_midnight_excludes_next_day() {
        let span = Span::new(at(2014, 7, 22, 22), at(2014, 7, 23, 0));
        assert_eq!(days_touched(&span), vec![ymd(2014, 7, 22)]);
    }

    #[test]
    fn multi_day_span() {
        let span = Span::new(at(2014, 7, 22, 12), at(2014, 7, 24, 1));
        assert_eq!(
            days_touched(&span),
            vec![ymd(2014, 7, 22), ymd(2014, 7, 23), ymd(2014, 7, 24)]
        );
    }

    #[test]
    fn date_of_epoch_seconds() {
        // 1406052000 = 2014-07-22T18:00:00Z
        assert_eq!(date_of(1_406_052_000_000), Some(ymd(2014, 7, 22)));
    }

    #[test]
    fn index_lists_by_day_in_id_order() {
        let idx = DayIndex::new();
        idx.insert(TimeslotId(2), &Span::new(at(2014, 7, 22, 9), at(2014, 7, 22, 10)));
        idx.insert(TimeslotId(0), &Span::new(at(2014, 7, 22, 23), at(2014, 7, 23, 1)));
        idx.insert(TimeslotId(1), &Span::new(at(2014, 7, 23, 8), at(2014, 7, 23, 9)));

        assert_eq!(idx.on(ymd(2014, 7, 22)), vec![TimeslotId(0), TimeslotId(2)]);
        assert_eq!(idx.on(ymd(2014, 7, 23)), vec![TimeslotId(0), TimeslotId(1)]);
        assert!(idx.on(ymd(2014, 7, 24)).is_empty());
        assert_eq!(idx.day_count(), 2);
    }
}
