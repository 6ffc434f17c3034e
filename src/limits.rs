use crate::model::Ms;

pub const MAX_BOATS: usize = 100_000;
pub const MAX_TIMESLOTS: usize = 1_000_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_BOAT_CAPACITY: u32 = 1_000_000;

/// Boats on one timeslot, and timeslots on one boat.
pub const MAX_BOATS_PER_TIMESLOT: usize = 1_024;
pub const MAX_ASSIGNMENTS_PER_BOAT: usize = 100_000;

/// A single timeslot may cross midnight but not run for weeks.
pub const MAX_TIMESLOT_DURATION_MS: Ms = 7 * 24 * 3_600_000;

/// 1970-01-01 .. 2100-01-01
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
