use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "boathouse_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "boathouse_query_duration_seconds";

/// Counter: booking requests. Labels: outcome (booked, no_room, error).
pub const BOOKINGS_TOTAL: &str = "boathouse_bookings_total";

/// Counter: boats withdrawn from overlapping timeslots by a booking.
pub const BOATS_WITHDRAWN_TOTAL: &str = "boathouse_boats_withdrawn_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "boathouse_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "boathouse_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "boathouse_connections_rejected_total";

/// Gauge: timeslots and boats held by the engine.
pub const TIMESLOTS: &str = "boathouse_timeslots";
pub const BOATS: &str = "boathouse_boats";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "boathouse_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "boathouse_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertTimeslot { .. } => "insert_timeslot",
        Command::SelectTimeslotsOn { .. } => "select_timeslots_on",
        Command::SelectTimeslot { .. } => "select_timeslot",
        Command::InsertBoat { .. } => "insert_boat",
        Command::SelectBoats => "select_boats",
        Command::SelectBoat { .. } => "select_boat",
        Command::InsertAssignment { .. } => "insert_assignment",
        Command::InsertBooking { .. } => "insert_booking",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoatId, TimeslotId};

    #[test]
    fn labels_are_distinct() {
        let cmds = [
            Command::InsertTimeslot { start_time: 0, duration: 1 },
            Command::SelectTimeslotsOn {
                date: chrono::NaiveDate::from_ymd_opt(2014, 7, 22).unwrap(),
            },
            Command::SelectTimeslot { id: TimeslotId(0) },
            Command::InsertBoat { capacity: 1, name: "a".into() },
            Command::SelectBoats,
            Command::SelectBoat { id: BoatId(0) },
            Command::InsertAssignment { timeslot_id: TimeslotId(0), boat_id: BoatId(0) },
            Command::InsertBooking { timeslot_id: TimeslotId(0), size: 1 },
        ];
        let mut labels: Vec<&str> = cmds.iter().map(command_label).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), cmds.len());
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
