use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::StartupHandler;
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, RowShape, SqlError};

pub struct BoathouseHandler {
    engine: Arc<Engine>,
    query_parser: Arc<BoathouseQueryParser>,
}

impl BoathouseHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(BoathouseQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let started = Instant::now();
        let cmd = match sql::parse_sql(sql) {
            Ok(cmd) => cmd,
            Err(e) => {
                debug!("rejected statement {sql:?}: {e}");
                metrics::counter!(QUERIES_TOTAL, "command" => "invalid", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = command_label(&cmd);
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertTimeslot {
                start_time,
                duration,
            } => {
                let info = engine
                    .create_timeslot(start_time, duration)
                    .await
                    .map_err(engine_err)?;
                timeslot_rows(vec![info])
            }
            Command::SelectTimeslotsOn { date } => {
                let infos = engine.timeslots_on(date).await.map_err(engine_err)?;
                timeslot_rows(infos)
            }
            Command::SelectTimeslot { id } => match engine.timeslot(id).await {
                Ok(info) => timeslot_rows(vec![info]),
                Err(EngineError::TimeslotNotFound(_)) => timeslot_rows(Vec::new()),
                Err(e) => Err(engine_err(e)),
            },
            Command::InsertBoat { capacity, name } => {
                let info = engine.create_boat(capacity, name).await.map_err(engine_err)?;
                boat_rows(vec![info])
            }
            Command::SelectBoats => boat_rows(engine.list_boats().await),
            Command::SelectBoat { id } => match engine.boat(id).await {
                Ok(info) => boat_rows(vec![info]),
                Err(EngineError::BoatNotFound(_)) => boat_rows(Vec::new()),
                Err(e) => Err(engine_err(e)),
            },
            Command::InsertAssignment {
                timeslot_id,
                boat_id,
            } => {
                engine
                    .assign_boat(timeslot_id, boat_id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_oid(0).with_rows(1)))
            }
            Command::InsertBooking { timeslot_id, size } => {
                let outcome = engine.book(timeslot_id, size).await.map_err(engine_err)?;
                booking_row(outcome)
            }
        }
    }
}

// ── Result rows ──────────────────────────────────────────────────

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn timeslot_schema() -> Vec<FieldInfo> {
    vec![
        int8("id"),
        int8("start_time"),
        int8("duration"),
        int8("availability"),
        int8("customer_count"),
        varchar("boats"),
    ]
}

fn boat_schema() -> Vec<FieldInfo> {
    vec![int8("id"), int8("capacity"), varchar("name")]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        int8("timeslot_id"),
        int8("size"),
        varchar("error"),
    ]
}

fn schema_for(shape: RowShape) -> Vec<FieldInfo> {
    match shape {
        RowShape::Timeslot => timeslot_schema(),
        RowShape::Boat => boat_schema(),
        RowShape::Booking => booking_schema(),
        RowShape::Empty => Vec::new(),
    }
}

fn timeslot_rows(infos: Vec<TimeslotInfo>) -> PgWireResult<Response> {
    let schema = Arc::new(timeslot_schema());
    let rows: Vec<PgWireResult<_>> = infos
        .into_iter()
        .map(|info| {
            let boats = serde_json::to_string(&info.boats)
                .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&(info.id.0 as i64))?;
            encoder.encode_field(&info.start_time)?;
            encoder.encode_field(&info.duration)?;
            encoder.encode_field(&(info.availability as i64))?;
            encoder.encode_field(&(info.customer_count as i64))?;
            encoder.encode_field(&boats)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn boat_rows(infos: Vec<BoatInfo>) -> PgWireResult<Response> {
    let schema = Arc::new(boat_schema());
    let rows: Vec<PgWireResult<_>> = infos
        .into_iter()
        .map(|info| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&(info.id.0 as i64))?;
            encoder.encode_field(&(info.capacity as i64))?;
            encoder.encode_field(&info.name)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// One row per booking request. A request that found no room has a NULL id
/// and `error = 'no room'`.
fn booking_row(outcome: BookingOutcome) -> PgWireResult<Response> {
    let (id, timeslot_id, size, err) = match outcome {
        BookingOutcome::Booked(info) => (Some(info.id.to_string()), info.timeslot_id, info.size, None),
        BookingOutcome::NoRoom { timeslot_id, size } => {
            (None, timeslot_id, size, Some("no room".to_string()))
        }
    };
    let schema = Arc::new(booking_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&id)?;
    encoder.encode_field(&(timeslot_id.0 as i64))?;
    encoder.encode_field(&(size as i64))?;
    encoder.encode_field(&err)?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for BoathouseHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BoathouseQueryParser;

#[async_trait]
impl QueryParser for BoathouseQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(sql::row_shape(stmt)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BoathouseHandler {
    type Statement = String;
    type QueryParser = BoathouseQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(sql::row_shape(&target.statement)),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(sql::row_shape(
            &target.statement.statement,
        ))))
    }
}

/// `$n` placeholders outside quoted literals and identifiers, as
/// `(byte range, n)` in statement order.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote inside a literal re-enters it on the next byte.
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i;
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start + 1..end].parse::<usize>() {
                    found.push((start..end, n));
                    i = end;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    found
}

fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Replace each `$n` with the n-th bound value in one pass, so text inside an
/// already substituted value is never rescanned. Unbound `$n` are left as is.
fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(text) => out.push_str(&quote_param(text)),
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

fn quote_param(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BoathouseFactory {
    handler: Arc<BoathouseHandler>,
    noop: Arc<NoopHandler>,
}

impl BoathouseFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(BoathouseHandler::new(engine)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BoathouseFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.noop.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> std::io::Result<()> {
    let factory = Arc::new(BoathouseFactory::new(engine));
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn engine_code(e: &EngineError) -> &'static str {
    match e {
        EngineError::TimeslotNotFound(_) | EngineError::BoatNotFound(_) => "P0002",
        EngineError::InvalidSize(_)
        | EngineError::InvalidCapacity(_)
        | EngineError::InvalidSpan(_) => "22023",
        EngineError::AlreadyAssigned { .. }
        | EngineError::NoCapacity { .. }
        | EngineError::LimitExceeded(_) => "P0001",
        EngineError::Inconsistent(_) => "XX000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.is_internal() {
        error!("internal error: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        engine_code(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.code().into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM boats"), 0);
        assert_eq!(
            count_params("INSERT INTO bookings (timeslot_id, size) VALUES ($1, $2)"),
            2
        );
        assert_eq!(count_params("SELECT * FROM timeslots WHERE id = $12"), 12);
    }

    #[test]
    fn count_params_skips_quoted_text() {
        assert_eq!(count_params("INSERT INTO boats (capacity, name) VALUES ($1, 'Deal $7')"), 1);
        assert_eq!(count_params("SELECT * FROM boats WHERE \"$3\" = $2"), 2);
    }

    #[test]
    fn bind_params_is_single_pass() {
        let sql = "INSERT INTO boats (capacity, name) VALUES ($1, $2)";
        let params = [Some("8".to_string()), Some("Deal $1".to_string())];
        assert_eq!(
            bind_params(sql, &params),
            "INSERT INTO boats (capacity, name) VALUES ('8', 'Deal $1')"
        );
    }

    #[test]
    fn bind_params_handles_two_digit_and_null() {
        let mut params: Vec<Option<String>> = (1..=10).map(|i| Some(i.to_string())).collect();
        params[0] = None;
        assert_eq!(bind_params("$10, $1, $2", &params), "'10', NULL, '2'");
        assert_eq!(bind_params("$3 'it''s $1'", &params[..2]), "$3 'it''s $1'");
    }

    #[test]
    fn quote_param_escapes_quotes() {
        assert_eq!(quote_param("Amazon Express"), "'Amazon Express'");
        assert_eq!(quote_param("Skipper's Pride"), "'Skipper''s Pride'");
    }

    #[test]
    fn engine_errors_map_to_sqlstate() {
        let code = |e: EngineError| engine_code(&e);
        assert_eq!(code(EngineError::TimeslotNotFound(TimeslotId(1))), "P0002");
        assert_eq!(code(EngineError::InvalidSize(0)), "22023");
        assert_eq!(
            code(EngineError::AlreadyAssigned {
                timeslot: TimeslotId(0),
                boat: BoatId(0)
            }),
            "P0001"
        );
        assert_eq!(code(EngineError::Inconsistent("x".into())), "XX000");
        assert_eq!(code(EngineError::WalError("disk".into())), "58030");
    }

    #[test]
    fn schemas_follow_row_shape() {
        assert_eq!(schema_for(RowShape::Timeslot).len(), 6);
        assert_eq!(schema_for(RowShape::Boat).len(), 3);
        assert_eq!(schema_for(RowShape::Booking).len(), 4);
        assert!(schema_for(RowShape::Empty).is_empty());
    }
}
