use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::{BoatId, TimeslotId};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTimeslot {
        /// Epoch seconds.
        start_time: i64,
        /// Minutes.
        duration: i64,
    },
    SelectTimeslotsOn {
        date: NaiveDate,
    },
    SelectTimeslot {
        id: TimeslotId,
    },
    InsertBoat {
        capacity: u32,
        name: String,
    },
    SelectBoats,
    SelectBoat {
        id: BoatId,
    },
    InsertAssignment {
        timeslot_id: TimeslotId,
        boat_id: BoatId,
    },
    InsertBooking {
        timeslot_id: TimeslotId,
        size: u32,
    },
}

/// Shape of the rows a statement answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    Timeslot,
    Boat,
    Booking,
    /// Command tag only.
    Empty,
}

impl Command {
    pub fn row_shape(&self) -> RowShape {
        match self {
            Command::InsertTimeslot { .. }
            | Command::SelectTimeslotsOn { .. }
            | Command::SelectTimeslot { .. } => RowShape::Timeslot,
            Command::InsertBoat { .. } | Command::SelectBoats | Command::SelectBoat { .. } => {
                RowShape::Boat
            }
            Command::InsertBooking { .. } => RowShape::Booking,
            Command::InsertAssignment { .. } => RowShape::Empty,
        }
    }
}

/// Row shape of a statement whose `$n` parameters are not bound yet. Only
/// the statement kind and target table are inspected.
pub fn row_shape(sql: &str) -> RowShape {
    let dialect = PostgreSqlDialect {};
    let Ok(stmts) = Parser::parse_sql(&dialect, sql) else {
        return RowShape::Empty;
    };
    let (table, is_insert) = match stmts.first() {
        Some(Statement::Insert(insert)) => (insert_table_name(insert), true),
        Some(Statement::Query(query)) => match query.body.as_ref() {
            SetExpr::Select(select) if !select.from.is_empty() => {
                (table_factor_name(&select.from[0].relation), false)
            }
            _ => return RowShape::Empty,
        },
        _ => return RowShape::Empty,
    };
    match (table.as_deref(), is_insert) {
        (Ok("timeslots"), _) => RowShape::Timeslot,
        (Ok("boats"), _) => RowShape::Boat,
        (Ok("bookings"), true) => RowShape::Booking,
        _ => RowShape::Empty,
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "timeslots" => {
            let [start_time, duration] = insert_fields(insert, "timeslots", ["start_time", "duration"])?;
            let start_time = parse_i64_expr(&start_time)?;
            let duration = parse_i64_expr(&duration)?;
            if duration <= 0 {
                return Err(SqlError::InvalidValue(format!("duration must be positive, got {duration}")));
            }
            Ok(Command::InsertTimeslot { start_time, duration })
        }
        "boats" => {
            let [capacity, name] = insert_fields(insert, "boats", ["capacity", "name"])?;
            Ok(Command::InsertBoat {
                capacity: parse_positive_u32(&capacity, "capacity")?,
                name: parse_string_expr(&name)?,
            })
        }
        "assignments" => {
            let [timeslot_id, boat_id] = insert_fields(insert, "assignments", ["timeslot_id", "boat_id"])?;
            Ok(Command::InsertAssignment {
                timeslot_id: TimeslotId(parse_u32(&timeslot_id)?),
                boat_id: BoatId(parse_u32(&boat_id)?),
            })
        }
        "bookings" => {
            let [timeslot_id, size] = insert_fields(insert, "bookings", ["timeslot_id", "size"])?;
            Ok(Command::InsertBooking {
                timeslot_id: TimeslotId(parse_u32(&timeslot_id)?),
                size: parse_positive_u32(&size, "size")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "timeslots" => match (filters.id, filters.date) {
            (Some(id), _) => Ok(Command::SelectTimeslot { id: TimeslotId(id) }),
            (None, Some(date)) => Ok(Command::SelectTimeslotsOn { date }),
            (None, None) => Err(SqlError::MissingFilter("date")),
        },
        "boats" => match filters.id {
            Some(id) => Ok(Command::SelectBoat { id: BoatId(id) }),
            None => Ok(Command::SelectBoats),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Debug, Default)]
struct Filters {
    id: Option<u32>,
    date: Option<NaiveDate>,
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_filters(left, filters)?;
            extract_filters(right, filters)?;
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => match expr_column_name(left).as_deref() {
            Some("id") => filters.id = Some(parse_u32(right)?),
            Some("date") => filters.date = Some(parse_date_expr(right)?),
            Some(col) => return Err(SqlError::Unsupported(format!("filter on {col}"))),
            None => return Err(SqlError::Unsupported(format!("filter {expr}"))),
        },
        Expr::Nested(inner) => extract_filters(inner, filters)?,
        other => return Err(SqlError::Unsupported(format!("filter {other}"))),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Values of a single-row INSERT, reordered to `wanted`. Without a column
/// list the values are taken positionally.
fn insert_fields<const N: usize>(
    insert: &ast::Insert,
    table: &'static str,
    wanted: [&'static str; N],
) -> Result<[Expr; N], SqlError> {
    let values = extract_insert_values(insert)?;
    if insert.columns.is_empty() {
        let got = values.len();
        return <[Expr; N]>::try_from(values).map_err(|_| SqlError::WrongArity(table, N, got));
    }
    if insert.columns.len() != values.len() {
        return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
    }

    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    if let Some(extra) = columns.iter().find(|c| !wanted.contains(&c.as_str())) {
        return Err(SqlError::UnknownColumn(table, extra.clone()));
    }
    let mut fields = Vec::with_capacity(N);
    for col in wanted {
        let pos = columns
            .iter()
            .position(|c| c == col)
            .ok_or(SqlError::MissingColumn(table, col))?;
        fields.push(values[pos].clone());
    }
    <[Expr; N]>::try_from(fields).map_err(|_| SqlError::WrongArity(table, N, columns.len()))
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64_expr(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("i64 overflow".into()))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::InvalidValue(format!("{v} out of u32 range")))
}

fn parse_positive_u32(expr: &Expr, what: &'static str) -> Result<u32, SqlError> {
    match parse_i64_expr(expr)? {
        v if v <= 0 => Err(SqlError::InvalidValue(format!("{what} must be positive, got {v}"))),
        v => u32::try_from(v).map_err(|_| SqlError::InvalidValue(format!("{what} {v} out of range"))),
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::BadDate(format!("{s}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    /// Well-formed but out of the accepted range.
    InvalidValue(String),
    BadDate(String),
}

impl SqlError {
    /// SQLSTATE reported to the client.
    pub fn code(&self) -> &'static str {
        match self {
            SqlError::InvalidValue(_) => "22023",
            SqlError::BadDate(_) => "22007",
            SqlError::UnknownTable(_) => "42P01",
            SqlError::UnknownColumn(..) | SqlError::MissingColumn(..) => "42703",
            SqlError::Unsupported(_) => "0A000",
            _ => "42601",
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidValue(s) => write!(f, "invalid value: {s}"),
            SqlError::BadDate(s) => write!(f, "bad date: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_insert_timeslot() {
        let sql = "INSERT INTO timeslots (start_time, duration) VALUES (1406052000, 120)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertTimeslot {
                start_time: 1_406_052_000,
                duration: 120
            }
        );
    }

    #[test]
    fn parse_insert_timeslot_columns_reordered() {
        let sql = "INSERT INTO timeslots (duration, start_time) VALUES (90, 1406052000)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertTimeslot {
                start_time: 1_406_052_000,
                duration: 90
            }
        );
    }

    #[test]
    fn parse_insert_timeslot_positional() {
        let sql = "INSERT INTO timeslots VALUES (-60, 30)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertTimeslot {
                start_time: -60,
                duration: 30
            }
        );
    }

    #[test]
    fn parse_insert_timeslot_rejects_nonpositive_duration() {
        let sql = "INSERT INTO timeslots (start_time, duration) VALUES (1406052000, 0)";
        let err = parse_sql(sql).unwrap_err();
        assert!(matches!(err, SqlError::InvalidValue(_)));
        assert_eq!(err.code(), "22023");
    }

    #[test]
    fn parse_insert_boat() {
        let sql = "INSERT INTO boats (capacity, name) VALUES (8, 'Amazon Express')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertBoat {
                capacity: 8,
                name: "Amazon Express".into()
            }
        );
    }

    #[test]
    fn parse_insert_boat_quoted_params() {
        // Extended-protocol parameters arrive as quoted text.
        let sql = "INSERT INTO boats (capacity, name) VALUES ('4', 'Amazon Express Mini')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertBoat {
                capacity: 4,
                name: "Amazon Express Mini".into()
            }
        );
    }

    #[test]
    fn parse_insert_boat_rejects_zero_capacity() {
        let sql = "INSERT INTO boats (capacity, name) VALUES (0, 'Empty')";
        assert!(matches!(parse_sql(sql), Err(SqlError::InvalidValue(_))));
    }

    #[test]
    fn parse_insert_boat_requires_string_name() {
        let sql = "INSERT INTO boats (capacity, name) VALUES (4, 12)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_assignment() {
        let sql = "INSERT INTO assignments (timeslot_id, boat_id) VALUES (3, 7)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertAssignment {
                timeslot_id: TimeslotId(3),
                boat_id: BoatId(7)
            }
        );
    }

    #[test]
    fn parse_insert_booking() {
        let sql = "INSERT INTO bookings (timeslot_id, size) VALUES (0, 6)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertBooking {
                timeslot_id: TimeslotId(0),
                size: 6
            }
        );
    }

    #[test]
    fn parse_insert_booking_rejects_negative_size() {
        let sql = "INSERT INTO bookings (timeslot_id, size) VALUES (0, -2)";
        assert!(matches!(parse_sql(sql), Err(SqlError::InvalidValue(_))));
    }

    #[test]
    fn parse_insert_unknown_column() {
        let sql = "INSERT INTO bookings (timeslot_id, seats) VALUES (0, 2)";
        let err = parse_sql(sql).unwrap_err();
        assert!(matches!(err, SqlError::UnknownColumn("bookings", _)));
    }

    #[test]
    fn parse_insert_wrong_arity() {
        let sql = "INSERT INTO assignments VALUES (1)";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::WrongArity("assignments", 2, 1))
        ));
    }

    #[test]
    fn parse_multi_row_insert_unsupported() {
        let sql = "INSERT INTO bookings (timeslot_id, size) VALUES (0, 1), (0, 2)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_timeslots_on_date() {
        let sql = "SELECT * FROM timeslots WHERE date = '2014-07-22'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectTimeslotsOn {
                date: NaiveDate::from_ymd_opt(2014, 7, 22).unwrap()
            }
        );
    }

    #[test]
    fn parse_select_timeslot_by_id() {
        let sql = "SELECT * FROM timeslots WHERE id = 4";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectTimeslot { id: TimeslotId(4) }
        );
    }

    #[test]
    fn parse_select_timeslots_requires_filter() {
        assert!(matches!(
            parse_sql("SELECT * FROM timeslots"),
            Err(SqlError::MissingFilter("date"))
        ));
    }

    #[test]
    fn parse_select_bad_date() {
        let err = parse_sql("SELECT * FROM timeslots WHERE date = '2014-13-40'").unwrap_err();
        assert!(matches!(err, SqlError::BadDate(_)));
        assert_eq!(err.code(), "22007");
    }

    #[test]
    fn parse_select_boats() {
        assert_eq!(parse_sql("SELECT * FROM boats").unwrap(), Command::SelectBoats);
        assert_eq!(
            parse_sql("SELECT * FROM boats WHERE id = 1").unwrap(),
            Command::SelectBoat { id: BoatId(1) }
        );
    }

    #[test]
    fn parse_unsupported_filter() {
        assert!(matches!(
            parse_sql("SELECT * FROM boats WHERE capacity > 3"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let err = parse_sql("SELECT * FROM foobar").unwrap_err();
        assert!(matches!(err, SqlError::UnknownTable(_)));
        assert_eq!(err.code(), "42P01");
    }

    #[test]
    fn parse_unsupported_statement() {
        assert!(matches!(
            parse_sql("DELETE FROM boats WHERE id = 1"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn row_shape_before_binding() {
        assert_eq!(
            row_shape("INSERT INTO timeslots (start_time, duration) VALUES ($1, $2)"),
            RowShape::Timeslot
        );
        assert_eq!(row_shape("SELECT * FROM timeslots WHERE date = $1"), RowShape::Timeslot);
        assert_eq!(row_shape("SELECT * FROM boats"), RowShape::Boat);
        assert_eq!(
            row_shape("INSERT INTO bookings (timeslot_id, size) VALUES ($1, $2)"),
            RowShape::Booking
        );
        assert_eq!(
            row_shape("INSERT INTO assignments (timeslot_id, boat_id) VALUES ($1, $2)"),
            RowShape::Empty
        );
        assert_eq!(row_shape("not sql at all"), RowShape::Empty);
    }

    #[test]
    fn row_shape_agrees_with_parsed_command() {
        for sql in [
            "INSERT INTO timeslots (start_time, duration) VALUES (0, 60)",
            "SELECT * FROM timeslots WHERE id = 1",
            "INSERT INTO boats (capacity, name) VALUES (4, 'Mini')",
            "SELECT * FROM boats WHERE id = 0",
            "INSERT INTO assignments (timeslot_id, boat_id) VALUES (0, 0)",
            "INSERT INTO bookings (timeslot_id, size) VALUES (0, 2)",
        ] {
            assert_eq!(parse_sql(sql).unwrap().row_shape(), row_shape(sql), "{sql}");
        }
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
