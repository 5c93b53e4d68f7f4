use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::limits::MAX_SQL_LEN;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTimeSlot {
        start_time: String,
        end_time: String,
        duration: String,
        returning: bool,
    },
    InsertProviderService {
        provider_id: Ulid,
        service_id: Ulid,
        hourly_rate_cents: Cents,
        experience: String,
        returning: bool,
    },
    UpdateProviderService {
        id: Ulid,
        hourly_rate_cents: Option<Cents>,
        experience: Option<String>,
    },
    DeleteProviderService {
        id: Ulid,
    },
    InsertSlot {
        provider_service_id: Ulid,
        service_date: NaiveDate,
        time_slot_id: Ulid,
        returning: bool,
    },
    UpdateSlot {
        id: Ulid,
        update: SlotUpdate,
    },
    ReserveSlot {
        id: Ulid,
    },
    ReleaseSlot {
        id: Ulid,
    },
    DeleteSlot {
        id: Ulid,
    },
    InsertBooking {
        booking: NewBooking,
        returning: bool,
    },
    /// Status text is validated by the engine's status parser.
    UpdateBookingStatus {
        id: Ulid,
        status: String,
    },
    InsertReview {
        provider_service_id: Ulid,
        customer_id: Ulid,
        review_date: NaiveDate,
        comments: String,
        returning: bool,
    },
    SelectTimeSlots {
        id: Option<Ulid>,
        duration: Option<String>,
    },
    SelectProviderServices {
        id: Option<Ulid>,
        provider_id: Option<Ulid>,
        service_id: Option<Ulid>,
    },
    SelectSlot {
        id: Ulid,
    },
    SelectSlots {
        provider_service_id: Ulid,
        duration: Option<String>,
    },
    SelectSlotConflict {
        query: SlotQuery,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectReviews {
        provider_service_id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(SqlError::TooLong);
    }
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Column name → value expression, lowercased names.
type Fields = HashMap<String, Expr>;

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let mut fields = insert_fields(insert)?;
    let returning = insert.returning.is_some();

    let cmd = match table.as_str() {
        "time_slots" => Command::InsertTimeSlot {
            start_time: take_string(&mut fields, "start_time")?,
            end_time: take_string(&mut fields, "end_time")?,
            duration: take_string(&mut fields, "duration")?,
            returning,
        },
        "provider_services" => Command::InsertProviderService {
            provider_id: take_ulid(&mut fields, "provider_id")?,
            service_id: take_ulid(&mut fields, "service_id")?,
            hourly_rate_cents: take_i64(&mut fields, "hourly_rate_cents")?,
            experience: take_opt(&mut fields, "experience", parse_string)?.unwrap_or_default(),
            returning,
        },
        "slots" => Command::InsertSlot {
            provider_service_id: take_ulid(&mut fields, "provider_service_id")?,
            service_date: take_date(&mut fields, "service_date")?,
            time_slot_id: take_ulid(&mut fields, "time_slot_id")?,
            returning,
        },
        "bookings" => Command::InsertBooking {
            booking: NewBooking {
                slot_id: take_ulid(&mut fields, "slot_id")?,
                customer_id: take_ulid(&mut fields, "customer_id")?,
                provider_id: take_ulid(&mut fields, "provider_id")?,
                total_price_cents: take_i64(&mut fields, "total_price_cents")?,
                comments: take_opt(&mut fields, "comments", parse_string)?,
                booking_date: take_date(&mut fields, "booking_date")?,
            },
            returning,
        },
        "reviews" => Command::InsertReview {
            provider_service_id: take_ulid(&mut fields, "provider_service_id")?,
            customer_id: take_ulid(&mut fields, "customer_id")?,
            review_date: take_date(&mut fields, "review_date")?,
            comments: take_opt(&mut fields, "comments", parse_string)?.unwrap_or_default(),
            returning,
        },
        _ => return Err(SqlError::UnknownTable(table)),
    };
    reject_leftovers(fields)?;
    Ok(cmd)
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    let mut fields = Fields::new();
    for assignment in assignments {
        let AssignmentTarget::ColumnName(name) = &assignment.target else {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        };
        let column = object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?;
        fields.insert(column, assignment.value.clone());
    }

    let cmd = match table.as_str() {
        "provider_services" => {
            let hourly_rate_cents = take_opt(&mut fields, "hourly_rate_cents", parse_i64)?;
            let experience = take_opt(&mut fields, "experience", parse_string)?;
            Command::UpdateProviderService { id, hourly_rate_cents, experience }
        }
        "slots" if fields.contains_key("is_booked") => {
            if fields.len() > 1 {
                return Err(SqlError::Unsupported("is_booked must be updated on its own".into()));
            }
            if take_bool(&mut fields, "is_booked")? {
                Command::ReserveSlot { id }
            } else {
                Command::ReleaseSlot { id }
            }
        }
        "slots" => Command::UpdateSlot {
            id,
            update: SlotUpdate {
                time_slot_id: take_opt(&mut fields, "time_slot_id", parse_ulid)?,
                service_date: take_opt(&mut fields, "service_date", parse_date)?,
                is_available: take_opt(&mut fields, "is_available", parse_bool)?,
            },
        },
        "bookings" => Command::UpdateBookingStatus {
            id,
            status: take_string(&mut fields, "status")?,
        },
        _ => return Err(SqlError::UnknownTable(table)),
    };
    reject_leftovers(fields)?;
    Ok(cmd)
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "provider_services" => Ok(Command::DeleteProviderService { id }),
        "slots" => Ok(Command::DeleteSlot { id }),
        _ => Err(SqlError::Unsupported(format!("DELETE from {table}"))),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Err(SqlError::Unsupported("non-SELECT query".into()));
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Fields::new();
    if let Some(selection) = &select.selection {
        collect_equalities(selection, &mut filters)?;
    }

    let cmd = match table.as_str() {
        "time_slots" => Command::SelectTimeSlots {
            id: take_opt(&mut filters, "id", parse_ulid)?,
            duration: take_opt(&mut filters, "duration", parse_string)?,
        },
        "provider_services" => Command::SelectProviderServices {
            id: take_opt(&mut filters, "id", parse_ulid)?,
            provider_id: take_opt(&mut filters, "provider_id", parse_ulid)?,
            service_id: take_opt(&mut filters, "service_id", parse_ulid)?,
        },
        "slots" => match take_opt(&mut filters, "id", parse_ulid)? {
            Some(id) => Command::SelectSlot { id },
            None => Command::SelectSlots {
                provider_service_id: take_opt(&mut filters, "provider_service_id", parse_ulid)?
                    .ok_or(SqlError::MissingFilter("provider_service_id"))?,
                duration: take_opt(&mut filters, "duration", parse_string)?,
            },
        },
        "slot_conflicts" => Command::SelectSlotConflict {
            query: SlotQuery {
                provider_service_id: take_opt(&mut filters, "provider_service_id", parse_ulid)?
                    .ok_or(SqlError::MissingFilter("provider_service_id"))?,
                service_date: take_opt(&mut filters, "service_date", parse_date)?
                    .ok_or(SqlError::MissingFilter("service_date"))?,
                time_slot_id: take_opt(&mut filters, "time_slot_id", parse_ulid)?,
                start_time: take_opt(&mut filters, "start_time", parse_string)?
                    .ok_or(SqlError::MissingFilter("start_time"))?,
                end_time: take_opt(&mut filters, "end_time", parse_string)?
                    .ok_or(SqlError::MissingFilter("end_time"))?,
            },
        },
        "bookings" => match take_opt(&mut filters, "id", parse_ulid)? {
            Some(id) => Command::SelectBooking { id },
            None => Command::SelectBookings {
                filter: BookingFilter {
                    customer_id: take_opt(&mut filters, "customer_id", parse_ulid)?,
                    provider_id: take_opt(&mut filters, "provider_id", parse_ulid)?,
                    booking_date: take_opt(&mut filters, "booking_date", parse_date)?,
                    status: take_opt(&mut filters, "status", parse_status)?,
                },
            },
        },
        "reviews" => Command::SelectReviews {
            provider_service_id: take_opt(&mut filters, "provider_service_id", parse_ulid)?
                .ok_or(SqlError::MissingFilter("provider_service_id"))?,
        },
        _ => return Err(SqlError::UnknownTable(table)),
    };
    reject_leftovers(filters)?;
    Ok(cmd)
}

/// Flatten a `col = value AND col = value ...` chain.
fn collect_equalities(expr: &Expr, out: &mut Fields) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_equalities(inner, out),
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            collect_equalities(left, out)?;
            collect_equalities(right, out)
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.insert(column, right.as_ref().clone());
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
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

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

/// Pair the column list with the single VALUES row.
fn insert_fields(insert: &ast::Insert) -> Result<Fields, SqlError> {
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
    }
    let body = insert
        .source
        .as_ref()
        .ok_or_else(|| SqlError::Parse("no VALUES".into()))?;
    let SetExpr::Values(values) = body.body.as_ref() else {
        return Err(SqlError::Parse("expected VALUES".into()));
    };
    let row = match values.rows.as_slice() {
        [row] => row,
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };
    if row.len() != insert.columns.len() {
        return Err(SqlError::WrongArity(insert.columns.len(), row.len()));
    }
    Ok(insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .zip(row.iter().cloned())
        .collect())
}

fn reject_leftovers(fields: Fields) -> Result<(), SqlError> {
    match fields.into_keys().min() {
        Some(column) => Err(SqlError::UnknownColumn(column)),
        None => Ok(()),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn take_opt<T>(
    fields: &mut Fields,
    column: &'static str,
    parse: fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    match fields.remove(column) {
        Some(expr) if is_null(&expr) => Ok(None),
        Some(expr) => parse(&expr).map(Some),
        None => Ok(None),
    }
}

fn take<T>(
    fields: &mut Fields,
    column: &'static str,
    parse: fn(&Expr) -> Result<T, SqlError>,
) -> Result<T, SqlError> {
    take_opt(fields, column, parse)?.ok_or(SqlError::MissingColumn(column))
}

fn take_ulid(fields: &mut Fields, column: &'static str) -> Result<Ulid, SqlError> {
    take(fields, column, parse_ulid)
}

fn take_i64(fields: &mut Fields, column: &'static str) -> Result<i64, SqlError> {
    take(fields, column, parse_i64)
}

fn take_string(fields: &mut Fields, column: &'static str) -> Result<String, SqlError> {
    take(fields, column, parse_string)
}

fn take_date(fields: &mut Fields, column: &'static str) -> Result<NaiveDate, SqlError> {
    take(fields, column, parse_date)
}

fn take_bool(fields: &mut Fields, column: &'static str) -> Result<bool, SqlError> {
    take(fields, column, parse_bool)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        _ => Err(SqlError::InvalidValue(format!("expected string, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::InvalidValue(format!("bad ULID {s:?}: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::InvalidValue(format!("bad date {s:?}: {e}")))
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_string(expr)?;
    s.parse().map_err(|e: UnknownStatus| SqlError::InvalidValue(e.to_string()))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    match (extract_value(expr), expr) {
        (Some(Value::Number(s, _)), _) | (Some(Value::SingleQuotedString(s)), _) => s
            .parse()
            .map_err(|e| SqlError::InvalidValue(format!("bad integer {s:?}: {e}"))),
        (None, Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr }) => Ok(-parse_i64(expr)?),
        _ => Err(SqlError::InvalidValue(format!("expected integer, got {expr}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::InvalidValue(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        _ => Err(SqlError::InvalidValue(format!("expected bool, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("query exceeds {} bytes", MAX_SQL_LEN)]
    TooLong,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("expected {0} values, got {1}")]
    WrongArity(usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::UnknownTable(_) => "42P01",
            SqlError::UnknownColumn(_) => "42703",
            SqlError::Unsupported(_) => "0A000",
            SqlError::InvalidValue(_) => "22P02",
            SqlError::TooLong => "54000",
            SqlError::Parse(_)
            | SqlError::Empty
            | SqlError::MissingColumn(_)
            | SqlError::WrongArity(..)
            | SqlError::MissingFilter(_) => "42601",
        }
    }
}
