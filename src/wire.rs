use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

// ── Auth ─────────────────────────────────────────────────────────

/// Single shared password for every login.
#[derive(Debug)]
pub struct SlotMarketAuthSource {
    password: String,
}

impl SlotMarketAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SlotMarketAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn time_slot_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("start_time"), text("end_time"), text("duration")]
}

fn provider_service_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("provider_id"),
        text("service_id"),
        int8("hourly_rate_cents"),
        text("experience"),
    ]
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("provider_service_id"),
        text("time_slot_id"),
        text("service_date"),
        text("start_time"),
        text("end_time"),
        text("duration"),
        int8("hourly_rate_cents"),
        boolean("is_available"),
        boolean("is_booked"),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("slot_id"),
        text("provider_service_id"),
        text("customer_id"),
        text("provider_id"),
        int8("total_price_cents"),
        text("comments"),
        text("booking_date"),
        text("status"),
        text("service_date"),
        text("start_time"),
        text("end_time"),
        text("duration"),
        int8("hourly_rate_cents"),
    ]
}

fn review_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("provider_service_id"),
        text("customer_id"),
        text("review_date"),
        text("comments"),
    ]
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![text("provider_service_id"), text("service_date"), boolean("is_booked")]
}

/// Table named after the first FROM/INTO keyword.
fn target_table(sql: &str) -> Option<String> {
    let lower = sql.to_lowercase();
    let mut words = lower
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty());
    while let Some(word) = words.next() {
        if word == "from" || word == "into" {
            return words.next().map(str::to_string);
        }
    }
    None
}

/// Row shape for statements that return rows; empty for plain writes.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.trim_start().to_lowercase();
    let returns_rows = lower.starts_with("select") || lower.contains("returning");
    if !returns_rows {
        return vec![];
    }
    match target_table(sql).as_deref() {
        Some("time_slots") => time_slot_schema(),
        Some("provider_services") => provider_service_schema(),
        Some("slots") => slot_schema(),
        Some("bookings") => booking_schema(),
        Some("reviews") => review_schema(),
        Some("slot_conflicts") => conflict_schema(),
        _ => vec![],
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_time_slot(enc: &mut DataRowEncoder, t: &TimeSlotTemplate) -> PgWireResult<()> {
    enc.encode_field(&t.id.to_string())?;
    enc.encode_field(&t.start_time)?;
    enc.encode_field(&t.end_time)?;
    enc.encode_field(&t.duration)
}

fn encode_provider_service(enc: &mut DataRowEncoder, s: &ProviderService) -> PgWireResult<()> {
    enc.encode_field(&s.id.to_string())?;
    enc.encode_field(&s.provider_id.to_string())?;
    enc.encode_field(&s.service_id.to_string())?;
    enc.encode_field(&s.hourly_rate_cents)?;
    enc.encode_field(&s.experience)
}

fn encode_slot(enc: &mut DataRowEncoder, s: &SlotInfo) -> PgWireResult<()> {
    enc.encode_field(&s.id.to_string())?;
    enc.encode_field(&s.provider_service_id.to_string())?;
    enc.encode_field(&s.time_slot_id.to_string())?;
    enc.encode_field(&s.service_date.to_string())?;
    enc.encode_field(&s.start_time)?;
    enc.encode_field(&s.end_time)?;
    enc.encode_field(&s.duration)?;
    enc.encode_field(&s.hourly_rate_cents)?;
    enc.encode_field(&s.is_available)?;
    enc.encode_field(&s.is_booked)
}

fn encode_booking(enc: &mut DataRowEncoder, b: &BookingInfo) -> PgWireResult<()> {
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.slot_id.to_string())?;
    enc.encode_field(&b.provider_service_id.to_string())?;
    enc.encode_field(&b.customer_id.to_string())?;
    enc.encode_field(&b.provider_id.to_string())?;
    enc.encode_field(&b.total_price_cents)?;
    enc.encode_field(&b.comments)?;
    enc.encode_field(&b.booking_date.to_string())?;
    enc.encode_field(&b.status.as_str())?;
    enc.encode_field(&b.service_date.map(|d| d.to_string()))?;
    enc.encode_field(&b.start_time)?;
    enc.encode_field(&b.end_time)?;
    enc.encode_field(&b.duration)?;
    enc.encode_field(&b.hourly_rate_cents)
}

fn encode_review(enc: &mut DataRowEncoder, r: &Review) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.provider_service_id.to_string())?;
    enc.encode_field(&r.customer_id.to_string())?;
    enc.encode_field(&r.review_date.to_string())?;
    enc.encode_field(&r.comments)
}

fn encode_conflict(enc: &mut DataRowEncoder, c: &(SlotQuery, bool)) -> PgWireResult<()> {
    enc.encode_field(&c.0.provider_service_id.to_string())?;
    enc.encode_field(&c.0.service_date.to_string())?;
    enc.encode_field(&c.1)
}

fn insert_tag() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

// ── Handler ──────────────────────────────────────────────────────

pub struct SlotMarketHandler {
    engine: Arc<Engine>,
    query_parser: Arc<SlotMarketQueryParser>,
}

impl SlotMarketHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(SlotMarketQueryParser),
        }
    }

    /// Parse, run and record RED metrics for one statement.
    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        debug!(command = label, status, "query executed");
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertTimeSlot {
                start_time,
                end_time,
                duration,
                returning,
            } => {
                let template = engine
                    .create_time_slot(start_time, end_time, duration)
                    .await
                    .map_err(engine_err)?;
                Ok(if returning {
                    rows_response(time_slot_schema(), &[template], encode_time_slot)
                } else {
                    insert_tag()
                })
            }
            Command::InsertProviderService {
                provider_id,
                service_id,
                hourly_rate_cents,
                experience,
                returning,
            } => {
                let service = engine
                    .create_provider_service(provider_id, service_id, hourly_rate_cents, experience)
                    .await
                    .map_err(engine_err)?;
                Ok(if returning {
                    rows_response(provider_service_schema(), &[service], encode_provider_service)
                } else {
                    insert_tag()
                })
            }
            Command::UpdateProviderService {
                id,
                hourly_rate_cents,
                experience,
            } => {
                engine
                    .update_provider_service(id, hourly_rate_cents, experience)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteProviderService { id } => {
                engine.delete_provider_service(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertSlot {
                provider_service_id,
                service_date,
                time_slot_id,
                returning,
            } => {
                let slot = engine
                    .create_slot(provider_service_id, service_date, time_slot_id)
                    .await
                    .map_err(engine_err)?;
                if !returning {
                    return Ok(insert_tag());
                }
                let info = engine
                    .get_slot(&slot.id)
                    .await
                    .ok_or_else(|| engine_err(EngineError::NotFound(slot.id)))?;
                Ok(rows_response(slot_schema(), &[info], encode_slot))
            }
            Command::UpdateSlot { id, update } => {
                engine.update_slot(id, update).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::ReserveSlot { id } => {
                engine.reserve_slot(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::ReleaseSlot { id } => {
                engine.release_slot(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteSlot { id } => {
                engine.remove_slot(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertBooking { booking, returning } => {
                let booking = engine.create_booking(booking).await.map_err(engine_err)?;
                if !returning {
                    return Ok(insert_tag());
                }
                let info = engine
                    .get_booking(&booking.id)
                    .await
                    .ok_or_else(|| engine_err(EngineError::NotFound(booking.id)))?;
                Ok(rows_response(booking_schema(), &[info], encode_booking))
            }
            Command::UpdateBookingStatus { id, status } => {
                let status: BookingStatus = status
                    .parse()
                    .map_err(|e| engine_err(EngineError::from(e)))?;
                engine
                    .update_booking_status(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::InsertReview {
                provider_service_id,
                customer_id,
                review_date,
                comments,
                returning,
            } => {
                let review = engine
                    .add_review(provider_service_id, customer_id, review_date, comments)
                    .await
                    .map_err(engine_err)?;
                Ok(if returning {
                    rows_response(review_schema(), &[review], encode_review)
                } else {
                    insert_tag()
                })
            }
            Command::SelectTimeSlots { id, duration } => {
                let templates: Vec<_> = match id {
                    Some(id) => engine
                        .get_time_slot(&id)
                        .into_iter()
                        .filter(|t| duration.as_deref().is_none_or(|d| t.duration == d))
                        .collect(),
                    None => engine.list_time_slots(duration.as_deref()),
                };
                Ok(rows_response(time_slot_schema(), &templates, encode_time_slot))
            }
            Command::SelectProviderServices {
                id,
                provider_id,
                service_id,
            } => {
                let services: Vec<_> = match id {
                    Some(id) => engine
                        .get_provider_service(&id)
                        .await
                        .into_iter()
                        .filter(|s| provider_id.is_none_or(|p| p == s.provider_id))
                        .filter(|s| service_id.is_none_or(|x| x == s.service_id))
                        .collect(),
                    None => engine.list_provider_services(provider_id, service_id).await,
                };
                Ok(rows_response(provider_service_schema(), &services, encode_provider_service))
            }
            Command::SelectSlot { id } => {
                let slots: Vec<_> = engine.get_slot(&id).await.into_iter().collect();
                Ok(rows_response(slot_schema(), &slots, encode_slot))
            }
            Command::SelectSlots {
                provider_service_id,
                duration,
            } => {
                let slots = engine
                    .list_slots(&provider_service_id, duration.as_deref())
                    .await;
                Ok(rows_response(slot_schema(), &slots, encode_slot))
            }
            Command::SelectSlotConflict { query } => {
                let booked = engine.is_slot_booked(&query).await.map_err(engine_err)?;
                Ok(rows_response(conflict_schema(), &[(query, booked)], encode_conflict))
            }
            Command::SelectBooking { id } => {
                let bookings: Vec<_> = engine.get_booking(&id).await.into_iter().collect();
                Ok(rows_response(booking_schema(), &bookings, encode_booking))
            }
            Command::SelectBookings { filter } => {
                let bookings = engine.list_bookings(&filter).await;
                Ok(rows_response(booking_schema(), &bookings, encode_booking))
            }
            Command::SelectReviews { provider_service_id } => {
                let reviews = engine.list_reviews(&provider_service_id).await;
                Ok(rows_response(review_schema(), &reviews, encode_review))
            }
        }
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotMarketHandler {
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
pub struct SlotMarketQueryParser;

#[async_trait]
impl QueryParser for SlotMarketQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotMarketHandler {
    type Statement = String;
    type QueryParser = SlotMarketQueryParser;

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
        self.run(&substitute_params(portal)).await
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        rest = &rest[pos + 1..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if let Ok(n) = rest[..digits].parse::<usize>() {
            max = max.max(n);
        }
        rest = &rest[digits..];
    }
    max
}

/// Inline text-format parameters as quoted literals, highest index first so
/// `$1` never clobbers `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotMarketFactory {
    handler: Arc<SlotMarketHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotMarketAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotMarketFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(SlotMarketHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SlotMarketAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotMarketFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = SlotMarketFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

pub fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "22023",
        ErrorKind::Duplicate => "23505",
        ErrorKind::NotFound => "P0002",
        ErrorKind::Conflict => "23P01",
        ErrorKind::InUse => "2BP01",
        ErrorKind::Limit => "54000",
        ErrorKind::Storage => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(e.kind()).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_table_after_from_or_into() {
        assert_eq!(target_table("SELECT * FROM slots WHERE id = $1").as_deref(), Some("slots"));
        assert_eq!(
            target_table("insert into time_slots (start_time) values ($1)").as_deref(),
            Some("time_slots")
        );
        assert_eq!(target_table("UPDATE bookings SET status = $1").as_deref(), None);
    }

    #[test]
    fn schema_only_for_row_returning_statements() {
        assert_eq!(result_schema("SELECT * FROM bookings").len(), booking_schema().len());
        assert_eq!(
            result_schema("INSERT INTO slots (a) VALUES ($1) RETURNING *").len(),
            slot_schema().len()
        );
        assert!(result_schema("INSERT INTO slots (a) VALUES ($1)").is_empty());
        assert_eq!(result_schema("SELECT * FROM slot_conflicts WHERE x = 1").len(), 3);
    }

    #[test]
    fn params_counted_by_highest_index() {
        assert_eq!(count_params("SELECT * FROM slots WHERE id = $1"), 1);
        assert_eq!(count_params("VALUES ($2, $10, $1)"), 10);
        assert_eq!(count_params("SELECT '$' FROM x"), 0);
    }

    #[test]
    fn every_error_kind_has_a_sqlstate() {
        use crate::model::BookingStatus::*;
        let id = ulid::Ulid::new();
        let cases = [
            (EngineError::Validation("x".into()), "22023"),
            (EngineError::InvalidTransition { id, from: Cancelled, to: Confirmed }, "22023"),
            (EngineError::Duplicate("x".into()), "23505"),
            (EngineError::NotFound(id), "P0002"),
            (EngineError::Conflict(id), "23P01"),
            (EngineError::HasBookings(id), "2BP01"),
            (EngineError::LimitExceeded("x"), "54000"),
            (EngineError::WalError("x".into()), "58030"),
        ];
        for (err, code) in cases {
            assert_eq!(sqlstate(err.kind()), code, "{err}");
        }
    }
}
