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
use tokio::net::TcpStream;

use crate::coordinator::{parse_seat_list, BookingError, Coordinator, NewScreening};
use crate::limits::MAX_USER_ID_LEN;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct SeatlockHandler {
    coordinator: Arc<Coordinator>,
    query_parser: Arc<SeatlockQueryParser>,
}

/// The authenticated session user is the identity every booking and
/// cancellation is made under.
fn session_user<C: ClientInfo>(client: &C) -> PgWireResult<UserId> {
    client
        .metadata()
        .get("user")
        .map(|u| UserId::new(u.as_str()))
        .ok_or_else(|| user_error("28000", "no session user".into()))
}

impl SeatlockHandler {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            query_parser: Arc::new(SeatlockQueryParser),
        }
    }

    async fn run(&self, user: &UserId, cmd: Command, format: &Format) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(user, cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        user: &UserId,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Response> {
        let coord = &self.coordinator;
        match cmd {
            Command::InsertScreening {
                id,
                movie_id,
                hall_id,
                rows,
                seats_per_row,
                show_time,
                base_price,
                category,
            } => {
                coord
                    .create_screening(NewScreening {
                        id,
                        movie_id,
                        hall_id,
                        layout: HallLayout::new(rows, seats_per_row),
                        show_time,
                        base_price,
                        category,
                    })
                    .await
                    .map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertReservation {
                id,
                screening_id,
                seats,
            } => {
                let seats = parse_seat_list(&seats).map_err(booking_err)?;
                coord
                    .book_with_id(id, user, screening_id, &seats)
                    .await
                    .map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteReservation { id } => {
                coord.cancel(id, user).await.map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectAvailableSeats { screening_id } => {
                let seats = coord.available_seats(screening_id).await.map_err(booking_err)?;
                seat_rows(seats, format)
            }
            Command::SelectBookedSeats { screening_id } => {
                let seats = coord.booked_seats(screening_id).await.map_err(booking_err)?;
                seat_rows(seats, format)
            }
            Command::SelectQuote {
                screening_id,
                seats,
            } => {
                let total = coord.quote(screening_id, seats).await.map_err(booking_err)?;
                let schema = Arc::new(with_format(quote_schema(), format));
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&screening_id.to_string())?;
                encoder.encode_field(&(seats as i64))?;
                encoder.encode_field(&total.to_string())?;
                let rows: Vec<PgWireResult<_>> = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectReservations => {
                let reservations = coord.reservations_for(user).await.map_err(booking_err)?;
                let schema = Arc::new(with_format(reservations_schema(), format));
                let rows: Vec<PgWireResult<_>> = reservations
                    .iter()
                    .map(|r| {
                        let seats: Vec<String> = r.seats.iter().map(|s| s.to_string()).collect();
                        let seats = serde_json::to_string(&seats)
                            .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.screening_id.to_string())?;
                        encoder.encode_field(&seats)?;
                        encoder.encode_field(&r.total_price.to_string())?;
                        encoder.encode_field(&r.status.to_string())?;
                        encoder.encode_field(&r.booked_at)?;
                        encoder.encode_field(&r.cancelled_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectScreenings => {
                let screenings = coord.upcoming_screenings().await.map_err(booking_err)?;
                let schema = Arc::new(with_format(screenings_schema(), format));
                let rows: Vec<PgWireResult<_>> = screenings
                    .iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.movie_id.to_string())?;
                        encoder.encode_field(&s.hall_id.to_string())?;
                        encoder.encode_field(&(s.layout.rows as i32))?;
                        encoder.encode_field(&(s.layout.seats_per_row as i32))?;
                        encoder.encode_field(&s.show_time)?;
                        encoder.encode_field(&s.base_price.to_string())?;
                        encoder.encode_field(&s.category.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn seat_rows(seats: Vec<SeatLabel>, format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(with_format(seats_schema(), format));
    let rows: Vec<PgWireResult<_>> = seats
        .iter()
        .map(|seat| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&seat.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

/// Apply the client's requested result formats. Simple queries are always
/// text; extended clients usually ask for binary.
fn with_format(fields: Vec<FieldInfo>, format: &Format) -> Vec<FieldInfo> {
    fields
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            FieldInfo::new(
                f.name().to_owned(),
                None,
                None,
                f.datatype().clone(),
                format.format_for(i),
            )
        })
        .collect()
}

fn seats_schema() -> Vec<FieldInfo> {
    vec![text_field("seat")]
}

fn quote_schema() -> Vec<FieldInfo> {
    vec![
        text_field("screening_id"),
        field("seats", Type::INT8),
        text_field("total_price"),
    ]
}

/// `seats` is a JSON array of labels.
fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("screening_id"),
        text_field("seats"),
        text_field("total_price"),
        text_field("status"),
        field("booked_at", Type::INT8),
        field("cancelled_at", Type::INT8),
    ]
}

fn screenings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("movie_id"),
        text_field("hall_id"),
        field("rows", Type::INT4),
        field("seats_per_row", Type::INT4),
        field("show_time", Type::INT8),
        text_field("base_price"),
        text_field("category"),
    ]
}

/// Result columns for a statement that may still hold `$N` placeholders.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if !upper.starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABLE_SEATS") || upper.contains("BOOKED_SEATS") {
        seats_schema()
    } else if upper.contains("QUOTE") {
        quote_schema()
    } else if upper.contains("RESERVATIONS") {
        reservations_schema()
    } else if upper.contains("SCREENINGS") {
        screenings_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for SeatlockHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let user = session_user(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(&user, cmd, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SeatlockQueryParser;

#[async_trait]
impl QueryParser for SeatlockQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        let schema = result_schema(stmt);
        Ok(match column_format {
            Some(format) => with_format(schema, format),
            None => schema,
        })
    }
}

#[async_trait]
impl ExtendedQueryHandler for SeatlockHandler {
    type Statement = String;
    type QueryParser = SeatlockQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let user = session_user(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(&user, cmd, &portal.result_column_format).await
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(with_format(
            result_schema(&target.statement.statement),
            &target.result_column_format,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute `$1`, `$2`, ... with bound values as quoted text. Goes from the
/// highest index down so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Auth ─────────────────────────────────────────────────────────

/// One shared password; the login name becomes the session user.
#[derive(Debug)]
pub struct SeatlockAuthSource {
    password: String,
}

impl SeatlockAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SeatlockAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        match login.user() {
            Some(user) if !user.is_empty() && user.len() <= MAX_USER_ID_LEN => {
                Ok(Password::new(None, self.password.as_bytes().to_vec()))
            }
            _ => {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                Err(user_error("28000", "a user name is required".into()))
            }
        }
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SeatlockFactory {
    handler: Arc<SeatlockHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SeatlockAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SeatlockFactory {
    pub fn new(coordinator: Arc<Coordinator>, password: String) -> Self {
        Self {
            handler: Arc::new(SeatlockHandler::new(coordinator)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SeatlockAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SeatlockFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    coordinator: Arc<Coordinator>,
    password: String,
) -> std::io::Result<()> {
    let factory = SeatlockFactory::new(coordinator, password);
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each booking failure, so clients can branch on the code.
pub fn sqlstate(e: &BookingError) -> &'static str {
    match e {
        BookingError::NotFound(_) => "P0002",
        BookingError::InvalidRequest(_) => "22023",
        BookingError::PastShowing(_) => "55000",
        BookingError::SeatsUnavailable(_) => "23P01",
        BookingError::Forbidden(_) => "42501",
        BookingError::AlreadyCancelled(_) => "55006",
        BookingError::InvalidTransition { .. } => "55P02",
        BookingError::StorageFailure(_) => "58030",
    }
}

fn booking_err(e: BookingError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
