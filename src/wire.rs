use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
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

use crate::api::ReservationApi;
use crate::auth::PrioritizeAuthSource;
use crate::engine::EngineError;
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command};

pub struct PrioritizeHandler {
    api: Arc<ReservationApi>,
    query_parser: Arc<PrioritizeQueryParser>,
}

impl PrioritizeHandler {
    pub fn new(api: Arc<ReservationApi>) -> Self {
        Self {
            api,
            query_parser: Arc::new(PrioritizeQueryParser),
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertReservation { api_key, request } => {
                self.api.reserve(&api_key, request).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertAbsence { api_key, request } => {
                self.api
                    .register_absence(&api_key, request)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::Amend { api_key, id, patch } => {
                self.api.amend(&api_key, id, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::Cancel { api_key, id } => {
                self.api.cancel(&api_key, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectDepartment { token, window } => {
                let records = self.api.reservations(&token, window).await.map_err(engine_err)?;
                Ok(vec![timespan_response(records)])
            }
            Command::SelectResourceReservations {
                api_key,
                resource_id,
                window,
            } => {
                let records = self
                    .api
                    .resource_reservations(&api_key, resource_id, window)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![timespan_response(records)])
            }
            Command::SelectGroup { api_key, group, window } => {
                let records = self
                    .api
                    .group_reservations(&api_key, &group, window)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![timespan_response(records)])
            }
            Command::SelectCalendar {
                api_key,
                owner,
                kind,
                window,
            } => {
                let records = match owner {
                    Some(user_id) => self.api.calendar_of(&api_key, user_id, kind, window).await,
                    None => self.api.calendar(&api_key, kind, window).await,
                }
                .map_err(engine_err)?;
                Ok(vec![timespan_response(records)])
            }
            Command::SelectAvailability {
                api_key,
                resource_id,
                start,
                end,
                min_duration,
            } => {
                let slots = self
                    .api
                    .availability(&api_key, resource_id, start, end, min_duration)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let rid_str = resource_id.to_string();
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&rid_str)?;
                        encoder.encode_field(&slot.start)?;
                        encoder.encode_field(&slot.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectOccupancy {
                api_key,
                resource_id,
                at,
            } => {
                let occ = self
                    .api
                    .occupancy(&api_key, resource_id, at)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(occupancy_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&occ.resource_id.to_string())?;
                encoder.encode_field(&occ.at)?;
                encoder.encode_field(&i64::from(occ.in_use))?;
                encoder.encode_field(&i64::from(occ.slots))?;
                let rows = vec![Ok(encoder.take_row())];

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn timespan_response(records: Vec<TimeSpan>) -> Response {
    let schema = Arc::new(timespan_schema());
    let rows: Vec<PgWireResult<_>> = records
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.kind.to_string())?;
            encoder.encode_field(&r.resource.map(|id| id.to_string()))?;
            encoder.encode_field(&r.slot.map(i64::from))?;
            encoder.encode_field(&r.department.to_string())?;
            encoder.encode_field(&r.owner.to_string())?;
            encoder.encode_field(&r.span.start)?;
            encoder.encode_field(&r.span.end)?;
            encoder.encode_field(&r.title)?;
            encoder.encode_field(&r.description)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn timespan_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("kind"),
        text_field("resource_id"),
        int_field("slot"),
        text_field("department"),
        text_field("owner"),
        int_field("start"),
        int_field("end"),
        text_field("title"),
        text_field("description"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text_field("resource_id"), int_field("start"), int_field("end")]
}

fn occupancy_schema() -> Vec<FieldInfo> {
    vec![
        text_field("resource_id"),
        int_field("at"),
        int_field("in_use"),
        int_field("slots"),
    ]
}

/// Result columns for a statement that may still carry `$N` placeholders,
/// so it is matched on the table name instead of being parsed.
fn result_schema(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("FROM AVAILABILITY") {
        availability_schema()
    } else if upper.contains("FROM OCCUPANCY") {
        occupancy_schema()
    } else if upper.contains("FROM RESERVATIONS") || upper.contains("FROM CALENDAR") {
        timespan_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for PrioritizeHandler {
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
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct PrioritizeQueryParser;

#[async_trait]
impl QueryParser for PrioritizeQueryParser {
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
impl ExtendedQueryHandler for PrioritizeHandler {
    type Statement = String;
    type QueryParser = PrioritizeQueryParser;

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
        let sql = substitute(&portal.statement.statement, &portal.parameters);
        let mut responses = self.run(&sql).await?;
        Ok(responses.remove(0))
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside quoted literals and identifiers, as the byte
/// range of the token and its number.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which comes to the same thing.
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let digits = i + 1;
                let mut j = digits;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j > digits
                    && let Ok(n) = sql[digits..j].parse::<usize>()
                {
                    found.push((i..j, n));
                }
                i = j;
            }
            None => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Splice bound parameters (text format) into the statement in one pass over
/// the original text, so a value containing `$N` is never read as a
/// placeholder. Placeholders with no bound value are left as they are.
fn substitute<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct PrioritizeFactory {
    handler: Arc<PrioritizeHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<PrioritizeAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl PrioritizeFactory {
    pub fn new(api: Arc<ReservationApi>, password: String) -> Self {
        let auth_source = PrioritizeAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(PrioritizeHandler::new(api)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for PrioritizeFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    api: Arc<ReservationApi>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(PrioritizeFactory::new(api, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let (code, message) = match &e {
        EngineError::NotAuthorized | EngineError::Forbidden(_) => {
            ("28000", EngineError::NotAuthorized.to_string())
        }
        EngineError::StoreUnavailable(_) => ("40001", e.to_string()),
        _ => ("P0001", e.to_string()),
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
