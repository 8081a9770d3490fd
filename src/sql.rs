use sqlparser::ast::{self, BinaryOperator as Op, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input. Every command except the department view
/// carries the caller's API key.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReservation {
        api_key: String,
        request: NewReservation,
    },
    InsertAbsence {
        api_key: String,
        request: NewAbsence,
    },
    Amend {
        api_key: String,
        id: Ulid,
        patch: TimeSpanPatch,
    },
    Cancel {
        api_key: String,
        id: Ulid,
    },
    SelectDepartment {
        token: String,
        window: Window,
    },
    SelectResourceReservations {
        api_key: String,
        resource_id: Ulid,
        window: Window,
    },
    SelectGroup {
        api_key: String,
        group: String,
        window: Window,
    },
    /// `owner` is `None` for the caller's own calendar.
    SelectCalendar {
        api_key: String,
        owner: Option<Ulid>,
        kind: Option<TimeSpanKind>,
        window: Window,
    },
    SelectAvailability {
        api_key: String,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    },
    SelectOccupancy {
        api_key: String,
        resource_id: Ulid,
        at: Ms,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = Row::from_insert(insert, &table)?;

    match table.as_str() {
        "reservations" => {
            row.only(&["id", "api_key", "resource_id", "start", "end", "title", "description"])?;
            Ok(Command::InsertReservation {
                api_key: row.required_string("api_key")?,
                request: NewReservation {
                    id: parse_ulid_expr(row.required("id")?)?,
                    resource_id: parse_ulid_expr(row.required("resource_id")?)?,
                    start: parse_i64_expr(row.required("start")?)?,
                    end: parse_i64_expr(row.required("end")?)?,
                    title: row.optional_string("title")?,
                    description: row.optional_string("description")?,
                },
            })
        }
        "absences" => {
            row.only(&["id", "api_key", "kind", "start", "end", "title", "description"])?;
            let kind = row
                .required_string("kind")?
                .parse::<TimeSpanKind>()
                .map_err(SqlError::Parse)?;
            Ok(Command::InsertAbsence {
                api_key: row.required_string("api_key")?,
                request: NewAbsence {
                    id: parse_ulid_expr(row.required("id")?)?,
                    kind,
                    start: parse_i64_expr(row.required("start")?)?,
                    end: parse_i64_expr(row.required("end")?)?,
                    title: row.optional_string("title")?,
                    description: row.optional_string("description")?,
                },
            })
        }
        "amendments" => {
            row.only(&["id", "api_key", "title", "description", "start", "end"])?;
            let span = match (row.get("start"), row.get("end")) {
                (Some(s), Some(e)) => Some((parse_i64_expr(s)?, parse_i64_expr(e)?)),
                (None, None) => None,
                (Some(_), None) => return Err(SqlError::MissingColumn("end")),
                (None, Some(_)) => return Err(SqlError::MissingColumn("start")),
            };
            Ok(Command::Amend {
                api_key: row.required_string("api_key")?,
                id: parse_ulid_expr(row.required("id")?)?,
                patch: TimeSpanPatch {
                    title: row.optional_string("title")?,
                    description: row.optional_string("description")?,
                    span,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" && table != "absences" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = Filters::from_selection(delete.selection.as_ref())?;
    filters.only(&[("id", Op::Eq), ("api_key", Op::Eq)])?;
    Ok(Command::Cancel {
        api_key: filters.string("api_key")?.ok_or(SqlError::MissingFilter("api_key"))?,
        id: filters.ulid("id")?.ok_or(SqlError::MissingFilter("id"))?,
    })
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
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "reservations" => {
            filters.only(&[
                ("api_key", Op::Eq),
                ("department", Op::Eq),
                ("resource_id", Op::Eq),
                ("group", Op::Eq),
                ("end", Op::Gt),
                ("start", Op::Lt),
            ])?;
            let window = filters.window()?;
            let selectors = ["department", "group", "resource_id"]
                .iter()
                .filter(|c| filters.has(c))
                .count();
            if selectors > 1 {
                return Err(SqlError::Unsupported("more than one of department, group, resource_id".into()));
            }
            if let Some(token) = filters.string("department")? {
                if filters.has("api_key") {
                    return Err(SqlError::Unsupported("api_key with department".into()));
                }
                return Ok(Command::SelectDepartment { token, window });
            }
            let api_key = filters.api_key()?;
            if let Some(group) = filters.string("group")? {
                return Ok(Command::SelectGroup { api_key, group, window });
            }
            Ok(Command::SelectResourceReservations {
                api_key,
                resource_id: filters
                    .ulid("resource_id")?
                    .ok_or(SqlError::MissingFilter("department, group or resource_id"))?,
                window,
            })
        }
        "calendar" => {
            filters.only(&[
                ("api_key", Op::Eq),
                ("owner", Op::Eq),
                ("kind", Op::Eq),
                ("end", Op::Gt),
                ("start", Op::Lt),
            ])?;
            let kind = filters
                .string("kind")?
                .map(|k| k.parse::<TimeSpanKind>().map_err(SqlError::Parse))
                .transpose()?;
            Ok(Command::SelectCalendar {
                api_key: filters.api_key()?,
                owner: filters.ulid("owner")?,
                kind,
                window: filters.window()?,
            })
        }
        "availability" => {
            filters.only(&[
                ("api_key", Op::Eq),
                ("resource_id", Op::Eq),
                ("start", Op::GtEq),
                ("end", Op::LtEq),
                ("min_duration", Op::Eq),
            ])?;
            Ok(Command::SelectAvailability {
                api_key: filters.api_key()?,
                resource_id: filters.ulid("resource_id")?.ok_or(SqlError::MissingFilter("resource_id"))?,
                start: filters.i64(Op::GtEq, "start")?.ok_or(SqlError::MissingFilter("start"))?,
                end: filters.i64(Op::LtEq, "end")?.ok_or(SqlError::MissingFilter("end"))?,
                min_duration: filters.i64(Op::Eq, "min_duration")?,
            })
        }
        "occupancy" => {
            filters.only(&[("api_key", Op::Eq), ("resource_id", Op::Eq), ("at", Op::Eq)])?;
            Ok(Command::SelectOccupancy {
                api_key: filters.api_key()?,
                resource_id: filters.ulid("resource_id")?.ok_or(SqlError::MissingFilter("resource_id"))?,
                at: filters.i64(Op::Eq, "at")?.ok_or(SqlError::MissingFilter("at"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Rows and filters ─────────────────────────────────────────

/// A single-row INSERT as `column -> value`.
struct Row(Vec<(String, Expr)>);

impl Row {
    fn from_insert(insert: &ast::Insert, table: &str) -> Result<Self, SqlError> {
        let values = extract_insert_values(insert)?;
        if insert.columns.is_empty() {
            return Err(SqlError::Parse(format!("{table}: column list required")));
        }
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(table.to_string(), insert.columns.len(), values.len()));
        }
        let pairs = insert
            .columns
            .iter()
            .map(|c| c.value.to_lowercase())
            .zip(values)
            .collect();
        Ok(Row(pairs))
    }

    fn get(&self, col: &str) -> Option<&Expr> {
        self.0.iter().find(|(c, _)| c == col).map(|(_, e)| e)
    }

    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.0.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
            Some((c, _)) => Err(SqlError::UnknownColumn(c.clone())),
            None => Ok(()),
        }
    }

    fn required(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(col))
    }

    fn required_string(&self, col: &'static str) -> Result<String, SqlError> {
        parse_string_or_null(self.required(col)?)?.ok_or(SqlError::MissingColumn(col))
    }

    fn optional_string(&self, col: &str) -> Result<Option<String>, SqlError> {
        match self.get(col) {
            Some(expr) => parse_string_or_null(expr),
            None => Ok(None),
        }
    }
}

/// `column <op> value` conditions joined by AND.
struct Filters(Vec<(String, Op, Expr)>);

impl Filters {
    fn from_selection(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut out = Vec::new();
        if let Some(expr) = selection {
            collect_filters(expr, &mut out)?;
        }
        Ok(Filters(out))
    }

    fn find(&self, op: &Op, col: &str) -> Option<&Expr> {
        self.0
            .iter()
            .find(|(c, o, _)| c == col && o == op)
            .map(|(_, _, e)| e)
    }

    fn has(&self, col: &str) -> bool {
        self.0.iter().any(|(c, _, _)| c == col)
    }

    /// Every condition must be one the command reads. A known column under
    /// the wrong operator would otherwise be dropped without a word.
    fn only(&self, allowed: &[(&str, Op)]) -> Result<(), SqlError> {
        for (col, op, _) in &self.0 {
            if !allowed.iter().any(|(c, _)| c == col) {
                return Err(SqlError::UnknownColumn(col.clone()));
            }
            if !allowed.iter().any(|(c, o)| c == col && o == op) {
                return Err(SqlError::Unsupported(format!("operator {op} on {col}")));
            }
            if self.0.iter().filter(|(c, o, _)| c == col && o == op).count() > 1 {
                return Err(SqlError::Unsupported(format!("repeated condition {col} {op}")));
            }
        }
        Ok(())
    }

    fn string(&self, col: &str) -> Result<Option<String>, SqlError> {
        match self.find(&Op::Eq, col) {
            Some(expr) => parse_string_or_null(expr),
            None => Ok(None),
        }
    }

    fn ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.find(&Op::Eq, col)
            .map(parse_ulid_expr)
            .transpose()
    }

    fn i64(&self, op: Op, col: &str) -> Result<Option<i64>, SqlError> {
        self.find(&op, col).map(parse_i64_expr).transpose()
    }

    fn api_key(&self) -> Result<String, SqlError> {
        self.string("api_key")?.ok_or(SqlError::MissingFilter("api_key"))
    }

    /// `"end" > x AND start < y` selects the rows intersecting `[x, y)`;
    /// either bound may be absent.
    fn window(&self) -> Result<Window, SqlError> {
        Ok(Window {
            from: self.i64(Op::Gt, "end")?,
            until: self.i64(Op::Lt, "start")?,
        })
    }
}

fn collect_filters(expr: &Expr, out: &mut Vec<(String, Op, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: Op::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, op.clone(), right.as_ref().clone()));
            Ok(())
        }
        Expr::Nested(inner) => collect_filters(inner, out),
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(String, usize, usize),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const RES: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAW";

    #[test]
    fn parse_insert_reservation() {
        let sql = format!(
            r#"INSERT INTO reservations (id, api_key, resource_id, start, "end") VALUES ('{ID}', 'k1', '{RES}', 1000, 2000)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { api_key, request } => {
                assert_eq!(api_key, "k1");
                assert_eq!(request.id.to_string(), ID);
                assert_eq!(request.resource_id.to_string(), RES);
                assert_eq!((request.start, request.end), (1000, 2000));
                assert_eq!(request.title, None);
                assert_eq!(request.description, None);
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_with_title() {
        let sql = format!(
            r#"INSERT INTO reservations (id, api_key, resource_id, start, "end", title, description) VALUES ('{ID}', 'k1', '{RES}', 1000, 2000, 'Demo', NULL)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { request, .. } => {
                assert_eq!(request.title.as_deref(), Some("Demo"));
                assert_eq!(request.description, None);
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_missing_column() {
        let sql = format!(r#"INSERT INTO reservations (id, api_key, start, "end") VALUES ('{ID}', 'k1', 1000, 2000)"#);
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("resource_id"))));
    }

    #[test]
    fn parse_insert_arity_mismatch() {
        let sql = format!(r#"INSERT INTO reservations (id, api_key) VALUES ('{ID}', 'k1', 5)"#);
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity(_, 2, 3))));
    }

    #[test]
    fn parse_insert_absence() {
        let sql = format!(
            r#"INSERT INTO absences (id, api_key, kind, start, "end") VALUES ('{ID}', 'k1', 'vacation', 0, 86400000)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAbsence { request, .. } => {
                assert_eq!(request.kind, TimeSpanKind::Vacation);
                assert_eq!(request.end, 86_400_000);
            }
            cmd => panic!("expected InsertAbsence, got {cmd:?}"),
        }
        let bad = format!(r#"INSERT INTO absences (id, api_key, kind, start, "end") VALUES ('{ID}', 'k1', 'holiday', 0, 1)"#);
        assert!(matches!(parse_sql(&bad), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_amendment() {
        let sql = format!("INSERT INTO amendments (id, api_key, title) VALUES ('{ID}', 'k1', 'Renamed')");
        match parse_sql(&sql).unwrap() {
            Command::Amend { id, patch, .. } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(patch.title.as_deref(), Some("Renamed"));
                assert_eq!(patch.span, None);
            }
            cmd => panic!("expected Amend, got {cmd:?}"),
        }

        let sql = format!(r#"INSERT INTO amendments (id, api_key, start, "end") VALUES ('{ID}', 'k1', 5, 10)"#);
        match parse_sql(&sql).unwrap() {
            Command::Amend { patch, .. } => assert_eq!(patch.span, Some((5, 10))),
            cmd => panic!("expected Amend, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_amendment_rejects_other_columns() {
        let sql = format!("INSERT INTO amendments (id, api_key, owner) VALUES ('{ID}', 'k1', 'x')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "owner"));
        let sql = format!("INSERT INTO amendments (id, api_key, start) VALUES ('{ID}', 'k1', 5)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("end"))));
    }

    #[test]
    fn parse_delete() {
        for table in ["reservations", "absences"] {
            let sql = format!("DELETE FROM {table} WHERE id = '{ID}' AND api_key = 'k1'");
            match parse_sql(&sql).unwrap() {
                Command::Cancel { api_key, id } => {
                    assert_eq!(api_key, "k1");
                    assert_eq!(id.to_string(), ID);
                }
                cmd => panic!("expected Cancel, got {cmd:?}"),
            }
        }
        let sql = format!("DELETE FROM reservations WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("api_key"))));
    }

    #[test]
    fn parse_select_department() {
        let sql = r#"SELECT * FROM reservations WHERE department = 'lab-token' AND "end" > 100 AND start < 200"#;
        match parse_sql(sql).unwrap() {
            Command::SelectDepartment { token, window } => {
                assert_eq!(token, "lab-token");
                assert_eq!(window, Window::between(100, 200));
            }
            cmd => panic!("expected SelectDepartment, got {cmd:?}"),
        }

        let sql = "SELECT * FROM reservations WHERE department = 'lab-token'";
        match parse_sql(sql).unwrap() {
            Command::SelectDepartment { window, .. } => assert_eq!(window, Window::all()),
            cmd => panic!("expected SelectDepartment, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_resource_reservations() {
        let sql = format!(r#"SELECT * FROM reservations WHERE api_key = 'k1' AND resource_id = '{RES}' AND "end" > 5"#);
        match parse_sql(&sql).unwrap() {
            Command::SelectResourceReservations { resource_id, window, .. } => {
                assert_eq!(resource_id.to_string(), RES);
                assert_eq!(window, Window { from: Some(5), until: None });
            }
            cmd => panic!("expected SelectResourceReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_group() {
        let sql = r#"SELECT * FROM reservations WHERE api_key = 'k1' AND "group" = 'AV' AND "end" > 0 AND start < 10"#;
        match parse_sql(sql).unwrap() {
            Command::SelectGroup { api_key, group, window } => {
                assert_eq!(api_key, "k1");
                assert_eq!(group, "AV");
                assert_eq!(window, Window::between(0, 10));
            }
            cmd => panic!("expected SelectGroup, got {cmd:?}"),
        }
        let both = format!(r#"SELECT * FROM reservations WHERE api_key = 'k1' AND "group" = 'AV' AND resource_id = '{RES}'"#);
        assert!(matches!(parse_sql(&both), Err(SqlError::Unsupported(_))));
        let sql = "SELECT * FROM reservations WHERE department = 'lab-token' AND api_key = 'k1'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_rejects_operators_it_would_ignore() {
        let sql = r#"SELECT * FROM reservations WHERE department = 'lab' AND start > 100 AND "end" < 200"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(m)) if m == "operator > on start"));

        let sql = r#"SELECT * FROM reservations WHERE department = 'lab' AND start >= 100"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));

        let sql = "SELECT * FROM calendar WHERE api_key = 'k1' AND kind <> 'ILLNESS'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(m)) if m == "operator <> on kind"));

        let sql = format!("SELECT * FROM occupancy WHERE api_key = 'k1' AND resource_id = '{RES}' AND at > 1500");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));

        let sql = format!("DELETE FROM reservations WHERE id = '{ID}' AND api_key = 'k1' AND api_key = 'k2'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_calendar() {
        let sql = "SELECT * FROM calendar WHERE api_key = 'k1' AND kind = 'ILLNESS'";
        match parse_sql(sql).unwrap() {
            Command::SelectCalendar { api_key, owner, kind, window } => {
                assert_eq!(api_key, "k1");
                assert_eq!(owner, None);
                assert_eq!(kind, Some(TimeSpanKind::Illness));
                assert_eq!(window, Window::all());
            }
            cmd => panic!("expected SelectCalendar, got {cmd:?}"),
        }
        let sql = format!("SELECT * FROM calendar WHERE api_key = 'k1' AND owner = '{ID}' AND start < 50");
        match parse_sql(&sql).unwrap() {
            Command::SelectCalendar { owner, window, .. } => {
                assert_eq!(owner.map(|o| o.to_string()).as_deref(), Some(ID));
                assert_eq!(window, Window { from: None, until: Some(50) });
            }
            cmd => panic!("expected SelectCalendar, got {cmd:?}"),
        }
        assert!(matches!(
            parse_sql("SELECT * FROM calendar"),
            Err(SqlError::MissingFilter("api_key"))
        ));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE api_key = 'k1' AND resource_id = '{RES}' AND start >= 1000 AND \"end\" <= 2000 AND min_duration = 1800000"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { start, end, min_duration, .. } => {
                assert_eq!((start, end), (1000, 2000));
                assert_eq!(min_duration, Some(1_800_000));
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
        let missing = format!("SELECT * FROM availability WHERE api_key = 'k1' AND resource_id = '{RES}'");
        assert!(matches!(parse_sql(&missing), Err(SqlError::MissingFilter("start"))));
    }

    #[test]
    fn parse_select_occupancy() {
        let sql = format!("SELECT * FROM occupancy WHERE api_key = 'k1' AND resource_id = '{RES}' AND at = 1500");
        match parse_sql(&sql).unwrap() {
            Command::SelectOccupancy { at, .. } => assert_eq!(at, 1500),
            cmd => panic!("expected SelectOccupancy, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_rejects_unknown_filter_column() {
        let sql = "SELECT * FROM calendar WHERE api_key = 'k1' AND colour = 'red'";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(c)) if c == "colour"));
    }

    #[test]
    fn parse_negative_timestamp() {
        let sql = format!(r#"INSERT INTO reservations (id, api_key, resource_id, start, "end") VALUES ('{ID}', 'k', '{RES}', -5, 10)"#);
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { request, .. } => assert_eq!(request.start, -5),
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
