use std::collections::HashMap;

use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertScreening {
        id: Ulid,
        movie_id: Ulid,
        hall_id: Ulid,
        rows: u8,
        seats_per_row: u16,
        show_time: Ms,
        base_price: Money,
        category: Category,
    },
    /// `seats` stays raw text: a malformed label is a booking error, not a
    /// syntax error.
    InsertReservation {
        id: Ulid,
        screening_id: Ulid,
        seats: String,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectAvailableSeats {
        screening_id: Ulid,
    },
    SelectBookedSeats {
        screening_id: Ulid,
    },
    SelectQuote {
        screening_id: Ulid,
        seats: usize,
    },
    SelectReservations,
    SelectScreenings,
}

const SCREENING_COLUMNS: [&str; 8] = [
    "id",
    "movie_id",
    "hall_id",
    "rows",
    "seats_per_row",
    "show_time",
    "base_price",
    "category",
];

const RESERVATION_COLUMNS: [&str; 3] = ["id", "screening_id", "seats"];

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
    match table.as_str() {
        "screenings" => {
            let row = insert_row(insert, "screenings", &SCREENING_COLUMNS)?;
            Ok(Command::InsertScreening {
                id: parse_ulid(row.get("id")?)?,
                movie_id: parse_ulid(row.get("movie_id")?)?,
                hall_id: parse_ulid(row.get("hall_id")?)?,
                rows: parse_u8(row.get("rows")?)?,
                seats_per_row: parse_u16(row.get("seats_per_row")?)?,
                show_time: parse_i64(row.get("show_time")?)?,
                base_price: parse_money(row.get("base_price")?)?,
                category: parse_category(row.get("category")?)?,
            })
        }
        "reservations" => {
            let row = insert_row(insert, "reservations", &RESERVATION_COLUMNS)?;
            Ok(Command::InsertReservation {
                id: parse_ulid(row.get("id")?)?,
                screening_id: parse_ulid(row.get("screening_id")?)?,
                seats: parse_string(row.get("seats")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = where_filters(&delete.selection)?;
    Ok(Command::DeleteReservation {
        id: parse_ulid(filters.get("id")?)?,
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
    let filters = where_filters(&select.selection)?;

    match table.as_str() {
        "available_seats" => Ok(Command::SelectAvailableSeats {
            screening_id: parse_ulid(filters.get("screening_id")?)?,
        }),
        "booked_seats" => Ok(Command::SelectBookedSeats {
            screening_id: parse_ulid(filters.get("screening_id")?)?,
        }),
        "quote" => {
            let seats = parse_i64(filters.get("seats")?)?;
            Ok(Command::SelectQuote {
                screening_id: parse_ulid(filters.get("screening_id")?)?,
                seats: usize::try_from(seats)
                    .map_err(|_| SqlError::Parse(format!("bad seat count: {seats}")))?,
            })
        }
        "reservations" => Ok(Command::SelectReservations),
        "screenings" => Ok(Command::SelectScreenings),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Rows and filters ──────────────────────────────────────────

/// Named values, from an INSERT row or from `col = value` WHERE terms.
struct Cells {
    values: HashMap<String, Expr>,
}

impl Cells {
    fn get(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.values.get(col).ok_or(SqlError::MissingColumn(col))
    }
}

/// The single VALUES row, keyed by the column list, or by `defaults` when
/// the statement names no columns.
fn insert_row(
    insert: &ast::Insert,
    table: &'static str,
    defaults: &[&str],
) -> Result<Cells, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let row = match rows.as_slice() {
        [row] => row,
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != row.len() {
        return Err(SqlError::WrongArity(table, columns.len(), row.len()));
    }
    Ok(Cells {
        values: columns.into_iter().zip(row.iter().cloned()).collect(),
    })
}

fn where_filters(selection: &Option<Expr>) -> Result<Cells, SqlError> {
    let mut values = HashMap::new();
    if let Some(expr) = selection {
        collect_eq_filters(expr, &mut values)?;
    }
    Ok(Cells { values })
}

/// `a = 1 AND b = 'x'` → {a: 1, b: 'x'}. Anything else is unsupported.
fn collect_eq_filters(expr: &Expr, out: &mut HashMap<String, Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.insert(col, right.as_ref().clone());
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
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

/// Text of a string or number literal.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s),
        Some(other) => Err(SqlError::Parse(format!("expected literal, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        _ => Err(SqlError::Parse(format!("expected string, got {expr}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    let s = literal_text(expr)?;
    s.parse().map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64(expr)?;
    u16::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u16 range")))
}

fn parse_money(expr: &Expr) -> Result<Money, SqlError> {
    literal_text(expr)?
        .parse()
        .map_err(|e: MoneyParseError| SqlError::Parse(e.to_string()))
}

fn parse_category(expr: &Expr) -> Result<Category, SqlError> {
    parse_string(expr)?.parse().map_err(SqlError::Parse)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing value for {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
