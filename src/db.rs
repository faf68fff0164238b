use crate::error::Result;
use crate::schema::{Column, Schema, Table};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column as _, Connection, Row, TypeInfo};
use tracing::{debug, warn};

/// One result row keyed by column name.
pub type QueryRow = serde_json::Map<String, JsonValue>;

const LIST_TABLES_SQL: &str = r#"
    SELECT table_name::text
    FROM information_schema.tables
    WHERE table_schema = 'public'
    ORDER BY table_name
"#;

const TABLE_COLUMNS_SQL: &str = r#"
    SELECT column_name::text, data_type::text
    FROM information_schema.columns
    WHERE table_schema = 'public' AND table_name = $1
    ORDER BY ordinal_position
"#;

/// Appends `sslmode=disable` unless the string already names an ssl mode.
pub fn normalize_connection_string(connection: &str) -> String {
    if connection.contains("sslmode=") {
        return connection.to_string();
    }
    let separator = if connection.contains('?') { '&' } else { '?' };
    format!("{connection}{separator}sslmode=disable")
}

async fn connect(connection: &str) -> Result<PgConnection> {
    let url = normalize_connection_string(connection);
    Ok(PgConnection::connect(&url).await?)
}

async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "Error closing connection");
    }
}

pub async fn list_tables(connection: &str) -> Result<Vec<String>> {
    let mut conn = connect(connection).await?;
    let result = sqlx::query_scalar::<_, String>(LIST_TABLES_SQL)
        .fetch_all(&mut conn)
        .await;
    close(conn).await;

    let tables = result?;
    debug!(count = tables.len(), "Listed tables");
    Ok(tables)
}

pub async fn table_columns(connection: &str, table: &str) -> Result<Vec<Column>> {
    let mut conn = connect(connection).await?;
    let result = sqlx::query_as::<_, (String, String)>(TABLE_COLUMNS_SQL)
        .bind(table)
        .fetch_all(&mut conn)
        .await;
    close(conn).await;

    Ok(result?
        .into_iter()
        .map(|(name, data_type)| Column::new(name, data_type))
        .collect())
}

/// Fetches columns for each table in turn. Tables whose columns cannot be
/// fetched are logged and left out.
pub async fn fetch_schema(connection: &str, tables: &[String]) -> Schema {
    let mut schema = Schema::default();

    for name in tables {
        match table_columns(connection, name).await {
            Ok(columns) => schema.tables.push(Table {
                name: name.clone(),
                columns,
            }),
            Err(e) => warn!(table = %name, error = %e, "Error fetching schema for table"),
        }
    }

    schema
}

/// Runs `sql` and materializes every returned row.
///
/// The statement goes over the simple query protocol, so every value comes
/// back in text form and is decoded by column type.
pub async fn execute(connection: &str, sql: &str) -> Result<Vec<QueryRow>> {
    debug!(sql = %sql, "Executing query");

    let mut conn = connect(connection).await?;
    let result = sqlx::raw_sql(sql).fetch_all(&mut conn).await;
    close(conn).await;

    result?.iter().map(row_to_json).collect()
}

fn row_to_json(row: &PgRow) -> Result<QueryRow> {
    let mut map = QueryRow::new();

    for column in row.columns() {
        let text: Option<&str> = row.try_get_unchecked(column.ordinal())?;
        let value = match text {
            Some(text) => decode_text_value(column.type_info().name(), text),
            None => JsonValue::Null,
        };
        map.insert(column.name().to_string(), value);
    }

    Ok(map)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Json,
    Text,
}

pub fn categorize_type(type_name: &str) -> TypeCategory {
    match type_name.to_uppercase().as_str() {
        "INT2" | "INT4" | "INT8" | "SMALLINT" | "INTEGER" | "BIGINT" | "OID" => {
            TypeCategory::Integer
        }
        "FLOAT4" | "FLOAT8" | "REAL" | "DOUBLE PRECISION" => TypeCategory::Float,
        "NUMERIC" | "DECIMAL" | "MONEY" => TypeCategory::Decimal,
        "BOOL" | "BOOLEAN" => TypeCategory::Boolean,
        "JSON" | "JSONB" => TypeCategory::Json,
        _ => TypeCategory::Text,
    }
}

/// Converts the text form of a value into the closest JSON scalar.
/// Anything that fails to parse falls back to a string.
pub fn decode_text_value(type_name: &str, text: &str) -> JsonValue {
    let fallback = || JsonValue::String(text.to_string());

    match categorize_type(type_name) {
        TypeCategory::Integer => text
            .parse::<i64>()
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or_else(|_| fallback()),
        TypeCategory::Float => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or_else(fallback),
        TypeCategory::Boolean => match text {
            "t" | "true" => JsonValue::Bool(true),
            "f" | "false" => JsonValue::Bool(false),
            _ => fallback(),
        },
        TypeCategory::Json => serde_json::from_str(text).unwrap_or_else(|_| fallback()),
        // numeric keeps its exact textual precision
        TypeCategory::Decimal | TypeCategory::Text => fallback(),
    }
}
