//! Appending row batches to destination tables

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::{debug, info};

use super::pool::{Pool, PoolInner};
use super::schema::{SqlType, TableSchema, infer_table_schema, query_table_schema, quote_ident};
use crate::catalog::ColumnSpec;
use crate::config::MAX_BIND_PARAMS;
use crate::formats::RowBatch;

/// The table-append collaborator used by the loader
#[async_trait]
pub trait TableWriter: Send + Sync {
    /// Make sure `table` exists and return its columns.
    ///
    /// When the table is missing and `create_if_missing` is set, it is created
    /// from the declared column types, falling back to types inferred from
    /// `sample`.
    async fn prepare_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        sample: &RowBatch,
        create_if_missing: bool,
    ) -> Result<TableSchema>;

    /// Append every record of `batch` to `table`, keeping existing rows.
    ///
    /// A batch is appended atomically. Returns the number of rows appended.
    async fn append(&self, table: &TableSchema, batch: &RowBatch) -> Result<u64>;
}

/// Type category for SQL type conversion strategy
#[derive(Debug, Clone, Copy, PartialEq)]
enum TypeCategory {
    /// Parsed to Rust numeric / bool types
    NativeNumeric,
    /// Parsed to chrono types
    NativeParsed,
    /// Bound as text and converted with CAST in PostgreSQL
    StringCast,
    /// Text types with direct string binding
    DirectString,
}

impl TypeCategory {
    fn from_sql_type(sql_type: SqlType) -> Self {
        match sql_type {
            SqlType::Boolean
            | SqlType::SmallInt
            | SqlType::Integer
            | SqlType::BigInt
            | SqlType::Real
            | SqlType::DoublePrecision => TypeCategory::NativeNumeric,
            SqlType::Timestamp => TypeCategory::NativeParsed,
            SqlType::Numeric
            | SqlType::TimestampTz
            | SqlType::Date
            | SqlType::Time
            | SqlType::Uuid => TypeCategory::StringCast,
            SqlType::Text | SqlType::Varchar => TypeCategory::DirectString,
        }
    }
}

/// A parsed field ready to be bound to a statement parameter
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BindValue {
    Null(SqlType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl BindValue {
    /// Convert a raw CSV field for a column of `sql_type`; empty fields are NULL
    pub(crate) fn parse(value: &str, sql_type: SqlType) -> Result<Self> {
        let trimmed = value.trim();

        if trimmed.is_empty() {
            return Ok(BindValue::Null(sql_type));
        }

        Ok(match sql_type {
            SqlType::Boolean => BindValue::Bool(parse_bool(trimmed)?),
            SqlType::SmallInt => BindValue::I16(parse(trimmed, sql_type)?),
            SqlType::Integer => BindValue::I32(parse(trimmed, sql_type)?),
            SqlType::BigInt => BindValue::I64(parse(trimmed, sql_type)?),
            SqlType::Real => BindValue::F32(parse(trimmed, sql_type)?),
            SqlType::DoublePrecision => BindValue::F64(parse(trimmed, sql_type)?),
            SqlType::Timestamp => BindValue::Timestamp(parse_timestamp(trimmed)?),
            _ => BindValue::Text(value.to_string()),
        })
    }
}

/// Parse a value from string
fn parse<T: std::str::FromStr>(value: &str, sql_type: SqlType) -> Result<T>
where
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    value.parse().map_err(|e| {
        anyhow!(
            "Type mismatch: cannot convert '{}' to {}: {}",
            value,
            sql_type.to_postgres(),
            e
        )
    })
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        _ => Err(anyhow!(
            "Type mismatch: cannot convert '{}' to BOOLEAN",
            value
        )),
    }
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];

    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| {
            anyhow!(
                "Type mismatch: cannot convert '{}' to TIMESTAMP (expected e.g. '2024-01-15 14:30:00')",
                value
            )
        })
}

/// One parameterized INSERT statement
#[derive(Debug)]
pub(crate) struct Statement {
    pub sql: String,
    pub values: Vec<BindValue>,
}

/// Number of rows that fit one INSERT without exceeding the bind-parameter limit
fn rows_per_statement(insert_batch_size: usize, column_count: usize) -> usize {
    (MAX_BIND_PARAMS / column_count.max(1))
        .min(insert_batch_size)
        .max(1)
}

/// Type each column's text parameter is cast to, if any.
///
/// PostgreSQL will not implicitly cast text parameters to dates, times, numerics
/// or uuids, nor to catalog types the loader does not model (jsonb, arrays, enums).
fn cast_targets(
    table: &TableSchema,
    columns: &[String],
    use_pg_cast: bool,
) -> Vec<Option<String>> {
    columns
        .iter()
        .map(|name| {
            if !use_pg_cast {
                return None;
            }
            let column = table.column(name);
            if let Some(catalog_type) = column.and_then(|c| c.catalog_type.as_ref()) {
                return Some(catalog_type.clone());
            }
            let sql_type = column.map(|c| c.sql_type).unwrap_or(SqlType::Text);
            (TypeCategory::from_sql_type(sql_type) == TypeCategory::StringCast)
                .then(|| sql_type.to_postgres().to_string())
        })
        .collect()
}

/// Build `INSERT INTO "t" ("a", "b") VALUES ($1, $2), ($3, $4), ...`
fn build_insert_sql(
    table: &str,
    columns: &[String],
    casts: &[Option<String>],
    row_count: usize,
) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();

    let mut value_groups = Vec::with_capacity(row_count);
    let mut param_idx = 1;
    for _ in 0..row_count {
        let placeholders: Vec<String> = casts
            .iter()
            .map(|cast| {
                let placeholder = format!("${}", param_idx);
                param_idx += 1;
                match cast {
                    Some(target) => format!("CAST({} AS {})", placeholder, target),
                    None => placeholder,
                }
            })
            .collect();
        value_groups.push(format!("({})", placeholders.join(", ")));
    }

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        column_list.join(", "),
        value_groups.join(", ")
    )
}

/// [`TableWriter`] backed by the run's connection pool
pub struct BatchWriter {
    pool: Pool,
    insert_batch_size: usize,
}

impl BatchWriter {
    pub fn new(pool: Pool, insert_batch_size: usize) -> Self {
        Self {
            pool,
            insert_batch_size,
        }
    }

    fn build_statements(&self, table: &TableSchema, batch: &RowBatch) -> Result<Vec<Statement>> {
        let types: Vec<SqlType> = batch
            .columns
            .iter()
            .map(|c| table.column_type(c))
            .collect();
        let casts = cast_targets(table, &batch.columns, self.pool.is_postgres());
        let step = rows_per_statement(self.insert_batch_size, batch.columns.len());

        let mut statements = Vec::with_capacity(batch.len().div_ceil(step));
        for (group_idx, rows) in batch.records.chunks(step).enumerate() {
            let sql = build_insert_sql(&table.name, &batch.columns, &casts, rows.len());

            let mut values = Vec::with_capacity(rows.len() * types.len());
            for row_idx in 0..rows.len() {
                let idx = group_idx * step + row_idx;
                let line = batch.first_row + idx as u64 + 1;
                for ((column, value), sql_type) in batch.named(idx).zip(&types) {
                    let bound = BindValue::parse(value, *sql_type)
                        .with_context(|| format!("Row {} column '{}'", line, column))?;
                    values.push(bound);
                }
            }

            statements.push(Statement { sql, values });
        }

        Ok(statements)
    }
}

#[async_trait]
impl TableWriter for BatchWriter {
    async fn prepare_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
        sample: &RowBatch,
        create_if_missing: bool,
    ) -> Result<TableSchema> {
        if let Some(schema) = query_table_schema(&self.pool, table).await? {
            debug!(table, columns = schema.columns.len(), "table exists");
            return Ok(schema);
        }

        if !create_if_missing {
            anyhow::bail!(
                "Table '{}' does not exist. Run without --no-create-table to create it automatically.",
                table
            );
        }

        let schema = infer_table_schema(table, columns, sample);
        info!(table, columns = schema.columns.len(), "Creating table");
        self.pool
            .execute_query(&schema.generate_ddl())
            .await
            .with_context(|| format!("Failed to create table '{}'", table))?;

        query_table_schema(&self.pool, table)
            .await?
            .ok_or_else(|| anyhow!("Table '{}' is not visible after creation", table))
    }

    async fn append(&self, table: &TableSchema, batch: &RowBatch) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }
        if batch.columns.is_empty() {
            anyhow::bail!("Cannot append to '{}': the batch has no columns", table.name);
        }

        let statements = self.build_statements(table, batch)?;
        execute_statements(&self.pool, &statements)
            .await
            .with_context(|| {
                format!(
                    "Failed to append rows {}..{} to '{}'",
                    batch.first_row + 1,
                    batch.first_row + batch.len() as u64,
                    table.name
                )
            })
    }
}

/// Run all statements in one transaction, returning the rows affected
async fn execute_statements(pool: &Pool, statements: &[Statement]) -> Result<u64, sqlx::Error> {
    let mut rows = 0u64;
    match &pool.inner {
        PoolInner::Postgres(pg) => {
            let mut tx = pg.begin().await?;
            for statement in statements {
                let mut query = sqlx::query(&statement.sql);
                for value in &statement.values {
                    query = bind_pg(query, value);
                }
                rows += query.execute(&mut *tx).await?.rows_affected();
            }
            tx.commit().await?;
        }
        #[cfg(test)]
        PoolInner::Sqlite(sqlite) => {
            let mut tx = sqlite.begin().await?;
            for statement in statements {
                let sqlite_sql = convert_to_sqlite_placeholders(&statement.sql);
                let mut query = sqlx::query(&sqlite_sql);
                for value in &statement.values {
                    query = bind_sqlite(query, value);
                }
                rows += query.execute(&mut *tx).await?.rows_affected();
            }
            tx.commit().await?;
        }
    }
    Ok(rows)
}

fn bind_pg<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q BindValue,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        // Typed NULLs so the parameter types line up with the column
        BindValue::Null(sql_type) => match sql_type {
            SqlType::Boolean => query.bind(None::<bool>),
            SqlType::SmallInt => query.bind(None::<i16>),
            SqlType::Integer => query.bind(None::<i32>),
            SqlType::BigInt => query.bind(None::<i64>),
            SqlType::Real => query.bind(None::<f32>),
            SqlType::DoublePrecision => query.bind(None::<f64>),
            SqlType::Timestamp => query.bind(None::<NaiveDateTime>),
            _ => query.bind(None::<String>),
        },
        BindValue::Bool(v) => query.bind(*v),
        BindValue::I16(v) => query.bind(*v),
        BindValue::I32(v) => query.bind(*v),
        BindValue::I64(v) => query.bind(*v),
        BindValue::F32(v) => query.bind(*v),
        BindValue::F64(v) => query.bind(*v),
        BindValue::Timestamp(v) => query.bind(*v),
        BindValue::Text(v) => query.bind(v.as_str()),
    }
}

#[cfg(test)]
fn bind_sqlite<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &'q BindValue,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        BindValue::Null(_) => query.bind(None::<String>),
        BindValue::Bool(v) => query.bind(*v),
        BindValue::I16(v) => query.bind(*v),
        BindValue::I32(v) => query.bind(*v),
        BindValue::I64(v) => query.bind(*v),
        BindValue::F32(v) => query.bind(*v),
        BindValue::F64(v) => query.bind(*v),
        BindValue::Timestamp(v) => query.bind(*v),
        BindValue::Text(v) => query.bind(v.as_str()),
    }
}

/// Convert Postgres-style placeholders ($1, $2, ...) to SQLite-style (?, ?, ...)
#[cfg(test)]
fn convert_to_sqlite_placeholders(sql: &str) -> String {
    let mut result = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            // Skip the dollar sign and any following digits
            while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                chars.next();
            }
            result.push('?');
        } else {
            result.push(ch);
        }
    }

    result
}
