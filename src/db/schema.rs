use anyhow::Context;

use crate::catalog::ColumnSpec;
use crate::formats::RowBatch;

/// SQL data type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    Numeric,
    Text,
    Varchar,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Uuid,
}

impl SqlType {
    /// Returns the Postgres type name
    pub fn to_postgres(&self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::DoublePrecision => "DOUBLE PRECISION",
            SqlType::Numeric => "NUMERIC",
            SqlType::Text => "TEXT",
            SqlType::Varchar => "VARCHAR",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::TimestampTz => "TIMESTAMP WITH TIME ZONE",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Uuid => "UUID",
        }
    }

    /// Map a type name to a `SqlType`.
    ///
    /// Accepts both the names reported by the database catalog and the
    /// `data_type` strings of schema documents (`varchar(45)`, `int`, ...).
    /// Returns `None` for names it does not recognise.
    pub fn from_declared(name: &str) -> Option<SqlType> {
        let lower = name.trim().to_ascii_lowercase();
        if lower.ends_with("[]") {
            return None;
        }
        // Drop length / precision modifiers: varchar(45), numeric(10,2)
        let base = lower.split('(').next().unwrap_or_default().trim();

        let sql_type = match base {
            "boolean" | "bool" => SqlType::Boolean,
            "smallint" | "int2" => SqlType::SmallInt,
            "integer" | "int" | "int4" => SqlType::Integer,
            "bigint" | "int8" | "long" => SqlType::BigInt,
            "real" | "float4" => SqlType::Real,
            "double precision" | "double" | "float" | "float8" => SqlType::DoublePrecision,
            "numeric" | "decimal" => SqlType::Numeric,
            "text" | "string" => SqlType::Text,
            "varchar" | "character varying" | "char" | "character" | "bpchar" => {
                SqlType::Varchar
            }
            "timestamp" | "timestamp without time zone" | "datetime" => SqlType::Timestamp,
            "timestamptz" | "timestamp with time zone" => SqlType::TimestampTz,
            "date" => SqlType::Date,
            "time" | "time without time zone" => SqlType::Time,
            "uuid" => SqlType::Uuid,
            _ => return None,
        };
        Some(sql_type)
    }

    /// Find the most specific common type that accommodates both types
    pub fn common_type(&self, other: &SqlType) -> SqlType {
        if self == other {
            return *self;
        }

        use SqlType::*;
        match (self, other) {
            (SmallInt | Integer | BigInt, SmallInt | Integer | BigInt) => BigInt,
            (SmallInt | Integer | BigInt | Real | DoublePrecision, Real | DoublePrecision)
            | (Real | DoublePrecision, SmallInt | Integer | BigInt) => DoublePrecision,
            _ => Text,
        }
    }
}

/// A column of a destination table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Database type name of a column whose type has no `SqlType`.
    /// Values for it are bound as text and cast to this type.
    pub catalog_type: Option<String>,
}

/// The columns of a destination table, in table order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Type of the named column; columns the table does not know bind as text
    pub fn column_type(&self, name: &str) -> SqlType {
        self.column(name)
            .map(|c| c.sql_type)
            .unwrap_or(SqlType::Text)
    }

    /// Generate the DDL statement that creates this table when it is missing
    pub fn generate_ddl(&self) -> String {
        let mut ddl = format!("CREATE TABLE IF NOT EXISTS {} (\n", quote_ident(&self.name));

        let column_defs: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let nullable_clause = if col.nullable { "" } else { " NOT NULL" };
                format!(
                    "  {} {}{}",
                    quote_ident(&col.name),
                    col.sql_type.to_postgres(),
                    nullable_clause
                )
            })
            .collect();

        ddl.push_str(&column_defs.join(",\n"));
        ddl.push_str("\n)");

        ddl
    }
}

/// Query the columns of an existing table; `None` when the table does not exist
pub async fn query_table_schema(
    pool: &super::pool::Pool,
    table_name: &str,
) -> anyhow::Result<Option<TableSchema>> {
    let rows = pool
        .table_columns(table_name)
        .await
        .with_context(|| format!("Failed to query schema of table '{}'", table_name))?;

    if rows.is_empty() {
        return Ok(None);
    }

    Ok(Some(TableSchema {
        name: table_name.to_string(),
        columns: rows.into_iter().map(catalog_column).collect(),
    }))
}

/// Column from a (name, type name) pair reported by the database catalog
fn catalog_column((name, type_name): (String, String)) -> Column {
    match SqlType::from_declared(&type_name) {
        Some(sql_type) => Column {
            name,
            sql_type,
            nullable: true,
            catalog_type: None,
        },
        None => Column {
            name,
            sql_type: SqlType::Text,
            nullable: true,
            catalog_type: Some(type_name),
        },
    }
}

/// Quote an identifier for use in generated SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Infer the type of a single raw field, `None` for an empty (NULL) field.
///
/// Mirrors the dtypes a dataframe reader would settle on: integers, floats,
/// booleans, everything else as text.
fn infer_value_type(value: &str) -> Option<SqlType> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return None;
    }

    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        return Some(SqlType::Boolean);
    }

    if trimmed.parse::<i64>().is_ok() {
        return Some(SqlType::BigInt);
    }

    if trimmed.parse::<f64>().is_ok() {
        return Some(SqlType::DoublePrecision);
    }

    Some(SqlType::Text)
}

/// Infer a column type from its sampled values
fn infer_column_type<'a>(values: impl Iterator<Item = &'a str>) -> SqlType {
    let mut inferred: Option<SqlType> = None;

    for value in values {
        if let Some(val_type) = infer_value_type(value) {
            inferred = Some(match inferred {
                None => val_type,
                Some(current) => current.common_type(&val_type),
            });
        }
    }

    inferred.unwrap_or(SqlType::Text)
}

/// Build the schema for a table that does not exist yet.
///
/// Declared types from the schema document win; undeclared or unrecognised
/// types are inferred from the sample batch. Every column is nullable since
/// later batches may contain empty fields.
pub fn infer_table_schema(table: &str, specs: &[ColumnSpec], sample: &RowBatch) -> TableSchema {
    let columns = specs
        .iter()
        .enumerate()
        .map(|(idx, spec)| {
            let sql_type = spec
                .data_type
                .as_deref()
                .and_then(SqlType::from_declared)
                .unwrap_or_else(|| {
                    infer_column_type(
                        sample
                            .records
                            .iter()
                            .filter_map(|r| r.fields.get(idx).map(String::as_str)),
                    )
                });
            Column {
                name: spec.name.clone(),
                sql_type,
                nullable: true,
                catalog_type: None,
            }
        })
        .collect();

    TableSchema {
        name: table.to_string(),
        columns,
    }
}
