//! Destination schema derivation and bootstrap
//!
//! The schema comes from a header-only probe of the canonical artifact.
//! Column types are taken from the configured coercion list; everything
//! else stays `TEXT` unless an inference sample is requested, in which case
//! the first rows narrow each column to the tightest type that fits.

use crate::error::{IngestError, Result};
use crate::normalize::CanonicalArtifact;
use crate::sink::TableSink;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Column types the loader can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    BigInt,
    Double,
    Boolean,
    Timestamp,
}

impl ColumnType {
    /// PostgreSQL type name used in `CREATE TABLE`
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    /// Least upper bound of two observed types
    fn widen(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (BigInt, Double) | (Double, BigInt) => Double,
            _ => Text,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Text => "text",
            ColumnType::BigInt => "bigint",
            ColumnType::Double => "double",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ColumnType {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "string" | "varchar" => Ok(ColumnType::Text),
            "bigint" | "int" | "int64" | "integer" => Ok(ColumnType::BigInt),
            "double" | "float" | "float64" | "double precision" => Ok(ColumnType::Double),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "timestamp" | "datetime" => Ok(ColumnType::Timestamp),
            other => Err(IngestError::Config(format!("unknown column type '{}'", other))),
        }
    }
}

/// Explicit type for one named column, written `name:type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCoercion {
    pub column: String,
    pub target: ColumnType,
}

impl ColumnCoercion {
    pub fn new(column: impl Into<String>, target: ColumnType) -> Self {
        Self {
            column: column.into(),
            target,
        }
    }

    /// Pickup/dropoff timestamps of the public taxi trip datasets
    pub fn defaults() -> Vec<ColumnCoercion> {
        vec![
            ColumnCoercion::new("tpep_pickup_datetime", ColumnType::Timestamp),
            ColumnCoercion::new("tpep_dropoff_datetime", ColumnType::Timestamp),
        ]
    }
}

impl std::str::FromStr for ColumnCoercion {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (column, target) = s.rsplit_once(':').ok_or_else(|| {
            IngestError::Config(format!("coercion '{}' must look like column:type", s))
        })?;

        if column.is_empty() {
            return Err(IngestError::Config(format!("coercion '{}' has no column name", s)));
        }

        Ok(ColumnCoercion::new(column, target.parse()?))
    }
}

/// Where a column's type came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeOrigin {
    Default,
    Declared,
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub origin: TypeOrigin,
}

/// Destination table layout, in artifact header order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Build a schema from header names, declared coercions and an optional
    /// inference result (one entry per header column).
    pub fn from_header(
        table: &str,
        header: &[String],
        coercions: &[ColumnCoercion],
        inferred: Option<&[Option<ColumnType>]>,
    ) -> Result<Self> {
        if header.is_empty() {
            return Err(IngestError::SchemaMismatch(
                "artifact has no header row".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (idx, name) in header.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(IngestError::SchemaMismatch(format!(
                    "header column {} has an empty name",
                    idx + 1
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(IngestError::SchemaMismatch(format!(
                    "duplicate header column '{}'",
                    name
                )));
            }
        }

        let missing: Vec<&str> = coercions
            .iter()
            .filter(|c| !seen.contains(c.column.as_str()))
            .map(|c| c.column.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::SchemaMismatch(format!(
                "coerced column(s) not in header: {}",
                missing.join(", ")
            )));
        }

        let columns = header
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let declared = coercions.iter().rev().find(|c| &c.column == name);
                let inferred = inferred.and_then(|types| types.get(idx).copied().flatten());

                let (column_type, origin) = match (declared, inferred) {
                    (Some(c), _) => (c.target, TypeOrigin::Declared),
                    (None, Some(t)) => (t, TypeOrigin::Inferred),
                    (None, None) => (ColumnType::Text, TypeOrigin::Default),
                };

                ColumnDef {
                    name: name.clone(),
                    column_type,
                    origin,
                }
            })
            .collect();

        Ok(TableSchema {
            table: table.to_string(),
            columns,
        })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Quoted, optionally schema-qualified table name
    pub fn qualified_table(&self) -> String {
        self.table
            .splitn(2, '.')
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn drop_table_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.qualified_table())
    }

    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({})", self.qualified_table(), columns)
    }

    /// `INSERT INTO t ("a", "b") ` prefix for multi-row inserts
    pub fn insert_prefix(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {} ({}) ", self.qualified_table(), columns)
    }
}

/// Double-quote an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Read the header of a CSV artifact without touching any data rows
pub fn probe_header(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

/// Scan up to `limit` rows and report the tightest type seen per column
///
/// `None` means the column held no non-empty value in the sample.
pub fn infer_column_types(
    path: &Path,
    columns: usize,
    limit: usize,
) -> Result<Vec<Option<ColumnType>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut types: Vec<Option<ColumnType>> = vec![None; columns];
    for record in reader.records().take(limit) {
        let record = record?;
        for (slot, value) in types.iter_mut().zip(record.iter()) {
            if value.is_empty() {
                continue;
            }
            let observed = classify(value);
            *slot = Some(match *slot {
                Some(current) => current.widen(observed),
                None => observed,
            });
        }
    }

    Ok(types)
}

fn classify(value: &str) -> ColumnType {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
        ColumnType::Boolean
    } else if value.parse::<i64>().is_ok() {
        ColumnType::BigInt
    } else if value.parse::<f64>().is_ok() {
        ColumnType::Double
    } else {
        ColumnType::Text
    }
}

/// Derives the destination schema and recreates the table empty
#[derive(Debug, Clone)]
pub struct SchemaInitializer {
    coercions: Vec<ColumnCoercion>,
    infer_rows: usize,
}

impl SchemaInitializer {
    pub fn new(coercions: Vec<ColumnCoercion>, infer_rows: usize) -> Self {
        Self {
            coercions,
            infer_rows,
        }
    }

    /// Derive the schema from the artifact without touching the destination
    pub fn derive(&self, artifact: &CanonicalArtifact, table: &str) -> Result<TableSchema> {
        let header = probe_header(&artifact.path)?;
        debug!(columns = header.len(), "Probed artifact header");

        let inferred = if self.infer_rows > 0 {
            Some(infer_column_types(&artifact.path, header.len(), self.infer_rows)?)
        } else {
            None
        };

        TableSchema::from_header(table, &header, &self.coercions, inferred.as_deref())
    }

    /// Derive the schema, then drop and recreate the destination table
    ///
    /// Never retried: a failure here leaves the run before any data moves.
    pub async fn initialize<S: TableSink + ?Sized>(
        &self,
        sink: &mut S,
        artifact: &CanonicalArtifact,
        table: &str,
    ) -> Result<TableSchema> {
        let this = self.clone();
        let artifact_owned = artifact.clone();
        let table_owned = table.to_string();
        let schema =
            tokio::task::spawn_blocking(move || this.derive(&artifact_owned, &table_owned))
                .await??;

        sink.replace_table(&schema).await?;

        info!(
            table = %schema.table,
            columns = schema.columns.len(),
            "Destination table recreated"
        );

        Ok(schema)
    }
}
