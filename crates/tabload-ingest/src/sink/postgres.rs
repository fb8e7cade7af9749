// PostgreSQL table sink

use crate::batch::{CellValue, RowBatch};
use crate::config::DestinationConfig;
use crate::error::{IngestError, Result};
use crate::schema::{ColumnType, TableSchema};
use crate::sink::TableSink;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::PgConnectOptions;
use sqlx::query_builder::Separated;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info, warn};

/// PostgreSQL accepts at most this many bind parameters per statement
pub const PG_BIND_LIMIT: usize = 65_535;

/// Rows per INSERT statement for a table with `columns` columns
pub fn rows_per_statement(columns: usize) -> usize {
    (PG_BIND_LIMIT / columns.max(1)).max(1)
}

/// One owned connection to the destination database
pub struct PostgresSink {
    conn: Option<PgConnection>,
    options: PgConnectOptions,
    connect_timeout: Duration,
    display_url: String,
}

impl PostgresSink {
    /// Connect, bounded by `connect_timeout`
    pub async fn connect(destination: &DestinationConfig, connect_timeout: Duration) -> Result<Self> {
        let options = destination.connect_options();
        let display_url = destination.redacted_url();

        let conn = open(&options, connect_timeout, &display_url).await?;
        info!("Connected to {}", display_url);

        Ok(PostgresSink {
            conn: Some(conn),
            options,
            connect_timeout,
            display_url,
        })
    }

    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| IngestError::Connection(format!("connection to {} is closed", self.display_url)))
    }
}

async fn open(options: &PgConnectOptions, timeout: Duration, display_url: &str) -> Result<PgConnection> {
    match tokio::time::timeout(timeout, PgConnection::connect_with(options)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(IngestError::Connection(format!("{}: {}", display_url, e))),
        Err(_) => Err(IngestError::Connection(format!(
            "{}: timed out after {}s",
            display_url,
            timeout.as_secs()
        ))),
    }
}

#[async_trait]
impl TableSink for PostgresSink {
    async fn replace_table(&mut self, schema: &TableSchema) -> Result<()> {
        let drop_sql = schema.drop_table_sql();
        let create_sql = schema.create_table_sql();
        debug!(sql = %create_sql, "Replacing table");

        let mut tx = self.conn()?.begin().await?;
        sqlx::query(&drop_sql).execute(&mut *tx).await?;
        sqlx::query(&create_sql).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn append(&mut self, schema: &TableSchema, batch: &RowBatch) -> Result<u64> {
        let prefix = schema.insert_prefix();
        let per_statement = rows_per_statement(schema.columns.len());
        let mut written = 0u64;

        let mut tx = self.conn()?.begin().await?;

        for rows in batch.rows.chunks(per_statement) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(prefix.as_str());

            query_builder.push_values(rows, |mut b, row| {
                for (cell, column) in row.iter().zip(&schema.columns) {
                    push_cell(&mut b, cell, column.column_type);
                }
            });

            let result = query_builder.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }

        tx.commit().await?;

        Ok(written)
    }

    async fn reset(&mut self) -> Result<()> {
        if let Some(old) = self.conn.take() {
            if let Err(e) = old.close().await {
                debug!("Ignoring close error on stale connection: {}", e);
            }
        }

        let conn = open(&self.options, self.connect_timeout, &self.display_url).await?;
        self.conn = Some(conn);
        info!("Reconnected to {}", self.display_url);

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => {
                conn.close().await.map_err(|e| {
                    warn!("Error closing connection to {}: {}", self.display_url, e);
                    IngestError::Connection(e.to_string())
                })?;
                debug!("Closed connection to {}", self.display_url);
                Ok(())
            },
            None => Ok(()),
        }
    }
}

/// Bind one cell; NULLs are typed after their column so PostgreSQL can
/// resolve the parameter.
fn push_cell<'args>(
    b: &mut Separated<'_, 'args, Postgres, &'static str>,
    cell: &'args CellValue,
    column_type: ColumnType,
) {
    match cell {
        CellValue::Null => match column_type {
            ColumnType::Text => b.push_bind(None::<String>),
            ColumnType::BigInt => b.push_bind(None::<i64>),
            ColumnType::Double => b.push_bind(None::<f64>),
            ColumnType::Boolean => b.push_bind(None::<bool>),
            ColumnType::Timestamp => b.push_bind(None::<NaiveDateTime>),
        },
        CellValue::Text(v) => b.push_bind(v.as_str()),
        CellValue::BigInt(v) => b.push_bind(*v),
        CellValue::Double(v) => b.push_bind(*v),
        CellValue::Boolean(v) => b.push_bind(*v),
        CellValue::Timestamp(v) => b.push_bind(*v),
    };
}
