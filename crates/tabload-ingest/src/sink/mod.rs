//! Destination table interface
//!
//! The schema initializer and the loader only talk to a [`TableSink`].
//! [`PostgresSink`] is the production implementation.

pub mod postgres;

pub use postgres::PostgresSink;

use crate::batch::RowBatch;
use crate::error::Result;
use crate::schema::TableSchema;
use async_trait::async_trait;

/// A relational table that can be replaced and appended to
#[async_trait]
pub trait TableSink: Send {
    /// Drop the table if it exists and create it empty with `schema`
    ///
    /// Both statements run in one transaction.
    async fn replace_table(&mut self, schema: &TableSchema) -> Result<()>;

    /// Append every row of `batch` atomically, returning rows written
    ///
    /// Never replaces or truncates the table.
    async fn append(&mut self, schema: &TableSchema, batch: &RowBatch) -> Result<u64>;

    /// Re-establish the underlying connection after a transient failure
    async fn reset(&mut self) -> Result<()>;

    /// Release the connection. Calling it twice is a no-op.
    async fn close(&mut self) -> Result<()>;
}
