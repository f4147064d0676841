//! Query orchestration: execute, resolve, drain, and defer emission.

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::BackendConnector;
use crate::error::GatewayError;

use super::materialize::{materialize_row, slots_for};
use super::resolve::{describe_columns, ColumnDescriptor};
use super::stream::{RowSink, RowWriter};
use super::PgValue;

/// A fully drained result set, ready for deferred emission.
///
/// Owns the descriptor list and the buffered rows; the backend cursor is
/// already closed by the time a value of this type exists.
#[derive(Debug)]
pub struct PreparedResult {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<PgValue>>,
}

impl PreparedResult {
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Deferred emission routine: announce the schema, then stream the
    /// buffered rows in their original cursor order and complete with an
    /// empty status tag. A failed write stops emission immediately.
    pub async fn emit<S: RowSink>(&self, sink: &mut S) -> Result<(), GatewayError> {
        sink.announce(&self.columns).await?;
        let mut writer = RowWriter::new(sink);
        for row in &self.rows {
            writer.write_row(row).await?;
        }
        writer.complete("").await
    }
}

/// Translates one simple-query text into a prepared, buffered result.
///
/// The backend handle is shared process-wide and injected at construction;
/// the handler itself holds no per-query state.
pub struct QueryHandler {
    backend: Arc<dyn BackendConnector>,
}

impl QueryHandler {
    pub fn new(backend: Arc<dyn BackendConnector>) -> Self {
        Self { backend }
    }

    /// Execute a query and drain its entire result set.
    ///
    /// Drains eagerly: every row is materialized before anything is
    /// announced to the client, so a row failure always surfaces before the
    /// schema goes out. Any failure here closes the cursor and returns with
    /// no partial schema or rows.
    pub async fn handle(&self, query_text: &str) -> Result<PreparedResult, GatewayError> {
        let sql = strip_terminator(query_text);
        info!(query = sql, "incoming SQL query");

        let (columns, mut cursor) = self.backend.execute(sql).await?;
        let descriptors = describe_columns(&columns);
        let mut slots = slots_for(&descriptors);

        let mut rows = Vec::new();
        loop {
            match cursor.next().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    cursor.close().await;
                    return Err(e);
                }
            }
            if let Err(e) = cursor.scan_into(&mut slots) {
                cursor.close().await;
                return Err(e);
            }
            rows.push(materialize_row(&slots));
        }
        cursor.close().await;

        debug!(
            columns = descriptors.len(),
            rows = rows.len(),
            "result set drained"
        );
        Ok(PreparedResult {
            columns: descriptors,
            rows,
        })
    }
}

/// Drop the terminator the wire protocol appends to simple-query text. The
/// backend rejects trailing semicolons, so those go too.
fn strip_terminator(query: &str) -> &str {
    let trimmed = query.trim_end_matches('\0').trim_end();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed);
    trimmed.trim_end()
}
