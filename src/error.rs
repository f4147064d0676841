//! Error taxonomy for the gateway
//!
//! Each variant corresponds to one failure boundary: process startup, one
//! query, one row, or the client socket. Single-cell interpretation failures
//! use [`CellError`] and never leave the materializer; the affected cell
//! degrades to SQL NULL instead.

use thiserror::Error;

/// Errors that can reach a query or process boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The backend was unreachable at startup. Fatal and not retried.
    #[error("trino cluster unreachable: {0}")]
    Connection(String),

    /// The backend rejected a statement. Scoped to one query; the client
    /// connection stays usable.
    #[error("query execution failed: {0}")]
    Execution(String),

    /// A full-row read failed mid-stream. Aborts the in-flight query.
    #[error("row scan failed: {0}")]
    RowScan(String),

    /// The protocol encoder rejected a row during emission. Aborts the rest
    /// of the emission.
    #[error("stream write failed: {0}")]
    StreamWrite(#[from] std::io::Error),
}

impl GatewayError {
    /// SQLSTATE code reported to the client for this error class.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            GatewayError::Connection(_) => "08001",
            GatewayError::Execution(_) => "42601",
            GatewayError::RowScan(_) => "XX000",
            GatewayError::StreamWrite(_) => "08006",
        }
    }
}

/// Failure interpreting a single cell.
///
/// Recovered where it occurs: the cell yields NULL and the row continues.
#[derive(Debug, Error)]
#[error("cell extraction failed: {0}")]
pub struct CellError(pub String);
