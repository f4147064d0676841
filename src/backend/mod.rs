//! Backend layer - column metadata, cell representations, and the Trino connector

pub mod trino;

pub use trino::TrinoConnector;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::error::GatewayError;

/// Declared in-memory shape for one column's values.
///
/// Derived from the backend's type signature at schema time, before any row
/// is fetched, so the wire type identifier can be announced up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanRepr {
    Bool,
    Int4,
    Int8,
    Float8,
    Timestamp,
    Text,
    /// Array nested `depth` levels (1..=3); `elem` is the innermost shape.
    Array { elem: Box<ScanRepr>, depth: u8 },
    Map,
    /// Signature the gateway has no native shape for; values fall back to
    /// display text. Carries the original signature for diagnostics.
    Other(String),
}

/// Metadata for one result column, as reported by the backend.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    name: String,
    repr: ScanRepr,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, repr: ScanRepr) -> Self {
        Self {
            name: name.into(),
            repr,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scan_repr(&self) -> &ScanRepr {
        &self.repr
    }
}

/// One cell as delivered by the backend driver.
///
/// A closed set of shapes: downstream code matches on the tag and never
/// inspects runtime types. `Nullable` carries the column's validity signal;
/// the container variants are structurally always present, with elements
/// that may independently be null.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCell {
    /// Nullable scalar. `raw` is only meaningful when `valid` is true.
    Nullable { valid: bool, raw: Json },
    /// Single-level array of scalar elements.
    Array1(Vec<Json>),
    /// Two-level array; inner arrays remain JSON sequences.
    Array2(Vec<Json>),
    /// Three-level array.
    Array3(Vec<Json>),
    /// Key/value mapping; values may be null.
    Map(Vec<(Json, Json)>),
    /// Shape the driver does not model, kept verbatim for display fallback.
    Opaque(Json),
}

/// Mutable holder bound to one column for the duration of one row.
#[derive(Debug, Clone)]
pub struct ScanSlot {
    repr: ScanRepr,
    cell: BackendCell,
}

impl ScanSlot {
    /// Empty holder for a column; reads as NULL until filled.
    pub fn for_repr(repr: ScanRepr) -> Self {
        Self {
            repr,
            cell: BackendCell::Nullable {
                valid: false,
                raw: Json::Null,
            },
        }
    }

    pub fn repr(&self) -> &ScanRepr {
        &self.repr
    }

    pub fn cell(&self) -> &BackendCell {
        &self.cell
    }

    pub fn fill(&mut self, cell: BackendCell) {
        self.cell = cell;
    }
}

/// Executes statements against the backend engine and yields typed cursors.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Run one statement and return its column metadata plus a row cursor.
    async fn execute(
        &self,
        sql: &str,
    ) -> Result<(Vec<ColumnMeta>, Box<dyn QueryCursor>), GatewayError>;
}

/// Iterator over one statement's rows.
#[async_trait]
pub trait QueryCursor: Send {
    /// Advance to the next row. `Ok(false)` once the result set is exhausted.
    async fn next(&mut self) -> Result<bool, GatewayError>;

    /// Populate one slot per column from the current row. Atomic: either
    /// every slot is filled or the row fails as a whole.
    fn scan_into(&mut self, slots: &mut [ScanSlot]) -> Result<(), GatewayError>;

    /// Release the server-side statement. Idempotent; must be called on
    /// every exit path, including errors.
    async fn close(&mut self);
}
