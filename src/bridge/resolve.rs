//! Resolution of wire type identifiers from scan representations.
//!
//! Identifiers must be known at schema-announcement time, before any row is
//! fetched, so resolution works from column metadata alone.

use crate::backend::{ColumnMeta, ScanRepr};

use super::oid::{self, PgOid};

/// One announced result column: name, declared scan representation, and the
/// resolved wire type identifier. Built once per query, immutable after.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    pub repr: ScanRepr,
    pub oid: PgOid,
}

/// Map a scan representation to its wire type identifier.
///
/// Pure and total: shapes without a scalar identifier (arrays, maps, and
/// anything unrecognized) degrade to TEXT rather than failing.
pub fn resolve(repr: &ScanRepr) -> PgOid {
    match repr {
        ScanRepr::Bool => oid::BOOL,
        ScanRepr::Int4 => oid::INT4,
        ScanRepr::Int8 => oid::INT8,
        ScanRepr::Float8 => oid::FLOAT8,
        ScanRepr::Timestamp => oid::TIMESTAMP,
        ScanRepr::Text => oid::TEXT,
        ScanRepr::Array { .. } | ScanRepr::Map | ScanRepr::Other(_) => oid::TEXT,
    }
}

/// Build the per-query descriptor list from cursor metadata.
pub fn describe_columns(columns: &[ColumnMeta]) -> Vec<ColumnDescriptor> {
    columns
        .iter()
        .map(|column| ColumnDescriptor {
            name: column.name().to_string(),
            repr: column.scan_repr().clone(),
            oid: resolve(column.scan_repr()),
        })
        .collect()
}
