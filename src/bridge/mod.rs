//! The type bridge - canonical cell values and the row-streaming adapter

pub mod handler;
pub mod materialize;
pub mod resolve;
pub mod stream;

pub use handler::{PreparedResult, QueryHandler};
pub use resolve::{resolve, ColumnDescriptor};
pub use stream::{RowSink, RowWriter};

use chrono::{NaiveDateTime, Timelike};

/// PostgreSQL type identifiers announced at schema time.
pub mod oid {
    pub type PgOid = u32;

    pub const BOOL: PgOid = 16;
    pub const INT8: PgOid = 20;
    pub const INT4: PgOid = 23;
    pub const TEXT: PgOid = 25;
    pub const FLOAT8: PgOid = 701;
    pub const TIMESTAMP: PgOid = 1114;

    /// Wire-declared byte width of a type; -1 marks variable length.
    pub fn type_size(oid: PgOid) -> i16 {
        match oid {
            BOOL => 1,
            INT4 => 4,
            INT8 | FLOAT8 | TIMESTAMP => 8,
            _ => -1,
        }
    }
}

/// A fully extracted cell value, ready for protocol emission.
///
/// Produced by the materializer, immutable afterwards, consumed once by the
/// writer adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int4(i32),
    Int8(i64),
    Float8(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    /// Elements may be `Null`; nesting recurses for multi-level arrays.
    Array(Vec<PgValue>),
    Map(Vec<(PgValue, PgValue)>),
    /// Display-string form of a value no native shape covers.
    FallbackText(String),
}

impl PgValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }

    /// Text-format rendering; `None` encodes SQL NULL on the wire.
    pub fn render(&self) -> Option<String> {
        match self {
            PgValue::Null => None,
            PgValue::Bool(v) => Some(if *v { "t" } else { "f" }.to_string()),
            PgValue::Int4(v) => Some(v.to_string()),
            PgValue::Int8(v) => Some(v.to_string()),
            PgValue::Float8(v) => Some(v.to_string()),
            PgValue::Text(v) => Some(v.clone()),
            PgValue::Timestamp(v) => Some(format_timestamp(v)),
            PgValue::Array(items) => Some(render_array(items)),
            PgValue::Map(entries) => Some(render_map(entries)),
            PgValue::FallbackText(v) => Some(v.clone()),
        }
    }
}

/// Array literal in the `{a,b,NULL}` style; nested arrays recurse.
fn render_array(items: &[PgValue]) -> String {
    let rendered: Vec<String> = items
        .iter()
        .map(|item| item.render().unwrap_or_else(|| "NULL".to_string()))
        .collect();
    format!("{{{}}}", rendered.join(","))
}

/// Mapping in the engine's `{k=v, k=v}` display style.
fn render_map(entries: &[(PgValue, PgValue)]) -> String {
    let rendered: Vec<String> = entries
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                key.render().unwrap_or_else(|| "NULL".to_string()),
                value.render().unwrap_or_else(|| "NULL".to_string())
            )
        })
        .collect();
    format!("{{{}}}", rendered.join(", "))
}

fn format_timestamp(value: &NaiveDateTime) -> String {
    if value.nanosecond() == 0 {
        value.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        value.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}
