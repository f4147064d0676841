//! PostgreSQL wire messages the gateway speaks.
//!
//! Only the simple-query flow is implemented: startup (with SSL refusal),
//! trust authentication, `Query`, and `Terminate`. Extended-query, COPY, and
//! cancellation messages are answered with an error instead of being parsed.

pub mod codec;

use crate::bridge::oid::{self, PgOid};

/// Messages read from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    SslRequest,
    Startup { parameters: Vec<(String, String)> },
    Query { sql: String },
    Terminate,
    /// Any message type the gateway does not implement; carries the tag byte.
    Unsupported(u8),
}

/// Messages written to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    AuthenticationOk,
    ParameterStatus { name: String, value: String },
    ReadyForQuery,
    RowDescription { fields: Vec<FieldDescription> },
    /// One row in text format; `None` encodes SQL NULL.
    DataRow { values: Vec<Option<String>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,
    ErrorResponse { severity: String, code: String, message: String },
}

/// One column of a RowDescription message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_attr: i16,
    pub type_oid: PgOid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format_code: i16,
}

impl FieldDescription {
    /// Text-format field for a column that belongs to no base table.
    pub fn text(name: impl Into<String>, type_oid: PgOid) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_attr: 0,
            type_oid,
            type_size: oid::type_size(type_oid),
            type_modifier: -1,
            format_code: 0,
        }
    }
}

impl BackendMessage {
    /// Error message with the standard severity for query failures.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        BackendMessage::ErrorResponse {
            severity: "ERROR".to_string(),
            code: code.to_string(),
            message: message.into(),
        }
    }
}
