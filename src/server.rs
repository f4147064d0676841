//! TCP front end: accepts client connections and drives the simple-query
//! cycle against the bridge.
//!
//! Every connection gets its own task and is serviced strictly sequentially;
//! concurrency across clients comes from the task-per-connection model, not
//! from anything inside a query.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::BackendConnector;
use crate::bridge::resolve::ColumnDescriptor;
use crate::bridge::{PgValue, QueryHandler, RowSink};
use crate::protocol::codec;
use crate::protocol::{BackendMessage, FieldDescription, FrontendMessage};
use crate::telemetry::{SessionEvent, SessionStats};

/// Parameter status reported to every client after authentication.
const SERVER_PARAMETERS: [(&str, &str); 3] = [
    ("server_version", "16.0"),
    ("client_encoding", "UTF8"),
    ("DateStyle", "ISO, MDY"),
];

/// Accept loop owning the shared backend handle.
pub struct Server {
    backend: Arc<dyn BackendConnector>,
}

impl Server {
    pub fn new(backend: Arc<dyn BackendConnector>) -> Self {
        Self { backend }
    }

    /// Serve connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            let backend = Arc::clone(&self.backend);
            tokio::spawn(async move {
                let conn_id = Uuid::new_v4();
                debug!(%conn_id, %peer, "client connected");
                if let Err(e) = run_session(socket, backend, conn_id).await {
                    warn!(%conn_id, error = %e, "session ended with error");
                }
            });
        }
    }
}

/// Drive one client session over any byte stream; a TCP socket in
/// production, an in-memory duplex in tests.
pub(crate) async fn run_session<S>(
    mut socket: S,
    backend: Arc<dyn BackendConnector>,
    conn_id: Uuid,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // Startup phase: refuse SSL upgrades until the real startup arrives.
    loop {
        match codec::read_startup(&mut socket).await? {
            FrontendMessage::SslRequest => codec::write_ssl_refusal(&mut socket).await?,
            FrontendMessage::Startup { parameters } => {
                debug!(%conn_id, ?parameters, "startup received");
                break;
            }
            other => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unexpected message during startup: {other:?}"),
                ));
            }
        }
    }

    codec::write_message(&mut socket, &BackendMessage::AuthenticationOk).await?;
    for (name, value) in SERVER_PARAMETERS {
        codec::write_message(
            &mut socket,
            &BackendMessage::ParameterStatus {
                name: name.to_string(),
                value: value.to_string(),
            },
        )
        .await?;
    }
    codec::write_message(&mut socket, &BackendMessage::ReadyForQuery).await?;

    let handler = QueryHandler::new(backend);
    let mut stats = SessionStats::new();

    loop {
        let Some(message) = codec::read_message(&mut socket).await? else {
            break;
        };
        match message {
            FrontendMessage::Query { sql } if is_empty_query(&sql) => {
                codec::write_message(&mut socket, &BackendMessage::EmptyQueryResponse).await?;
                codec::write_message(&mut socket, &BackendMessage::ReadyForQuery).await?;
            }
            FrontendMessage::Query { sql } => {
                match handler.handle(&sql).await {
                    Ok(prepared) => {
                        let mut sink = WireSink {
                            socket: &mut socket,
                        };
                        match prepared.emit(&mut sink).await {
                            Ok(()) => stats.update(&SessionEvent::QueryCompleted {
                                rows_emitted: prepared.row_count() as u64,
                            }),
                            Err(e) => {
                                // The socket is gone; nothing further can be
                                // delivered on this connection.
                                stats.update(&SessionEvent::QueryFailed);
                                log_session(&conn_id, &stats);
                                return Err(std::io::Error::other(e));
                            }
                        }
                    }
                    Err(e) => {
                        stats.update(&SessionEvent::QueryFailed);
                        debug!(%conn_id, error = %e, "query failed");
                        codec::write_message(
                            &mut socket,
                            &BackendMessage::error(e.sqlstate(), e.to_string()),
                        )
                        .await?;
                    }
                }
                codec::write_message(&mut socket, &BackendMessage::ReadyForQuery).await?;
            }
            FrontendMessage::Terminate => break,
            FrontendMessage::Unsupported(tag) => {
                codec::write_message(
                    &mut socket,
                    &BackendMessage::error(
                        "0A000",
                        format!("message type '{}' is not supported", tag as char),
                    ),
                )
                .await?;
                codec::write_message(&mut socket, &BackendMessage::ReadyForQuery).await?;
            }
            FrontendMessage::SslRequest | FrontendMessage::Startup { .. } => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "startup message after session establishment",
                ));
            }
        }
    }

    log_session(&conn_id, &stats);
    Ok(())
}

fn log_session(conn_id: &Uuid, stats: &SessionStats) {
    info!(
        %conn_id,
        queries = stats.queries_served,
        failed = stats.queries_failed,
        rows = stats.rows_emitted,
        "session closed"
    );
}

/// A query with nothing but whitespace and statement separators.
fn is_empty_query(sql: &str) -> bool {
    sql.trim_matches(|c: char| c.is_whitespace() || c == ';' || c == '\0')
        .is_empty()
}

/// Row sink over the client socket: encodes canonical rows as wire messages.
struct WireSink<'a, S> {
    socket: &'a mut S,
}

#[async_trait]
impl<S> RowSink for WireSink<'_, S>
where
    S: AsyncWrite + Unpin + Send,
{
    async fn announce(&mut self, columns: &[ColumnDescriptor]) -> std::io::Result<()> {
        let fields = columns
            .iter()
            .map(|column| FieldDescription::text(column.name.clone(), column.oid))
            .collect();
        codec::write_message(self.socket, &BackendMessage::RowDescription { fields }).await
    }

    async fn write_row(&mut self, values: &[PgValue]) -> std::io::Result<()> {
        let rendered = values.iter().map(PgValue::render).collect();
        codec::write_message(self.socket, &BackendMessage::DataRow { values: rendered }).await
    }

    async fn complete(&mut self, tag: &str) -> std::io::Result<()> {
        codec::write_message(
            self.socket,
            &BackendMessage::CommandComplete {
                tag: tag.to_string(),
            },
        )
        .await
    }
}
