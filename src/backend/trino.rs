//! Connector for Trino's HTTP statement protocol.
//!
//! A statement is POSTed to `/v1/statement`; the coordinator answers with a
//! page that may carry column metadata, a batch of rows, a `nextUri` to poll
//! for more, or an error. The connector follows pages until the schema is
//! known, then hands the remaining pages to a cursor. Deleting the current
//! `nextUri` cancels the statement server-side.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::{debug, warn};

use super::{BackendCell, BackendConnector, ColumnMeta, QueryCursor, ScanRepr, ScanSlot};
use crate::config::{Config, MAX_HTTP_RETRIES, PROBE_TIMEOUT, STATEMENT_TIMEOUT, TRINO_USER};
use crate::error::GatewayError;

/// Shared handle to one Trino coordinator.
///
/// Cheap to clone and safe for concurrent use across connections; reqwest's
/// client multiplexes an internal connection pool.
#[derive(Debug, Clone)]
pub struct TrinoConnector {
    http: reqwest::Client,
    base_url: String,
    catalog: String,
    schema: String,
}

/// One page of the statement protocol.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementPage {
    #[serde(default)]
    columns: Option<Vec<TrinoColumn>>,
    #[serde(default)]
    data: Option<Vec<Vec<Json>>>,
    #[serde(default)]
    next_uri: Option<String>,
    #[serde(default)]
    error: Option<TrinoQueryError>,
}

#[derive(Debug, Deserialize)]
struct TrinoColumn {
    name: String,
    #[serde(rename = "type")]
    type_signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrinoQueryError {
    message: String,
    #[serde(default)]
    error_name: Option<String>,
}

impl TrinoConnector {
    pub fn connect(config: &Config) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(STATEMENT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url(),
            catalog: config.trino_catalog.clone(),
            schema: config.trino_schema.clone(),
        })
    }

    /// Startup reachability probe against the coordinator's info endpoint.
    pub async fn probe(&self) -> Result<(), GatewayError> {
        let url = format!("{}/v1/info", self.base_url);
        let response = tokio::time::timeout(PROBE_TIMEOUT, self.http.get(&url).send())
            .await
            .map_err(|_| GatewayError::Connection(format!("timed out reaching {url}")))?
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::Connection(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn post_statement(&self, sql: &str) -> Result<StatementPage, String> {
        let url = format!("{}/v1/statement", self.base_url);
        let mut attempt = 0;
        loop {
            let result = self
                .http
                .post(&url)
                .header("X-Trino-User", TRINO_USER)
                .header("X-Trino-Catalog", &self.catalog)
                .header("X-Trino-Schema", &self.schema)
                .header("X-Trino-Source", "trino-pg-gateway")
                .body(sql.to_owned())
                .send()
                .await;
            match result {
                Ok(response)
                    if response.status() == StatusCode::SERVICE_UNAVAILABLE
                        && attempt < MAX_HTTP_RETRIES =>
                {
                    attempt += 1;
                    warn!(attempt, "coordinator busy, retrying statement submission");
                    backoff(attempt).await;
                }
                Ok(response) => return parse_page(response).await,
                Err(e) if is_retryable(&e) && attempt < MAX_HTTP_RETRIES => {
                    attempt += 1;
                    warn!(error = %e, attempt, "statement submission failed, retrying");
                    backoff(attempt).await;
                }
                Err(e) => return Err(e.to_string()),
            }
        }
    }
}

#[async_trait]
impl BackendConnector for TrinoConnector {
    async fn execute(
        &self,
        sql: &str,
    ) -> Result<(Vec<ColumnMeta>, Box<dyn QueryCursor>), GatewayError> {
        let mut page = self
            .post_statement(sql)
            .await
            .map_err(GatewayError::Execution)?;

        // Follow the queue until the engine reports a schema or finishes.
        let mut buffered: VecDeque<Vec<Json>> = VecDeque::new();
        loop {
            if let Some(error) = page.error.take() {
                return Err(GatewayError::Execution(render_error(error)));
            }
            if let Some(data) = page.data.take() {
                buffered.extend(data);
            }
            if page.columns.is_some() {
                break;
            }
            let Some(uri) = page.next_uri.clone() else {
                break;
            };
            page = fetch_page(&self.http, &uri)
                .await
                .map_err(GatewayError::Execution)?;
        }

        let columns: Vec<ColumnMeta> = page
            .columns
            .unwrap_or_default()
            .into_iter()
            .map(|c| ColumnMeta::new(c.name, scan_repr_for(&c.type_signature)))
            .collect();
        debug!(columns = columns.len(), buffered = buffered.len(), "statement accepted");

        let cursor = TrinoCursor {
            http: self.http.clone(),
            buffered,
            next_uri: page.next_uri.take(),
            current: None,
        };
        Ok((columns, Box::new(cursor)))
    }
}

/// Cursor over one statement's remaining result pages.
///
/// Exclusively owned by the query that created it; `close` releases the
/// server-side statement and must run on every exit path.
pub struct TrinoCursor {
    http: reqwest::Client,
    buffered: VecDeque<Vec<Json>>,
    next_uri: Option<String>,
    current: Option<Vec<Json>>,
}

#[async_trait]
impl QueryCursor for TrinoCursor {
    async fn next(&mut self) -> Result<bool, GatewayError> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                self.current = Some(row);
                return Ok(true);
            }
            let Some(uri) = self.next_uri.take() else {
                return Ok(false);
            };
            let mut page = fetch_page(&self.http, &uri)
                .await
                .map_err(GatewayError::RowScan)?;
            if let Some(error) = page.error.take() {
                return Err(GatewayError::RowScan(render_error(error)));
            }
            if let Some(data) = page.data.take() {
                self.buffered.extend(data);
            }
            self.next_uri = page.next_uri.take();
        }
    }

    fn scan_into(&mut self, slots: &mut [ScanSlot]) -> Result<(), GatewayError> {
        let row = self
            .current
            .take()
            .ok_or_else(|| GatewayError::RowScan("scan without a positioned row".to_string()))?;
        if row.len() != slots.len() {
            return Err(GatewayError::RowScan(format!(
                "row has {} cells, expected {}",
                row.len(),
                slots.len()
            )));
        }
        for (slot, value) in slots.iter_mut().zip(row) {
            let cell = wrap_cell(slot.repr(), value);
            slot.fill(cell);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.buffered.clear();
        self.current = None;
        if let Some(uri) = self.next_uri.take() {
            // Cancels the statement; on failure the engine times it out on
            // its own.
            if let Err(e) = self.http.delete(&uri).send().await {
                debug!(error = %e, "statement cancellation failed");
            }
        }
    }
}

async fn fetch_page(http: &reqwest::Client, uri: &str) -> Result<StatementPage, String> {
    let mut attempt = 0;
    loop {
        match http.get(uri).send().await {
            Ok(response)
                if response.status() == StatusCode::SERVICE_UNAVAILABLE
                    && attempt < MAX_HTTP_RETRIES =>
            {
                attempt += 1;
                backoff(attempt).await;
            }
            Ok(response) => return parse_page(response).await,
            Err(e) if is_retryable(&e) && attempt < MAX_HTTP_RETRIES => {
                attempt += 1;
                warn!(error = %e, attempt, "page fetch failed, retrying");
                backoff(attempt).await;
            }
            Err(e) => return Err(e.to_string()),
        }
    }
}

async fn parse_page(response: reqwest::Response) -> Result<StatementPage, String> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(format!("coordinator returned {status}: {body}"));
    }
    response
        .json::<StatementPage>()
        .await
        .map_err(|e| format!("malformed statement response: {e}"))
}

async fn backoff(attempt: u32) {
    tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
}

fn is_retryable(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

fn render_error(error: TrinoQueryError) -> String {
    match error.error_name {
        Some(name) => format!("{name}: {}", error.message),
        None => error.message,
    }
}

/// Parse a Trino type signature into the declared scan representation.
///
/// Total: signatures without a native shape become [`ScanRepr::Other`], they
/// never fail.
pub(crate) fn scan_repr_for(signature: &str) -> ScanRepr {
    let sig = signature.trim();
    let lower = sig.to_ascii_lowercase();
    if let Some(inner) = strip_wrapper(&lower, "array") {
        return array_repr(inner, sig);
    }
    if strip_wrapper(&lower, "map").is_some() {
        return ScanRepr::Map;
    }
    element_repr(&lower).unwrap_or_else(|| ScanRepr::Other(sig.to_string()))
}

fn array_repr(mut inner: &str, original: &str) -> ScanRepr {
    let mut depth = 1u8;
    while let Some(next) = strip_wrapper(inner, "array") {
        depth += 1;
        if depth > 3 {
            return ScanRepr::Other(original.to_string());
        }
        inner = next;
    }
    match element_repr(inner) {
        Some(elem) => ScanRepr::Array {
            elem: Box::new(elem),
            depth,
        },
        None => ScanRepr::Other(original.to_string()),
    }
}

/// Shape of an array element or standalone scalar signature.
fn element_repr(lower: &str) -> Option<ScanRepr> {
    if strip_wrapper(lower, "map").is_some() {
        return Some(ScanRepr::Map);
    }
    match lower {
        "boolean" => Some(ScanRepr::Bool),
        "tinyint" | "smallint" | "integer" => Some(ScanRepr::Int4),
        "bigint" => Some(ScanRepr::Int8),
        "real" | "double" => Some(ScanRepr::Float8),
        "json" | "uuid" => Some(ScanRepr::Text),
        _ if lower.starts_with("timestamp") || lower.starts_with("date") => {
            Some(ScanRepr::Timestamp)
        }
        _ if lower.starts_with("time") => Some(ScanRepr::Timestamp),
        _ if lower.starts_with("varchar")
            || lower.starts_with("char")
            || lower.starts_with("decimal")
            || lower.starts_with("interval") =>
        {
            Some(ScanRepr::Text)
        }
        _ => None,
    }
}

/// Strip `keyword(...)` and return the inner signature text.
fn strip_wrapper<'a>(sig: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = sig.strip_prefix(keyword)?.trim_start();
    let rest = rest.strip_prefix('(')?;
    let rest = rest.strip_suffix(')')?;
    Some(rest.trim())
}

/// Tag one raw cell with the shape its column's representation declares.
pub(crate) fn wrap_cell(repr: &ScanRepr, value: Json) -> BackendCell {
    if value.is_null() {
        return BackendCell::Nullable {
            valid: false,
            raw: value,
        };
    }
    match repr {
        ScanRepr::Bool
        | ScanRepr::Int4
        | ScanRepr::Int8
        | ScanRepr::Float8
        | ScanRepr::Timestamp
        | ScanRepr::Text => BackendCell::Nullable {
            valid: true,
            raw: value,
        },
        ScanRepr::Array { depth, .. } => match value {
            Json::Array(items) => match depth {
                1 => BackendCell::Array1(items),
                2 => BackendCell::Array2(items),
                _ => BackendCell::Array3(items),
            },
            other => BackendCell::Opaque(other),
        },
        ScanRepr::Map => match value {
            Json::Object(entries) => BackendCell::Map(
                entries
                    .into_iter()
                    .map(|(key, val)| (Json::String(key), val))
                    .collect(),
            ),
            other => BackendCell::Opaque(other),
        },
        ScanRepr::Other(_) => BackendCell::Opaque(value),
    }
}
