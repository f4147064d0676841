//! Integration tests for query handling and emission behavior
//!
//! These tests run the full handle-then-emit path against a scripted
//! in-memory connector standing in for a live Trino cluster, plus a
//! recording sink standing in for the wire encoder.

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value as Json};

    use crate::backend::trino::wrap_cell;
    use crate::backend::{BackendConnector, ColumnMeta, QueryCursor, ScanRepr, ScanSlot};
    use crate::bridge::resolve::ColumnDescriptor;
    use crate::bridge::{oid, PgValue, QueryHandler, RowSink};
    use crate::error::GatewayError;

    // ============ Test Doubles ============

    /// Connector yielding scripted columns and rows, with optional failure
    /// injection at the execute or row level.
    struct MockConnector {
        columns: Vec<(&'static str, ScanRepr)>,
        rows: Vec<Vec<Json>>,
        fail_execute: Option<String>,
        fail_on_row: Option<usize>,
        cursor_closed: Arc<AtomicBool>,
    }

    impl MockConnector {
        fn new(columns: Vec<(&'static str, ScanRepr)>, rows: Vec<Vec<Json>>) -> Self {
            Self {
                columns,
                rows,
                fail_execute: None,
                fail_on_row: None,
                cursor_closed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn closed_flag(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.cursor_closed)
        }
    }

    #[async_trait]
    impl BackendConnector for MockConnector {
        async fn execute(
            &self,
            _sql: &str,
        ) -> Result<(Vec<ColumnMeta>, Box<dyn QueryCursor>), GatewayError> {
            if let Some(message) = &self.fail_execute {
                return Err(GatewayError::Execution(message.clone()));
            }
            let columns: Vec<ColumnMeta> = self
                .columns
                .iter()
                .map(|(name, repr)| ColumnMeta::new(*name, repr.clone()))
                .collect();
            let cursor = MockCursor {
                rows: self.rows.clone().into(),
                fail_on_row: self.fail_on_row,
                served: 0,
                current: None,
                closed: Arc::clone(&self.cursor_closed),
            };
            Ok((columns, Box::new(cursor)))
        }
    }

    struct MockCursor {
        rows: VecDeque<Vec<Json>>,
        fail_on_row: Option<usize>,
        served: usize,
        current: Option<Vec<Json>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl QueryCursor for MockCursor {
        async fn next(&mut self) -> Result<bool, GatewayError> {
            self.served += 1;
            if self.fail_on_row == Some(self.served) {
                return Err(GatewayError::RowScan("connection reset mid-read".to_string()));
            }
            match self.rows.pop_front() {
                Some(row) => {
                    self.current = Some(row);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn scan_into(&mut self, slots: &mut [ScanSlot]) -> Result<(), GatewayError> {
            let row = self
                .current
                .take()
                .ok_or_else(|| GatewayError::RowScan("scan without a positioned row".to_string()))?;
            if row.len() != slots.len() {
                return Err(GatewayError::RowScan("cell count mismatch".to_string()));
            }
            for (slot, value) in slots.iter_mut().zip(row) {
                let cell = wrap_cell(slot.repr(), value);
                slot.fill(cell);
            }
            Ok(())
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Sink recording everything the bridge emits.
    #[derive(Default)]
    struct RecordingSink {
        announced: Vec<(String, oid::PgOid)>,
        rows: Vec<Vec<Option<String>>>,
        completions: Vec<String>,
        fail_on_row: Option<usize>,
    }

    #[async_trait]
    impl RowSink for RecordingSink {
        async fn announce(&mut self, columns: &[ColumnDescriptor]) -> std::io::Result<()> {
            self.announced = columns
                .iter()
                .map(|column| (column.name.clone(), column.oid))
                .collect();
            Ok(())
        }

        async fn write_row(&mut self, values: &[PgValue]) -> std::io::Result<()> {
            if self.fail_on_row == Some(self.rows.len()) {
                return Err(std::io::Error::other("client hung up"));
            }
            self.rows.push(values.iter().map(PgValue::render).collect());
            Ok(())
        }

        async fn complete(&mut self, tag: &str) -> std::io::Result<()> {
            self.completions.push(tag.to_string());
            Ok(())
        }
    }

    fn scalar_columns() -> Vec<(&'static str, ScanRepr)> {
        vec![
            ("flag", ScanRepr::Bool),
            ("answer", ScanRepr::Int4),
            ("label", ScanRepr::Text),
            ("at", ScanRepr::Timestamp),
        ]
    }

    // ============ Tests ============

    #[tokio::test]
    async fn test_scalar_row_end_to_end() {
        let connector = MockConnector::new(
            scalar_columns(),
            vec![vec![json!(true), json!(42), json!("abc"), json!(null)]],
        );
        let handler = QueryHandler::new(Arc::new(connector));

        let prepared = handler.handle("SELECT ...;\0").await.unwrap();
        let mut sink = RecordingSink::default();
        prepared.emit(&mut sink).await.unwrap();

        assert_eq!(
            sink.announced,
            vec![
                ("flag".to_string(), oid::BOOL),
                ("answer".to_string(), oid::INT4),
                ("label".to_string(), oid::TEXT),
                ("at".to_string(), oid::TIMESTAMP),
            ]
        );
        assert_eq!(
            sink.rows,
            vec![vec![
                Some("t".to_string()),
                Some("42".to_string()),
                Some("abc".to_string()),
                None,
            ]]
        );
        assert_eq!(sink.completions, vec!["".to_string()]);
    }

    #[tokio::test]
    async fn test_rows_arrive_in_cursor_order() {
        let connector = MockConnector::new(
            vec![("n", ScanRepr::Int8)],
            vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]],
        );
        let closed = connector.closed_flag();
        let handler = QueryHandler::new(Arc::new(connector));

        let prepared = handler.handle("SELECT n FROM t").await.unwrap();
        assert!(closed.load(Ordering::SeqCst), "cursor released after drain");

        let mut sink = RecordingSink::default();
        prepared.emit(&mut sink).await.unwrap();

        assert_eq!(
            sink.rows,
            vec![
                vec![Some("1".to_string())],
                vec![Some("2".to_string())],
                vec![Some("3".to_string())],
            ]
        );
        assert_eq!(sink.completions.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_failure_reaches_caller_before_any_emission() {
        let mut connector = MockConnector::new(
            vec![("n", ScanRepr::Int4)],
            vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]],
        );
        connector.fail_on_row = Some(2);
        let closed = connector.closed_flag();
        let handler = QueryHandler::new(Arc::new(connector));

        let err = handler.handle("SELECT n FROM t").await.unwrap_err();
        assert!(matches!(err, GatewayError::RowScan(_)));
        assert!(closed.load(Ordering::SeqCst), "cursor released on error");
        // Draining is eager, so the failure is detected before a single row
        // or even the schema reaches the encoder.
    }

    #[tokio::test]
    async fn test_execute_failure_is_returned_unchanged() {
        let mut connector = MockConnector::new(scalar_columns(), vec![]);
        connector.fail_execute = Some("line 1:8: Column 'nope' cannot be resolved".to_string());
        let handler = QueryHandler::new(Arc::new(connector));

        let err = handler.handle("SELECT nope").await.unwrap_err();
        match err {
            GatewayError::Execution(message) => {
                assert_eq!(message, "line 1:8: Column 'nope' cannot be resolved");
            }
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nested_containers_end_to_end() {
        let columns = vec![
            (
                "xs",
                ScanRepr::Array {
                    elem: Box::new(ScanRepr::Int4),
                    depth: 1,
                },
            ),
            (
                "xss",
                ScanRepr::Array {
                    elem: Box::new(ScanRepr::Int4),
                    depth: 2,
                },
            ),
            ("m", ScanRepr::Map),
        ];
        let connector = MockConnector::new(
            columns,
            vec![vec![
                json!([1, null, 3]),
                json!([[1, 2], null]),
                json!({"1": "one"}),
            ]],
        );
        let handler = QueryHandler::new(Arc::new(connector));

        let prepared = handler.handle("SELECT ...").await.unwrap();
        // Containers are announced as text.
        assert!(prepared.columns().iter().all(|c| c.oid == oid::TEXT));

        let mut sink = RecordingSink::default();
        prepared.emit(&mut sink).await.unwrap();
        assert_eq!(
            sink.rows,
            vec![vec![
                Some("{1,NULL,3}".to_string()),
                Some("{{1,2},NULL}".to_string()),
                Some("{1=one}".to_string()),
            ]]
        );
    }

    #[tokio::test]
    async fn test_write_failure_stops_emission() {
        let connector = MockConnector::new(
            vec![("n", ScanRepr::Int4)],
            vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]],
        );
        let handler = QueryHandler::new(Arc::new(connector));
        let prepared = handler.handle("SELECT n FROM t").await.unwrap();

        let mut sink = RecordingSink {
            fail_on_row: Some(1),
            ..Default::default()
        };
        let err = prepared.emit(&mut sink).await.unwrap_err();
        assert!(matches!(err, GatewayError::StreamWrite(_)));

        // The first row made it out, nothing after the failure did, and no
        // completion was signalled.
        assert_eq!(sink.rows.len(), 1);
        assert!(sink.completions.is_empty());
    }

    #[tokio::test]
    async fn test_wire_session_over_duplex() {
        use tokio::io::AsyncWriteExt;

        use crate::protocol::codec::PROTOCOL_VERSION;
        use crate::server::run_session;

        let connector = MockConnector::new(
            vec![("answer", ScanRepr::Int4)],
            vec![vec![json!(42)]],
        );
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let session = tokio::spawn(run_session(
            server,
            Arc::new(connector) as Arc<dyn BackendConnector>,
            uuid::Uuid::new_v4(),
        ));

        // Startup, one query, terminate.
        let mut startup = PROTOCOL_VERSION.to_be_bytes().to_vec();
        startup.extend_from_slice(b"user\0alice\0\0");
        let mut bytes = ((startup.len() + 4) as i32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&startup);

        let sql = b"SELECT 42;\0";
        bytes.push(b'Q');
        bytes.extend_from_slice(&((sql.len() + 4) as i32).to_be_bytes());
        bytes.extend_from_slice(sql);
        bytes.extend_from_slice(&[b'X', 0, 0, 0, 4]);

        client.write_all(&bytes).await.unwrap();
        client.flush().await.unwrap();

        let mut response = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut response)
            .await
            .unwrap();
        session.await.unwrap().unwrap();

        assert_eq!(
            frame_tags(&response),
            vec![b'R', b'S', b'S', b'S', b'Z', b'T', b'D', b'C', b'Z']
        );
        let rendered = String::from_utf8_lossy(&response);
        assert!(rendered.contains("answer"));
        assert!(rendered.contains("42"));
    }

    /// Walk a byte stream of tagged frames and collect the tag sequence.
    fn frame_tags(mut bytes: &[u8]) -> Vec<u8> {
        let mut tags = Vec::new();
        while bytes.len() >= 5 {
            let tag = bytes[0];
            let len = i32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
            tags.push(tag);
            bytes = &bytes[1 + len..];
        }
        tags
    }

    #[tokio::test]
    async fn test_empty_result_set_completes_without_rows() {
        let connector = MockConnector::new(vec![("n", ScanRepr::Int4)], vec![]);
        let handler = QueryHandler::new(Arc::new(connector));

        let prepared = handler.handle("SELECT n FROM t WHERE false").await.unwrap();
        assert_eq!(prepared.row_count(), 0);

        let mut sink = RecordingSink::default();
        prepared.emit(&mut sink).await.unwrap();
        assert_eq!(sink.announced.len(), 1);
        assert!(sink.rows.is_empty());
        assert_eq!(sink.completions, vec!["".to_string()]);
    }
}
