//! Ordered row emission to the protocol encoder.
//!
//! The writer delivers rows one at a time, in exactly the order they are
//! handed over, and latches into a terminal failed state on the first sink
//! error so nothing is emitted after a partial write.

use async_trait::async_trait;

use crate::error::GatewayError;

use super::resolve::ColumnDescriptor;
use super::PgValue;

/// Receiving side of the emission path, implemented by the wire encoder.
#[async_trait]
pub trait RowSink: Send {
    /// Announce the result schema: ordered (name, type identifier) pairs.
    async fn announce(&mut self, columns: &[ColumnDescriptor]) -> std::io::Result<()>;

    /// Deliver one row of canonical values.
    async fn write_row(&mut self, values: &[PgValue]) -> std::io::Result<()>;

    /// Signal successful completion with a free-text status tag.
    async fn complete(&mut self, tag: &str) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Idle,
    Streaming,
    Done,
    Failed,
}

/// Drives a sink through Idle -> Streaming -> Done; any sink error moves to
/// Failed, which is terminal.
pub struct RowWriter<'a, S> {
    sink: &'a mut S,
    state: WriterState,
}

impl<'a, S: RowSink> RowWriter<'a, S> {
    pub fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            state: WriterState::Idle,
        }
    }

    pub async fn write_row(&mut self, values: &[PgValue]) -> Result<(), GatewayError> {
        match self.state {
            WriterState::Idle | WriterState::Streaming => {}
            WriterState::Done | WriterState::Failed => {
                return Err(GatewayError::StreamWrite(std::io::Error::other(
                    "row written after the stream ended",
                )));
            }
        }
        match self.sink.write_row(values).await {
            Ok(()) => {
                self.state = WriterState::Streaming;
                Ok(())
            }
            Err(e) => {
                self.state = WriterState::Failed;
                Err(e.into())
            }
        }
    }

    /// Finish the stream. Valid only while no write has failed; fires at
    /// most once.
    pub async fn complete(&mut self, tag: &str) -> Result<(), GatewayError> {
        match self.state {
            WriterState::Idle | WriterState::Streaming => {}
            WriterState::Done | WriterState::Failed => {
                return Err(GatewayError::StreamWrite(std::io::Error::other(
                    "completion after the stream ended",
                )));
            }
        }
        match self.sink.complete(tag).await {
            Ok(()) => {
                self.state = WriterState::Done;
                Ok(())
            }
            Err(e) => {
                self.state = WriterState::Failed;
                Err(e.into())
            }
        }
    }
}
