//! Byte-level framing for the wire messages.
//!
//! Regular frames are a tag byte followed by a big-endian i32 length that
//! includes itself but not the tag. Startup-phase messages have no tag.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{BackendMessage, FrontendMessage};

/// Protocol version 3.0.
pub const PROTOCOL_VERSION: i32 = 196_608;
pub const SSL_REQUEST_CODE: i32 = 80_877_103;

/// Upper bound on any frame the gateway will read.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Read one startup-phase message (no tag byte).
pub async fn read_startup<R>(reader: &mut R) -> std::io::Result<FrontendMessage>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_i32().await?;
    let payload_len = frame_payload_len(len, 8)?;
    let code = reader.read_i32().await?;
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;

    match code {
        SSL_REQUEST_CODE => Ok(FrontendMessage::SslRequest),
        PROTOCOL_VERSION => Ok(FrontendMessage::Startup {
            parameters: parse_startup_parameters(&payload)?,
        }),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unsupported startup code {other}"),
        )),
    }
}

/// Read one regular frame. `Ok(None)` on a clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> std::io::Result<Option<FrontendMessage>>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    match reader.read_exact(&mut tag).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = reader.read_i32().await?;
    let payload_len = frame_payload_len(len, 4)?;
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;

    match tag[0] {
        b'Q' => Ok(Some(FrontendMessage::Query {
            sql: read_cstr(&payload)?,
        })),
        b'X' => Ok(Some(FrontendMessage::Terminate)),
        other => Ok(Some(FrontendMessage::Unsupported(other))),
    }
}

/// Write and flush one backend message.
pub async fn write_message<W>(writer: &mut W, message: &BackendMessage) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    encode(message, &mut buf);
    writer.write_all(&buf).await?;
    writer.flush().await
}

/// Refuse an SSLRequest; the client continues in cleartext.
pub async fn write_ssl_refusal<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(b"N").await?;
    writer.flush().await
}

fn encode(message: &BackendMessage, buf: &mut BytesMut) {
    match message {
        BackendMessage::AuthenticationOk => {
            frame(buf, b'R', |body| body.put_i32(0));
        }
        BackendMessage::ParameterStatus { name, value } => {
            frame(buf, b'S', |body| {
                put_cstr(body, name);
                put_cstr(body, value);
            });
        }
        BackendMessage::ReadyForQuery => {
            frame(buf, b'Z', |body| body.put_u8(b'I'));
        }
        BackendMessage::RowDescription { fields } => {
            frame(buf, b'T', |body| {
                body.put_i16(fields.len() as i16);
                for field in fields {
                    put_cstr(body, &field.name);
                    body.put_u32(field.table_oid);
                    body.put_i16(field.column_attr);
                    body.put_u32(field.type_oid);
                    body.put_i16(field.type_size);
                    body.put_i32(field.type_modifier);
                    body.put_i16(field.format_code);
                }
            });
        }
        BackendMessage::DataRow { values } => {
            frame(buf, b'D', |body| {
                body.put_i16(values.len() as i16);
                for value in values {
                    match value {
                        None => body.put_i32(-1),
                        Some(text) => {
                            body.put_i32(text.len() as i32);
                            body.put_slice(text.as_bytes());
                        }
                    }
                }
            });
        }
        BackendMessage::CommandComplete { tag } => {
            frame(buf, b'C', |body| put_cstr(body, tag));
        }
        BackendMessage::EmptyQueryResponse => {
            frame(buf, b'I', |_| {});
        }
        BackendMessage::ErrorResponse {
            severity,
            code,
            message,
        } => {
            frame(buf, b'E', |body| {
                body.put_u8(b'S');
                put_cstr(body, severity);
                body.put_u8(b'C');
                put_cstr(body, code);
                body.put_u8(b'M');
                put_cstr(body, message);
                body.put_u8(0);
            });
        }
    }
}

/// Emit one tagged frame, back-filling the length prefix.
fn frame(buf: &mut BytesMut, tag: u8, fill: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(tag);
    let len_at = buf.len();
    buf.put_i32(0);
    fill(buf);
    let frame_len = (buf.len() - len_at) as i32;
    buf[len_at..len_at + 4].copy_from_slice(&frame_len.to_be_bytes());
}

fn put_cstr(buf: &mut BytesMut, text: &str) {
    buf.put_slice(text.as_bytes());
    buf.put_u8(0);
}

fn frame_payload_len(len: i32, consumed: usize) -> std::io::Result<usize> {
    let total = len as usize;
    if len < consumed as i32 || total > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid frame length {len}"),
        ));
    }
    Ok(total - consumed)
}

/// Decode one NUL-terminated string spanning the payload.
fn read_cstr(payload: &[u8]) -> std::io::Result<String> {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    String::from_utf8(payload[..end].to_vec())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 query text"))
}

/// Parse the key/value pairs following the protocol version number.
fn parse_startup_parameters(payload: &[u8]) -> std::io::Result<Vec<(String, String)>> {
    let mut parameters = Vec::new();
    let mut rest = payload;
    loop {
        let (key, after_key) = split_cstr(rest)?;
        if key.is_empty() {
            break;
        }
        let (value, after_value) = split_cstr(after_key)?;
        parameters.push((key, value));
        rest = after_value;
    }
    Ok(parameters)
}

fn split_cstr(payload: &[u8]) -> std::io::Result<(String, &[u8])> {
    match payload.iter().position(|&b| b == 0) {
        Some(end) => {
            let text = String::from_utf8(payload[..end].to_vec()).map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 startup parameter")
            })?;
            Ok((text, &payload[end + 1..]))
        }
        None => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "unterminated startup parameter",
        )),
    }
}
