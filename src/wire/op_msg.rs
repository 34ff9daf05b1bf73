//! OP_MSG / OP_QUERY message bodies (C2), per spec §4.2 and §6.
//!
//! This core only ever sends a single "section kind 0" body document per message — the
//! document-sequence (kind 1) section type used by bulk writes in the full wire protocol spec is
//! out of scope here, since the command algebra (C4) always emits one body document per command.

use std::sync::atomic::{AtomicI32, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{ErrorKind, ProtocolError, Result},
    wire::{
        compression::{Compressor, CompressorId},
        header::{Header, OpCode},
    },
};

/// Assigns strictly monotonic 32-bit request ids, per spec §4.2.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    next: AtomicI32,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self { next: AtomicI32::new(1) }
    }

    pub fn next(&self) -> i32 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// Writes a command body document as an OP_MSG (wire >= 6) or OP_QUERY (earlier), per spec §4.2,
/// optionally wrapped in OP_COMPRESSED if `compressor` is not [`Compressor::Noop`].
pub async fn write_command<W: AsyncWrite + Unpin>(
    stream: &mut W,
    request_id: i32,
    use_op_msg: bool,
    body: &[u8],
    compressor: Compressor,
) -> Result<()> {
    let uncompressed = if use_op_msg {
        frame_op_msg_body(body)
    } else {
        frame_op_query_body(body)
    };
    let op_code = if use_op_msg { OpCode::Message } else { OpCode::Query };

    if compressor == Compressor::Noop {
        let header = Header {
            length: (Header::LENGTH + uncompressed.len()) as i32,
            request_id,
            response_to: 0,
            op_code,
        };
        header.write_to(stream).await?;
        stream.write_all(&uncompressed).await?;
    } else {
        let compressed = compressor.compress(&uncompressed)?;
        // OP_COMPRESSED body: original_opcode(i32), uncompressed_size(i32), compressor_id(u8),
        // compressed_message(...)
        let mut wrapped = Vec::with_capacity(9 + compressed.len());
        wrapped.extend_from_slice(&(op_code as i32).to_le_bytes());
        wrapped.extend_from_slice(&(uncompressed.len() as i32).to_le_bytes());
        wrapped.push(compressor.id() as u8);
        wrapped.extend_from_slice(&compressed);

        let header = Header {
            length: (Header::LENGTH + wrapped.len()) as i32,
            request_id,
            response_to: 0,
            op_code: OpCode::Compressed,
        };
        header.write_to(stream).await?;
        stream.write_all(&wrapped).await?;
    }
    Ok(())
}

fn frame_op_msg_body(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + body.len());
    out.extend_from_slice(&0u32.to_le_bytes()); // flag bits: none set
    out.push(0); // section kind 0: a single body document follows
    out.extend_from_slice(body);
    out
}

fn frame_op_query_body(body: &[u8]) -> Vec<u8> {
    // OP_QUERY: flags(i32) + fullCollectionName(cstr) + numberToSkip(i32) + numberToReturn(i32)
    // + query document. The core addresses the `$cmd` pseudo-collection for command dispatch.
    let mut out = Vec::with_capacity(4 + 9 + 4 + 4 + body.len());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(b"admin.$cmd\0");
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&(-1i32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// The decoded body of an incoming reply: the header plus the raw (decompressed) bytes of its
/// single response document.
pub struct IncomingMessage {
    pub header: Header,
    pub document_bytes: Vec<u8>,
}

/// Reads one full wire message from `reader`, transparently unwrapping OP_COMPRESSED, per spec
/// §4.2.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<IncomingMessage> {
    let header = Header::read_from(reader).await?;
    let remaining = header.length as usize - Header::LENGTH;
    let mut body = vec![0u8; remaining];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|_| ErrorKind::Protocol(ProtocolError::Frame { expected: remaining, actual: 0 }))?;

    match header.op_code {
        OpCode::Message => {
            // flag bits (u32) + section kind (u8) + document
            if body.len() < 5 {
                return Err(ErrorKind::Protocol(ProtocolError::Frame {
                    expected: 5,
                    actual: body.len(),
                })
                .into());
            }
            let document_bytes = body[5..].to_vec();
            Ok(IncomingMessage { header, document_bytes })
        }
        OpCode::Compressed => {
            if body.len() < 9 {
                return Err(ErrorKind::Protocol(ProtocolError::Frame {
                    expected: 9,
                    actual: body.len(),
                })
                .into());
            }
            let original_opcode = i32::from_le_bytes(body[0..4].try_into().unwrap());
            let uncompressed_size = i32::from_le_bytes(body[4..8].try_into().unwrap()) as usize;
            let compressor_id = CompressorId::from_u8(body[8])?;
            let decompressed = Compressor::decompress(compressor_id, &body[9..])?;
            if decompressed.len() != uncompressed_size {
                return Err(ErrorKind::Protocol(ProtocolError::Codec {
                    message: format!(
                        "decompressed size {} did not match declared size {}",
                        decompressed.len(),
                        uncompressed_size
                    ),
                })
                .into());
            }
            let inner_op_code = OpCode::from_i32(original_opcode)?;
            match inner_op_code {
                OpCode::Message => {
                    let document_bytes = decompressed[5..].to_vec();
                    Ok(IncomingMessage { header, document_bytes })
                }
                other => Err(ErrorKind::Protocol(ProtocolError::UnknownOp(other as i32)).into()),
            }
        }
        OpCode::Reply => {
            // Legacy OP_REPLY: responseFlags(i32) cursorID(i64) startingFrom(i32)
            // numberReturned(i32) then documents.
            if body.len() < 20 {
                return Err(ErrorKind::Protocol(ProtocolError::Frame {
                    expected: 20,
                    actual: body.len(),
                })
                .into());
            }
            Ok(IncomingMessage { header, document_bytes: body[20..].to_vec() })
        }
        OpCode::Query => Err(ErrorKind::Protocol(ProtocolError::UnknownOp(OpCode::Query as i32)).into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_ids_are_strictly_monotonic() {
        let gen = RequestIdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        let c = gen.next();
        assert!(a < b);
        assert!(b < c);
    }

    #[tokio::test]
    async fn op_msg_round_trips_uncompressed() {
        let doc = bson::doc! { "ok": 1.0 };
        let mut body = Vec::new();
        doc.to_writer(&mut body).unwrap();

        let mut buf = Vec::new();
        write_command(&mut buf, 5, true, &body, Compressor::Noop).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let incoming = read_message(&mut cursor).await.unwrap();
        assert_eq!(incoming.header.request_id, 5);
        let decoded: bson::Document = bson::from_slice(&incoming.document_bytes).unwrap();
        assert_eq!(decoded, doc);
    }

    #[cfg(feature = "zlib-compression")]
    #[tokio::test]
    async fn op_msg_round_trips_compressed() {
        let doc = bson::doc! { "ok": 1.0, "payload": "x".repeat(200) };
        let mut body = Vec::new();
        doc.to_writer(&mut body).unwrap();

        let mut buf = Vec::new();
        write_command(&mut buf, 9, true, &body, Compressor::Zlib { level: 6 })
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let incoming = read_message(&mut cursor).await.unwrap();
        let decoded: bson::Document = bson::from_slice(&incoming.document_bytes).unwrap();
        assert_eq!(decoded, doc);
    }
}
