//! Wire message framing (C2): the `(length, requestID, responseTo, opCode)` header shared by
//! every wire protocol message, per spec §4.2 and §6.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ErrorKind, ProtocolError, Result};

/// The wire protocol op codes this core understands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OpCode {
    Reply = 1,
    Query = 2004,
    Compressed = 2012,
    Message = 2013,
}

impl OpCode {
    pub fn from_i32(i: i32) -> Result<Self> {
        match i {
            1 => Ok(OpCode::Reply),
            2004 => Ok(OpCode::Query),
            2012 => Ok(OpCode::Compressed),
            2013 => Ok(OpCode::Message),
            other => Err(ErrorKind::Protocol(ProtocolError::UnknownOp(other)).into()),
        }
    }
}

/// The header for any wire protocol message. Request headers use a strictly monotonic 32-bit
/// `request_id`, assigned by [`crate::wire::RequestIdGenerator`]; the matching reply carries that
/// value back in `response_to`.
#[derive(Debug, Clone)]
pub struct Header {
    pub length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

impl Header {
    pub const LENGTH: usize = 4 * std::mem::size_of::<i32>();

    pub(crate) async fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut W) -> Result<()> {
        stream.write_all(&self.length.to_le_bytes()).await?;
        stream.write_all(&self.request_id.to_le_bytes()).await?;
        stream.write_all(&self.response_to.to_le_bytes()).await?;
        stream.write_all(&(self.op_code as i32).to_le_bytes()).await?;
        Ok(())
    }

    pub(crate) async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let length = read_i32_or_truncated(reader, "length").await?;
        let request_id = read_i32_or_truncated(reader, "request_id").await?;
        let response_to = read_i32_or_truncated(reader, "response_to").await?;
        let op_code_raw = read_i32_or_truncated(reader, "op_code").await?;
        let op_code = OpCode::from_i32(op_code_raw)?;
        Ok(Self {
            length,
            request_id,
            response_to,
            op_code,
        })
    }
}

async fn read_i32_or_truncated<R: AsyncRead + Unpin>(reader: &mut R, field: &str) -> Result<i32> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(i32::from_le_bytes(buf)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ErrorKind::Protocol(ProtocolError::Frame {
                expected: Header::LENGTH,
                actual: 0,
            })
            .into())
        }
        Err(e) => {
            let _ = field;
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn header_round_trips_through_bytes() {
        let header = Header {
            length: 42,
            request_id: 7,
            response_to: 0,
            op_code: OpCode::Message,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).await.unwrap();
        assert_eq!(buf.len(), Header::LENGTH);

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = Header::read_from(&mut cursor).await.unwrap();
        assert_eq!(decoded.length, 42);
        assert_eq!(decoded.request_id, 7);
        assert_eq!(decoded.op_code, OpCode::Message);
    }

    #[tokio::test]
    async fn unknown_opcode_is_rejected() {
        let err = OpCode::from_i32(9999).unwrap_err();
        assert!(matches!(
            &*err.kind,
            ErrorKind::Protocol(ProtocolError::UnknownOp(9999))
        ));
    }

    #[tokio::test]
    async fn truncated_frame_is_reported() {
        let mut cursor = std::io::Cursor::new(vec![1u8, 2, 3]);
        let err = Header::read_from(&mut cursor).await.unwrap_err();
        assert!(matches!(&*err.kind, ErrorKind::Protocol(ProtocolError::Frame { .. })));
    }
}
